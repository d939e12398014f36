// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use wgportal_core::ManagerError;

use crate::portal::PortalError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal server error")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::InterfaceNotFound(_) | ManagerError::PeerNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            ManagerError::InterfaceAlreadyExists(_) => Self::Conflict(err.to_string()),
            ManagerError::Validation(_)
            | ManagerError::Parse { .. }
            | ManagerError::Key { .. }
            | ManagerError::Exhausted { .. } => Self::Validation(err.to_string()),
            ManagerError::Persistence { .. } => {
                tracing::error!(error = %err, "change applied to the kernel but not stored");
                Self::Internal
            }
            ManagerError::Kernel { .. } | ManagerError::Load(_) => {
                tracing::error!(error = %err, "manager error");
                Self::Internal
            }
        }
    }
}

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::Manager(e) => e.into(),
            PortalError::MissingSearchFilter | PortalError::Page(_) => {
                Self::Validation(err.to_string())
            }
        }
    }
}
