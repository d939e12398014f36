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


use thiserror::Error;
use wgportal_types::{InterfaceIdentifier, PeerIdentifier};

use crate::cidr::CidrError;
use crate::keys::KeyError;
use crate::lowlevel::LowLevelError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("interface {0} not found")]
    InterfaceNotFound(InterfaceIdentifier),

    #[error("peer {0} not found")]
    PeerNotFound(PeerIdentifier),

    #[error("interface {0} already exists")]
    InterfaceAlreadyExists(InterfaceIdentifier),

    #[error("invalid record: {0}")]
    Validation(String),

    /// A netlink or WireGuard control call failed. Nothing was persisted.
    #[error("failed to {action} for {target}: {source}")]
    Kernel {
        action: &'static str,
        target: String,
        #[source]
        source: LowLevelError,
    },

    /// The kernel (if involved) was updated but the store write failed, so
    /// kernel and memory are ahead of the store.
    #[error("failed to {action} {target} in store: {source}")]
    Persistence {
        action: &'static str,
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to load state from store: {0}")]
    Load(#[source] StoreError),

    #[error("failed to parse {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: CidrError,
    },

    #[error("invalid key in {context}: {source}")]
    Key {
        context: String,
        #[source]
        source: KeyError,
    },

    #[error("ip range exceeded in {subnet}")]
    Exhausted { subnet: String },
}

impl ManagerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InterfaceNotFound(_) | Self::PeerNotFound(_))
    }

    /// Whether the store lags behind the kernel and memory.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    pub(crate) fn kernel(action: &'static str, target: impl ToString, source: LowLevelError) -> Self {
        Self::Kernel { action, target: target.to_string(), source }
    }

    pub(crate) fn persistence(action: &'static str, target: impl ToString, source: StoreError) -> Self {
        Self::Persistence { action, target: target.to_string(), source }
    }

    pub(crate) fn parse(context: impl ToString, source: CidrError) -> Self {
        Self::Parse { context: context.to_string(), source }
    }

    pub(crate) fn key(context: impl ToString, source: KeyError) -> Self {
        Self::Key { context: context.to_string(), source }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
