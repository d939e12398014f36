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


use actix_web::{HttpResponse, web};
use serde::Serialize;
use wgportal_types::{Interface, InterfaceIdentifier, InterfaceStats, PeerStats};

use crate::error::ApiError;
use crate::extract::AdminAuth;
use crate::portal::{Portal, Ports};

#[derive(Debug, Serialize)]
struct FreshIpsResponse {
    address_str: String,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    interface: Option<InterfaceStats>,
    peers: Vec<PeerStats>,
}

async fn list_interfaces<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(portal.manager().interfaces().await))
}

async fn prepare_interface<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let iface = portal.prepare_new_interface(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(iface))
}

async fn create_interface<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    body: web::Json<Interface>,
) -> Result<HttpResponse, ApiError> {
    let iface = portal.create_interface(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(iface))
}

async fn get_interface<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let iface = portal.manager().interface(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(iface))
}

async fn update_interface<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
    body: web::Json<Interface>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let cfg = body.into_inner();
    if cfg.identifier != id {
        return Err(ApiError::Validation(format!(
            "body identifier {} does not match {id}",
            cfg.identifier
        )));
    }
    let iface = portal.update_interface(cfg).await?;
    Ok(HttpResponse::Ok().json(iface))
}

async fn delete_interface<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    portal.delete_interface(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn apply_defaults<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    portal.manager().apply_default_configs(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn interface_config<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let config = portal.manager().interface_config(&path.into_inner()).await?;
    Ok(super::wg_quick(config))
}

async fn fresh_ips<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let address_str = portal.manager().fresh_ips(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(FreshIpsResponse { address_str }))
}

async fn interface_stats<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let interface = portal.manager().interface_stats(&id).await?;
    let peers = portal.manager().peer_stats(&id).await?;
    Ok(HttpResponse::Ok().json(StatsResponse { interface, peers }))
}

async fn list_importable<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(portal.importable_interfaces().await?))
}

async fn import_interface<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let iface = portal.import_interface(&path.into_inner()).await?;
    Ok(HttpResponse::Created().json(iface))
}

pub fn configure<P: Ports>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/interfaces")
            .route(web::get().to(list_interfaces::<P>))
            .route(web::post().to(create_interface::<P>)),
    )
    .service(
        web::resource("/api/interfaces/prepare/{id}").route(web::get().to(prepare_interface::<P>)),
    )
    .service(
        web::resource("/api/interfaces/{id}")
            .route(web::get().to(get_interface::<P>))
            .route(web::put().to(update_interface::<P>))
            .route(web::delete().to(delete_interface::<P>)),
    )
    .service(
        web::resource("/api/interfaces/{id}/apply-defaults")
            .route(web::post().to(apply_defaults::<P>)),
    )
    .service(
        web::resource("/api/interfaces/{id}/config").route(web::get().to(interface_config::<P>)),
    )
    .service(
        web::resource("/api/interfaces/{id}/fresh-ips").route(web::get().to(fresh_ips::<P>)),
    )
    .service(
        web::resource("/api/interfaces/{id}/stats").route(web::get().to(interface_stats::<P>)),
    )
    .service(
        web::resource("/api/importable-interfaces").route(web::get().to(list_importable::<P>)),
    )
    .service(
        web::resource("/api/importable-interfaces/{id}")
            .route(web::post().to(import_interface::<P>)),
    );
}
