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
use serde::Deserialize;
use wgportal_types::{InterfaceIdentifier, Peer, PeerIdentifier, UserIdentifier};

use crate::error::ApiError;
use crate::extract::AdminAuth;
use crate::portal::{PeerSearch, Portal, Ports};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrepareQuery {
    user: Option<UserIdentifier>,
}

async fn find_peers<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    query: web::Query<PeerSearch>,
) -> Result<HttpResponse, ApiError> {
    let peers = portal.find_peers(&query).await?;
    Ok(HttpResponse::Ok().json(peers))
}

async fn prepare_peer<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<InterfaceIdentifier>,
    query: web::Query<PrepareQuery>,
) -> Result<HttpResponse, ApiError> {
    let user = query.into_inner().user.filter(|u| !u.is_empty());
    let peer = portal.prepare_new_peer(&path.into_inner(), user).await?;
    Ok(HttpResponse::Ok().json(peer))
}

async fn create_peer<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    body: web::Json<Peer>,
) -> Result<HttpResponse, ApiError> {
    let peer = portal.create_peer(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(peer))
}

async fn get_peer<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<PeerIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let peer = portal.manager().peer(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(peer))
}

async fn update_peer<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<PeerIdentifier>,
    body: web::Json<Peer>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let peer = body.into_inner();
    if peer.identifier != id {
        return Err(ApiError::Validation(format!(
            "body identifier {} does not match {id}",
            peer.identifier
        )));
    }
    let peer = portal.update_peer(peer).await?;
    Ok(HttpResponse::Ok().json(peer))
}

async fn delete_peer<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<PeerIdentifier>,
) -> Result<HttpResponse, ApiError> {
    portal.delete_peer(&path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn peer_config<P: Ports>(
    _auth: AdminAuth,
    portal: web::Data<Portal<P>>,
    path: web::Path<PeerIdentifier>,
) -> Result<HttpResponse, ApiError> {
    let config = portal.manager().peer_config(&path.into_inner()).await?;
    Ok(super::wg_quick(config))
}

pub fn configure<P: Ports>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/peers")
            .route(web::get().to(find_peers::<P>))
            .route(web::post().to(create_peer::<P>)),
    )
    .service(
        web::resource("/api/interfaces/{id}/peers/prepare")
            .route(web::post().to(prepare_peer::<P>)),
    )
    .service(
        web::resource("/api/peers/{id}")
            .route(web::get().to(get_peer::<P>))
            .route(web::put().to(update_peer::<P>))
            .route(web::delete().to(delete_peer::<P>)),
    )
    .service(web::resource("/api/peers/{id}/config").route(web::get().to(peer_config::<P>)));
}
