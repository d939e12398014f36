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


//! Orchestration on top of the [`Manager`]: preparing new records,
//! create/update flows and peer search.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use wgportal_core::lowlevel::{CurrentNetlink, CurrentWireGuard};
use wgportal_core::manager::apply_defaults;
use wgportal_core::{
    KeyGenerator, Manager, ManagerError, NetlinkClient, StoreBackend, WireGuardClient,
    WireGuardStore, X25519KeyGenerator,
};
use wgportal_types::{
    ImportableInterface, Interface, InterfaceIdentifier, InterfaceType, Peer, PeerIdentifier,
    PeerInterfaceConfig, UserIdentifier,
};

use crate::config::Config;
use crate::paginate::{NoMorePages, Paginator};

/// The set of ports a portal runs on.
pub trait Ports: 'static {
    type Netlink: NetlinkClient + 'static;
    type WireGuard: WireGuardClient + 'static;
    type Store: WireGuardStore + 'static;
}

/// The host kernel with the configured store.
pub struct HostPorts;

impl Ports for HostPorts {
    type Netlink = CurrentNetlink;
    type WireGuard = CurrentWireGuard;
    type Store = StoreBackend;
}

pub type PortalManager<P> =
    Manager<<P as Ports>::Netlink, <P as Ports>::WireGuard, <P as Ports>::Store>;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("specify at least an interface or a user filter")]
    MissingSearchFilter,

    #[error("invalid page offset: {0}")]
    Page(#[from] NoMorePages),
}

pub type Result<T> = std::result::Result<T, PortalError>;

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub default_listen_port: u16,
    pub default_driver_type: String,
    pub temporary_peer_ttl: chrono::Duration,
}

impl From<&Config> for PortalSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_listen_port: config.default_listen_port,
            default_driver_type: config.default_driver_type.clone(),
            temporary_peer_ttl: config.temporary_peer_ttl(),
        }
    }
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerSort {
    #[default]
    Identifier,
    #[serde(alias = "name", alias = "displayname")]
    DisplayName,
    #[serde(alias = "publickey")]
    PublicKey,
}

/// Peer search parameters. At least one of `interface` and `user` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeerSearch {
    pub interface: Option<InterfaceIdentifier>,
    pub user: Option<UserIdentifier>,
    /// Case-insensitive substring matched against identifier, display
    /// name, public key and addresses.
    pub filter: String,
    pub sort: PeerSort,
    pub desc: bool,
    pub offset: usize,
    /// Page size; 0 returns everything.
    pub size: usize,
}

impl PeerSearch {
    fn matches(&self, peer: &Peer) -> bool {
        let needle = self.filter.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [
            peer.identifier.as_str(),
            peer.display_name.as_str(),
            peer.key_pair.public_key.as_str(),
            peer.interface.address_str.value().as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    }

    fn compare(&self, a: &Peer, b: &Peer) -> Ordering {
        let order = match self.sort {
            PeerSort::Identifier => a.identifier.cmp(&b.identifier),
            PeerSort::DisplayName => a.display_name.cmp(&b.display_name),
            PeerSort::PublicKey => a.key_pair.public_key.cmp(&b.key_pair.public_key),
        };
        if self.desc { order.reverse() } else { order }
    }
}

pub struct Portal<P: Ports> {
    manager: Arc<PortalManager<P>>,
    keys: Arc<dyn KeyGenerator>,
    settings: PortalSettings,
}

impl<P: Ports> Clone for Portal<P> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            keys: Arc::clone(&self.keys),
            settings: self.settings.clone(),
        }
    }
}

impl<P: Ports> Portal<P> {
    pub fn new(manager: PortalManager<P>, settings: PortalSettings) -> Self {
        Self {
            manager: Arc::new(manager),
            keys: Arc::new(X25519KeyGenerator),
            settings,
        }
    }

    pub fn with_key_generator(mut self, keys: impl KeyGenerator + 'static) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    pub fn manager(&self) -> &PortalManager<P> {
        &self.manager
    }

    // -- Interfaces --

    /// A new, uncommitted server interface with a fresh key pair and the
    /// next listen port after the highest one in use.
    pub async fn prepare_new_interface(&self, id: &InterfaceIdentifier) -> Result<Interface> {
        if self.manager.interface(id).await.is_ok() {
            return Err(ManagerError::InterfaceAlreadyExists(id.clone()).into());
        }

        let listen_port = self
            .manager
            .interfaces()
            .await
            .iter()
            .map(|i| i.listen_port)
            .max()
            .map_or(self.settings.default_listen_port, |p| p.saturating_add(1));

        let mut iface = Interface::new(id.clone());
        iface.key_pair = self.keys.fresh_keypair();
        iface.listen_port = listen_port;
        iface.display_name = id.to_string();
        iface.interface_type = InterfaceType::Server;
        iface.driver_type = self.settings.default_driver_type.clone();
        Ok(iface)
    }

    /// Create the kernel device for `cfg` and apply the full configuration.
    pub async fn create_interface(&self, cfg: Interface) -> Result<Interface> {
        let id = cfg.identifier.clone();
        self.manager.create_interface(&id).await?;
        self.manager.update_interface(cfg).await?;
        Ok(self.manager.interface(&id).await?)
    }

    pub async fn update_interface(&self, cfg: Interface) -> Result<Interface> {
        let id = cfg.identifier.clone();
        self.manager.update_interface(cfg).await?;
        Ok(self.manager.interface(&id).await?)
    }

    pub async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<()> {
        Ok(self.manager.delete_interface(id).await?)
    }

    pub async fn importable_interfaces(&self) -> Result<Vec<ImportableInterface>> {
        Ok(self.manager.importable_interfaces().await?)
    }

    /// Start managing the unmanaged kernel device `id`.
    pub async fn import_interface(&self, id: &InterfaceIdentifier) -> Result<Interface> {
        let candidate = self
            .manager
            .importable_interfaces()
            .await?
            .into_iter()
            .find(|c| &c.interface.identifier == id)
            .ok_or_else(|| ManagerError::InterfaceNotFound(id.clone()))?;
        self.manager.import_interface(candidate).await?;
        Ok(self.manager.interface(id).await?)
    }

    // -- Peers --

    /// A new peer of `iface_id` with fresh keys and addresses. It is held in
    /// memory as temporary until created, so its addresses are not handed
    /// out twice.
    pub async fn prepare_new_peer(
        &self,
        iface_id: &InterfaceIdentifier,
        user: Option<UserIdentifier>,
    ) -> Result<Peer> {
        let iface = self.manager.interface(iface_id).await?;
        let addresses = self.manager.fresh_ips(iface_id).await?;
        let key_pair = self.keys.fresh_keypair();
        let short_key: String = key_pair.public_key.chars().take(8).collect();

        let mut peer = Peer {
            identifier: PeerIdentifier(key_pair.public_key.clone()),
            display_name: format!("Peer {short_key}"),
            user_identifier: user,
            key_pair,
            preshared_key: Some(self.keys.preshared_key()),
            temporary: Some(Utc::now()),
            interface: PeerInterfaceConfig::from_interface(&iface, addresses),
            ..Peer::default()
        };
        apply_defaults(&iface, &mut peer);

        self.manager.save_peers(vec![peer.clone()]).await?;
        info!(interface = %iface_id, peer = %peer.identifier, "prepared peer");
        Ok(peer)
    }

    /// Commit a peer. A prepared peer loses its temporary marker.
    pub async fn create_peer(&self, mut peer: Peer) -> Result<Peer> {
        match self.manager.peer(&peer.identifier).await {
            Ok(existing) if !existing.is_temporary() => {
                return Err(ManagerError::Validation(format!(
                    "peer {} already exists",
                    peer.identifier
                ))
                .into());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        peer.temporary = None;
        let id = peer.identifier.clone();
        self.manager.save_peers(vec![peer]).await?;
        Ok(self.manager.peer(&id).await?)
    }

    /// Replace an existing peer. Whether it is temporary is kept as is.
    pub async fn update_peer(&self, mut peer: Peer) -> Result<Peer> {
        let existing = self.manager.peer(&peer.identifier).await?;
        peer.temporary = existing.temporary;
        let id = peer.identifier.clone();
        self.manager.save_peers(vec![peer]).await?;
        Ok(self.manager.peer(&id).await?)
    }

    pub async fn delete_peer(&self, id: &PeerIdentifier) -> Result<()> {
        Ok(self.manager.remove_peer(id).await?)
    }

    pub async fn find_peers(&self, search: &PeerSearch) -> Result<Vec<Peer>> {
        let interface = search.interface.as_ref().filter(|i| !i.is_empty());
        let user = search.user.as_ref().filter(|u| !u.is_empty());

        let peers = match (interface, user) {
            (Some(iface), Some(user)) => self
                .manager
                .peers_for_user(user)
                .await
                .into_iter()
                .filter(|p| &p.interface.identifier == iface)
                .collect(),
            (Some(iface), None) => self.manager.peers(iface).await?,
            (None, Some(user)) => self.manager.peers_for_user(user).await,
            (None, None) => return Err(PortalError::MissingSearchFilter),
        };

        let matching = peers.into_iter().filter(|p| search.matches(p)).collect();
        Ok(Paginator::new(matching)
            .sort_by(|a, b| search.compare(a, b))
            .size(search.size)
            .paginate(search.offset)?)
    }

    // -- Housekeeping --

    pub async fn run_background_tasks(&self) {
        let expired = self
            .manager
            .expire_temporary_peers(self.settings.temporary_peer_ttl)
            .await;
        if expired > 0 {
            info!(count = expired, "dropped stale prepared peers");
        }
        self.manager.refresh_stats().await;
    }

    /// Run [`Self::run_background_tasks`] forever at `interval`.
    pub async fn background_loop(self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.run_background_tasks().await;
        }
    }
}
