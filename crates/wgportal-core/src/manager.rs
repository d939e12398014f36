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


//! The interface/peer manager.
//!
//! [`Manager`] owns the authoritative in-memory model and pushes every
//! change to the kernel first and the store second. A single
//! [`tokio::sync::RwLock`] guards the model; mutations hold the write lock
//! for their whole duration, kernel and store calls included, so at most
//! one mutation runs at a time.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use wgportal_types::{
    ConfigOption, ImportableInterface, Interface, InterfaceIdentifier, InterfaceStats,
    InterfaceType, KeyPair, Peer, PeerIdentifier, PeerInterfaceConfig, PeerStats, PreSharedKey,
    UserIdentifier,
};

use crate::cidr;
use crate::error::{ManagerError, Result};
use crate::keys::Key;
use crate::lowlevel::{Device, DeviceConfig, DevicePeer, NetlinkClient, PeerConfig, WireGuardClient};
use crate::render::ConfigRenderer;
use crate::store::WireGuardStore;

/// Peers with a handshake younger than this many seconds count as connected.
const CONNECTED_WINDOW_SECS: i64 = 180;

/// Linux limits interface names to 15 bytes.
const MAX_INTERFACE_NAME: usize = 15;

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) interfaces: BTreeMap<InterfaceIdentifier, Interface>,
    pub(crate) peers: BTreeMap<InterfaceIdentifier, BTreeMap<PeerIdentifier, Peer>>,
    peer_stats: HashMap<PeerIdentifier, PeerStats>,
    interface_stats: HashMap<InterfaceIdentifier, InterfaceStats>,
}

impl State {
    fn find_peer(&self, id: &PeerIdentifier) -> Option<&Peer> {
        self.peers.values().find_map(|peers| peers.get(id))
    }

    fn insert_interface(&mut self, iface: Interface) {
        self.peers.entry(iface.identifier.clone()).or_default();
        self.interfaces.insert(iface.identifier.clone(), iface);
    }
}

pub struct Manager<N, W, S> {
    nl: N,
    wg: W,
    store: S,
    renderer: ConfigRenderer,
    pub(crate) state: RwLock<State>,
}

impl<N, W, S> Manager<N, W, S>
where
    N: NetlinkClient,
    W: WireGuardClient,
    S: WireGuardStore,
{
    /// Build a manager and load all known interfaces and peers from `store`.
    pub async fn new(nl: N, wg: W, store: S) -> Result<Self> {
        let manager = Self {
            nl,
            wg,
            store,
            renderer: ConfigRenderer::default(),
            state: RwLock::new(State::default()),
        };
        manager.initialize_from_store().await?;
        Ok(manager)
    }

    pub fn with_renderer(mut self, renderer: ConfigRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn initialize_from_store(&self) -> Result<()> {
        let ids = self.store.get_interface_ids().await.map_err(ManagerError::Load)?;
        let loaded = self
            .store
            .get_all_interfaces(&ids)
            .await
            .map_err(ManagerError::Load)?;

        let mut state = self.state.write().await;
        let mut peer_count = 0;
        for (iface, peers) in loaded {
            let id = iface.identifier.clone();
            state.insert_interface(iface);
            let slot = state.peers.entry(id).or_default();
            for peer in peers {
                peer_count += 1;
                slot.insert(peer.identifier.clone(), peer);
            }
        }
        info!(interfaces = state.interfaces.len(), peers = peer_count, "loaded state from store");
        Ok(())
    }

    // -- Interfaces --

    /// All interfaces, sorted by identifier.
    pub async fn interfaces(&self) -> Vec<Interface> {
        self.state.read().await.interfaces.values().cloned().collect()
    }

    pub async fn interface(&self, id: &InterfaceIdentifier) -> Result<Interface> {
        self.state
            .read()
            .await
            .interfaces
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::InterfaceNotFound(id.clone()))
    }

    /// Create the kernel link for `id`, bring it up and start tracking it.
    #[tracing::instrument(skip(self))]
    pub async fn create_interface(&self, id: &InterfaceIdentifier) -> Result<()> {
        if id.is_empty() {
            return Err(ManagerError::Validation("missing interface identifier".into()));
        }
        if id.as_str().len() > MAX_INTERFACE_NAME {
            return Err(ManagerError::Validation(format!(
                "interface name {id} is longer than {MAX_INTERFACE_NAME} bytes"
            )));
        }

        let mut state = self.state.write().await;
        if state.interfaces.contains_key(id) {
            return Err(ManagerError::InterfaceAlreadyExists(id.clone()));
        }

        self.nl
            .link_add(id.as_str())
            .await
            .map_err(|e| ManagerError::kernel("create link", id, e))?;
        let link = self
            .nl
            .link_by_name(id.as_str())
            .await
            .map_err(|e| ManagerError::kernel("open link", id, e))?;
        self.nl
            .link_set_up(&link)
            .await
            .map_err(|e| ManagerError::kernel("enable link", id, e))?;

        let iface = Interface::new(id.clone());
        state.insert_interface(iface.clone());
        info!(interface = %id, "created interface");

        self.store
            .save_interface(&iface)
            .await
            .map_err(|e| ManagerError::persistence("save interface", id, e))
    }

    /// Push `cfg` to the kernel, then commit it to memory and the store.
    ///
    /// The kernel steps run in order: MTU, addresses, WireGuard settings,
    /// link state. A failing step aborts the call without touching memory
    /// or the store, but earlier steps stay applied in the kernel.
    #[tracing::instrument(skip(self, cfg), fields(interface = %cfg.identifier))]
    pub async fn update_interface(&self, cfg: Interface) -> Result<()> {
        check_interface(&cfg)?;
        let id = cfg.identifier.clone();

        let addresses = cidr::parse_ip_address_string(&cfg.address_str)
            .map_err(|e| ManagerError::parse(format!("addresses of interface {id}"), e))?;
        let private_key = match cfg.key_pair.private_key.trim() {
            "" => None,
            raw => Some(
                Key::parse(raw).map_err(|e| ManagerError::key(format!("interface {id}"), e))?,
            ),
        };

        let mut state = self.state.write().await;
        if !state.interfaces.contains_key(&id) {
            return Err(ManagerError::InterfaceNotFound(id));
        }

        let link = self
            .nl
            .link_by_name(id.as_str())
            .await
            .map_err(|e| ManagerError::kernel("open link", &id, e))?;
        if cfg.mtu != 0 {
            self.nl
                .link_set_mtu(&link, cfg.mtu)
                .await
                .map_err(|e| ManagerError::kernel("set MTU", &id, e))?;
        }
        for (i, addr) in addresses.iter().enumerate() {
            let res = if i == 0 {
                self.nl.addr_replace(&link, addr).await
            } else {
                self.nl.addr_add(&link, addr).await
            };
            res.map_err(|e| ManagerError::kernel("set address", &id, e))?;
        }

        let device = DeviceConfig {
            private_key,
            listen_port: Some(cfg.listen_port),
            firewall_mark: (cfg.firewall_mark != 0).then_some(cfg.firewall_mark),
            peers: Vec::new(),
        };
        self.wg
            .configure_device(id.as_str(), &device)
            .await
            .map_err(|e| ManagerError::kernel("configure device", &id, e))?;

        if cfg.is_enabled() {
            self.nl
                .link_set_up(&link)
                .await
                .map_err(|e| ManagerError::kernel("enable link", &id, e))?;
        } else {
            self.nl
                .link_set_down(&link)
                .await
                .map_err(|e| ManagerError::kernel("disable link", &id, e))?;
        }

        state.interfaces.insert(id.clone(), cfg.clone());
        info!(interface = %id, enabled = cfg.is_enabled(), "updated interface");

        self.store
            .save_interface(&cfg)
            .await
            .map_err(|e| ManagerError::persistence("save interface", &id, e))
    }

    /// Delete the kernel link, then the stored peers and finally the stored
    /// interface, then forget them. Memory is left untouched when any step
    /// fails, and the store never keeps peers whose interface is gone.
    #[tracing::instrument(skip(self))]
    pub async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.interfaces.contains_key(id) {
            return Err(ManagerError::InterfaceNotFound(id.clone()));
        }

        self.nl
            .link_del(id.as_str())
            .await
            .map_err(|e| ManagerError::kernel("delete link", id, e))?;

        let peers = state.peers.get(id).map(|p| p.values().cloned().collect::<Vec<_>>());
        for peer in peers.unwrap_or_default() {
            if peer.is_temporary() {
                continue;
            }
            self.store
                .delete_peer(&peer.identifier)
                .await
                .map_err(|e| ManagerError::persistence("delete peer", &peer.identifier, e))?;
        }

        self.store
            .delete_interface(id)
            .await
            .map_err(|e| ManagerError::persistence("delete interface", id, e))?;

        state.interfaces.remove(id);
        if let Some(peers) = state.peers.remove(id) {
            for peer_id in peers.keys() {
                state.peer_stats.remove(peer_id);
            }
        }
        state.interface_stats.remove(id);
        info!(interface = %id, "deleted interface");
        Ok(())
    }

    /// Push the interface's peer defaults into every peer that has not
    /// overridden them and persist each peer. Stops at the first store
    /// failure; peers handled before it keep their new values.
    #[tracing::instrument(skip(self))]
    pub async fn apply_default_configs(&self, id: &InterfaceIdentifier) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let iface = state
            .interfaces
            .get(id)
            .ok_or_else(|| ManagerError::InterfaceNotFound(id.clone()))?;

        let mut updated = 0usize;
        if let Some(peers) = state.peers.get_mut(id) {
            for peer in peers.values_mut() {
                apply_defaults(iface, peer);
                if peer.is_temporary() {
                    continue;
                }
                self.store
                    .save_peer(peer)
                    .await
                    .map_err(|e| ManagerError::persistence("save peer defaults", &peer.identifier, e))?;
                updated += 1;
            }
        }
        info!(interface = %id, count = updated, "applied peer defaults");
        Ok(())
    }

    // -- Peers --

    /// All peers of one interface, sorted by identifier.
    pub async fn peers(&self, id: &InterfaceIdentifier) -> Result<Vec<Peer>> {
        let state = self.state.read().await;
        if !state.interfaces.contains_key(id) {
            return Err(ManagerError::InterfaceNotFound(id.clone()));
        }
        Ok(state
            .peers
            .get(id)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default())
    }

    /// All peers owned by `user`, across interfaces. Never fails.
    pub async fn peers_for_user(&self, user: &UserIdentifier) -> Vec<Peer> {
        self.state
            .read()
            .await
            .peers
            .values()
            .flat_map(|peers| peers.values())
            .filter(|p| p.user_identifier.as_ref() == Some(user))
            .cloned()
            .collect()
    }

    pub async fn peer(&self, id: &PeerIdentifier) -> Result<Peer> {
        self.state
            .read()
            .await
            .find_peer(id)
            .cloned()
            .ok_or_else(|| ManagerError::PeerNotFound(id.clone()))
    }

    /// Upsert peers in order. Temporary peers are only kept in memory; all
    /// others are pushed to the kernel and then persisted.
    ///
    /// The batch is not atomic: peers handled before a failure stay
    /// committed.
    #[tracing::instrument(skip(self, peers), fields(count = peers.len()))]
    pub async fn save_peers(&self, peers: Vec<Peer>) -> Result<()> {
        let mut state = self.state.write().await;

        for peer in peers {
            check_peer(&peer)?;
            let iface_id = peer.interface.identifier.clone();
            let iface_type = state
                .interfaces
                .get(&iface_id)
                .map(|i| i.interface_type)
                .ok_or_else(|| ManagerError::InterfaceNotFound(iface_id.clone()))?;

            let elsewhere = state
                .peers
                .iter()
                .any(|(owner, peers)| owner != &iface_id && peers.contains_key(&peer.identifier));
            if elsewhere {
                return Err(ManagerError::Validation(format!(
                    "peer {} already belongs to another interface",
                    peer.identifier
                )));
            }

            let delta = if peer.is_temporary() {
                None
            } else {
                Some(peer_delta(iface_type, &peer).await?)
            };

            state
                .peers
                .entry(iface_id.clone())
                .or_default()
                .insert(peer.identifier.clone(), peer.clone());

            let Some(delta) = delta else {
                debug!(peer = %peer.identifier, "temporary peer kept in memory only");
                continue;
            };

            debug!(interface = %iface_id, peer = %peer.identifier, ?delta, "applying peer delta");
            let device = DeviceConfig { peers: vec![delta], ..DeviceConfig::default() };
            self.wg
                .configure_device(iface_id.as_str(), &device)
                .await
                .map_err(|e| ManagerError::kernel("configure peer", &peer.identifier, e))?;

            self.store
                .save_peer(&peer)
                .await
                .map_err(|e| ManagerError::persistence("save peer", &peer.identifier, e))?;
            info!(interface = %iface_id, peer = %peer.identifier, "saved peer");
        }
        Ok(())
    }

    /// Remove a peer from the kernel, the store and memory, in that order.
    /// On failure the peer stays wherever it still was.
    #[tracing::instrument(skip(self))]
    pub async fn remove_peer(&self, id: &PeerIdentifier) -> Result<()> {
        let mut state = self.state.write().await;
        let peer = state
            .find_peer(id)
            .cloned()
            .ok_or_else(|| ManagerError::PeerNotFound(id.clone()))?;
        let iface_id = peer.interface.identifier.clone();

        if !peer.is_temporary() {
            let public_key = Key::parse(&peer.key_pair.public_key)
                .map_err(|e| ManagerError::key(format!("public key of peer {id}"), e))?;
            let device = DeviceConfig {
                peers: vec![PeerConfig::removal(public_key)],
                ..DeviceConfig::default()
            };
            self.wg
                .configure_device(iface_id.as_str(), &device)
                .await
                .map_err(|e| ManagerError::kernel("remove peer", id, e))?;

            self.store
                .delete_peer(id)
                .await
                .map_err(|e| ManagerError::persistence("delete peer", id, e))?;
        }

        if let Some(peers) = state.peers.get_mut(&iface_id) {
            peers.remove(id);
        }
        state.peer_stats.remove(id);
        info!(interface = %iface_id, peer = %id, "removed peer");
        Ok(())
    }

    // -- Import --

    /// Kernel WireGuard devices that are not managed yet, converted into
    /// candidate records. Nothing is committed.
    pub async fn importable_interfaces(&self) -> Result<Vec<ImportableInterface>> {
        let devices = self
            .wg
            .devices()
            .await
            .map_err(|e| ManagerError::kernel("list devices", "host", e))?;

        let state = self.state.read().await;
        let mut importable = Vec::new();
        for device in devices {
            let id = InterfaceIdentifier(device.name.clone());
            if state.interfaces.contains_key(&id) {
                continue;
            }
            importable.push(self.convert_device(device).await?);
        }
        Ok(importable)
    }

    async fn convert_device(&self, device: Device) -> Result<ImportableInterface> {
        let id = InterfaceIdentifier(device.name.clone());
        let link = self
            .nl
            .link_by_name(&device.name)
            .await
            .map_err(|e| ManagerError::kernel("open link", &id, e))?;
        let addresses = self
            .nl
            .addr_list(&link)
            .await
            .map_err(|e| ManagerError::kernel("list addresses", &id, e))?;

        let mut iface = Interface::new(id);
        iface.key_pair = KeyPair {
            private_key: device.private_key.map(|k| k.to_string()).unwrap_or_default(),
            public_key: device.public_key.map(|k| k.to_string()).unwrap_or_default(),
        };
        iface.listen_port = device.listen_port;
        iface.firewall_mark = device.firewall_mark;
        iface.mtu = link.mtu;
        iface.address_str = cidr::ip_addresses_to_string(&addresses);
        iface.driver_type = "linux".into();
        if !link.up {
            iface.disabled = Some(Utc::now());
        }

        let peers = device.peers.iter().map(|p| convert_peer(p, &iface)).collect();
        Ok(ImportableInterface {
            interface: iface,
            import_location: "interface".into(),
            import_type: "unknown".into(),
            peers,
        })
    }

    /// Start managing a discovered device and its peers. The kernel is not
    /// touched.
    #[tracing::instrument(skip(self, cfg), fields(interface = %cfg.interface.identifier))]
    pub async fn import_interface(&self, cfg: ImportableInterface) -> Result<()> {
        let ImportableInterface { interface: iface, mut peers, .. } = cfg;
        check_interface(&iface)?;
        let id = iface.identifier.clone();

        let mut state = self.state.write().await;
        if state.interfaces.contains_key(&id) {
            return Err(ManagerError::InterfaceAlreadyExists(id));
        }
        for peer in &mut peers {
            if peer.interface.identifier.is_empty() {
                peer.interface.identifier = id.clone();
            }
            check_peer(peer)?;
            if peer.interface.identifier != id {
                return Err(ManagerError::Validation(format!(
                    "peer {} does not belong to interface {id}",
                    peer.identifier
                )));
            }
            if state.find_peer(&peer.identifier).is_some() {
                return Err(ManagerError::Validation(format!(
                    "peer {} already exists",
                    peer.identifier
                )));
            }
        }

        state.insert_interface(iface.clone());
        self.store
            .save_interface(&iface)
            .await
            .map_err(|e| ManagerError::persistence("save imported interface", &id, e))?;

        let count = peers.len();
        for peer in peers {
            let peer_id = peer.identifier.clone();
            state
                .peers
                .entry(id.clone())
                .or_default()
                .insert(peer_id.clone(), peer.clone());
            self.store
                .save_peer(&peer)
                .await
                .map_err(|e| ManagerError::persistence("save imported peer", &peer_id, e))?;
        }
        info!(interface = %id, peers = count, "imported interface");
        Ok(())
    }

    // -- Housekeeping --

    /// Drop temporary peers older than `max_age`. They were never written
    /// anywhere, so only memory changes. Returns how many were dropped.
    pub async fn expire_temporary_peers(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut state = self.state.write().await;
        let mut expired = 0;
        for (iface, peers) in state.peers.iter_mut() {
            peers.retain(|id, peer| match peer.temporary {
                Some(created) if created < cutoff => {
                    debug!(interface = %iface, peer = %id, "expired temporary peer");
                    expired += 1;
                    false
                }
                _ => true,
            });
        }
        if expired > 0 {
            info!(count = expired, "expired temporary peers");
        }
        expired
    }

    /// Poll every managed device and record per-peer and per-interface
    /// statistics. Devices the kernel does not know are skipped.
    pub async fn refresh_stats(&self) {
        let mut state = self.state.write().await;
        let ids: Vec<InterfaceIdentifier> = state.interfaces.keys().cloned().collect();
        let now = Utc::now();

        for id in ids {
            let device = match self.wg.device(id.as_str()).await {
                Ok(device) => device,
                Err(e) => {
                    warn!(interface = %id, error = %e, "skipping stats for device");
                    continue;
                }
            };

            let by_key: HashMap<String, PeerIdentifier> = state
                .peers
                .get(&id)
                .map(|peers| {
                    peers
                        .values()
                        .map(|p| (p.key_pair.public_key.clone(), p.identifier.clone()))
                        .collect()
                })
                .unwrap_or_default();

            let mut totals = InterfaceStats {
                identifier: id.clone(),
                peer_count: device.peers.len(),
                updated_at: now,
                ..InterfaceStats::default()
            };
            for kernel_peer in &device.peers {
                let key = kernel_peer.public_key.to_string();
                let peer_id = by_key.get(&key).cloned().unwrap_or(PeerIdentifier(key));
                totals.bytes_received += kernel_peer.rx_bytes;
                totals.bytes_transmitted += kernel_peer.tx_bytes;
                let stats = PeerStats {
                    identifier: peer_id.clone(),
                    last_handshake: kernel_peer.last_handshake,
                    last_endpoint: kernel_peer.endpoint.map(|e| e.to_string()),
                    connected: kernel_peer
                        .last_handshake
                        .is_some_and(|t| (now - t).num_seconds() < CONNECTED_WINDOW_SECS),
                    bytes_received: kernel_peer.rx_bytes,
                    bytes_transmitted: kernel_peer.tx_bytes,
                    updated_at: now,
                };
                state.peer_stats.insert(peer_id, stats);
            }
            state.interface_stats.insert(id, totals);
        }
    }

    /// Last recorded statistics of the peers of one interface.
    pub async fn peer_stats(&self, id: &InterfaceIdentifier) -> Result<Vec<PeerStats>> {
        let state = self.state.read().await;
        let peers = state
            .peers
            .get(id)
            .filter(|_| state.interfaces.contains_key(id))
            .ok_or_else(|| ManagerError::InterfaceNotFound(id.clone()))?;
        Ok(peers
            .keys()
            .filter_map(|peer_id| state.peer_stats.get(peer_id).cloned())
            .collect())
    }

    /// Last recorded statistics of one interface, if it was polled yet.
    pub async fn interface_stats(&self, id: &InterfaceIdentifier) -> Result<Option<InterfaceStats>> {
        let state = self.state.read().await;
        if !state.interfaces.contains_key(id) {
            return Err(ManagerError::InterfaceNotFound(id.clone()));
        }
        Ok(state.interface_stats.get(id).cloned())
    }

    // -- Config files --

    /// wg-quick file of an interface with all its peers.
    pub async fn interface_config(&self, id: &InterfaceIdentifier) -> Result<String> {
        let state = self.state.read().await;
        let iface = state
            .interfaces
            .get(id)
            .ok_or_else(|| ManagerError::InterfaceNotFound(id.clone()))?;
        let peers: Vec<Peer> = state
            .peers
            .get(id)
            .map(|p| p.values().filter(|p| !p.is_temporary()).cloned().collect())
            .unwrap_or_default();
        Ok(self.renderer.interface_config(iface, &peers))
    }

    /// wg-quick file for the peer's own side of the tunnel.
    pub async fn peer_config(&self, id: &PeerIdentifier) -> Result<String> {
        let state = self.state.read().await;
        let peer = state
            .find_peer(id)
            .ok_or_else(|| ManagerError::PeerNotFound(id.clone()))?;
        Ok(self.renderer.peer_config(peer))
    }
}

fn check_interface(cfg: &Interface) -> Result<()> {
    if cfg.identifier.is_empty() {
        return Err(ManagerError::Validation("missing interface identifier".into()));
    }
    Ok(())
}

fn check_peer(peer: &Peer) -> Result<()> {
    if peer.identifier.is_empty() {
        return Err(ManagerError::Validation("missing peer identifier".into()));
    }
    if peer.interface.identifier.is_empty() {
        return Err(ManagerError::Validation(format!(
            "missing interface identifier for peer {}",
            peer.identifier
        )));
    }
    Ok(())
}

/// Copy the interface's peer defaults into the non-custom fields of `peer`
/// and resync its view of the parent interface.
pub fn apply_defaults(iface: &Interface, peer: &mut Peer) {
    let defaults = &iface.peer_defaults;

    peer.endpoint.try_set_default(defaults.endpoint.clone());
    peer.allowed_ips_str.try_set_default(defaults.allowed_ips_str.clone());
    peer.persistent_keepalive.try_set_default(defaults.persistent_keepalive);

    let cfg = &mut peer.interface;
    cfg.identifier = iface.identifier.clone();
    cfg.interface_type = iface.interface_type;
    cfg.public_key = iface.key_pair.public_key.clone();

    cfg.dns_str.try_set_default(defaults.dns_str.clone());
    cfg.dns_search_str.try_set_default(defaults.dns_search_str.clone());
    cfg.mtu.try_set_default(defaults.mtu);
    cfg.firewall_mark.try_set_default(defaults.firewall_mark);
    cfg.routing_table.try_set_default(defaults.routing_table.clone());
    cfg.pre_up.try_set_default(defaults.pre_up.clone());
    cfg.post_up.try_set_default(defaults.post_up.clone());
    cfg.pre_down.try_set_default(defaults.pre_down.clone());
    cfg.post_down.try_set_default(defaults.post_down.clone());
}

/// Build the kernel delta for one peer of an interface of `iface_type`.
///
/// Client interfaces carry the remote endpoint and only the peer's allowed
/// IPs; server interfaces get allowed plus extra allowed IPs and no
/// endpoint. The delta never creates a peer the kernel does not know.
pub async fn peer_delta(iface_type: InterfaceType, peer: &Peer) -> Result<PeerConfig> {
    let id = &peer.identifier;
    let public_key = Key::parse(&peer.key_pair.public_key)
        .map_err(|e| ManagerError::key(format!("public key of peer {id}"), e))?;

    let preshared_key = match peer.preshared_key.as_ref().map(PreSharedKey::as_str) {
        None | Some("") => None,
        Some(raw) => Some(
            Key::parse(raw).map_err(|e| ManagerError::key(format!("pre-shared key of peer {id}"), e))?,
        ),
    };

    let endpoint = match iface_type {
        InterfaceType::Client => resolve_endpoint(id, peer.endpoint.value()).await,
        InterfaceType::Server => None,
    };

    let keepalive = *peer.persistent_keepalive.value();
    let persistent_keepalive =
        (keepalive != 0).then(|| u16::try_from(keepalive).unwrap_or(u16::MAX));

    let mut allowed_ips = cidr::parse_ip_address_string(peer.allowed_ips_str.value())
        .map_err(|e| ManagerError::parse(format!("allowed IPs of peer {id}"), e))?;
    if iface_type == InterfaceType::Server {
        let extra = cidr::parse_ip_address_string(&peer.extra_allowed_ips_str)
            .map_err(|e| ManagerError::parse(format!("extra allowed IPs of peer {id}"), e))?;
        allowed_ips.extend(extra);
    }

    Ok(PeerConfig {
        public_key,
        remove: false,
        update_only: true,
        preshared_key,
        endpoint,
        persistent_keepalive,
        replace_allowed_ips: true,
        allowed_ips,
    })
}

async fn resolve_endpoint(id: &PeerIdentifier, endpoint: &str) -> Option<SocketAddr> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return None;
    }
    match tokio::net::lookup_host(endpoint).await.map(|mut addrs| addrs.next()) {
        Ok(Some(addr)) => Some(addr),
        Ok(None) => {
            warn!(peer = %id, endpoint, "endpoint resolved to no address");
            None
        }
        Err(e) => {
            warn!(peer = %id, endpoint, error = %e, "failed to resolve endpoint");
            None
        }
    }
}

fn convert_peer(kernel: &DevicePeer, iface: &Interface) -> Peer {
    let key = kernel.public_key.to_string();
    let allowed = cidr::ip_addresses_to_string(&kernel.allowed_ips);

    let mut interface = PeerInterfaceConfig::from_interface(iface, allowed.clone());
    interface.mtu = ConfigOption::Default(iface.mtu);

    Peer {
        identifier: PeerIdentifier(key.clone()),
        display_name: format!("Autodetected Peer ({})", &key[..8]),
        endpoint: ConfigOption::Default(kernel.endpoint.map(|e| e.to_string()).unwrap_or_default()),
        allowed_ips_str: ConfigOption::Default(allowed),
        key_pair: KeyPair { private_key: String::new(), public_key: key },
        preshared_key: kernel.preshared_key.map(|k| PreSharedKey(k.to_string())),
        persistent_keepalive: ConfigOption::Default(u32::from(kernel.persistent_keepalive)),
        interface,
        ..Peer::default()
    }
}
