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


use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use test_case::test_case;
use wgportal_core::lowlevel::{Device, DeviceConfig, DevicePeer, Link, LowLevelError};
use wgportal_core::{
    Cidr, Key, KeyGenerator, Manager, ManagerError, MemoryStore, NetlinkClient, StoreError,
    WireGuardClient, WireGuardStore, X25519KeyGenerator, ip_addresses_to_string,
    parse_ip_address_string,
};
use wgportal_types::{
    ConfigOption, Interface, InterfaceIdentifier, InterfaceType, Peer, PeerIdentifier,
};

// -- Recording kernel --

#[derive(Default)]
struct KernelState {
    calls: Vec<String>,
    configs: Vec<(String, DeviceConfig)>,
    fail: HashSet<&'static str>,
    links: BTreeMap<String, Link>,
    addrs: BTreeMap<String, Vec<Cidr>>,
    devices: BTreeMap<String, Device>,
}

#[derive(Clone, Default)]
struct Kernel(Arc<Mutex<KernelState>>);

impl Kernel {
    fn with_links(names: &[&str]) -> Self {
        let kernel = Self::default();
        for name in names {
            kernel.add_link(name, 1420);
        }
        kernel
    }

    fn add_link(&self, name: &str, mtu: u32) {
        let mut state = self.0.lock().unwrap();
        let index = state.links.len() as u32 + 1;
        state.links.insert(
            name.to_string(),
            Link { index, name: name.to_string(), mtu, up: true },
        );
    }

    fn enter(&self, op: &'static str, call: String) -> Result<(), LowLevelError> {
        let mut state = self.0.lock().unwrap();
        state.calls.push(call);
        if state.fail.contains(op) {
            return Err(LowLevelError::Netlink(format!("{op} failed")));
        }
        Ok(())
    }

    fn fail(&self, op: &'static str) {
        self.0.lock().unwrap().fail.insert(op);
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    fn configs(&self) -> Vec<(String, DeviceConfig)> {
        self.0.lock().unwrap().configs.clone()
    }

    fn clear(&self) {
        let mut state = self.0.lock().unwrap();
        state.calls.clear();
        state.configs.clear();
    }
}

struct MockNetlink(Kernel);
struct MockWireGuard(Kernel);

impl NetlinkClient for MockNetlink {
    async fn link_add(&self, name: &str) -> Result<(), LowLevelError> {
        self.0.enter("link_add", format!("link_add {name}"))?;
        self.0.add_link(name, 1420);
        Ok(())
    }

    async fn link_del(&self, name: &str) -> Result<(), LowLevelError> {
        self.0.enter("link_del", format!("link_del {name}"))?;
        self.0 .0.lock().unwrap().links.remove(name);
        Ok(())
    }

    async fn link_by_name(&self, name: &str) -> Result<Link, LowLevelError> {
        self.0.enter("link_by_name", format!("link_by_name {name}"))?;
        self.0 .0
            .lock()
            .unwrap()
            .links
            .get(name)
            .cloned()
            .ok_or_else(|| LowLevelError::LinkNotFound(name.to_string()))
    }

    async fn link_set_up(&self, link: &Link) -> Result<(), LowLevelError> {
        self.0.enter("link_set_up", format!("link_set_up {}", link.name))
    }

    async fn link_set_down(&self, link: &Link) -> Result<(), LowLevelError> {
        self.0.enter("link_set_down", format!("link_set_down {}", link.name))
    }

    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), LowLevelError> {
        self.0.enter("link_set_mtu", format!("link_set_mtu {} {mtu}", link.name))
    }

    async fn addr_replace(&self, link: &Link, addr: &Cidr) -> Result<(), LowLevelError> {
        self.0.enter("addr_replace", format!("addr_replace {} {addr}", link.name))
    }

    async fn addr_add(&self, link: &Link, addr: &Cidr) -> Result<(), LowLevelError> {
        self.0.enter("addr_add", format!("addr_add {} {addr}", link.name))
    }

    async fn addr_list(&self, link: &Link) -> Result<Vec<Cidr>, LowLevelError> {
        self.0.enter("addr_list", format!("addr_list {}", link.name))?;
        Ok(self.0 .0.lock().unwrap().addrs.get(&link.name).cloned().unwrap_or_default())
    }
}

impl WireGuardClient for MockWireGuard {
    async fn devices(&self) -> Result<Vec<Device>, LowLevelError> {
        self.0.enter("devices", "devices".to_string())?;
        Ok(self.0 .0.lock().unwrap().devices.values().cloned().collect())
    }

    async fn device(&self, name: &str) -> Result<Device, LowLevelError> {
        self.0.enter("device", format!("device {name}"))?;
        self.0 .0
            .lock()
            .unwrap()
            .devices
            .get(name)
            .cloned()
            .ok_or_else(|| LowLevelError::WireGuard(format!("no device {name}")))
    }

    async fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<(), LowLevelError> {
        self.0.enter("configure_device", format!("configure_device {name}"))?;
        self.0 .0
            .lock()
            .unwrap()
            .configs
            .push((name.to_string(), config.clone()));
        Ok(())
    }
}

// -- Recording store --

#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    fail: AtomicBool,
    fail_ops: Mutex<HashSet<&'static str>>,
    writes: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn write(&self, op: &'static str, target: impl std::fmt::Display) -> Result<(), StoreError> {
        self.writes.lock().unwrap().push(format!("{op} {target}"));
        if self.fail.load(Ordering::SeqCst) || self.fail_ops.lock().unwrap().contains(op) {
            return Err(StoreError::Unavailable("injected".into()));
        }
        Ok(())
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn fail_on(&self, op: &'static str) {
        self.fail_ops.lock().unwrap().insert(op);
    }
}

impl WireGuardStore for RecordingStore {
    async fn get_interface_ids(&self) -> Result<Vec<InterfaceIdentifier>, StoreError> {
        self.inner.get_interface_ids().await
    }

    async fn get_all_interfaces(
        &self,
        ids: &[InterfaceIdentifier],
    ) -> Result<Vec<(Interface, Vec<Peer>)>, StoreError> {
        self.inner.get_all_interfaces(ids).await
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<(Interface, Vec<Peer>), StoreError> {
        self.inner.get_interface(id).await
    }

    async fn save_interface(&self, iface: &Interface) -> Result<(), StoreError> {
        self.write("save_interface", &iface.identifier)?;
        self.inner.save_interface(iface).await
    }

    async fn save_peer(&self, peer: &Peer) -> Result<(), StoreError> {
        self.write("save_peer", &peer.identifier)?;
        self.inner.save_peer(peer).await
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<(), StoreError> {
        self.write("delete_interface", id)?;
        self.inner.delete_interface(id).await
    }

    async fn delete_peer(&self, id: &PeerIdentifier) -> Result<(), StoreError> {
        self.write("delete_peer", id)?;
        self.inner.delete_peer(id).await
    }
}

type TestManager = Manager<MockNetlink, MockWireGuard, RecordingStore>;

// -- Helpers --

fn iface(id: &str, addresses: &str) -> Interface {
    let mut iface = Interface::new(id.into());
    iface.address_str = addresses.into();
    iface.key_pair = X25519KeyGenerator.fresh_keypair();
    iface.listen_port = 51820;
    iface
}

fn peer_on(iface: &str, addresses: &str) -> Peer {
    let key_pair = X25519KeyGenerator.fresh_keypair();
    let mut peer = Peer::default();
    peer.identifier = key_pair.public_key.clone().into();
    peer.display_name = format!("peer {addresses}");
    peer.key_pair = key_pair;
    peer.interface.identifier = iface.into();
    peer.interface.address_str = ConfigOption::Default(addresses.into());
    peer.allowed_ips_str = ConfigOption::Default("10.0.0.0/24".into());
    peer
}

/// Manager over a store pre-filled with `interfaces`; the kernel already
/// has a link for each of them.
async fn seeded(interfaces: Vec<(Interface, Vec<Peer>)>) -> (TestManager, Kernel) {
    let store = RecordingStore::default();
    let names: Vec<String> = interfaces.iter().map(|(i, _)| i.identifier.0.clone()).collect();
    for (iface, peers) in &interfaces {
        store.inner.save_interface(iface).await.unwrap();
        for peer in peers {
            store.inner.save_peer(peer).await.unwrap();
        }
    }
    let kernel = Kernel::with_links(&names.iter().map(String::as_str).collect::<Vec<_>>());
    let manager = Manager::new(MockNetlink(kernel.clone()), MockWireGuard(kernel.clone()), store)
        .await
        .unwrap();
    (manager, kernel)
}

fn wg0() -> InterfaceIdentifier {
    "wg0".into()
}

fn cidr(s: &str) -> Cidr {
    Cidr::parse(s).unwrap()
}

// -- Startup --

#[tokio::test]
async fn loads_state_from_store() {
    let peers = vec![peer_on("wg0", "10.0.0.2/24"), peer_on("wg0", "10.0.0.3/24")];
    let (manager, kernel) =
        seeded(vec![(iface("wg1", ""), vec![]), (iface("wg0", "10.0.0.1/24"), peers)]).await;

    let ids: Vec<_> = manager.interfaces().await.into_iter().map(|i| i.identifier).collect();
    assert_eq!(ids, vec![wg0(), "wg1".into()]);
    assert_eq!(manager.peers(&wg0()).await.unwrap().len(), 2);
    assert!(kernel.calls().is_empty(), "startup must not touch the kernel");
}

// -- Interfaces --

#[tokio::test]
async fn create_interface_adds_link_then_persists() {
    let (manager, kernel) = seeded(vec![]).await;

    manager.create_interface(&wg0()).await.unwrap();

    assert_eq!(kernel.calls(), vec!["link_add wg0", "link_by_name wg0", "link_set_up wg0"]);
    assert_eq!(manager.interface(&wg0()).await.unwrap().interface_type, InterfaceType::Server);
    assert!(manager.store().inner.contains_interface(&wg0()));

    let err = manager.create_interface(&wg0()).await.unwrap_err();
    assert!(matches!(err, ManagerError::InterfaceAlreadyExists(_)));
}

#[tokio::test]
async fn create_interface_kernel_failure_leaves_no_state() {
    let (manager, kernel) = seeded(vec![]).await;
    kernel.fail("link_add");

    let err = manager.create_interface(&wg0()).await.unwrap_err();

    assert!(matches!(err, ManagerError::Kernel { .. }));
    assert!(manager.interface(&wg0()).await.unwrap_err().is_not_found());
    assert!(manager.store().writes().is_empty());
}

#[test_case("" ; "empty")]
#[test_case("a-name-longer-than-linux-allows" ; "too long")]
#[tokio::test]
async fn create_interface_rejects_bad_names(name: &str) {
    let (manager, kernel) = seeded(vec![]).await;
    let err = manager.create_interface(&name.into()).await.unwrap_err();
    assert!(matches!(err, ManagerError::Validation(_)));
    assert!(kernel.calls().is_empty());
}

#[tokio::test]
async fn update_interface_applies_kernel_steps_in_order() {
    let (manager, kernel) = seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![])]).await;

    let mut cfg = manager.interface(&wg0()).await.unwrap();
    cfg.mtu = 1380;
    cfg.address_str = "fd00::1/64, 10.0.0.1/24".into();
    cfg.firewall_mark = 7;
    cfg.display_name = "Office".into();
    manager.update_interface(cfg.clone()).await.unwrap();

    assert_eq!(
        kernel.calls(),
        vec![
            "link_by_name wg0",
            "link_set_mtu wg0 1380",
            "addr_replace wg0 10.0.0.1/24",
            "addr_add wg0 fd00::1/64",
            "configure_device wg0",
            "link_set_up wg0",
        ]
    );
    let (_, device) = &kernel.configs()[0];
    assert_eq!(device.listen_port, Some(51820));
    assert_eq!(device.firewall_mark, Some(7));
    assert_eq!(
        device.private_key.map(|k| k.to_string()),
        Some(cfg.key_pair.private_key.clone())
    );
    assert_eq!(manager.interface(&wg0()).await.unwrap().display_name, "Office");
    assert_eq!(manager.store().writes(), vec!["save_interface wg0"]);
}

#[tokio::test]
async fn update_interface_disabled_sets_link_down() {
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![])]).await;

    let mut cfg = manager.interface(&wg0()).await.unwrap();
    cfg.disabled = Some(Utc::now());
    manager.update_interface(cfg).await.unwrap();

    assert_eq!(kernel.calls().last().map(String::as_str), Some("link_set_down wg0"));
    assert!(!kernel.calls().iter().any(|c| c.starts_with("link_set_mtu")));
}

#[tokio::test]
async fn update_interface_kernel_failure_commits_nothing() {
    let (manager, kernel) = seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![])]).await;
    kernel.fail("configure_device");

    let mut cfg = manager.interface(&wg0()).await.unwrap();
    cfg.display_name = "changed".into();
    let err = manager.update_interface(cfg).await.unwrap_err();

    assert!(matches!(err, ManagerError::Kernel { .. }));
    // earlier kernel steps stay applied
    assert!(kernel.calls().contains(&"addr_replace wg0 10.0.0.1/24".to_string()));
    assert_eq!(manager.interface(&wg0()).await.unwrap().display_name, "");
    assert!(manager.store().writes().is_empty());
}

#[tokio::test]
async fn update_interface_validates_before_kernel() {
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![])]).await;

    let mut bad_addr = manager.interface(&wg0()).await.unwrap();
    bad_addr.address_str = "10.0.0.1".into();
    assert!(matches!(
        manager.update_interface(bad_addr).await,
        Err(ManagerError::Parse { .. })
    ));

    let unknown = iface("wg5", "");
    assert!(manager.update_interface(unknown).await.unwrap_err().is_not_found());

    let blank = Interface::default();
    assert!(matches!(
        manager.update_interface(blank).await,
        Err(ManagerError::Validation(_))
    ));
    assert!(kernel.calls().is_empty());
}

#[tokio::test]
async fn delete_interface_cascades_to_peers() {
    let peers = vec![
        peer_on("wg0", "10.0.0.2/24"),
        peer_on("wg0", "10.0.0.3/24"),
        peer_on("wg0", "10.0.0.4/24"),
    ];
    let other = peer_on("wg1", "10.1.0.2/24");
    let (manager, kernel) = seeded(vec![
        (iface("wg0", "10.0.0.1/24"), peers),
        (iface("wg1", "10.1.0.1/24"), vec![other.clone()]),
    ])
    .await;

    manager.delete_interface(&wg0()).await.unwrap();

    assert_eq!(kernel.calls(), vec!["link_del wg0"]);
    assert!(manager.peers(&wg0()).await.unwrap_err().is_not_found());
    let store = &manager.store().inner;
    assert!(!store.contains_interface(&wg0()));
    assert_eq!(store.peer_count(), 1);
    assert!(store.contains_peer(&other.identifier));
    let writes = manager.store().writes();
    assert_eq!(writes.len(), 4);
    assert!(writes[..3].iter().all(|w| w.starts_with("delete_peer ")));
    assert_eq!(writes[3], "delete_interface wg0");
}

#[tokio::test]
async fn delete_interface_store_failure_leaves_no_orphaned_peers() {
    let peers = vec![peer_on("wg0", "10.0.0.2/24"), peer_on("wg0", "10.0.0.3/24")];
    let (manager, _) = seeded(vec![(iface("wg0", "10.0.0.1/24"), peers)]).await;
    manager.store().fail_on("delete_peer");

    assert!(matches!(
        manager.delete_interface(&wg0()).await,
        Err(ManagerError::Persistence { .. })
    ));
    assert_eq!(manager.peers(&wg0()).await.unwrap().len(), 2);

    let store = &manager.store().inner;
    assert!(store.contains_interface(&wg0()));
    let ids = store.get_interface_ids().await.unwrap();
    let stored: usize = store
        .get_all_interfaces(&ids)
        .await
        .unwrap()
        .iter()
        .map(|(_, peers)| peers.len())
        .sum();
    assert_eq!(stored, store.peer_count());
    assert!(!manager.store().writes().iter().any(|w| w.starts_with("delete_interface")));
}

#[tokio::test]
async fn delete_interface_kernel_failure_keeps_everything() {
    let (manager, kernel) =
        seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![peer_on("wg0", "10.0.0.2/24")])]).await;
    kernel.fail("link_del");

    assert!(matches!(
        manager.delete_interface(&wg0()).await,
        Err(ManagerError::Kernel { .. })
    ));
    assert_eq!(manager.peers(&wg0()).await.unwrap().len(), 1);
    assert!(manager.store().writes().is_empty());
}

// -- Defaults --

#[tokio::test]
async fn apply_defaults_preserves_overrides_and_is_idempotent() {
    let mut custom = peer_on("wg0", "10.0.0.2/24");
    custom.interface.dns_str.set_custom("9.9.9.9".into());
    custom.endpoint.set_custom("custom.example.com:1234".into());
    let plain = peer_on("wg0", "10.0.0.3/24");

    let mut server = iface("wg0", "10.0.0.1/24");
    server.peer_defaults.dns_str = "1.1.1.1".into();
    server.peer_defaults.endpoint = "vpn.example.com:51820".into();
    server.peer_defaults.persistent_keepalive = 25;
    server.peer_defaults.mtu = 1380;
    let (manager, kernel) = seeded(vec![(server.clone(), vec![custom.clone(), plain.clone()])]).await;

    manager.apply_default_configs(&wg0()).await.unwrap();
    let first = manager.peers(&wg0()).await.unwrap();
    manager.apply_default_configs(&wg0()).await.unwrap();
    let second = manager.peers(&wg0()).await.unwrap();

    assert_eq!(first, second);
    assert!(kernel.calls().is_empty());

    let custom = manager.peer(&custom.identifier).await.unwrap();
    assert_eq!(custom.interface.dns_str.value(), "9.9.9.9");
    assert_eq!(custom.endpoint.value(), "custom.example.com:1234");
    assert_eq!(*custom.persistent_keepalive.value(), 25);

    let plain = manager.peer(&plain.identifier).await.unwrap();
    assert_eq!(plain.interface.dns_str.value(), "1.1.1.1");
    assert_eq!(*plain.interface.mtu.value(), 1380);
    assert_eq!(plain.interface.public_key, server.key_pair.public_key);
    assert_eq!(plain.interface.identifier, wg0());
    assert_eq!(manager.store().writes().len(), 4);
}

#[tokio::test]
async fn apply_defaults_stops_at_store_failure() {
    let (manager, _) =
        seeded(vec![(iface("wg0", ""), vec![peer_on("wg0", "10.0.0.2/24")])]).await;
    manager.store().fail();

    let err = manager.apply_default_configs(&wg0()).await.unwrap_err();
    assert!(err.is_persistence());
    assert!(manager.apply_default_configs(&"nope".into()).await.unwrap_err().is_not_found());
}

// -- Peers --

#[tokio::test]
async fn temporary_peer_skips_kernel_and_store() {
    let (manager, kernel) = seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![])]).await;
    let mut peer = peer_on("wg0", "10.0.0.2/24");
    peer.temporary = Some(Utc::now());

    manager.save_peers(vec![peer.clone()]).await.unwrap();

    assert!(kernel.calls().is_empty());
    assert!(manager.store().writes().is_empty());
    assert_eq!(manager.peers(&wg0()).await.unwrap(), vec![peer]);
}

#[tokio::test]
async fn save_peer_pushes_delta_then_persists() {
    let (manager, kernel) = seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![])]).await;
    let mut peer = peer_on("wg0", "10.0.0.2/24");
    peer.extra_allowed_ips_str = "192.168.1.0/24".into();

    manager.save_peers(vec![peer.clone()]).await.unwrap();

    let configs = kernel.configs();
    assert_eq!(configs.len(), 1);
    let (device, delta) = (&configs[0].0, &configs[0].1.peers[0]);
    assert_eq!(device, "wg0");
    assert_eq!(delta.public_key.to_string(), peer.key_pair.public_key);
    assert!(delta.update_only && delta.replace_allowed_ips && !delta.remove);
    assert_eq!(ip_addresses_to_string(&delta.allowed_ips), "10.0.0.0/24,192.168.1.0/24");
    assert_eq!(manager.store().writes(), vec![format!("save_peer {}", peer.identifier)]);
    assert!(manager.store().inner.contains_peer(&peer.identifier));
}

#[tokio::test]
async fn save_peers_batch_is_not_atomic() {
    let (manager, kernel) = seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![])]).await;
    let first = peer_on("wg0", "10.0.0.2/24");
    let mut broken = peer_on("wg0", "10.0.0.3/24");
    broken.key_pair.public_key = "not-a-key".into();
    let third = peer_on("wg0", "10.0.0.4/24");

    let err = manager
        .save_peers(vec![first.clone(), broken.clone(), third.clone()])
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::Key { .. }));
    let ids: Vec<_> = manager.peers(&wg0()).await.unwrap().into_iter().map(|p| p.identifier).collect();
    assert_eq!(ids, vec![first.identifier.clone()]);
    assert_eq!(kernel.configs().len(), 1);
}

#[tokio::test]
async fn save_peer_validation() {
    let (manager, _) = seeded(vec![
        (iface("wg0", ""), vec![]),
        (iface("wg1", ""), vec![]),
    ])
    .await;

    let unknown = peer_on("wg9", "10.0.0.2/24");
    assert!(matches!(
        manager.save_peers(vec![unknown]).await,
        Err(ManagerError::InterfaceNotFound(_))
    ));

    let mut blank = peer_on("wg0", "10.0.0.2/24");
    blank.identifier = "".into();
    assert!(matches!(
        manager.save_peers(vec![blank]).await,
        Err(ManagerError::Validation(_))
    ));

    let peer = peer_on("wg0", "10.0.0.2/24");
    manager.save_peers(vec![peer.clone()]).await.unwrap();
    let mut moved = peer.clone();
    moved.interface.identifier = "wg1".into();
    assert!(matches!(
        manager.save_peers(vec![moved]).await,
        Err(ManagerError::Validation(_))
    ));
}

#[tokio::test]
async fn save_peer_store_failure_is_persistence_error() {
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![])]).await;
    manager.store().fail();
    let peer = peer_on("wg0", "10.0.0.2/24");

    let err = manager.save_peers(vec![peer.clone()]).await.unwrap_err();

    assert!(err.is_persistence());
    assert_eq!(kernel.configs().len(), 1);
    assert!(manager.peer(&peer.identifier).await.is_ok());
}

#[tokio::test]
async fn remove_peer_kernel_failure_fails_closed() {
    let peer = peer_on("wg0", "10.0.0.2/24");
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![peer.clone()])]).await;
    kernel.fail("configure_device");

    let err = manager.remove_peer(&peer.identifier).await.unwrap_err();

    assert!(matches!(err, ManagerError::Kernel { .. }));
    assert!(manager.peer(&peer.identifier).await.is_ok());
    assert!(manager.store().inner.contains_peer(&peer.identifier));
    assert!(manager.store().writes().is_empty());
}

#[tokio::test]
async fn remove_peer_sends_removal_then_deletes() {
    let peer = peer_on("wg0", "10.0.0.2/24");
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![peer.clone()])]).await;

    manager.remove_peer(&peer.identifier).await.unwrap();

    let delta = &kernel.configs()[0].1.peers[0];
    assert!(delta.remove);
    assert_eq!(delta.public_key, Key::parse(&peer.key_pair.public_key).unwrap());
    assert!(manager.peer(&peer.identifier).await.unwrap_err().is_not_found());
    assert!(!manager.store().inner.contains_peer(&peer.identifier));
    assert!(manager.remove_peer(&peer.identifier).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn remove_temporary_peer_only_touches_memory() {
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![])]).await;
    let mut peer = peer_on("wg0", "10.0.0.2/24");
    peer.temporary = Some(Utc::now());
    manager.save_peers(vec![peer.clone()]).await.unwrap();

    manager.remove_peer(&peer.identifier).await.unwrap();

    assert!(kernel.calls().is_empty());
    assert!(manager.store().writes().is_empty());
    assert!(manager.peers(&wg0()).await.unwrap().is_empty());
}

#[tokio::test]
async fn peers_for_user_scans_all_interfaces() {
    let mut a = peer_on("wg0", "10.0.0.2/24");
    a.user_identifier = Some("alice".into());
    let mut b = peer_on("wg1", "10.1.0.2/24");
    b.user_identifier = Some("alice".into());
    let c = peer_on("wg1", "10.1.0.3/24");
    let (manager, _) = seeded(vec![
        (iface("wg0", ""), vec![a]),
        (iface("wg1", ""), vec![b, c]),
    ])
    .await;

    assert_eq!(manager.peers_for_user(&"alice".into()).await.len(), 2);
    assert!(manager.peers_for_user(&"bob".into()).await.is_empty());
}

#[tokio::test]
async fn expire_drops_only_old_temporary_peers() {
    let (manager, _) = seeded(vec![(iface("wg0", ""), vec![peer_on("wg0", "10.0.0.2/24")])]).await;
    let mut old = peer_on("wg0", "10.0.0.3/24");
    old.temporary = Some(Utc::now() - Duration::hours(1));
    let mut fresh = peer_on("wg0", "10.0.0.4/24");
    fresh.temporary = Some(Utc::now());
    manager.save_peers(vec![old.clone(), fresh]).await.unwrap();

    assert_eq!(manager.expire_temporary_peers(Duration::minutes(15)).await, 1);
    assert_eq!(manager.peers(&wg0()).await.unwrap().len(), 2);
    assert!(manager.peer(&old.identifier).await.is_err());
}

// -- IP allocation --

async fn pool(own: &str, used: &[&str]) -> TestManager {
    let peers = used.iter().map(|addr| peer_on("wg0", addr)).collect();
    seeded(vec![(iface("wg0", own), peers)]).await.0
}

#[tokio::test]
async fn fresh_ip_skips_interface_and_peers() {
    let manager = pool("10.0.0.1/24", &["10.0.0.2/24", "10.0.0.3/24"]).await;
    let ip = manager.fresh_ip(&wg0(), "10.0.0.0/24", &[]).await.unwrap();
    assert_eq!(ip.to_string(), "10.0.0.4/24");
}

#[tokio::test]
async fn fresh_ip_single_address_subnet_is_exhausted() {
    let manager = pool("10.0.0.2/32", &[]).await;
    let err = manager
        .fresh_ip(&wg0(), "10.0.0.2/32", &[cidr("10.0.0.2/32")])
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Exhausted { .. }));
    assert_eq!(err.to_string(), "ip range exceeded in 10.0.0.2/32");
}

#[test_case("", &[], &[], "10.0.0.0/24", "10.0.0.1/24" ; "v4 first usable")]
#[test_case("", &["10.0.0.2/24", "10.0.0.3/24"], &["10.0.0.1/24"], "10.0.0.0/24", "10.0.0.4/24" ; "v4 reserved and used")]
#[test_case("", &["10.0.0.1/30"], &[], "10.0.0.0/30", "10.0.0.2/30" ; "v4 small")]
#[test_case("", &["2001:db8::5/64", "2001:db8::6/64"], &[], "2001:db8::/64", "2001:db8::1/64" ; "v6 first usable")]
#[test_case("", &[], &["2001:db8::1/64", "2001:db8::2/64"], "2001:db8::/64", "2001:db8::3/64" ; "v6 reserved")]
#[test_case("", &[], &[], "2001:db8::ffff:fffe/127", "2001:db8::ffff:ffff/127" ; "v6 keeps last address")]
#[tokio::test]
async fn fresh_ip_table(own: &str, used: &[&str], reserved: &[&str], subnet: &str, expected: &str) {
    let manager = pool(own, used).await;
    let reserved: Vec<Cidr> = reserved.iter().map(|r| cidr(r)).collect();
    let ip = manager.fresh_ip(&wg0(), subnet, &reserved).await.unwrap();
    assert_eq!(ip.to_string(), expected);
}

#[tokio::test]
async fn fresh_ip_never_hands_out_excluded_addresses() {
    // 10.0.0.0/29: network .0, broadcast .7, usable .1 to .6
    let used = ["10.0.0.1/29", "10.0.0.3/29"];
    let reserved = [cidr("10.0.0.2/29"), cidr("10.0.0.5/29")];
    let manager = pool("", &used).await;

    let first = manager.fresh_ip(&wg0(), "10.0.0.0/29", &reserved).await.unwrap();
    let again = manager.fresh_ip(&wg0(), "10.0.0.0/29", &reserved).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(first.to_string(), "10.0.0.4/29");

    let all_taken = [cidr("10.0.0.2/29"), cidr("10.0.0.4/29"), cidr("10.0.0.5/29"), cidr("10.0.0.6/29")];
    let err = manager.fresh_ip(&wg0(), "10.0.0.0/29", &all_taken).await.unwrap_err();
    assert!(matches!(err, ManagerError::Exhausted { .. }));
}

#[tokio::test]
async fn fresh_ips_one_per_interface_subnet() {
    let peers = vec![
        peer_on("wg0", "10.0.0.2/24,10.0.1.2/24"),
        peer_on("wg0", "10.0.0.3/24,10.0.1.4/24"),
    ];
    let (manager, _) = seeded(vec![(iface("wg0", "10.0.0.1/24, 10.0.1.1/24"), peers)]).await;

    assert_eq!(manager.fresh_ips(&wg0()).await.unwrap(), "10.0.0.4/24,10.0.1.3/24");
}

#[tokio::test]
async fn used_ips_sorted_and_filtered() {
    let manager = pool("", &["fd00::2/64", "10.0.0.9/24", "10.0.0.3/24,10.1.0.1/16"]).await;

    let all = manager.all_used_ips(&wg0()).await.unwrap();
    assert_eq!(
        ip_addresses_to_string(&all),
        "10.0.0.3/24,10.0.0.9/24,10.1.0.1/16,fd00::2/64"
    );

    let subnet = manager.used_ips(&wg0(), "10.0.0.0/24").await.unwrap();
    assert_eq!(ip_addresses_to_string(&subnet), "10.0.0.3/24,10.0.0.9/24");

    assert!(matches!(
        manager.used_ips(&wg0(), "garbage").await,
        Err(ManagerError::Parse { .. })
    ));
    assert!(manager.all_used_ips(&"wg9".into()).await.unwrap_err().is_not_found());
    assert!(pool("", &[]).await.all_used_ips(&wg0()).await.unwrap().is_empty());
}

#[test_case("10.0.0.1/24" ; "single")]
#[test_case("10.0.0.3/24,10.0.0.2/24,8.8.8.8/32,fe80::/64" ; "mixed")]
#[test_case("" ; "empty")]
fn address_string_round_trip(input: &str) {
    let parsed = parse_ip_address_string(input).unwrap();
    let again = parse_ip_address_string(&ip_addresses_to_string(&parsed)).unwrap();
    assert_eq!(parsed, again);
}

// -- Import --

fn kernel_peer(public_key: &str, allowed: &str) -> DevicePeer {
    DevicePeer {
        public_key: Key::parse(public_key).unwrap(),
        preshared_key: None,
        endpoint: Some("198.51.100.7:51820".parse().unwrap()),
        persistent_keepalive: 25,
        last_handshake: None,
        rx_bytes: 0,
        tx_bytes: 0,
        allowed_ips: parse_ip_address_string(allowed).unwrap(),
    }
}

#[tokio::test]
async fn import_discovers_and_commits_unmanaged_devices() {
    let (manager, kernel) = seeded(vec![(iface("wg0", ""), vec![])]).await;
    let remote = X25519KeyGenerator.fresh_keypair();
    let server = X25519KeyGenerator.fresh_keypair();
    kernel.add_link("wg7", 1400);
    {
        let mut state = kernel.0.lock().unwrap();
        state.addrs.insert("wg7".into(), vec![cidr("10.9.0.1/24")]);
        for name in ["wg0", "wg7"] {
            state.devices.insert(
                name.into(),
                Device {
                    name: name.into(),
                    private_key: Some(Key::parse(&server.private_key).unwrap()),
                    public_key: Some(Key::parse(&server.public_key).unwrap()),
                    listen_port: 51999,
                    firewall_mark: 0,
                    peers: vec![kernel_peer(&remote.public_key, "10.9.0.2/32")],
                },
            );
        }
    }

    let found = manager.importable_interfaces().await.unwrap();
    assert_eq!(found.len(), 1);
    let candidate = &found[0];
    assert_eq!(candidate.interface.identifier.as_str(), "wg7");
    assert_eq!(candidate.interface.address_str, "10.9.0.1/24");
    assert_eq!(candidate.interface.mtu, 1400);
    assert_eq!(candidate.interface.listen_port, 51999);
    assert_eq!(candidate.interface.key_pair, server);

    let peer = &candidate.peers[0];
    assert_eq!(peer.display_name, format!("Autodetected Peer ({})", &remote.public_key[..8]));
    assert_eq!(peer.interface.address_str.value(), "10.9.0.2/32");
    assert!(!peer.endpoint.is_custom());
    assert!(manager.interface(&"wg7".into()).await.is_err(), "discovery commits nothing");

    kernel.clear();
    manager.import_interface(candidate.clone()).await.unwrap();

    assert!(kernel.calls().is_empty());
    assert_eq!(manager.peers(&"wg7".into()).await.unwrap().len(), 1);
    assert!(manager.store().inner.contains_peer(&peer.identifier));

    let err = manager.import_interface(candidate.clone()).await.unwrap_err();
    assert!(matches!(err, ManagerError::InterfaceAlreadyExists(_)));
}

#[tokio::test]
async fn import_validates_peers_before_committing() {
    let (manager, _) = seeded(vec![]).await;
    let mut bad = peer_on("wg3", "10.3.0.2/24");
    bad.identifier = "".into();
    let candidate = wgportal_types::ImportableInterface {
        interface: iface("wg3", "10.3.0.1/24"),
        peers: vec![peer_on("wg3", "10.3.0.3/24"), bad],
        ..Default::default()
    };

    assert!(matches!(
        manager.import_interface(candidate).await,
        Err(ManagerError::Validation(_))
    ));
    assert!(manager.interfaces().await.is_empty());
    assert!(manager.store().writes().is_empty());
}

// -- Stats and config files --

#[tokio::test]
async fn refresh_stats_records_kernel_counters() {
    let peer = peer_on("wg0", "10.0.0.2/24");
    let (manager, kernel) = seeded(vec![
        (iface("wg0", "10.0.0.1/24"), vec![peer.clone()]),
        (iface("wg1", ""), vec![]),
    ])
    .await;
    let mut kp = kernel_peer(&peer.key_pair.public_key, "10.0.0.2/32");
    kp.last_handshake = Some(Utc::now() - Duration::seconds(30));
    kp.rx_bytes = 100;
    kp.tx_bytes = 250;
    kernel.0.lock().unwrap().devices.insert(
        "wg0".into(),
        Device { name: "wg0".into(), peers: vec![kp], ..Device::default() },
    );

    manager.refresh_stats().await;

    let stats = manager.peer_stats(&wg0()).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].identifier, peer.identifier);
    assert!(stats[0].connected);
    assert_eq!(stats[0].last_endpoint.as_deref(), Some("198.51.100.7:51820"));

    let totals = manager.interface_stats(&wg0()).await.unwrap().unwrap();
    assert_eq!((totals.peer_count, totals.bytes_received, totals.bytes_transmitted), (1, 100, 250));
    assert!(manager.interface_stats(&"wg1".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn config_files_render_current_snapshot() {
    let peer = peer_on("wg0", "10.0.0.2/24");
    let (manager, _) = seeded(vec![(iface("wg0", "10.0.0.1/24"), vec![peer.clone()])]).await;

    let iface_cfg = manager.interface_config(&wg0()).await.unwrap();
    assert!(iface_cfg.contains(&format!("PublicKey = {}", peer.key_pair.public_key)));
    assert!(iface_cfg.contains("Address = 10.0.0.1/24"));

    let peer_cfg = manager.peer_config(&peer.identifier).await.unwrap();
    assert!(peer_cfg.contains(&format!("PrivateKey = {}", peer.key_pair.private_key)));
    assert!(manager.peer_config(&"nope".into()).await.unwrap_err().is_not_found());
}
