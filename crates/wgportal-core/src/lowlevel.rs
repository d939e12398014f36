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


//! Ports to the kernel: link/address management over netlink and WireGuard
//! device control. These are the only places the manager touches the host.

use std::future::Future;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cidr::Cidr;
use crate::keys::Key;

#[derive(Debug, Error)]
pub enum LowLevelError {
    #[error("not supported on this platform")]
    Unsupported,

    #[error("link {0} not found")]
    LinkNotFound(String),

    #[error("netlink error: {0}")]
    Netlink(String),

    #[error("wireguard control error: {0}")]
    WireGuard(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LowLevelError>;

/// A network link as seen by netlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub mtu: u32,
    pub up: bool,
}

/// A WireGuard device as reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub private_key: Option<Key>,
    pub public_key: Option<Key>,
    pub listen_port: u16,
    pub firewall_mark: u32,
    pub peers: Vec<DevicePeer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePeer {
    pub public_key: Key,
    pub preshared_key: Option<Key>,
    pub endpoint: Option<SocketAddr>,
    /// Seconds, 0 when disabled.
    pub persistent_keepalive: u16,
    pub last_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub allowed_ips: Vec<Cidr>,
}

/// A configuration delta for one device. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub private_key: Option<Key>,
    pub listen_port: Option<u16>,
    pub firewall_mark: Option<u32>,
    pub peers: Vec<PeerConfig>,
}

/// A configuration delta for one peer of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: Key,
    pub remove: bool,
    pub update_only: bool,
    pub preshared_key: Option<Key>,
    pub endpoint: Option<SocketAddr>,
    pub persistent_keepalive: Option<u16>,
    pub replace_allowed_ips: bool,
    pub allowed_ips: Vec<Cidr>,
}

impl PeerConfig {
    /// A delta that removes the peer from the device.
    pub fn removal(public_key: Key) -> Self {
        Self {
            public_key,
            remove: true,
            update_only: false,
            preshared_key: None,
            endpoint: None,
            persistent_keepalive: None,
            replace_allowed_ips: false,
            allowed_ips: Vec::new(),
        }
    }
}

pub trait NetlinkClient: Send + Sync {
    /// Create a link of type wireguard.
    fn link_add(&self, name: &str) -> impl Future<Output = Result<()>> + Send;
    fn link_del(&self, name: &str) -> impl Future<Output = Result<()>> + Send;
    fn link_by_name(&self, name: &str) -> impl Future<Output = Result<Link>> + Send;
    fn link_set_up(&self, link: &Link) -> impl Future<Output = Result<()>> + Send;
    fn link_set_down(&self, link: &Link) -> impl Future<Output = Result<()>> + Send;
    fn link_set_mtu(&self, link: &Link, mtu: u32) -> impl Future<Output = Result<()>> + Send;
    fn addr_replace(&self, link: &Link, addr: &Cidr) -> impl Future<Output = Result<()>> + Send;
    fn addr_add(&self, link: &Link, addr: &Cidr) -> impl Future<Output = Result<()>> + Send;
    fn addr_list(&self, link: &Link) -> impl Future<Output = Result<Vec<Cidr>>> + Send;
}

pub trait WireGuardClient: Send + Sync {
    fn devices(&self) -> impl Future<Output = Result<Vec<Device>>> + Send;
    fn device(&self, name: &str) -> impl Future<Output = Result<Device>> + Send;
    fn configure_device(
        &self,
        name: &str,
        config: &DeviceConfig,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(target_os = "linux")]
pub type CurrentNetlink = linux::RtNetlink;

#[cfg(not(target_os = "linux"))]
pub type CurrentNetlink = StubNetlink;

#[cfg(target_os = "linux")]
pub type CurrentWireGuard = linux::WgControl;

#[cfg(not(target_os = "linux"))]
pub type CurrentWireGuard = StubWireGuard;

// -- Stubs for non-Linux --

#[derive(Debug, Clone, Copy, Default)]
pub struct StubNetlink;

impl NetlinkClient for StubNetlink {
    async fn link_add(&self, _name: &str) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn link_del(&self, _name: &str) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn link_by_name(&self, _name: &str) -> Result<Link> {
        Err(LowLevelError::Unsupported)
    }

    async fn link_set_up(&self, _link: &Link) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn link_set_down(&self, _link: &Link) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn link_set_mtu(&self, _link: &Link, _mtu: u32) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn addr_replace(&self, _link: &Link, _addr: &Cidr) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn addr_add(&self, _link: &Link, _addr: &Cidr) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }

    async fn addr_list(&self, _link: &Link) -> Result<Vec<Cidr>> {
        Err(LowLevelError::Unsupported)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StubWireGuard;

impl WireGuardClient for StubWireGuard {
    async fn devices(&self) -> Result<Vec<Device>> {
        Err(LowLevelError::Unsupported)
    }

    async fn device(&self, _name: &str) -> Result<Device> {
        Err(LowLevelError::Unsupported)
    }

    async fn configure_device(&self, _name: &str, _config: &DeviceConfig) -> Result<()> {
        Err(LowLevelError::Unsupported)
    }
}

// -- Linux implementation --

#[cfg(target_os = "linux")]
pub mod linux {
    use std::net::{IpAddr, SocketAddr};
    use std::time::{Duration, UNIX_EPOCH};

    use chrono::{DateTime, Utc};
    use futures::TryStreamExt;
    use rtnetlink::packet_route::address::{AddressAttribute, AddressMessage};
    use rtnetlink::packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
    use tracing::{debug, info};
    use wireguard_uapi::{DeviceInterface, RouteSocket, WgSocket, get, set};

    use super::{Device, DeviceConfig, DevicePeer, Link, LowLevelError, NetlinkClient, Result, WireGuardClient};
    use crate::cidr::Cidr;
    use crate::keys::Key;

    fn netlink_err(e: impl std::fmt::Display) -> LowLevelError {
        LowLevelError::Netlink(e.to_string())
    }

    fn wg_err(e: impl std::fmt::Display) -> LowLevelError {
        LowLevelError::WireGuard(e.to_string())
    }

    async fn connect() -> Result<rtnetlink::Handle> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);
        Ok(handle)
    }

    fn link_from_message(name: &str, msg: &LinkMessage) -> Link {
        let mtu = msg
            .attributes
            .iter()
            .find_map(|a| match a {
                LinkAttribute::Mtu(mtu) => Some(*mtu),
                _ => None,
            })
            .unwrap_or_default();
        Link {
            index: msg.header.index,
            name: name.to_string(),
            mtu,
            up: msg.header.flags.contains(LinkFlags::Up),
        }
    }

    fn cidr_from_message(msg: &AddressMessage) -> Option<Cidr> {
        msg.attributes.iter().find_map(|a| match a {
            AddressAttribute::Address(ip) => Cidr::new(*ip, msg.header.prefix_len).ok(),
            _ => None,
        })
    }

    /// Netlink client backed by rtnetlink for links and addresses and the
    /// WireGuard route socket for link creation.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RtNetlink;

    impl NetlinkClient for RtNetlink {
        async fn link_add(&self, name: &str) -> Result<()> {
            let mut route = RouteSocket::connect().map_err(netlink_err)?;
            info!(interface = name, "creating wireguard link");
            route.add_device(name).map_err(netlink_err)?;
            Ok(())
        }

        async fn link_del(&self, name: &str) -> Result<()> {
            let mut route = RouteSocket::connect().map_err(netlink_err)?;
            let existing = route.list_device_names().map_err(netlink_err)?;

            if existing.iter().any(|n| n == name) {
                info!(interface = name, "removing wireguard link");
                route.del_device(name).map_err(netlink_err)?;
            } else {
                debug!(interface = name, "link already gone");
            }
            Ok(())
        }

        async fn link_by_name(&self, name: &str) -> Result<Link> {
            let handle = connect().await?;
            let mut links = handle.link().get().match_name(name.to_string()).execute();
            let msg = links
                .try_next()
                .await
                .map_err(netlink_err)?
                .ok_or_else(|| LowLevelError::LinkNotFound(name.to_string()))?;
            Ok(link_from_message(name, &msg))
        }

        async fn link_set_up(&self, link: &Link) -> Result<()> {
            let handle = connect().await?;
            let msg = rtnetlink::LinkUnspec::new_with_index(link.index).up().build();
            handle.link().set(msg).execute().await.map_err(netlink_err)?;
            debug!(interface = %link.name, "link up");
            Ok(())
        }

        async fn link_set_down(&self, link: &Link) -> Result<()> {
            let handle = connect().await?;
            let msg = rtnetlink::LinkUnspec::new_with_index(link.index).down().build();
            handle.link().set(msg).execute().await.map_err(netlink_err)?;
            debug!(interface = %link.name, "link down");
            Ok(())
        }

        async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<()> {
            let handle = connect().await?;
            let msg = rtnetlink::LinkUnspec::new_with_index(link.index).mtu(mtu).build();
            handle.link().set(msg).execute().await.map_err(netlink_err)?;
            debug!(interface = %link.name, mtu, "link mtu set");
            Ok(())
        }

        async fn addr_replace(&self, link: &Link, addr: &Cidr) -> Result<()> {
            let handle = connect().await?;
            handle
                .address()
                .add(link.index, addr.addr(), addr.prefix())
                .replace()
                .execute()
                .await
                .map_err(netlink_err)?;
            debug!(interface = %link.name, %addr, "address replaced");
            Ok(())
        }

        async fn addr_add(&self, link: &Link, addr: &Cidr) -> Result<()> {
            let handle = connect().await?;
            handle
                .address()
                .add(link.index, addr.addr(), addr.prefix())
                .execute()
                .await
                .map_err(netlink_err)?;
            debug!(interface = %link.name, %addr, "address added");
            Ok(())
        }

        async fn addr_list(&self, link: &Link) -> Result<Vec<Cidr>> {
            let handle = connect().await?;
            let msgs: Vec<AddressMessage> = handle
                .address()
                .get()
                .set_link_index_filter(link.index)
                .execute()
                .try_collect()
                .await
                .map_err(netlink_err)?;
            Ok(msgs.iter().filter_map(cidr_from_message).collect())
        }
    }

    /// WireGuard control over the generic netlink socket.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct WgControl;

    fn device_from_kernel(dev: get::Device) -> Device {
        let peers = dev.peers.into_iter().map(peer_from_kernel).collect();
        Device {
            name: dev.ifname,
            private_key: dev.private_key.map(Key::from_bytes),
            public_key: dev.public_key.map(Key::from_bytes),
            listen_port: dev.listen_port,
            firewall_mark: dev.fwmark,
            peers,
        }
    }

    fn peer_from_kernel(peer: get::Peer) -> DevicePeer {
        let psk = Key::from_bytes(peer.preshared_key);
        let last_handshake = (peer.last_handshake_time != Duration::ZERO)
            .then(|| DateTime::<Utc>::from(UNIX_EPOCH + peer.last_handshake_time));
        DevicePeer {
            public_key: Key::from_bytes(peer.public_key),
            preshared_key: (!psk.is_zero()).then_some(psk),
            endpoint: peer.endpoint,
            persistent_keepalive: peer.persistent_keepalive_interval,
            last_handshake,
            rx_bytes: peer.rx_bytes,
            tx_bytes: peer.tx_bytes,
            allowed_ips: peer
                .allowed_ips
                .iter()
                .filter_map(|ip| Cidr::new(ip.ipaddr, ip.cidr_mask).ok())
                .collect(),
        }
    }

    // The uapi builders borrow their inputs, so the delta is first copied
    // into owned storage.
    struct PeerOwned {
        public_key: [u8; 32],
        preshared_key: Option<[u8; 32]>,
        endpoint: Option<SocketAddr>,
        keepalive: Option<u16>,
        remove: bool,
        update_only: bool,
        replace_allowed_ips: bool,
        allowed_ips: Vec<(IpAddr, u8)>,
    }

    impl WireGuardClient for WgControl {
        async fn devices(&self) -> Result<Vec<Device>> {
            let mut route = RouteSocket::connect().map_err(wg_err)?;
            let names = route.list_device_names().map_err(wg_err)?;
            let mut wg = WgSocket::connect().map_err(wg_err)?;

            let mut devices = Vec::with_capacity(names.len());
            for name in names {
                let dev = wg
                    .get_device(DeviceInterface::from_name(name))
                    .map_err(wg_err)?;
                devices.push(device_from_kernel(dev));
            }
            Ok(devices)
        }

        async fn device(&self, name: &str) -> Result<Device> {
            let mut wg = WgSocket::connect().map_err(wg_err)?;
            let dev = wg
                .get_device(DeviceInterface::from_name(name))
                .map_err(wg_err)?;
            Ok(device_from_kernel(dev))
        }

        async fn configure_device(&self, name: &str, config: &DeviceConfig) -> Result<()> {
            let private_key = config.private_key.map(|k| *k.as_bytes());

            let owned: Vec<PeerOwned> = config
                .peers
                .iter()
                .map(|p| PeerOwned {
                    public_key: *p.public_key.as_bytes(),
                    preshared_key: p.preshared_key.map(|k| *k.as_bytes()),
                    endpoint: p.endpoint,
                    keepalive: p.persistent_keepalive,
                    remove: p.remove,
                    update_only: p.update_only,
                    replace_allowed_ips: p.replace_allowed_ips,
                    allowed_ips: p.allowed_ips.iter().map(|c| (c.addr(), c.prefix())).collect(),
                })
                .collect();

            let peers: Vec<set::Peer<'_>> = owned
                .iter()
                .map(|p| {
                    let mut flags = Vec::new();
                    if p.remove {
                        flags.push(set::WgPeerF::RemoveMe);
                    }
                    if p.update_only {
                        flags.push(set::WgPeerF::UpdateOnly);
                    }
                    if p.replace_allowed_ips {
                        flags.push(set::WgPeerF::ReplaceAllowedIps);
                    }
                    let mut peer = set::Peer::from_public_key(&p.public_key).flags(flags);
                    if let Some(ref psk) = p.preshared_key {
                        peer = peer.preshared_key(psk);
                    }
                    if let Some(ref ep) = p.endpoint {
                        peer = peer.endpoint(ep);
                    }
                    if let Some(keepalive) = p.keepalive {
                        peer = peer.persistent_keepalive_interval(keepalive);
                    }
                    let allowed: Vec<set::AllowedIp<'_>> = p
                        .allowed_ips
                        .iter()
                        .map(|(addr, cidr)| {
                            let mut aip = set::AllowedIp::from_ipaddr(addr);
                            aip.cidr_mask = Some(*cidr);
                            aip
                        })
                        .collect();
                    peer.allowed_ips(allowed)
                })
                .collect();

            let mut dev = set::Device::from_ifname(name).peers(peers);
            if let Some(ref key) = private_key {
                dev = dev.private_key(key);
            }
            if let Some(port) = config.listen_port {
                dev = dev.listen_port(port);
            }
            if let Some(mark) = config.firewall_mark {
                dev = dev.fwmark(mark);
            }

            let mut wg = WgSocket::connect().map_err(wg_err)?;
            wg.set_device(dev).map_err(wg_err)?;

            debug!(
                interface = name,
                peer_count = config.peers.len(),
                "applied wireguard device delta"
            );
            Ok(())
        }
    }
}
