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

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InterfaceIdentifier, KeyPair, Peer};

/// Role of a WireGuard interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Accepts connections from many peers.
    #[default]
    Server,
    /// Connects to a remote server; its peers carry the remote endpoint.
    Client,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Settings that seed newly created peers of an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerDefaults {
    /// DNS servers, comma separated.
    pub dns_str: String,
    /// DNS search domains, comma separated.
    pub dns_search_str: String,
    /// Endpoint peers connect to (host:port).
    pub endpoint: String,
    /// Client-visible allowed IPs, comma separated.
    pub allowed_ips_str: String,
    /// Tunnel MTU, 0 for the kernel default.
    pub mtu: u32,
    /// Persistent keepalive in seconds, 0 disables it.
    pub persistent_keepalive: u32,
    /// Firewall mark, 0 for none.
    pub firewall_mark: u32,
    /// Routing table.
    pub routing_table: String,
    /// Hook run before the peer's device comes up.
    pub pre_up: String,
    /// Hook run after the peer's device came up.
    pub post_up: String,
    /// Hook run before the peer's device goes down.
    pub pre_down: String,
    /// Hook run after the peer's device went down.
    pub post_down: String,
}

/// A managed WireGuard interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    /// Device name, unique across the system.
    pub identifier: InterfaceIdentifier,
    /// The interface's own key pair.
    pub key_pair: KeyPair,
    /// UDP listen port.
    pub listen_port: u16,
    /// Interface addresses in CIDR notation, comma separated.
    pub address_str: String,
    /// DNS servers applied while the interface is up, comma separated.
    pub dns_str: String,
    /// DNS search domains, comma separated.
    pub dns_search_str: String,
    /// Device MTU, 0 for the kernel default.
    pub mtu: u32,
    /// Firewall mark, 0 for none.
    pub firewall_mark: u32,
    /// Routing table.
    pub routing_table: String,
    /// Hook run before the device comes up.
    pub pre_up: String,
    /// Hook run after the device came up.
    pub post_up: String,
    /// Hook run before the device goes down.
    pub pre_down: String,
    /// Hook run after the device went down.
    pub post_down: String,
    /// Human readable name.
    pub display_name: String,
    /// Server or client.
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
    /// Driver backing the device (linux, userspace, ...).
    pub driver_type: String,
    /// Set when the interface was disabled.
    pub disabled: Option<DateTime<Utc>>,
    /// Defaults pushed into the peers of this interface.
    pub peer_defaults: PeerDefaults,
}

impl Interface {
    /// A fresh server interface with nothing but its identifier set.
    pub fn new(identifier: InterfaceIdentifier) -> Self {
        Self {
            identifier,
            interface_type: InterfaceType::Server,
            ..Self::default()
        }
    }

    /// Whether the device should be up.
    pub fn is_enabled(&self) -> bool {
        self.disabled.is_none()
    }
}

/// A kernel device discovered on the host that is not managed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportableInterface {
    /// The candidate interface record.
    pub interface: Interface,
    /// Where the device was found.
    pub import_location: String,
    /// How the device was created, if known.
    pub import_type: String,
    /// Peers currently configured on the device.
    pub peers: Vec<Peer>,
}
