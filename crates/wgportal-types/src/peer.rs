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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ConfigOption, Interface, InterfaceIdentifier, InterfaceType, KeyPair, PeerIdentifier,
    PreSharedKey, UserIdentifier,
};

/// Interface-side settings of a peer, denormalized from the parent interface.
///
/// These feed the `[Interface]` section of the peer's own config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerInterfaceConfig {
    /// Parent interface.
    pub identifier: InterfaceIdentifier,
    /// Parent interface type.
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
    /// Parent interface public key.
    pub public_key: String,
    /// Tunnel addresses of the peer, comma separated CIDRs.
    pub address_str: ConfigOption<String>,
    /// DNS servers, comma separated.
    pub dns_str: ConfigOption<String>,
    /// DNS search domains, comma separated.
    pub dns_search_str: ConfigOption<String>,
    /// Tunnel MTU.
    pub mtu: ConfigOption<u32>,
    /// Firewall mark.
    pub firewall_mark: ConfigOption<u32>,
    /// Routing table.
    pub routing_table: ConfigOption<String>,
    /// Hook run before the device comes up.
    pub pre_up: ConfigOption<String>,
    /// Hook run after the device came up.
    pub post_up: ConfigOption<String>,
    /// Hook run before the device goes down.
    pub pre_down: ConfigOption<String>,
    /// Hook run after the device went down.
    pub post_down: ConfigOption<String>,
}

impl PeerInterfaceConfig {
    /// Interface-side settings seeded from the interface's peer defaults.
    pub fn from_interface(iface: &Interface, address_str: String) -> Self {
        let defaults = &iface.peer_defaults;
        Self {
            identifier: iface.identifier.clone(),
            interface_type: iface.interface_type,
            public_key: iface.key_pair.public_key.clone(),
            address_str: ConfigOption::Default(address_str),
            dns_str: ConfigOption::Default(defaults.dns_str.clone()),
            dns_search_str: ConfigOption::Default(defaults.dns_search_str.clone()),
            mtu: ConfigOption::Default(defaults.mtu),
            firewall_mark: ConfigOption::Default(defaults.firewall_mark),
            routing_table: ConfigOption::Default(defaults.routing_table.clone()),
            pre_up: ConfigOption::Default(defaults.pre_up.clone()),
            post_up: ConfigOption::Default(defaults.post_up.clone()),
            pre_down: ConfigOption::Default(defaults.pre_down.clone()),
            post_down: ConfigOption::Default(defaults.post_down.clone()),
        }
    }
}

/// A WireGuard peer of a managed interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    /// Globally unique identifier, conventionally the public key.
    pub identifier: PeerIdentifier,
    /// Human readable name.
    pub display_name: String,
    /// Owner of the peer, if any.
    pub user_identifier: Option<UserIdentifier>,
    /// Remote endpoint (host:port).
    pub endpoint: ConfigOption<String>,
    /// Client-visible allowed IPs, comma separated.
    pub allowed_ips_str: ConfigOption<String>,
    /// Server-side only routes, comma separated.
    pub extra_allowed_ips_str: String,
    /// The peer's key pair. The private key may be empty for imported peers.
    pub key_pair: KeyPair,
    /// Optional pre-shared key.
    pub preshared_key: Option<PreSharedKey>,
    /// Persistent keepalive in seconds.
    pub persistent_keepalive: ConfigOption<u32>,
    /// Set while the peer is only prepared and not committed anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary: Option<DateTime<Utc>>,
    /// Set when the peer was disabled.
    pub disabled: Option<DateTime<Utc>>,
    /// Interface-side settings for the peer's config file.
    pub interface: PeerInterfaceConfig,
}

impl Peer {
    /// Whether the peer is disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled.is_some()
    }

    /// Whether the peer is a prepared, uncommitted peer.
    pub fn is_temporary(&self) -> bool {
        self.temporary.is_some()
    }
}
