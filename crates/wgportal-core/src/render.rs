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


use std::fmt::Write as _;

use wgportal_types::{Interface, InterfaceType, Peer};

/// Renders wg-quick configuration files from model snapshots.
#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    version: String,
}

impl Default for ConfigRenderer {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl ConfigRenderer {
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into() }
    }

    /// The interface's own file, with one `[Peer]` per enabled peer.
    pub fn interface_config(&self, iface: &Interface, peers: &[Peer]) -> String {
        let mut config = String::new();
        writeln!(config, "# Generated by wgportal {}", self.version).unwrap();
        let name = non_empty(&iface.display_name).unwrap_or(iface.identifier.as_str());
        writeln!(config, "# {name}").unwrap();
        writeln!(config, "[Interface]").unwrap();
        if let Some(key) = non_empty(&iface.key_pair.public_key) {
            writeln!(config, "# PublicKey = {key}").unwrap();
        }
        if let Some(key) = non_empty(&iface.key_pair.private_key) {
            writeln!(config, "PrivateKey = {key}").unwrap();
        }
        line(&mut config, "Address", &join_list(&[iface.address_str.as_str()]));
        if iface.listen_port != 0 {
            writeln!(config, "ListenPort = {}", iface.listen_port).unwrap();
        }
        number(&mut config, "MTU", iface.mtu);
        line(&mut config, "DNS", &join_list(&[iface.dns_str.as_str(), iface.dns_search_str.as_str()]));
        number(&mut config, "FwMark", iface.firewall_mark);
        line(&mut config, "Table", &iface.routing_table);
        hooks(
            &mut config,
            [
                iface.pre_up.as_str(),
                iface.post_up.as_str(),
                iface.pre_down.as_str(),
                iface.post_down.as_str(),
            ],
        );

        for peer in peers {
            writeln!(config).unwrap();
            let name = non_empty(&peer.display_name).unwrap_or(peer.identifier.as_str());
            if peer.is_disabled() {
                writeln!(config, "# [Peer] {name} is disabled").unwrap();
                continue;
            }
            writeln!(config, "# {name}").unwrap();
            writeln!(config, "[Peer]").unwrap();
            writeln!(config, "PublicKey = {}", peer.key_pair.public_key).unwrap();
            if let Some(psk) = peer.preshared_key.as_ref().and_then(|k| non_empty(k.as_str())) {
                writeln!(config, "PresharedKey = {psk}").unwrap();
            }
            let allowed = match iface.interface_type {
                InterfaceType::Server => join_list(&[
                    peer.allowed_ips_str.value().as_str(),
                    peer.extra_allowed_ips_str.as_str(),
                ]),
                InterfaceType::Client => join_list(&[peer.allowed_ips_str.value().as_str()]),
            };
            line(&mut config, "AllowedIPs", &allowed);
            if iface.interface_type == InterfaceType::Client {
                line(&mut config, "Endpoint", peer.endpoint.value());
            }
            number(&mut config, "PersistentKeepalive", *peer.persistent_keepalive.value());
        }

        config
    }

    /// The file a peer imports on its side of the tunnel.
    pub fn peer_config(&self, peer: &Peer) -> String {
        let cfg = &peer.interface;
        let mut config = String::new();
        writeln!(config, "# Generated by wgportal {}", self.version).unwrap();
        let name = non_empty(&peer.display_name).unwrap_or(peer.identifier.as_str());
        writeln!(config, "# {name}").unwrap();
        writeln!(config, "[Interface]").unwrap();
        if let Some(key) = non_empty(&peer.key_pair.public_key) {
            writeln!(config, "# PublicKey = {key}").unwrap();
        }
        if let Some(key) = non_empty(&peer.key_pair.private_key) {
            writeln!(config, "PrivateKey = {key}").unwrap();
        }
        line(&mut config, "Address", &join_list(&[cfg.address_str.value().as_str()]));
        line(&mut config, "DNS", &join_list(&[cfg.dns_str.value().as_str(), cfg.dns_search_str.value().as_str()]));
        number(&mut config, "MTU", *cfg.mtu.value());
        number(&mut config, "FwMark", *cfg.firewall_mark.value());
        line(&mut config, "Table", cfg.routing_table.value());
        hooks(
            &mut config,
            [
                cfg.pre_up.value().as_str(),
                cfg.post_up.value().as_str(),
                cfg.pre_down.value().as_str(),
                cfg.post_down.value().as_str(),
            ],
        );

        writeln!(config).unwrap();
        writeln!(config, "# {}", cfg.identifier).unwrap();
        writeln!(config, "[Peer]").unwrap();
        writeln!(config, "PublicKey = {}", cfg.public_key).unwrap();
        if let Some(psk) = peer.preshared_key.as_ref().and_then(|k| non_empty(k.as_str())) {
            writeln!(config, "PresharedKey = {psk}").unwrap();
        }
        line(&mut config, "AllowedIPs", &join_list(&[peer.allowed_ips_str.value().as_str()]));
        line(&mut config, "Endpoint", peer.endpoint.value());
        number(&mut config, "PersistentKeepalive", *peer.persistent_keepalive.value());

        config
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn line(config: &mut String, key: &str, value: &str) {
    if let Some(value) = non_empty(value) {
        writeln!(config, "{key} = {value}").unwrap();
    }
}

fn number(config: &mut String, key: &str, value: u32) {
    if value != 0 {
        writeln!(config, "{key} = {value}").unwrap();
    }
}

fn hooks(config: &mut String, [pre_up, post_up, pre_down, post_down]: [&str; 4]) {
    line(config, "PreUp", pre_up);
    line(config, "PostUp", post_up);
    line(config, "PreDown", pre_down);
    line(config, "PostDown", post_down);
}

/// Merge comma separated lists into wg-quick's `a, b` form.
fn join_list(lists: &[&str]) -> String {
    lists
        .iter()
        .flat_map(|l| l.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
