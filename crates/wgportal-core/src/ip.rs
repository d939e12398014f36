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


//! Address allocation from the interfaces' CIDR pools.
//!
//! The search is a linear scan from the subnet's network address. That is
//! fine for the human-scale subnets a VPN hands out, but nothing bounds the
//! scan for a sparsely used /64. Two peers racing for the same address are
//! only prevented by the manager's lock; stored records carry no uniqueness
//! constraint.

use wgportal_types::InterfaceIdentifier;

use crate::cidr::{self, Cidr};
use crate::error::{ManagerError, Result};
use crate::lowlevel::{NetlinkClient, WireGuardClient};
use crate::manager::{Manager, State};
use crate::store::WireGuardStore;

impl<N, W, S> Manager<N, W, S>
where
    N: NetlinkClient,
    W: WireGuardClient,
    S: WireGuardStore,
{
    /// Every address held by a peer of the interface, sorted.
    pub async fn all_used_ips(&self, id: &InterfaceIdentifier) -> Result<Vec<Cidr>> {
        let state = self.state.read().await;
        used_ips(&state, id, None)
    }

    /// Addresses held by peers of the interface that fall inside `subnet`.
    pub async fn used_ips(&self, id: &InterfaceIdentifier, subnet: &str) -> Result<Vec<Cidr>> {
        let subnet = parse_subnet(subnet)?;
        let state = self.state.read().await;
        used_ips(&state, id, Some(&subnet))
    }

    /// The lowest free address of `subnet`, carrying the subnet's prefix.
    pub async fn fresh_ip(
        &self,
        id: &InterfaceIdentifier,
        subnet: &str,
        reserved: &[Cidr],
    ) -> Result<Cidr> {
        let subnet = parse_subnet(subnet)?;
        let state = self.state.read().await;
        fresh_ip(&state, id, &subnet, reserved)
    }

    /// One fresh address per subnet configured on the interface, comma
    /// separated.
    pub async fn fresh_ips(&self, id: &InterfaceIdentifier) -> Result<String> {
        let state = self.state.read().await;
        let iface = state
            .interfaces
            .get(id)
            .ok_or_else(|| ManagerError::InterfaceNotFound(id.clone()))?;
        let own = cidr::parse_ip_address_string(&iface.address_str)
            .map_err(|e| ManagerError::parse(format!("addresses of interface {id}"), e))?;

        let fresh = own
            .iter()
            .map(|addr| fresh_ip(&state, id, addr, std::slice::from_ref(addr)))
            .collect::<Result<Vec<_>>>()?;
        Ok(cidr::ip_addresses_to_string(&fresh))
    }
}

fn parse_subnet(subnet: &str) -> Result<Cidr> {
    Cidr::parse(subnet).map_err(|e| ManagerError::parse("subnet", e))
}

fn used_ips(state: &State, id: &InterfaceIdentifier, subnet: Option<&Cidr>) -> Result<Vec<Cidr>> {
    if !state.interfaces.contains_key(id) {
        return Err(ManagerError::InterfaceNotFound(id.clone()));
    }

    let mut used = Vec::new();
    for peer in state.peers.get(id).into_iter().flat_map(|p| p.values()) {
        let addrs = cidr::parse_ip_address_string(peer.interface.address_str.value())
            .map_err(|e| ManagerError::parse(format!("addresses of peer {}", peer.identifier), e))?;
        used.extend(
            addrs
                .into_iter()
                .filter(|a| subnet.is_none_or(|s| s.contains(a.addr()))),
        );
    }
    used.sort();
    Ok(used)
}

fn fresh_ip(state: &State, id: &InterfaceIdentifier, subnet: &Cidr, reserved: &[Cidr]) -> Result<Cidr> {
    let mut used = used_ips(state, id, Some(subnet))?;
    if let Some(iface) = state.interfaces.get(id) {
        let own = cidr::parse_ip_address_string(&iface.address_str)
            .map_err(|e| ManagerError::parse(format!("addresses of interface {id}"), e))?;
        used.extend(own.into_iter().filter(|a| subnet.contains(a.addr())));
    }

    let network = subnet.network();
    let broadcast = subnet.broadcast();
    let mut candidate = Some(network);

    while let Some(ip) = candidate.filter(|ip| subnet.contains(ip.addr())) {
        candidate = ip.next();

        if ip.same_addr(&network) || (subnet.is_v4() && ip.same_addr(&broadcast)) {
            continue;
        }
        if reserved.iter().any(|r| r.same_addr(&ip)) || used.iter().any(|u| u.same_addr(&ip)) {
            continue;
        }
        return Ok(ip);
    }

    Err(ManagerError::Exhausted { subnet: subnet.network().to_string() })
}
