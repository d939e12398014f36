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


//! wgportal-core: reconciliation of WireGuard interfaces and peers.
//!
//! The [`Manager`] keeps the authoritative model in memory and pushes every
//! change to the kernel ([`lowlevel`]) and then to a [`WireGuardStore`].

pub mod cidr;
pub mod db;
pub mod error;
mod ip;
pub mod keys;
pub mod lowlevel;
pub mod manager;
pub mod render;
pub mod store;

pub use cidr::{Cidr, CidrError, ip_addresses_to_string, parse_ip_address_string};
pub use db::{PgStore, StoreBackend};
pub use error::{ManagerError, Result};
pub use keys::{Key, KeyError, KeyGenerator, X25519KeyGenerator};
pub use lowlevel::{CurrentNetlink, CurrentWireGuard, LowLevelError, NetlinkClient, WireGuardClient};
pub use manager::Manager;
pub use render::ConfigRenderer;
pub use store::{MemoryStore, StoreError, WireGuardStore};
