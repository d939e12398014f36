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

//! wgportal-types: Shared model definitions for the wgportal ecosystem.
//!
//! This crate contains the interface, peer and statistics records shared
//! between the reconciliation manager, its store adapters and the JSON API.

#![warn(missing_docs)]

mod interface;
mod option;
mod peer;
mod stats;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use interface::{ImportableInterface, Interface, InterfaceType, PeerDefaults};
pub use option::ConfigOption;
pub use peer::{Peer, PeerInterfaceConfig};
pub use stats::{InterfaceStats, PeerStats};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is blank.
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

identifier! {
    /// Device name of a WireGuard interface, e.g. `wg0`.
    InterfaceIdentifier
}

identifier! {
    /// Globally unique peer identifier, conventionally the peer's public key.
    PeerIdentifier
}

identifier! {
    /// Identifier of the user owning a peer.
    UserIdentifier
}

/// A base64 encoded Curve25519 key pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Private key, base64.
    pub private_key: String,
    /// Public key, base64.
    pub public_key: String,
}

/// A base64 encoded 32 byte pre-shared key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreSharedKey(pub String);

impl PreSharedKey {
    /// Borrow the raw base64 value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
