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

use crate::{InterfaceIdentifier, PeerIdentifier};

/// Live statistics of a peer, polled from the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    /// The peer these numbers belong to.
    pub identifier: PeerIdentifier,
    /// Time of the most recent handshake.
    pub last_handshake: Option<DateTime<Utc>>,
    /// Last endpoint the kernel saw traffic from.
    pub last_endpoint: Option<String>,
    /// Whether a handshake happened recently.
    pub connected: bool,
    /// Bytes received from the peer.
    pub bytes_received: u64,
    /// Bytes sent to the peer.
    pub bytes_transmitted: u64,
    /// When these numbers were collected.
    pub updated_at: DateTime<Utc>,
}

/// Live statistics of an interface, summed over its kernel peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    /// The interface these numbers belong to.
    pub identifier: InterfaceIdentifier,
    /// Number of peers configured on the kernel device.
    pub peer_count: usize,
    /// Bytes received over all peers.
    pub bytes_received: u64,
    /// Bytes sent over all peers.
    pub bytes_transmitted: u64,
    /// When these numbers were collected.
    pub updated_at: DateTime<Utc>,
}
