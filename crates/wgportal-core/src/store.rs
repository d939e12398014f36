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


use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;

use thiserror::Error;
use wgportal_types::{Interface, InterfaceIdentifier, Peer, PeerIdentifier};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("interface {0} not found")]
    InterfaceNotFound(InterfaceIdentifier),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable storage of interface and peer records, keyed by identifier.
/// Saves are upserts.
pub trait WireGuardStore: Send + Sync {
    fn get_interface_ids(&self) -> impl Future<Output = Result<Vec<InterfaceIdentifier>>> + Send;

    /// Load the given interfaces with their peers.
    fn get_all_interfaces(
        &self,
        ids: &[InterfaceIdentifier],
    ) -> impl Future<Output = Result<Vec<(Interface, Vec<Peer>)>>> + Send;

    fn get_interface(
        &self,
        id: &InterfaceIdentifier,
    ) -> impl Future<Output = Result<(Interface, Vec<Peer>)>> + Send;

    fn save_interface(&self, iface: &Interface) -> impl Future<Output = Result<()>> + Send;
    fn save_peer(&self, peer: &Peer) -> impl Future<Output = Result<()>> + Send;
    fn delete_interface(&self, id: &InterfaceIdentifier) -> impl Future<Output = Result<()>> + Send;
    fn delete_peer(&self, id: &PeerIdentifier) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Default)]
struct Records {
    interfaces: BTreeMap<InterfaceIdentifier, Interface>,
    peers: BTreeMap<PeerIdentifier, Peer>,
}

/// Process-local store, used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }

    /// Number of stored peers, across all interfaces.
    pub fn peer_count(&self) -> usize {
        self.lock().map(|r| r.peers.len()).unwrap_or_default()
    }

    pub fn contains_peer(&self, id: &PeerIdentifier) -> bool {
        self.lock().map(|r| r.peers.contains_key(id)).unwrap_or_default()
    }

    pub fn contains_interface(&self, id: &InterfaceIdentifier) -> bool {
        self.lock().map(|r| r.interfaces.contains_key(id)).unwrap_or_default()
    }
}

fn peers_of(records: &Records, id: &InterfaceIdentifier) -> Vec<Peer> {
    records
        .peers
        .values()
        .filter(|p| &p.interface.identifier == id)
        .cloned()
        .collect()
}

impl WireGuardStore for MemoryStore {
    async fn get_interface_ids(&self) -> Result<Vec<InterfaceIdentifier>> {
        Ok(self.lock()?.interfaces.keys().cloned().collect())
    }

    async fn get_all_interfaces(
        &self,
        ids: &[InterfaceIdentifier],
    ) -> Result<Vec<(Interface, Vec<Peer>)>> {
        let records = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| records.interfaces.get(id))
            .map(|iface| (iface.clone(), peers_of(&records, &iface.identifier)))
            .collect())
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<(Interface, Vec<Peer>)> {
        let records = self.lock()?;
        let iface = records
            .interfaces
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::InterfaceNotFound(id.clone()))?;
        Ok((iface, peers_of(&records, id)))
    }

    async fn save_interface(&self, iface: &Interface) -> Result<()> {
        self.lock()?
            .interfaces
            .insert(iface.identifier.clone(), iface.clone());
        Ok(())
    }

    async fn save_peer(&self, peer: &Peer) -> Result<()> {
        let mut peer = peer.clone();
        peer.temporary = None;
        self.lock()?.peers.insert(peer.identifier.clone(), peer);
        Ok(())
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<()> {
        self.lock()?.interfaces.remove(id);
        Ok(())
    }

    async fn delete_peer(&self, id: &PeerIdentifier) -> Result<()> {
        self.lock()?.peers.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, iface: &str) -> Peer {
        let mut p = Peer::default();
        p.identifier = id.into();
        p.interface.identifier = iface.into();
        p
    }

    #[tokio::test]
    async fn groups_peers_by_interface() {
        let store = MemoryStore::new();
        store.save_interface(&Interface::new("wg0".into())).await.unwrap();
        store.save_interface(&Interface::new("wg1".into())).await.unwrap();
        store.save_peer(&peer("a", "wg0")).await.unwrap();
        store.save_peer(&peer("b", "wg1")).await.unwrap();
        store.save_peer(&peer("c", "wg0")).await.unwrap();

        let ids = store.get_interface_ids().await.unwrap();
        let all = store.get_all_interfaces(&ids).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.identifier.as_str(), "wg0");
        assert_eq!(all[0].1.len(), 2);
        assert_eq!(all[1].1.len(), 1);
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = MemoryStore::new();
        let mut p = peer("a", "wg0");
        store.save_peer(&p).await.unwrap();
        p.display_name = "renamed".into();
        store.save_peer(&p).await.unwrap();
        assert_eq!(store.peer_count(), 1);
    }

    #[tokio::test]
    async fn missing_interface_is_error() {
        let store = MemoryStore::new();
        let err = store.get_interface(&"wg9".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::InterfaceNotFound(_)));
    }
}
