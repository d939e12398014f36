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


use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use wgportal_types::{Interface, InterfaceIdentifier, Peer, PeerIdentifier};

use crate::store::{MemoryStore, Result, StoreError, WireGuardStore};

#[derive(Debug, sqlx::FromRow)]
struct InterfaceRow {
    data: Json<Interface>,
}

#[derive(Debug, sqlx::FromRow)]
struct PeerRow {
    interface_identifier: String,
    data: Json<Peer>,
}

/// PostgreSQL backed store. Records are kept as JSON documents keyed by
/// identifier.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn peers_for(&self, ids: &[String]) -> Result<Vec<PeerRow>> {
        sqlx::query_as::<_, PeerRow>(
            "SELECT interface_identifier, data FROM peers
             WHERE interface_identifier = ANY($1)
             ORDER BY identifier",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}

impl WireGuardStore for PgStore {
    #[tracing::instrument(skip(self))]
    async fn get_interface_ids(&self) -> Result<Vec<InterfaceIdentifier>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT identifier FROM interfaces ORDER BY identifier")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| InterfaceIdentifier(id)).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_all_interfaces(
        &self,
        ids: &[InterfaceIdentifier],
    ) -> Result<Vec<(Interface, Vec<Peer>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();

        let interfaces = sqlx::query_as::<_, InterfaceRow>(
            "SELECT data FROM interfaces WHERE identifier = ANY($1) ORDER BY identifier",
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;
        let mut peers = self.peers_for(&raw).await?;

        Ok(interfaces
            .into_iter()
            .map(|row| {
                let iface = row.data.0;
                let (mine, rest): (Vec<_>, Vec<_>) = peers
                    .drain(..)
                    .partition(|p| p.interface_identifier == iface.identifier.0);
                peers = rest;
                (iface, mine.into_iter().map(|p| p.data.0).collect())
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<(Interface, Vec<Peer>)> {
        let row = sqlx::query_as::<_, InterfaceRow>("SELECT data FROM interfaces WHERE identifier = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::InterfaceNotFound(id.clone()))?;
        let peers = self.peers_for(&[id.0.clone()]).await?;
        Ok((row.data.0, peers.into_iter().map(|p| p.data.0).collect()))
    }

    #[tracing::instrument(skip(self, iface), fields(interface = %iface.identifier))]
    async fn save_interface(&self, iface: &Interface) -> Result<()> {
        sqlx::query(
            "INSERT INTO interfaces (identifier, data)
             VALUES ($1, $2)
             ON CONFLICT (identifier) DO UPDATE
             SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(iface.identifier.as_str())
        .bind(Json(iface))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, peer), fields(peer = %peer.identifier))]
    async fn save_peer(&self, peer: &Peer) -> Result<()> {
        let mut peer = peer.clone();
        peer.temporary = None;
        sqlx::query(
            "INSERT INTO peers (identifier, interface_identifier, user_identifier, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (identifier) DO UPDATE
             SET interface_identifier = EXCLUDED.interface_identifier,
                 user_identifier = EXCLUDED.user_identifier,
                 data = EXCLUDED.data,
                 updated_at = now()",
        )
        .bind(peer.identifier.as_str())
        .bind(peer.interface.identifier.as_str())
        .bind(peer.user_identifier.as_ref().map(|u| u.as_str()))
        .bind(Json(&peer))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<()> {
        sqlx::query("DELETE FROM interfaces WHERE identifier = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_peer(&self, id: &PeerIdentifier) -> Result<()> {
        sqlx::query("DELETE FROM peers WHERE identifier = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// The store selected at startup.
#[derive(Debug)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl StoreBackend {
    /// Connect to `database_url` and migrate, or fall back to memory.
    pub async fn open(database_url: Option<&str>) -> Result<Self> {
        match database_url {
            Some(url) => {
                let store = PgStore::connect(url).await?;
                store.migrate().await?;
                tracing::info!("using postgres store");
                Ok(Self::Postgres(store))
            }
            None => {
                tracing::warn!("no database configured, state is kept in memory only");
                Ok(Self::Memory(MemoryStore::new()))
            }
        }
    }
}

impl WireGuardStore for StoreBackend {
    async fn get_interface_ids(&self) -> Result<Vec<InterfaceIdentifier>> {
        match self {
            Self::Memory(s) => s.get_interface_ids().await,
            Self::Postgres(s) => s.get_interface_ids().await,
        }
    }

    async fn get_all_interfaces(
        &self,
        ids: &[InterfaceIdentifier],
    ) -> Result<Vec<(Interface, Vec<Peer>)>> {
        match self {
            Self::Memory(s) => s.get_all_interfaces(ids).await,
            Self::Postgres(s) => s.get_all_interfaces(ids).await,
        }
    }

    async fn get_interface(&self, id: &InterfaceIdentifier) -> Result<(Interface, Vec<Peer>)> {
        match self {
            Self::Memory(s) => s.get_interface(id).await,
            Self::Postgres(s) => s.get_interface(id).await,
        }
    }

    async fn save_interface(&self, iface: &Interface) -> Result<()> {
        match self {
            Self::Memory(s) => s.save_interface(iface).await,
            Self::Postgres(s) => s.save_interface(iface).await,
        }
    }

    async fn save_peer(&self, peer: &Peer) -> Result<()> {
        match self {
            Self::Memory(s) => s.save_peer(peer).await,
            Self::Postgres(s) => s.save_peer(peer).await,
        }
    }

    async fn delete_interface(&self, id: &InterfaceIdentifier) -> Result<()> {
        match self {
            Self::Memory(s) => s.delete_interface(id).await,
            Self::Postgres(s) => s.delete_interface(id).await,
        }
    }

    async fn delete_peer(&self, id: &PeerIdentifier) -> Result<()> {
        match self {
            Self::Memory(s) => s.delete_peer(id).await,
            Self::Postgres(s) => s.delete_peer(id).await,
        }
    }
}
