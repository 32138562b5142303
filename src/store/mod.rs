//! Persistent store boundary for match, player, zone, loot, vehicle and stat rows

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use uuid::Uuid;

use crate::game::model::{
    AggregateStats, LootSpawn, MatchRecord, MatchStatus, MatchUpdate, PlayerInMatch,
    PlayerUpdate, Vehicle, ZoneRecord,
};

pub use memory::MemoryStore;
pub use supabase::{SupabaseClient, SupabaseStore};

/// Durable storage consumed by the orchestrator
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError>;
    async fn get_match(&self, match_id: Uuid) -> Result<Option<MatchRecord>, StoreError>;
    async fn update_match(&self, match_id: Uuid, update: &MatchUpdate) -> Result<(), StoreError>;
    async fn list_matches(&self, status: MatchStatus) -> Result<Vec<MatchRecord>, StoreError>;

    async fn insert_players(&self, players: &[PlayerInMatch]) -> Result<(), StoreError>;
    async fn list_players_in_match(&self, match_id: Uuid) -> Result<Vec<PlayerInMatch>, StoreError>;
    async fn get_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PlayerInMatch>, StoreError>;
    async fn update_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        update: &PlayerUpdate,
    ) -> Result<(), StoreError>;

    async fn append_zone(&self, match_id: Uuid, zone: &ZoneRecord) -> Result<(), StoreError>;
    async fn list_zones(&self, match_id: Uuid) -> Result<Vec<ZoneRecord>, StoreError>;

    async fn bulk_insert_loot(&self, match_id: Uuid, items: &[LootSpawn]) -> Result<(), StoreError>;
    async fn list_loot(&self, match_id: Uuid) -> Result<Vec<LootSpawn>, StoreError>;
    /// Mark a spawn collected; `false` if it already was
    async fn mark_loot_collected(
        &self,
        match_id: Uuid,
        loot_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError>;

    async fn bulk_insert_vehicles(&self, match_id: Uuid, items: &[Vehicle])
        -> Result<(), StoreError>;
    async fn list_vehicles(&self, match_id: Uuid) -> Result<Vec<Vehicle>, StoreError>;

    async fn get_aggregate_stats(&self, user_id: Uuid) -> Result<Option<AggregateStats>, StoreError>;
    async fn upsert_aggregate_stats(&self, stats: &AggregateStats) -> Result<(), StoreError>;
    async fn award_xp(&self, user_id: Uuid, amount: u32) -> Result<(), StoreError>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Rejected write: {0}")]
    Invariant(String),

    #[error("Store unavailable")]
    Unavailable,
}
