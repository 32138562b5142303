//! Supabase REST API client and the PostgREST-backed match store

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::config::SupabaseConfig;
use crate::game::model::{
    AggregateStats, LootSpawn, MatchRecord, MatchStatus, MatchUpdate, PlayerInMatch,
    PlayerUpdate, Vehicle, ZoneRecord,
};

use super::{MatchStore, StoreError};

const MATCHES: &str = "br_matches";
const PLAYERS: &str = "br_match_players";
const ZONES: &str = "br_zones";
const LOOT: &str = "br_loot_spawns";
const VEHICLES: &str = "br_vehicles";
const STATS: &str = "br_player_stats";
const AWARD_XP_FN: &str = "award_xp";

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Authenticated request builder
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Turn non-2xx responses into `StoreError::Api`
    async fn check(response: Response) -> Result<Response, StoreError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// GET rows matching a PostgREST query
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.request(Method::GET, &url).send().await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::Parse)
    }

    /// GET expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);

        let response = self
            .request(Method::GET, &url)
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        Self::check(response)
            .await?
            .json()
            .await
            .map(Some)
            .map_err(StoreError::Parse)
    }

    /// POST one row or an array of rows without reading them back
    pub async fn insert<T: Serialize + ?Sized>(&self, table: &str, data: &T) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, &self.rest_url(table))
            .header("Prefer", "return=minimal")
            .json(data)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    /// PATCH rows matching a query
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<(), StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.request(Method::PATCH, &url).json(data).send().await?;
        Self::check(response).await.map(|_| ())
    }

    /// PATCH rows matching a query and return the rows that changed
    pub async fn update_returning<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<Vec<R>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .request(Method::PATCH, &url)
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::Parse)
    }

    /// Upsert (insert or update on conflict)
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);
        let response = self
            .request(Method::POST, &url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    /// Call a Postgres function
    pub async fn rpc<T: Serialize>(&self, function: &str, args: &T) -> Result<(), StoreError> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);
        let response = self.request(Method::POST, &url).json(args).send().await?;
        Self::check(response).await.map(|_| ())
    }
}

/// Match store over the Supabase tables
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

fn by_match(match_id: Uuid) -> String {
    format!("match_id=eq.{}", match_id)
}

fn by_player(match_id: Uuid, user_id: Uuid) -> String {
    format!("match_id=eq.{}&user_id=eq.{}", match_id, user_id)
}

#[async_trait]
impl MatchStore for SupabaseStore {
    async fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.client.insert(MATCHES, record).await
    }

    async fn get_match(&self, match_id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        self.client
            .get_one(MATCHES, &format!("id=eq.{}", match_id))
            .await
    }

    async fn update_match(&self, match_id: Uuid, update: &MatchUpdate) -> Result<(), StoreError> {
        self.client
            .update(MATCHES, &format!("id=eq.{}", match_id), update)
            .await
    }

    async fn list_matches(&self, status: MatchStatus) -> Result<Vec<MatchRecord>, StoreError> {
        self.client
            .get(MATCHES, &format!("status=eq.{}", status.as_str()))
            .await
    }

    async fn insert_players(&self, players: &[PlayerInMatch]) -> Result<(), StoreError> {
        if players.is_empty() {
            return Ok(());
        }
        self.client.insert(PLAYERS, players).await
    }

    async fn list_players_in_match(&self, match_id: Uuid) -> Result<Vec<PlayerInMatch>, StoreError> {
        self.client.get(PLAYERS, &by_match(match_id)).await
    }

    async fn get_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PlayerInMatch>, StoreError> {
        self.client.get_one(PLAYERS, &by_player(match_id, user_id)).await
    }

    async fn update_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        update: &PlayerUpdate,
    ) -> Result<(), StoreError> {
        // Eliminated rows are frozen
        let query = format!("{}&status=eq.alive", by_player(match_id, user_id));
        let updated: Vec<PlayerInMatch> = self
            .client
            .update_returning(PLAYERS, &query, update)
            .await?;
        if updated.is_empty() {
            return Err(StoreError::Invariant(format!(
                "player {} is not alive in match {}",
                user_id, match_id
            )));
        }
        Ok(())
    }

    async fn append_zone(&self, match_id: Uuid, zone: &ZoneRecord) -> Result<(), StoreError> {
        let last: Vec<ZoneRecord> = self
            .client
            .get(
                ZONES,
                &format!("{}&order=zone_number.desc&limit=1", by_match(match_id)),
            )
            .await?;
        if let Some(last) = last.first() {
            if zone.zone_number <= last.zone_number || zone.radius > last.radius {
                return Err(StoreError::Invariant(format!(
                    "zone {} (radius {}) does not follow zone {} (radius {})",
                    zone.zone_number, zone.radius, last.zone_number, last.radius
                )));
            }
        }
        self.client.insert(ZONES, zone).await
    }

    async fn list_zones(&self, match_id: Uuid) -> Result<Vec<ZoneRecord>, StoreError> {
        self.client
            .get(ZONES, &format!("{}&order=zone_number.asc", by_match(match_id)))
            .await
    }

    async fn bulk_insert_loot(&self, _match_id: Uuid, items: &[LootSpawn]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        self.client.insert(LOOT, items).await
    }

    async fn list_loot(&self, match_id: Uuid) -> Result<Vec<LootSpawn>, StoreError> {
        self.client.get(LOOT, &by_match(match_id)).await
    }

    async fn mark_loot_collected(
        &self,
        match_id: Uuid,
        loot_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        #[derive(Serialize)]
        struct Collect {
            collected: bool,
            collected_by: Uuid,
        }

        // Conditional update: only an uncollected row matches
        let query = format!("id=eq.{}&{}&collected=eq.false", loot_id, by_match(match_id));
        let updated: Vec<LootSpawn> = self
            .client
            .update_returning(
                LOOT,
                &query,
                &Collect {
                    collected: true,
                    collected_by: user_id,
                },
            )
            .await?;
        if !updated.is_empty() {
            return Ok(true);
        }

        let exists: Option<LootSpawn> = self
            .client
            .get_one(LOOT, &format!("id=eq.{}&{}", loot_id, by_match(match_id)))
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound {
                entity: "loot",
                id: loot_id,
            }),
        }
    }

    async fn bulk_insert_vehicles(
        &self,
        _match_id: Uuid,
        items: &[Vehicle],
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        self.client.insert(VEHICLES, items).await
    }

    async fn list_vehicles(&self, match_id: Uuid) -> Result<Vec<Vehicle>, StoreError> {
        self.client.get(VEHICLES, &by_match(match_id)).await
    }

    async fn get_aggregate_stats(&self, user_id: Uuid) -> Result<Option<AggregateStats>, StoreError> {
        self.client
            .get_one(STATS, &format!("user_id=eq.{}", user_id))
            .await
    }

    async fn upsert_aggregate_stats(&self, stats: &AggregateStats) -> Result<(), StoreError> {
        self.client.upsert(STATS, stats, "user_id").await
    }

    async fn award_xp(&self, user_id: Uuid, amount: u32) -> Result<(), StoreError> {
        #[derive(Serialize)]
        struct AwardXp {
            p_user_id: Uuid,
            p_amount: u32,
        }

        self.client
            .rpc(
                AWARD_XP_FN,
                &AwardXp {
                    p_user_id: user_id,
                    p_amount: amount,
                },
            )
            .await
    }
}
