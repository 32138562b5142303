//! In-process store used when no Supabase project is configured, and in tests

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::game::model::{
    AggregateStats, LootSpawn, MatchRecord, MatchStatus, MatchUpdate, PlayerInMatch,
    PlayerStatus, PlayerUpdate, Vehicle, ZoneRecord,
};

use super::{MatchStore, StoreError};

/// DashMap-backed store. Rows live for the process lifetime.
#[derive(Default)]
pub struct MemoryStore {
    matches: DashMap<Uuid, MatchRecord>,
    /// Players per match, in enrollment order
    players: DashMap<Uuid, Vec<PlayerInMatch>>,
    zones: DashMap<Uuid, Vec<ZoneRecord>>,
    loot: DashMap<Uuid, Vec<LootSpawn>>,
    vehicles: DashMap<Uuid, Vec<Vehicle>>,
    stats: DashMap<Uuid, AggregateStats>,
    xp: DashMap<Uuid, u64>,
    /// Remaining writes to reject with `Unavailable`
    failing_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` writes, to exercise failure handling
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Total XP awarded to a user
    pub fn xp_for(&self, user_id: Uuid) -> u64 {
        self.xp.get(&user_id).map(|xp| *xp).unwrap_or(0)
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn create_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.check_write()?;
        if self.matches.contains_key(&record.id) {
            return Err(StoreError::Invariant(format!("match {} already exists", record.id)));
        }
        self.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_match(&self, match_id: Uuid) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.matches.get(&match_id).map(|m| m.value().clone()))
    }

    async fn update_match(&self, match_id: Uuid, update: &MatchUpdate) -> Result<(), StoreError> {
        self.check_write()?;
        let mut record = self.matches.get_mut(&match_id).ok_or(StoreError::NotFound {
            entity: "match",
            id: match_id,
        })?;
        update.apply(&mut record);
        Ok(())
    }

    async fn list_matches(&self, status: MatchStatus) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(self
            .matches
            .iter()
            .filter(|m| m.status == status)
            .map(|m| m.value().clone())
            .collect())
    }

    async fn insert_players(&self, players: &[PlayerInMatch]) -> Result<(), StoreError> {
        self.check_write()?;
        for player in players {
            let mut roster = self.players.entry(player.match_id).or_default();
            if roster.iter().any(|p| p.user_id == player.user_id) {
                return Err(StoreError::Invariant(format!(
                    "player {} already enrolled in match {}",
                    player.user_id, player.match_id
                )));
            }
            roster.push(player.clone());
        }
        Ok(())
    }

    async fn list_players_in_match(&self, match_id: Uuid) -> Result<Vec<PlayerInMatch>, StoreError> {
        Ok(self
            .players
            .get(&match_id)
            .map(|roster| roster.value().clone())
            .unwrap_or_default())
    }

    async fn get_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PlayerInMatch>, StoreError> {
        Ok(self
            .players
            .get(&match_id)
            .and_then(|roster| roster.iter().find(|p| p.user_id == user_id).cloned()))
    }

    async fn update_player(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        update: &PlayerUpdate,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut roster = self.players.get_mut(&match_id).ok_or(StoreError::NotFound {
            entity: "match",
            id: match_id,
        })?;
        let player = roster
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(StoreError::NotFound {
                entity: "player",
                id: user_id,
            })?;
        if player.status == PlayerStatus::Eliminated {
            return Err(StoreError::Invariant(format!(
                "player {} is eliminated and immutable",
                user_id
            )));
        }
        update.apply(player);
        Ok(())
    }

    async fn append_zone(&self, match_id: Uuid, zone: &ZoneRecord) -> Result<(), StoreError> {
        self.check_write()?;
        let mut zones = self.zones.entry(match_id).or_default();
        if let Some(last) = zones.last() {
            if zone.zone_number <= last.zone_number {
                return Err(StoreError::Invariant(format!(
                    "zone {} does not follow zone {}",
                    zone.zone_number, last.zone_number
                )));
            }
            if zone.radius > last.radius {
                return Err(StoreError::Invariant(format!(
                    "zone radius grew from {} to {}",
                    last.radius, zone.radius
                )));
            }
        }
        zones.push(zone.clone());
        Ok(())
    }

    async fn list_zones(&self, match_id: Uuid) -> Result<Vec<ZoneRecord>, StoreError> {
        Ok(self
            .zones
            .get(&match_id)
            .map(|z| z.value().clone())
            .unwrap_or_default())
    }

    async fn bulk_insert_loot(&self, match_id: Uuid, items: &[LootSpawn]) -> Result<(), StoreError> {
        self.check_write()?;
        self.loot
            .entry(match_id)
            .or_default()
            .extend(items.iter().cloned());
        Ok(())
    }

    async fn list_loot(&self, match_id: Uuid) -> Result<Vec<LootSpawn>, StoreError> {
        Ok(self
            .loot
            .get(&match_id)
            .map(|l| l.value().clone())
            .unwrap_or_default())
    }

    async fn mark_loot_collected(
        &self,
        match_id: Uuid,
        loot_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut loot = self.loot.get_mut(&match_id).ok_or(StoreError::NotFound {
            entity: "loot",
            id: loot_id,
        })?;
        let item = loot
            .iter_mut()
            .find(|l| l.id == loot_id)
            .ok_or(StoreError::NotFound {
                entity: "loot",
                id: loot_id,
            })?;
        if item.collected {
            return Ok(false);
        }
        item.collected = true;
        item.collected_by = Some(user_id);
        Ok(true)
    }

    async fn bulk_insert_vehicles(
        &self,
        match_id: Uuid,
        items: &[Vehicle],
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.vehicles
            .entry(match_id)
            .or_default()
            .extend(items.iter().cloned());
        Ok(())
    }

    async fn list_vehicles(&self, match_id: Uuid) -> Result<Vec<Vehicle>, StoreError> {
        Ok(self
            .vehicles
            .get(&match_id)
            .map(|v| v.value().clone())
            .unwrap_or_default())
    }

    async fn get_aggregate_stats(&self, user_id: Uuid) -> Result<Option<AggregateStats>, StoreError> {
        Ok(self.stats.get(&user_id).map(|s| s.value().clone()))
    }

    async fn upsert_aggregate_stats(&self, stats: &AggregateStats) -> Result<(), StoreError> {
        self.check_write()?;
        if let Some(existing) = self.stats.get(&stats.user_id) {
            if stats.total_matches < existing.total_matches {
                return Err(StoreError::Invariant(format!(
                    "stats for {} would go backwards",
                    stats.user_id
                )));
            }
        }
        self.stats.insert(stats.user_id, stats.clone());
        Ok(())
    }

    async fn award_xp(&self, user_id: Uuid, amount: u32) -> Result<(), StoreError> {
        self.check_write()?;
        *self.xp.entry(user_id).or_insert(0) += amount as u64;
        Ok(())
    }
}
