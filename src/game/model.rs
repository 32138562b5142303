//! Persistent records for matches, players, zones, loot, vehicles and stats

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MatchConfig;

/// Starting (and maximum) player health
pub const MAX_HEALTH: i32 = 100;

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Created, players enrolled, timers not armed
    Waiting,
    /// Zone and loot timers running
    InProgress,
    /// Settled; terminal
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// One (or no) player left alive
    Winner,
    /// Final countdown elapsed
    Timeout,
    /// Stopped by an operator
    Cancelled,
}

/// Player status within a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Alive,
    Eliminated,
}

/// What eliminated a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    /// Zone damage
    Zone,
    /// Another player
    Player,
    /// Left the match
    Disconnect,
    /// Removed by an operator
    Admin,
}

impl fmt::Display for EliminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Zone => "zone",
            Self::Player => "player",
            Self::Disconnect => "disconnect",
            Self::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// A point on the map
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Match row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    /// Seed for the match's zone and loot random streams
    pub seed: u64,
    pub status: MatchStatus,
    pub config: MatchConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,

    // Current zone
    pub zone_number: u32,
    pub zone_center_x: f32,
    pub zone_center_y: f32,
    pub zone_radius: f32,
    pub zone_damage_per_second: u32,
    /// When the next shrink tick is due (None once the final countdown runs)
    pub next_shrink_at: Option<DateTime<Utc>>,
    /// When the final countdown ends the match
    pub final_countdown_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    /// New `waiting` match with the zone at full size
    pub fn new(id: Uuid, seed: u64, config: MatchConfig) -> Self {
        Self {
            id,
            seed,
            status: MatchStatus::Waiting,
            zone_number: 0,
            zone_center_x: 0.0,
            zone_center_y: 0.0,
            zone_radius: config.max_zone_radius,
            zone_damage_per_second: config.zone_damage_per_second.round() as u32,
            config,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            end_reason: None,
            next_shrink_at: None,
            final_countdown_at: None,
        }
    }

    pub fn zone_center(&self) -> Position {
        Position::new(self.zone_center_x, self.zone_center_y)
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == MatchStatus::InProgress
    }
}

/// Partial match update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_center_x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_center_y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_radius: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_damage_per_second: Option<u32>,
    /// `Some(None)` clears the column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_shrink_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_countdown_at: Option<Option<DateTime<Utc>>>,
}

impl MatchUpdate {
    /// Set zone fields from a zone record
    pub fn with_zone(mut self, zone: &ZoneRecord) -> Self {
        self.zone_number = Some(zone.zone_number);
        self.zone_center_x = Some(zone.center_x);
        self.zone_center_y = Some(zone.center_y);
        self.zone_radius = Some(zone.radius);
        self.zone_damage_per_second = Some(zone.damage_per_second);
        self
    }

    pub fn apply(&self, record: &mut MatchRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(started_at) = self.started_at {
            record.started_at = Some(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            record.ended_at = Some(ended_at);
        }
        if let Some(reason) = self.end_reason {
            record.end_reason = Some(reason);
        }
        if let Some(n) = self.zone_number {
            record.zone_number = n;
        }
        if let Some(x) = self.zone_center_x {
            record.zone_center_x = x;
        }
        if let Some(y) = self.zone_center_y {
            record.zone_center_y = y;
        }
        if let Some(radius) = self.zone_radius {
            record.zone_radius = radius;
        }
        if let Some(dps) = self.zone_damage_per_second {
            record.zone_damage_per_second = dps;
        }
        if let Some(at) = self.next_shrink_at {
            record.next_shrink_at = at;
        }
        if let Some(at) = self.final_countdown_at {
            record.final_countdown_at = at;
        }
    }
}

/// Player-in-match row, keyed by (match_id, user_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInMatch {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub status: PlayerStatus,
    pub eliminated_at: Option<DateTime<Utc>>,
    pub elimination_cause: Option<EliminationCause>,
    pub eliminated_by: Option<Uuid>,
    pub kills: u32,
    pub assists: u32,
    pub damage_dealt: f32,
}

impl PlayerInMatch {
    pub fn new(match_id: Uuid, user_id: Uuid, spawn: Position) -> Self {
        Self {
            match_id,
            user_id,
            x: spawn.x,
            y: spawn.y,
            health: MAX_HEALTH,
            status: PlayerStatus::Alive,
            eliminated_at: None,
            elimination_cause: None,
            eliminated_by: None,
            kills: 0,
            assists: 0,
            damage_dealt: 0.0,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn is_alive(&self) -> bool {
        self.status == PlayerStatus::Alive
    }

    /// Subtract damage; returns true if this hit eliminated the player
    pub fn take_damage(&mut self, amount: i32, cause: EliminationCause, at: DateTime<Utc>) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.health = (self.health - amount).max(0);
        if self.health == 0 {
            self.eliminate(cause, at);
            true
        } else {
            false
        }
    }

    /// Transition to `eliminated`; the timestamp is set exactly once
    pub fn eliminate(&mut self, cause: EliminationCause, at: DateTime<Utc>) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.health = 0;
        self.status = PlayerStatus::Eliminated;
        self.eliminated_at = Some(at);
        self.elimination_cause = Some(cause);
        true
    }
}

/// Partial player update
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PlayerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eliminated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elimination_cause: Option<EliminationCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eliminated_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kills: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assists: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage_dealt: Option<f32>,
}

impl PlayerUpdate {
    /// Update carrying health and (if eliminated) elimination columns
    pub fn vitals(player: &PlayerInMatch) -> Self {
        Self {
            health: Some(player.health),
            status: Some(player.status),
            eliminated_at: player.eliminated_at,
            elimination_cause: player.elimination_cause,
            eliminated_by: player.eliminated_by,
            ..Self::default()
        }
    }

    pub fn apply(&self, player: &mut PlayerInMatch) {
        if let Some(x) = self.x {
            player.x = x;
        }
        if let Some(y) = self.y {
            player.y = y;
        }
        if let Some(health) = self.health {
            player.health = health;
        }
        if let Some(status) = self.status {
            player.status = status;
        }
        if let Some(at) = self.eliminated_at {
            player.eliminated_at = Some(at);
        }
        if let Some(cause) = self.elimination_cause {
            player.elimination_cause = Some(cause);
        }
        if let Some(by) = self.eliminated_by {
            player.eliminated_by = Some(by);
        }
        if let Some(kills) = self.kills {
            player.kills = kills;
        }
        if let Some(assists) = self.assists {
            player.assists = assists;
        }
        if let Some(damage) = self.damage_dealt {
            player.damage_dealt = damage;
        }
    }
}

/// Zone row; appended once per shrink, never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub match_id: Uuid,
    pub zone_number: u32,
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
    pub damage_per_second: u32,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl ZoneRecord {
    pub fn center(&self) -> Position {
        Position::new(self.center_x, self.center_y)
    }
}

/// Loot categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LootCategory {
    Weapon,
    Ammo,
    Armor,
    Healing,
    Attachment,
}

/// Loot spawn row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootSpawn {
    pub id: Uuid,
    pub match_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub category: LootCategory,
    pub item_id: String,
    pub quantity: u8,
    pub collected: bool,
    pub collected_by: Option<Uuid>,
}

/// Vehicle types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Buggy,
    Jeep,
    Motorcycle,
    Truck,
    Boat,
}

/// Vehicle row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub match_id: Uuid,
    pub vehicle_type: VehicleType,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub health: f32,
    pub fuel: f32,
    pub occupied: bool,
    pub locked: bool,
}

/// Lifetime and per-season totals for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub user_id: Uuid,
    pub total_matches: u32,
    pub total_wins: u32,
    pub top10_finishes: u32,
    pub total_kills: u32,
    pub total_assists: u32,
    pub total_damage: f64,
    pub total_survival_secs: u64,
    pub avg_placement: f64,
    pub best_kills: u32,
    pub best_damage: f32,
    pub longest_survival_secs: u64,

    pub season: String,
    pub season_matches: u32,
    pub season_wins: u32,
    pub season_kills: u32,
    pub season_damage: f64,
}

impl AggregateStats {
    pub fn empty(user_id: Uuid, season: &str) -> Self {
        Self {
            user_id,
            total_matches: 0,
            total_wins: 0,
            top10_finishes: 0,
            total_kills: 0,
            total_assists: 0,
            total_damage: 0.0,
            total_survival_secs: 0,
            avg_placement: 0.0,
            best_kills: 0,
            best_damage: 0.0,
            longest_survival_secs: 0,
            season: season.to_string(),
            season_matches: 0,
            season_wins: 0,
            season_kills: 0,
            season_damage: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elimination_timestamp_is_set_once() {
        let mut player = PlayerInMatch::new(Uuid::new_v4(), Uuid::new_v4(), Position::default());
        let first = Utc::now();
        assert!(player.eliminate(EliminationCause::Zone, first));

        let later = first + chrono::Duration::seconds(10);
        assert!(!player.eliminate(EliminationCause::Player, later));
        assert_eq!(player.eliminated_at, Some(first));
        assert_eq!(player.elimination_cause, Some(EliminationCause::Zone));
    }

    #[test]
    fn lethal_damage_eliminates() {
        let mut player = PlayerInMatch::new(Uuid::new_v4(), Uuid::new_v4(), Position::default());
        let now = Utc::now();
        assert!(!player.take_damage(60, EliminationCause::Player, now));
        assert!(player.take_damage(60, EliminationCause::Player, now));
        assert_eq!(player.health, 0);
        assert_eq!(player.status, PlayerStatus::Eliminated);
        assert!(!player.take_damage(10, EliminationCause::Zone, now));
        assert_eq!(player.health, 0);
    }

    #[test]
    fn overkill_floors_health_at_zero() {
        let mut player = PlayerInMatch::new(Uuid::new_v4(), Uuid::new_v4(), Position::default());
        assert!(player.take_damage(250, EliminationCause::Player, Utc::now()));
        assert_eq!(player.health, 0);

        let mut dropped = PlayerInMatch::new(Uuid::new_v4(), Uuid::new_v4(), Position::default());
        assert!(dropped.eliminate(EliminationCause::Disconnect, Utc::now()));
        assert_eq!(dropped.health, 0);
    }

    #[test]
    fn match_update_skips_untouched_columns() {
        let update = MatchUpdate {
            status: Some(MatchStatus::InProgress),
            next_shrink_at: Some(None),
            ..MatchUpdate::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "status": "in_progress", "next_shrink_at": null })
        );
    }

    #[test]
    fn match_update_applies_zone_fields() {
        let mut record = MatchRecord::new(Uuid::new_v4(), 7, MatchConfig::default());
        let zone = ZoneRecord {
            match_id: record.id,
            zone_number: 3,
            center_x: 12.0,
            center_y: -4.0,
            radius: 343.0,
            damage_per_second: 8,
            started_at: Utc::now(),
            ends_at: Utc::now(),
        };
        MatchUpdate::default().with_zone(&zone).apply(&mut record);
        assert_eq!(record.zone_number, 3);
        assert_eq!(record.zone_center(), Position::new(12.0, -4.0));
        assert_eq!(record.zone_radius, 343.0);
        assert_eq!(record.zone_damage_per_second, 8);
    }
}
