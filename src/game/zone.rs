//! Safe-zone geometry and zone damage

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::util::time::after;

use super::model::{EliminationCause, PlayerInMatch, Position, ZoneRecord};

/// Each shrink keeps this fraction of the radius
pub const SHRINK_FACTOR: f32 = 0.7;
/// Max center drift per axis, as a fraction of the current radius
pub const CENTER_JITTER: f32 = 0.3;

/// Geometry of the zone that follows the current one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NextZone {
    pub center: Position,
    pub radius: f32,
    pub damage_per_second: u32,
    pub ends_at: DateTime<Utc>,
}

impl NextZone {
    /// Is this zone clamped at the configured minimum?
    pub fn is_final(&self, config: &MatchConfig) -> bool {
        self.radius <= config.min_zone_radius
    }
}

/// Zone damage dealt to one player in a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneHit {
    pub user_id: Uuid,
    pub damage: i32,
    pub eliminated: bool,
}

/// Zone model: pure functions over zone state
pub struct ZoneModel;

impl ZoneModel {
    /// Zone 0: full radius at the map center, base damage
    pub fn initial(match_id: Uuid, config: &MatchConfig, now: DateTime<Utc>) -> ZoneRecord {
        ZoneRecord {
            match_id,
            zone_number: 0,
            center_x: 0.0,
            center_y: 0.0,
            radius: config.max_zone_radius,
            damage_per_second: Self::damage_for_radius(config.max_zone_radius, config),
            started_at: now,
            ends_at: after(now, config.shrink_interval()),
        }
    }

    /// Compute the zone after `current_radius` shrinks once
    pub fn next_zone<R: Rng + ?Sized>(
        current_center: Position,
        current_radius: f32,
        config: &MatchConfig,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> NextZone {
        let max_offset = current_radius.max(0.0) * CENTER_JITTER;
        let dx = rng.gen_range(-max_offset..=max_offset);
        let dy = rng.gen_range(-max_offset..=max_offset);

        let radius = (current_radius * SHRINK_FACTOR).max(config.min_zone_radius);

        NextZone {
            center: Position::new(current_center.x + dx, current_center.y + dy),
            radius,
            damage_per_second: Self::damage_for_radius(radius, config),
            ends_at: after(now, config.shrink_interval()),
        }
    }

    /// Damage grows as the zone closes: base * (2 - radius / max_radius)
    pub fn damage_for_radius(radius: f32, config: &MatchConfig) -> u32 {
        let closed = 1.0 - radius / config.max_zone_radius;
        let damage = config.zone_damage_per_second * (1.0 + closed);
        damage.round().max(0.0) as u32
    }

    /// Damage applied to a player outside the zone on one tick
    pub fn damage_per_tick(damage_per_second: f32) -> i32 {
        damage_per_second.ceil() as i32
    }

    /// Check if a point is outside the zone
    pub fn is_outside(position: Position, center: Position, radius: f32) -> bool {
        position.distance_to(center) > radius
    }

    /// Damage every alive player outside `zone`; players reaching 0 health
    /// are eliminated with cause `zone`
    pub fn apply_zone_damage(
        players: &mut [PlayerInMatch],
        zone: &ZoneRecord,
        now: DateTime<Utc>,
    ) -> Vec<ZoneHit> {
        let damage = Self::damage_per_tick(zone.damage_per_second as f32);
        let center = zone.center();

        players
            .iter_mut()
            .filter(|p| p.is_alive() && Self::is_outside(p.position(), center, zone.radius))
            .map(|player| {
                let eliminated = player.take_damage(damage, EliminationCause::Zone, now);
                ZoneHit {
                    user_id: player.user_id,
                    damage,
                    eliminated,
                }
            })
            .collect()
    }
}
