//! Placement ordering, XP rewards and lifetime stat aggregation

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::time::secs_between;

use super::model::{AggregateStats, PlayerInMatch, PlayerStatus};

/// XP every participant receives
pub const BASE_XP: i64 = 100;
/// Placement bonus: (100 - placement * 10) * 10, i.e. 900 for a win down to
/// nothing from 10th place on
pub const PLACEMENT_STEP: i64 = 10;
/// XP per kill
pub const KILL_XP: i64 = 25;
/// Damage points per XP
pub const DAMAGE_PER_XP: f32 = 10.0;
/// Placements at or above this count as a top-10 finish
pub const TOP_FINISH: u32 = 10;

/// A player's final standing in a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub placement: u32,
    pub user_id: Uuid,
    pub status: PlayerStatus,
    pub kills: u32,
    pub assists: u32,
    pub damage_dealt: f32,
    pub survival_secs: u64,
    pub xp: u32,
}

/// One player's result, as fed into stat aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub placement: u32,
    pub kills: u32,
    pub assists: u32,
    pub damage: f32,
    pub survival_secs: u64,
}

impl From<&Placement> for MatchResult {
    fn from(p: &Placement) -> Self {
        Self {
            placement: p.placement,
            kills: p.kills,
            assists: p.assists,
            damage: p.damage_dealt,
            survival_secs: p.survival_secs,
        }
    }
}

/// Scoring engine
pub struct ScoringEngine;

impl ScoringEngine {
    /// Order players best-first: alive players, then the eliminated by
    /// elimination time (latest first); ties go to more kills
    pub fn placements<'a>(players: &'a [PlayerInMatch]) -> Vec<&'a PlayerInMatch> {
        let mut ordered: Vec<&PlayerInMatch> = players.iter().collect();
        ordered.sort_by(|a, b| Self::compare(a, b));
        ordered
    }

    fn compare(a: &PlayerInMatch, b: &PlayerInMatch) -> Ordering {
        let by_status = match (a.is_alive(), b.is_alive()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => Ordering::Equal,
            // Later elimination ranks higher
            (false, false) => b.eliminated_at.cmp(&a.eliminated_at),
        };

        by_status
            .then_with(|| b.kills.cmp(&a.kills))
            .then_with(|| a.user_id.cmp(&b.user_id))
    }

    /// Rank every player and compute their rewards
    pub fn rank(
        players: &[PlayerInMatch],
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Vec<Placement> {
        Self::placements(players)
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let placement = (i + 1) as u32;
                let survived_until = p.eliminated_at.unwrap_or(ended_at).min(ended_at);
                Placement {
                    placement,
                    user_id: p.user_id,
                    status: p.status,
                    kills: p.kills,
                    assists: p.assists,
                    damage_dealt: p.damage_dealt,
                    survival_secs: secs_between(started_at, survived_until),
                    xp: Self::xp_gain(placement, p.kills, p.damage_dealt),
                }
            })
            .collect()
    }

    /// 100 + placement bonus + kills * 25 + floor(damage / 10)
    pub fn xp_gain(placement: u32, kills: u32, damage: f32) -> u32 {
        let placement_xp = ((100 - placement as i64 * PLACEMENT_STEP) * PLACEMENT_STEP).max(0);
        let kill_xp = kills as i64 * KILL_XP;
        let damage_xp = (damage.max(0.0) / DAMAGE_PER_XP).floor() as i64;
        let total = BASE_XP
            .saturating_add(placement_xp)
            .saturating_add(kill_xp)
            .saturating_add(damage_xp);
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    /// Fold one match into a user's totals. Not idempotent: apply once per
    /// player per settlement.
    pub fn update_aggregate_stats(
        existing: &AggregateStats,
        result: &MatchResult,
        season: &str,
    ) -> AggregateStats {
        let mut stats = existing.clone();
        let old_count = existing.total_matches as f64;
        let won = result.placement == 1;

        stats.avg_placement =
            (existing.avg_placement * old_count + result.placement as f64) / (old_count + 1.0);
        stats.total_matches += 1;
        stats.total_wins += won as u32;
        stats.top10_finishes += (result.placement <= TOP_FINISH) as u32;
        stats.total_kills += result.kills;
        stats.total_assists += result.assists;
        stats.total_damage += result.damage as f64;
        stats.total_survival_secs += result.survival_secs;

        stats.best_kills = stats.best_kills.max(result.kills);
        stats.best_damage = stats.best_damage.max(result.damage);
        stats.longest_survival_secs = stats.longest_survival_secs.max(result.survival_secs);

        if stats.season != season {
            stats.season = season.to_string();
            stats.season_matches = 0;
            stats.season_wins = 0;
            stats.season_kills = 0;
            stats.season_damage = 0.0;
        }
        stats.season_matches += 1;
        stats.season_wins += won as u32;
        stats.season_kills += result.kills;
        stats.season_damage += result.damage as f64;

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::{EliminationCause, Position};

    fn player(kills: u32) -> PlayerInMatch {
        let mut p = PlayerInMatch::new(Uuid::nil(), Uuid::new_v4(), Position::default());
        p.kills = kills;
        p
    }

    fn eliminated(kills: u32, at_secs: i64, start: DateTime<Utc>) -> PlayerInMatch {
        let mut p = player(kills);
        p.eliminate(EliminationCause::Zone, start + chrono::Duration::seconds(at_secs));
        p
    }

    #[test]
    fn xp_formula_is_exact() {
        assert_eq!(ScoringEngine::xp_gain(1, 5, 500.0), 1175);
        assert_eq!(ScoringEngine::xp_gain(100, 0, 0.0), 100);
        assert_eq!(ScoringEngine::xp_gain(150, 2, 19.9), 100 + 50 + 1);
        assert_eq!(ScoringEngine::xp_gain(2, 0, 9.99), 100 + 800);
        assert_eq!(ScoringEngine::xp_gain(10, 1, 0.0), 100 + 25);
    }

    #[test]
    fn xp_saturates_instead_of_wrapping() {
        assert_eq!(ScoringEngine::xp_gain(1, u32::MAX, 0.0), u32::MAX);
        assert_eq!(ScoringEngine::xp_gain(1, 0, f32::MAX), u32::MAX);
    }

    #[test]
    fn alive_players_rank_first() {
        let start = Utc::now();
        let players = vec![
            eliminated(9, 100, start),
            player(0),
            eliminated(0, 300, start),
        ];
        let ordered = ScoringEngine::placements(&players);
        assert_eq!(ordered[0].user_id, players[1].user_id);
        assert_eq!(ordered[1].user_id, players[2].user_id);
        assert_eq!(ordered[2].user_id, players[0].user_id);
    }

    #[test]
    fn elimination_ties_broken_by_kills() {
        let start = Utc::now();
        let players = vec![
            eliminated(1, 200, start),
            eliminated(4, 200, start),
            eliminated(2, 200, start),
        ];
        let kills: Vec<u32> = ScoringEngine::placements(&players)
            .iter()
            .map(|p| p.kills)
            .collect();
        assert_eq!(kills, vec![4, 2, 1]);
    }

    #[test]
    fn rank_is_a_permutation_of_one_to_n() {
        let start = Utc::now();
        let end = start + chrono::Duration::seconds(600);
        let players: Vec<PlayerInMatch> = (0..12)
            .map(|i| {
                if i % 3 == 0 {
                    player(i)
                } else {
                    eliminated(i, (i as i64) * 20, start)
                }
            })
            .collect();

        let ranked = ScoringEngine::rank(&players, start, end);
        let mut places: Vec<u32> = ranked.iter().map(|p| p.placement).collect();
        places.sort_unstable();
        assert_eq!(places, (1..=12).collect::<Vec<u32>>());

        let first_eliminated = ranked
            .iter()
            .position(|p| p.status == PlayerStatus::Eliminated)
            .unwrap();
        assert!(ranked[..first_eliminated]
            .iter()
            .all(|p| p.status == PlayerStatus::Alive));
        assert!(ranked[first_eliminated..]
            .windows(2)
            .all(|w| w[0].survival_secs >= w[1].survival_secs));
        assert!(ranked
            .iter()
            .filter(|p| p.status == PlayerStatus::Alive)
            .all(|p| p.survival_secs == 600));
    }

    #[test]
    fn aggregate_running_average_and_maxima() {
        let user = Uuid::new_v4();
        let mut stats = AggregateStats::empty(user, "s1");

        stats = ScoringEngine::update_aggregate_stats(
            &stats,
            &MatchResult {
                placement: 1,
                kills: 6,
                assists: 1,
                damage: 420.0,
                survival_secs: 900,
            },
            "s1",
        );
        stats = ScoringEngine::update_aggregate_stats(
            &stats,
            &MatchResult {
                placement: 15,
                kills: 2,
                assists: 0,
                damage: 600.0,
                survival_secs: 300,
            },
            "s1",
        );

        assert_eq!(stats.total_matches, 2);
        assert_eq!(stats.total_wins, 1);
        assert_eq!(stats.top10_finishes, 1);
        assert_eq!(stats.total_kills, 8);
        assert_eq!(stats.total_assists, 1);
        assert_eq!(stats.total_damage, 1020.0);
        assert_eq!(stats.total_survival_secs, 1200);
        assert_eq!(stats.avg_placement, 8.0);
        assert_eq!(stats.best_kills, 6);
        assert_eq!(stats.best_damage, 600.0);
        assert_eq!(stats.longest_survival_secs, 900);
        assert_eq!(stats.season_matches, 2);
        assert_eq!(stats.season_wins, 1);
    }

    #[test]
    fn new_season_resets_subtotals_only() {
        let mut stats = AggregateStats::empty(Uuid::new_v4(), "s1");
        stats.total_matches = 10;
        stats.avg_placement = 5.0;
        stats.season_matches = 10;
        stats.season_kills = 30;

        let updated = ScoringEngine::update_aggregate_stats(
            &stats,
            &MatchResult {
                placement: 16,
                kills: 1,
                assists: 0,
                damage: 50.0,
                survival_secs: 60,
            },
            "s2",
        );

        assert_eq!(updated.total_matches, 11);
        assert_eq!(updated.avg_placement, 6.0);
        assert_eq!(updated.season, "s2");
        assert_eq!(updated.season_matches, 1);
        assert_eq!(updated.season_kills, 1);
    }
}
