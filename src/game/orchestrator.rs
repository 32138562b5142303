//! Match lifecycle: start, timer-driven zone and loot ticks, eliminations
//! and exactly-once settlement

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{match_channel, BusError, EventBus};
use crate::config::{MatchConfig, MatchConfigError};
use crate::store::{MatchStore, StoreError};
use crate::util::time::{after, until};
use crate::ws::protocol::MatchEvent;

use super::loot::LootGenerator;
use super::model::{
    AggregateStats, EliminationCause, EndReason, MatchRecord, MatchStatus, MatchUpdate,
    PlayerInMatch, PlayerStatus, PlayerUpdate, ZoneRecord, MAX_HEALTH,
};
use super::scoring::{MatchResult, Placement, ScoringEngine};
use super::zone::ZoneModel;

/// Consecutive failed ticks before a match raises an operational alert
pub const ALERT_AFTER_CONSECUTIVE_FAILURES: u32 = 3;

/// Delay before a timer-triggered settlement that failed is attempted again
pub const SETTLEMENT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Match {0} not found")]
    MatchNotFound(Uuid),

    #[error("Player {user_id} is not enrolled in match {match_id}")]
    PlayerNotFound { match_id: Uuid, user_id: Uuid },

    #[error("Player {0} is eliminated")]
    PlayerEliminated(Uuid),

    #[error("Loot {0} not found")]
    LootNotFound(Uuid),

    #[error("Match is {actual}, expected {expected}")]
    InvalidState {
        expected: MatchStatus,
        actual: MatchStatus,
    },

    #[error("Invalid match configuration: {0}")]
    InvalidConfig(#[from] MatchConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),
}

/// Outcome of the settling `end()` call
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub match_id: Uuid,
    pub reason: EndReason,
    pub ended_at: DateTime<Utc>,
    pub placements: Vec<Placement>,
}

/// Result of a player-on-player hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DamageOutcome {
    pub damage: i32,
    pub remaining_health: i32,
    pub eliminated: bool,
}

/// Match with its roster and zone history
#[derive(Debug, Clone, Serialize)]
pub struct MatchDetails {
    #[serde(flatten)]
    pub record: MatchRecord,
    pub players: Vec<PlayerInMatch>,
    pub zones: Vec<ZoneRecord>,
}

/// What a timer does after a tick
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerStep {
    Next(Duration),
    Countdown(Duration),
    Stop,
}

/// Live timers of one match
#[derive(Default)]
struct MatchTimers {
    /// Zone shrink loop, which turns into the final countdown
    zone: Option<JoinHandle<()>>,
    loot: Option<JoinHandle<()>>,
}

impl MatchTimers {
    fn abort_all(&mut self) {
        for handle in [self.zone.take(), self.loot.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

/// State serialized by the per-match lock
struct RuntimeState {
    loot_rng: ChaCha8Rng,
}

/// Per-match runtime: single-writer lock, timer handles, failure streak
struct MatchRuntime {
    state: tokio::sync::Mutex<RuntimeState>,
    timers: parking_lot::Mutex<MatchTimers>,
    failures: AtomicU32,
}

impl MatchRuntime {
    fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(RuntimeState {
                loot_rng: ChaCha8Rng::from_entropy(),
            }),
            timers: parking_lot::Mutex::new(MatchTimers::default()),
            failures: AtomicU32::new(0),
        }
    }
}

/// Drives every match hosted by this process. Matches share nothing but the
/// store and bus handles.
pub struct MatchOrchestrator {
    store: Arc<dyn MatchStore>,
    bus: Arc<dyn EventBus>,
    season: String,
    runtimes: DashMap<Uuid, Arc<MatchRuntime>>,
}

impl MatchOrchestrator {
    pub fn new(store: Arc<dyn MatchStore>, bus: Arc<dyn EventBus>, season: impl Into<String>) -> Self {
        Self {
            store,
            bus,
            season: season.into(),
            runtimes: DashMap::new(),
        }
    }

    /// Create a `waiting` match and enroll players at random spawn points
    pub async fn create_match(
        &self,
        config: MatchConfig,
        user_ids: &[Uuid],
    ) -> Result<MatchRecord, OrchestratorError> {
        config.validate()?;

        let record = MatchRecord::new(Uuid::new_v4(), rand::random(), config);
        let mut rng = ChaCha8Rng::seed_from_u64(record.seed);

        let mut roster: Vec<PlayerInMatch> = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            if roster.iter().any(|p| p.user_id == user_id) {
                continue;
            }
            let spawn = LootGenerator::spawn_position(record.config.max_zone_radius, &mut rng);
            roster.push(PlayerInMatch::new(record.id, user_id, spawn));
        }

        self.store.create_match(&record).await?;
        self.store.insert_players(&roster).await?;

        info!(match_id = %record.id, players = roster.len(), "Match created");
        Ok(record)
    }

    /// Match record with roster and zone history
    pub async fn describe(&self, match_id: Uuid) -> Result<MatchDetails, OrchestratorError> {
        let record = self
            .store
            .get_match(match_id)
            .await?
            .ok_or(OrchestratorError::MatchNotFound(match_id))?;
        let players = self.store.list_players_in_match(match_id).await?;
        let zones = self.store.list_zones(match_id).await?;
        Ok(MatchDetails {
            record,
            players,
            zones,
        })
    }

    /// Start a `waiting` match: spawn the world, set zone 0 and arm timers
    pub async fn start(self: &Arc<Self>, match_id: Uuid) -> Result<MatchRecord, OrchestratorError> {
        let runtime = self.runtime(match_id);
        let mut state = runtime.state.lock().await;

        let mut record = self.load(match_id, &runtime).await?;
        if record.status != MatchStatus::Waiting {
            return Err(OrchestratorError::InvalidState {
                expected: MatchStatus::Waiting,
                actual: record.status,
            });
        }
        record.config.validate()?;
        let config = record.config.clone();

        let revive = PlayerUpdate {
            health: Some(MAX_HEALTH),
            status: Some(PlayerStatus::Alive),
            ..PlayerUpdate::default()
        };
        for player in self.store.list_players_in_match(match_id).await? {
            self.store
                .update_player(match_id, player.user_id, &revive)
                .await?;
        }

        state.loot_rng = ChaCha8Rng::seed_from_u64(record.seed);
        let half_extent = config.half_extent();
        let loot = LootGenerator::generate_loot(
            match_id,
            config.initial_loot_count,
            half_extent,
            &mut state.loot_rng,
        );
        let vehicles = LootGenerator::generate_vehicles(
            match_id,
            config.vehicle_count,
            half_extent,
            &mut state.loot_rng,
        );
        self.store.bulk_insert_loot(match_id, &loot).await?;
        self.store.bulk_insert_vehicles(match_id, &vehicles).await?;

        let now = Utc::now();
        let zone = ZoneModel::initial(match_id, &config, now);
        self.store.append_zone(match_id, &zone).await?;

        let update = MatchUpdate {
            status: Some(MatchStatus::InProgress),
            started_at: Some(now),
            next_shrink_at: Some(Some(zone.ends_at)),
            final_countdown_at: Some(None),
            ..MatchUpdate::default()
        }
        .with_zone(&zone);
        self.store.update_match(match_id, &update).await?;
        update.apply(&mut record);

        if let Err(e) = self.publish(match_id, MatchEvent::ZoneUpdate { zone }).await {
            warn!(match_id = %match_id, error = %e, "Failed to publish initial zone");
        }

        self.arm_zone_timer(&runtime, match_id, config.shrink_interval(), config.shrink_interval());
        self.arm_loot_timer(&runtime, match_id, config.loot_interval(), config.loot_interval());

        info!(
            match_id = %match_id,
            loot = loot.len(),
            vehicles = vehicles.len(),
            "Match started"
        );
        Ok(record)
    }

    /// Eliminate a player. Returns false (and publishes nothing) if the player
    /// was already eliminated or the match is not running.
    pub async fn eliminate_player(
        self: &Arc<Self>,
        match_id: Uuid,
        user_id: Uuid,
        cause: EliminationCause,
    ) -> Result<bool, OrchestratorError> {
        let runtime = self.runtime(match_id);
        let _state = runtime.state.lock().await;

        let record = self.load(match_id, &runtime).await?;
        if !record.is_in_progress() {
            debug!(match_id = %match_id, user_id = %user_id, status = %record.status, "Elimination ignored");
            return Ok(false);
        }

        let mut player = self.player(match_id, user_id).await?;
        if !player.eliminate(cause, Utc::now()) {
            return Ok(false);
        }
        self.store
            .update_player(match_id, user_id, &PlayerUpdate::vitals(&player))
            .await?;

        info!(match_id = %match_id, user_id = %user_id, cause = %cause, "Player eliminated");
        self.publish(
            match_id,
            MatchEvent::PlayerEliminated {
                player_id: user_id,
                cause,
                eliminated_by: None,
            },
        )
        .await?;

        self.check_win_condition(match_id).await?;
        Ok(true)
    }

    /// Apply a hit from `attacker` to `victim`. Lethal hits eliminate the
    /// victim with cause `player` and credit the kill and assists.
    pub async fn apply_player_damage(
        self: &Arc<Self>,
        match_id: Uuid,
        attacker_id: Uuid,
        victim_id: Uuid,
        amount: f32,
        assists: &[Uuid],
    ) -> Result<DamageOutcome, OrchestratorError> {
        let runtime = self.runtime(match_id);
        let _state = runtime.state.lock().await;

        self.require_in_progress(match_id, &runtime).await?;

        let attacker = self.player(match_id, attacker_id).await?;
        let mut victim = self.player(match_id, victim_id).await?;
        if !victim.is_alive() {
            return Ok(DamageOutcome {
                damage: 0,
                remaining_health: victim.health,
                eliminated: false,
            });
        }

        let damage = amount.max(0.0).ceil() as i32;
        let eliminated = victim.take_damage(damage, EliminationCause::Player, Utc::now());
        if eliminated {
            victim.eliminated_by = Some(attacker_id);
        }
        self.store
            .update_player(match_id, victim_id, &PlayerUpdate::vitals(&victim))
            .await?;

        if attacker.is_alive() && attacker_id != victim_id {
            let credit = PlayerUpdate {
                damage_dealt: Some(attacker.damage_dealt + damage as f32),
                kills: Some(attacker.kills + eliminated as u32),
                ..PlayerUpdate::default()
            };
            self.store.update_player(match_id, attacker_id, &credit).await?;
        }

        if eliminated {
            self.credit_assists(match_id, attacker_id, victim_id, assists)
                .await;

            info!(
                match_id = %match_id,
                user_id = %victim_id,
                attacker = %attacker_id,
                "Player eliminated"
            );
            self.publish(
                match_id,
                MatchEvent::PlayerEliminated {
                    player_id: victim_id,
                    cause: EliminationCause::Player,
                    eliminated_by: Some(attacker_id),
                },
            )
            .await?;
            self.check_win_condition(match_id).await?;
        }

        Ok(DamageOutcome {
            damage,
            remaining_health: victim.health,
            eliminated,
        })
    }

    /// Move an alive player, clamped to the map
    pub async fn update_player_position(
        &self,
        match_id: Uuid,
        user_id: Uuid,
        x: f32,
        y: f32,
    ) -> Result<(), OrchestratorError> {
        let runtime = self.runtime(match_id);
        let _state = runtime.state.lock().await;

        let record = self.require_in_progress(match_id, &runtime).await?;
        let player = self.player(match_id, user_id).await?;
        if !player.is_alive() {
            return Err(OrchestratorError::PlayerEliminated(user_id));
        }

        let h = record.config.half_extent();
        let update = PlayerUpdate {
            x: Some(x.clamp(-h, h)),
            y: Some(y.clamp(-h, h)),
            ..PlayerUpdate::default()
        };
        self.store.update_player(match_id, user_id, &update).await?;
        Ok(())
    }

    /// Pick up a loot spawn; false if someone already collected it
    pub async fn collect_loot(
        &self,
        match_id: Uuid,
        loot_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, OrchestratorError> {
        let runtime = self.runtime(match_id);
        let _state = runtime.state.lock().await;

        self.require_in_progress(match_id, &runtime).await?;
        if !self.player(match_id, user_id).await?.is_alive() {
            return Err(OrchestratorError::PlayerEliminated(user_id));
        }

        match self.store.mark_loot_collected(match_id, loot_id, user_id).await {
            Ok(collected) => {
                debug!(match_id = %match_id, loot_id = %loot_id, user_id = %user_id, collected, "Loot pickup");
                Ok(collected)
            }
            Err(StoreError::NotFound { .. }) => Err(OrchestratorError::LootNotFound(loot_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Finish and settle a running match. Only the first call settles; later
    /// or concurrent calls observe `finished` and return `None`.
    pub async fn end(
        &self,
        match_id: Uuid,
        reason: EndReason,
    ) -> Result<Option<Settlement>, OrchestratorError> {
        let runtime = self.runtime(match_id);
        let _state = runtime.state.lock().await;

        let record = self.load(match_id, &runtime).await?;
        if !record.is_in_progress() {
            debug!(match_id = %match_id, status = %record.status, "End ignored");
            return Ok(None);
        }

        let ended_at = Utc::now();
        let update = MatchUpdate {
            status: Some(MatchStatus::Finished),
            ended_at: Some(ended_at),
            end_reason: Some(reason),
            next_shrink_at: Some(None),
            final_countdown_at: Some(None),
            ..MatchUpdate::default()
        };
        self.store.update_match(match_id, &update).await?;
        // Timers stay armed until `finished` is persisted
        runtime.timers.lock().abort_all();

        let players = self.store.list_players_in_match(match_id).await?;
        let started_at = record.started_at.unwrap_or(record.created_at);
        let placements = ScoringEngine::rank(&players, started_at, ended_at);

        for placement in &placements {
            if let Err(e) = self.settle_player(placement).await {
                error!(
                    match_id = %match_id,
                    user_id = %placement.user_id,
                    error = %e,
                    "Failed to settle player"
                );
            }
        }

        let channel = match_channel(match_id);
        let event = MatchEvent::MatchEnded {
            reason,
            placements: placements.clone(),
        };
        if let Err(e) = self.bus.publish(&channel, &event).await {
            error!(match_id = %match_id, error = %e, "Failed to publish match end");
        }
        self.bus.close_channel(&channel);
        self.release(match_id, &runtime);

        info!(
            match_id = %match_id,
            reason = ?reason,
            players = placements.len(),
            winner = ?placements.first().map(|p| p.user_id),
            "Match settled"
        );

        Ok(Some(Settlement {
            match_id,
            reason,
            ended_at,
            placements,
        }))
    }

    /// Re-arm timers for matches left `in_progress` by a previous process
    pub async fn resume_active(self: &Arc<Self>) -> Result<usize, OrchestratorError> {
        let matches = self.store.list_matches(MatchStatus::InProgress).await?;
        let now = Utc::now();

        for record in &matches {
            let runtime = self.runtime(record.id);
            let _state = runtime.state.lock().await;
            let config = &record.config;

            match record.final_countdown_at {
                Some(deadline) => self.arm_countdown(&runtime, record.id, until(deadline, now)),
                None => {
                    let first = record
                        .next_shrink_at
                        .map(|at| until(at, now))
                        .unwrap_or(Duration::ZERO);
                    self.arm_zone_timer(&runtime, record.id, config.shrink_interval(), first);
                }
            }
            self.arm_loot_timer(&runtime, record.id, config.loot_interval(), config.loot_interval());

            info!(match_id = %record.id, zone_number = record.zone_number, "Match resumed");
        }

        Ok(matches.len())
    }

    /// Matches with armed timers in this process
    pub fn active_matches(&self) -> Vec<Uuid> {
        self.runtimes
            .iter()
            .filter(|entry| entry.value().timers.lock().zone.is_some())
            .map(|entry| *entry.key())
            .collect()
    }

    // Zone timer

    fn arm_zone_timer(
        self: &Arc<Self>,
        runtime: &MatchRuntime,
        match_id: Uuid,
        interval: Duration,
        first: Duration,
    ) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_zone_timer(match_id, interval, first).await;
        });
        if let Some(old) = runtime.timers.lock().zone.replace(handle) {
            old.abort();
        }
    }

    fn arm_countdown(self: &Arc<Self>, runtime: &MatchRuntime, match_id: Uuid, remaining: Duration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_countdown(match_id, remaining).await;
        });
        if let Some(old) = runtime.timers.lock().zone.replace(handle) {
            old.abort();
        }
    }

    async fn run_zone_timer(self: Arc<Self>, match_id: Uuid, interval: Duration, first: Duration) {
        let mut delay = first;
        loop {
            tokio::time::sleep(delay).await;
            match self.zone_tick(match_id, interval).await {
                TimerStep::Next(next) => delay = next,
                TimerStep::Countdown(remaining) => {
                    self.run_countdown(match_id, remaining).await;
                    return;
                }
                TimerStep::Stop => return,
            }
        }
    }

    async fn run_countdown(self: &Arc<Self>, match_id: Uuid, remaining: Duration) {
        tokio::time::sleep(remaining).await;
        info!(match_id = %match_id, "Final countdown elapsed");
        self.spawn_end(match_id, EndReason::Timeout);
    }

    async fn zone_tick(self: &Arc<Self>, match_id: Uuid, interval: Duration) -> TimerStep {
        let Some(runtime) = self.existing_runtime(match_id) else {
            return TimerStep::Stop;
        };
        let _state = runtime.state.lock().await;

        match self.shrink_zone(match_id).await {
            Ok(step) => {
                runtime.failures.store(0, Ordering::SeqCst);
                step
            }
            Err(e) => {
                self.record_failure(&runtime, match_id, "zone", &e);
                self.step_after_failed_shrink(match_id, interval).await
            }
        }
    }

    /// A failed tick that already persisted the final zone keeps its deadline
    async fn step_after_failed_shrink(&self, match_id: Uuid, interval: Duration) -> TimerStep {
        match self.store.get_match(match_id).await {
            Ok(Some(record)) if record.is_in_progress() => match record.final_countdown_at {
                Some(deadline) => TimerStep::Countdown(until(deadline, Utc::now())),
                None => TimerStep::Next(interval),
            },
            Ok(_) => TimerStep::Stop,
            Err(_) => TimerStep::Next(interval),
        }
    }

    async fn shrink_zone(self: &Arc<Self>, match_id: Uuid) -> Result<TimerStep, OrchestratorError> {
        let record = match self.store.get_match(match_id).await? {
            Some(record) if record.is_in_progress() => record,
            _ => {
                debug!(match_id = %match_id, "Stale zone timer");
                return Ok(TimerStep::Stop);
            }
        };
        let config = &record.config;
        let now = Utc::now();

        let zone_number = record.zone_number + 1;
        let mut rng = ChaCha8Rng::seed_from_u64(record.seed ^ zone_number as u64);
        let next = ZoneModel::next_zone(
            record.zone_center(),
            record.zone_radius,
            config,
            now,
            &mut rng,
        );
        let zone = ZoneRecord {
            match_id,
            zone_number,
            center_x: next.center.x,
            center_y: next.center.y,
            radius: next.radius,
            damage_per_second: next.damage_per_second,
            started_at: now,
            ends_at: next.ends_at,
        };

        let mut update = MatchUpdate::default().with_zone(&zone);
        let step = if next.is_final(config) {
            let remaining = Self::countdown_delay(&record, now);
            update.next_shrink_at = Some(None);
            update.final_countdown_at = Some(Some(after(now, remaining)));
            TimerStep::Countdown(remaining)
        } else {
            update.next_shrink_at = Some(Some(next.ends_at));
            TimerStep::Next(config.shrink_interval())
        };

        // Match row first: a retry after a failed append skips a number
        // instead of colliding with it
        self.store.update_match(match_id, &update).await?;
        self.store.append_zone(match_id, &zone).await?;

        let mut players = self.store.list_players_in_match(match_id).await?;
        let hits = ZoneModel::apply_zone_damage(&mut players, &zone, now);
        let mut eliminated = Vec::new();
        for hit in &hits {
            let Some(player) = players.iter().find(|p| p.user_id == hit.user_id) else {
                continue;
            };
            match self
                .store
                .update_player(match_id, hit.user_id, &PlayerUpdate::vitals(player))
                .await
            {
                Ok(()) if hit.eliminated => eliminated.push(hit.user_id),
                Ok(()) => {}
                Err(e) => warn!(
                    match_id = %match_id,
                    user_id = %hit.user_id,
                    error = %e,
                    "Failed to apply zone damage"
                ),
            }
        }

        for &user_id in &eliminated {
            info!(match_id = %match_id, user_id = %user_id, cause = "zone", "Player eliminated");
            self.publish(
                match_id,
                MatchEvent::PlayerEliminated {
                    player_id: user_id,
                    cause: EliminationCause::Zone,
                    eliminated_by: None,
                },
            )
            .await?;
        }

        info!(
            match_id = %match_id,
            zone_number,
            radius = zone.radius,
            damage_per_second = zone.damage_per_second,
            hits = hits.len(),
            "Zone shrunk"
        );
        self.publish(match_id, MatchEvent::ZoneUpdate { zone }).await?;

        let alive = players.iter().filter(|p| p.is_alive()).count();
        if !eliminated.is_empty() && alive <= 1 {
            self.spawn_end(match_id, EndReason::Winner);
            return Ok(TimerStep::Stop);
        }

        Ok(step)
    }

    /// Final countdown: at least one shrink interval, or whatever remains of
    /// the configured match duration
    fn countdown_delay(record: &MatchRecord, now: DateTime<Utc>) -> Duration {
        let config = &record.config;
        let remaining = record
            .started_at
            .map(|started| until(after(started, config.match_duration()), now))
            .unwrap_or(Duration::ZERO);
        remaining.max(config.shrink_interval())
    }

    // Loot timer

    fn arm_loot_timer(
        self: &Arc<Self>,
        runtime: &MatchRuntime,
        match_id: Uuid,
        interval: Duration,
        first: Duration,
    ) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;
                match this.loot_tick(match_id, interval).await {
                    TimerStep::Next(next) | TimerStep::Countdown(next) => delay = next,
                    TimerStep::Stop => return,
                }
            }
        });
        if let Some(old) = runtime.timers.lock().loot.replace(handle) {
            old.abort();
        }
    }

    async fn loot_tick(&self, match_id: Uuid, interval: Duration) -> TimerStep {
        let Some(runtime) = self.existing_runtime(match_id) else {
            return TimerStep::Stop;
        };
        let mut state = runtime.state.lock().await;

        match self.spawn_loot(match_id, &mut state).await {
            Ok(step) => {
                runtime.failures.store(0, Ordering::SeqCst);
                step
            }
            Err(e) => {
                self.record_failure(&runtime, match_id, "loot", &e);
                TimerStep::Next(interval)
            }
        }
    }

    async fn spawn_loot(
        &self,
        match_id: Uuid,
        state: &mut RuntimeState,
    ) -> Result<TimerStep, OrchestratorError> {
        let record = match self.store.get_match(match_id).await? {
            Some(record) if record.is_in_progress() => record,
            _ => {
                debug!(match_id = %match_id, "Stale loot timer");
                return Ok(TimerStep::Stop);
            }
        };
        let config = &record.config;

        let batch = LootGenerator::generate_loot(
            match_id,
            config.loot_batch_size,
            config.half_extent(),
            &mut state.loot_rng,
        );
        self.store.bulk_insert_loot(match_id, &batch).await?;

        debug!(match_id = %match_id, count = batch.len(), "Loot spawned");
        Ok(TimerStep::Next(config.loot_interval()))
    }

    // Helpers

    fn record_failure(
        &self,
        runtime: &MatchRuntime,
        match_id: Uuid,
        timer: &'static str,
        error: &OrchestratorError,
    ) {
        let streak = runtime.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= ALERT_AFTER_CONSECUTIVE_FAILURES {
            error!(
                match_id = %match_id,
                timer,
                consecutive_failures = streak,
                alert = true,
                error = %error,
                "Match ticks failing repeatedly"
            );
        } else {
            warn!(
                match_id = %match_id,
                timer,
                consecutive_failures = streak,
                error = %error,
                "Tick failed, skipped"
            );
        }
    }

    async fn settle_player(&self, placement: &Placement) -> Result<(), StoreError> {
        let existing = self
            .store
            .get_aggregate_stats(placement.user_id)
            .await?
            .unwrap_or_else(|| AggregateStats::empty(placement.user_id, &self.season));
        let updated = ScoringEngine::update_aggregate_stats(
            &existing,
            &MatchResult::from(placement),
            &self.season,
        );
        self.store.upsert_aggregate_stats(&updated).await?;
        self.store.award_xp(placement.user_id, placement.xp).await
    }

    async fn credit_assists(&self, match_id: Uuid, attacker_id: Uuid, victim_id: Uuid, assists: &[Uuid]) {
        let mut credited: Vec<Uuid> = Vec::new();
        for &user_id in assists {
            if user_id == attacker_id || user_id == victim_id || credited.contains(&user_id) {
                continue;
            }
            credited.push(user_id);

            let player = match self.store.get_player(match_id, user_id).await {
                Ok(Some(player)) if player.is_alive() => player,
                Ok(_) => continue,
                Err(e) => {
                    warn!(match_id = %match_id, user_id = %user_id, error = %e, "Failed to load assister");
                    continue;
                }
            };
            let update = PlayerUpdate {
                assists: Some(player.assists + 1),
                ..PlayerUpdate::default()
            };
            if let Err(e) = self.store.update_player(match_id, user_id, &update).await {
                warn!(match_id = %match_id, user_id = %user_id, error = %e, "Failed to credit assist");
            }
        }
    }

    async fn check_win_condition(self: &Arc<Self>, match_id: Uuid) -> Result<(), OrchestratorError> {
        let players = self.store.list_players_in_match(match_id).await?;
        let alive = players.iter().filter(|p| p.is_alive()).count();
        if alive <= 1 {
            info!(match_id = %match_id, alive, "Win condition reached");
            self.spawn_end(match_id, EndReason::Winner);
        }
        Ok(())
    }

    /// Settle on a separate task so aborting a timer can't cut settlement
    /// short. A failed attempt is retried while the match is still hosted.
    fn spawn_end(self: &Arc<Self>, match_id: Uuid, reason: EndReason) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Err(e) = this.end(match_id, reason).await else {
                return;
            };
            let Some(runtime) = this.existing_runtime(match_id) else {
                error!(match_id = %match_id, error = %e, "Failed to end match");
                return;
            };
            this.record_failure(&runtime, match_id, "end", &e);
            this.arm_settlement_retry(&runtime, match_id, reason);
        });
    }

    /// Takes the zone timer slot: once a match is due to end, settling it
    /// replaces further shrinking
    fn arm_settlement_retry(self: &Arc<Self>, runtime: &MatchRuntime, match_id: Uuid, reason: EndReason) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(SETTLEMENT_RETRY_DELAY).await;
            this.spawn_end(match_id, reason);
        });
        if let Some(old) = runtime.timers.lock().zone.replace(handle) {
            old.abort();
        }
    }

    async fn publish(&self, match_id: Uuid, event: MatchEvent) -> Result<(), BusError> {
        self.bus.publish(&match_channel(match_id), &event).await
    }

    async fn player(&self, match_id: Uuid, user_id: Uuid) -> Result<PlayerInMatch, OrchestratorError> {
        self.store
            .get_player(match_id, user_id)
            .await?
            .ok_or(OrchestratorError::PlayerNotFound { match_id, user_id })
    }

    /// Load a match; finished matches drop their runtime
    async fn load(&self, match_id: Uuid, runtime: &Arc<MatchRuntime>) -> Result<MatchRecord, OrchestratorError> {
        match self.store.get_match(match_id).await? {
            Some(record) => {
                if record.status == MatchStatus::Finished {
                    self.release(match_id, runtime);
                }
                Ok(record)
            }
            None => {
                self.release(match_id, runtime);
                Err(OrchestratorError::MatchNotFound(match_id))
            }
        }
    }

    async fn require_in_progress(
        &self,
        match_id: Uuid,
        runtime: &Arc<MatchRuntime>,
    ) -> Result<MatchRecord, OrchestratorError> {
        let record = self.load(match_id, runtime).await?;
        if !record.is_in_progress() {
            return Err(OrchestratorError::InvalidState {
                expected: MatchStatus::InProgress,
                actual: record.status,
            });
        }
        Ok(record)
    }

    fn runtime(&self, match_id: Uuid) -> Arc<MatchRuntime> {
        self.runtimes
            .entry(match_id)
            .or_insert_with(|| Arc::new(MatchRuntime::new()))
            .value()
            .clone()
    }

    fn existing_runtime(&self, match_id: Uuid) -> Option<Arc<MatchRuntime>> {
        self.runtimes.get(&match_id).map(|entry| entry.value().clone())
    }

    /// Drop this runtime from the table, unless it was already replaced
    fn release(&self, match_id: Uuid, runtime: &Arc<MatchRuntime>) {
        self.runtimes
            .remove_if(&match_id, |_, current| Arc::ptr_eq(current, runtime));
    }
}
