//! Timer-driven match scenarios on virtual time

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use royale_orchestrator::bus::{match_channel, BroadcastBus, EventBus};
use royale_orchestrator::config::MatchConfig;
use royale_orchestrator::game::model::{EliminationCause, EndReason, MatchStatus, PlayerStatus};
use royale_orchestrator::game::MatchOrchestrator;
use royale_orchestrator::store::{MatchStore, MemoryStore};
use royale_orchestrator::ws::protocol::MatchEvent;

struct Fixture {
    store: Arc<MemoryStore>,
    bus: Arc<BroadcastBus>,
    orchestrator: Arc<MatchOrchestrator>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(BroadcastBus::new());
    let orchestrator = Arc::new(MatchOrchestrator::new(
        store.clone() as Arc<dyn MatchStore>,
        bus.clone() as Arc<dyn EventBus>,
        "season-1",
    ));
    Fixture {
        store,
        bus,
        orchestrator,
    }
}

fn scenario_config() -> MatchConfig {
    MatchConfig {
        max_zone_radius: 1000.0,
        min_zone_radius: 50.0,
        zone_shrink_interval_secs: 60,
        zone_damage_per_second: 1.0,
        loot_spawn_interval_secs: 3600,
        match_duration_secs: 60,
        ..MatchConfig::default()
    }
}

/// Drain everything buffered on a subscription
fn drain(rx: &mut tokio::sync::broadcast::Receiver<royale_orchestrator::bus::Envelope>) -> Vec<MatchEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(envelope) => events.push(envelope.event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn full_match_shrinks_to_minimum_then_times_out() {
    let f = fixture();
    let users = [Uuid::new_v4(), Uuid::new_v4()];
    let record = f
        .orchestrator
        .create_match(scenario_config(), &users)
        .await
        .unwrap();
    let mut rx = f.bus.subscribe(&match_channel(record.id));

    f.orchestrator.start(record.id).await.unwrap();

    // Nine shrinks reach the minimum (1000 * 0.7^9 < 50); the countdown runs
    // one more interval
    tokio::time::sleep(Duration::from_secs(9 * 60 + 50)).await;
    let running = f.store.get_match(record.id).await.unwrap().unwrap();
    assert_eq!(running.status, MatchStatus::InProgress);
    assert_eq!(running.zone_number, 9);
    assert_eq!(running.zone_radius, 50.0);
    assert!(running.next_shrink_at.is_none());
    assert!(running.final_countdown_at.is_some());

    tokio::time::sleep(Duration::from_secs(20)).await;
    let events = drain(&mut rx);

    let zones: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MatchEvent::ZoneUpdate { zone } => Some(zone.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(zones.len(), 10);
    for (expected, zone) in zones.iter().enumerate() {
        assert_eq!(zone.zone_number, expected as u32);
    }
    for pair in zones.windows(2) {
        assert!(pair[1].radius < pair[0].radius);
    }
    assert_eq!(zones.last().unwrap().radius, 50.0);

    let ended: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MatchEvent::MatchEnded { reason, placements } => Some((*reason, placements.len())),
            _ => None,
        })
        .collect();
    assert_eq!(ended, vec![(EndReason::Timeout, 2)]);

    let finished = f.store.get_match(record.id).await.unwrap().unwrap();
    assert_eq!(finished.status, MatchStatus::Finished);
    assert_eq!(finished.end_reason, Some(EndReason::Timeout));
    assert_eq!(f.store.list_zones(record.id).await.unwrap().len(), 10);

    // Nothing fires after settlement
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(f.store.list_zones(record.id).await.unwrap().len(), 10);
    for user in users {
        let stats = f.store.get_aggregate_stats(user).await.unwrap().unwrap();
        assert_eq!(stats.total_matches, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn zone_elimination_ends_match_with_winner() {
    let f = fixture();
    let survivor = Uuid::new_v4();
    let straggler = Uuid::new_v4();
    let config = MatchConfig {
        zone_damage_per_second: 60.0,
        ..scenario_config()
    };
    let record = f
        .orchestrator
        .create_match(config, &[survivor, straggler])
        .await
        .unwrap();
    f.orchestrator.start(record.id).await.unwrap();

    f.orchestrator
        .update_player_position(record.id, survivor, 0.0, 0.0)
        .await
        .unwrap();
    f.orchestrator
        .update_player_position(record.id, straggler, 1000.0, 1000.0)
        .await
        .unwrap();

    // Tick 1 deals 78, tick 2 deals 91
    tokio::time::sleep(Duration::from_secs(61)).await;
    let hurt = f.store.get_player(record.id, straggler).await.unwrap().unwrap();
    assert_eq!(hurt.health, 22);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let dead = f.store.get_player(record.id, straggler).await.unwrap().unwrap();
    assert_eq!(dead.status, PlayerStatus::Eliminated);
    assert_eq!(dead.elimination_cause, Some(EliminationCause::Zone));

    let finished = f.store.get_match(record.id).await.unwrap().unwrap();
    assert_eq!(finished.status, MatchStatus::Finished);
    assert_eq!(finished.end_reason, Some(EndReason::Winner));

    let winner = f.store.get_aggregate_stats(survivor).await.unwrap().unwrap();
    assert_eq!(winner.total_wins, 1);
    assert_eq!(winner.avg_placement, 1.0);
    let loser = f.store.get_aggregate_stats(straggler).await.unwrap().unwrap();
    assert_eq!(loser.total_wins, 0);
    assert_eq!(loser.avg_placement, 2.0);
    assert_eq!(f.store.xp_for(survivor), 100 + 900);
    assert_eq!(f.store.xp_for(straggler), 100 + 800);
}

#[tokio::test(start_paused = true)]
async fn loot_batches_spawn_on_their_own_interval() {
    let f = fixture();
    let config = MatchConfig {
        loot_spawn_interval_secs: 45,
        initial_loot_count: 20,
        loot_batch_size: 4,
        ..scenario_config()
    };
    let record = f
        .orchestrator
        .create_match(config, &[Uuid::new_v4(), Uuid::new_v4()])
        .await
        .unwrap();
    f.orchestrator.start(record.id).await.unwrap();
    assert_eq!(f.store.list_loot(record.id).await.unwrap().len(), 20);

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(f.store.list_loot(record.id).await.unwrap().len(), 28);

    f.orchestrator
        .end(record.id, EndReason::Cancelled)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(f.store.list_loot(record.id).await.unwrap().len(), 28);
}

#[tokio::test(start_paused = true)]
async fn matches_run_independently() {
    let f = fixture();
    let a = f
        .orchestrator
        .create_match(scenario_config(), &[Uuid::new_v4(), Uuid::new_v4()])
        .await
        .unwrap();
    let b = f
        .orchestrator
        .create_match(scenario_config(), &[Uuid::new_v4(), Uuid::new_v4()])
        .await
        .unwrap();
    f.orchestrator.start(a.id).await.unwrap();
    f.orchestrator.start(b.id).await.unwrap();

    f.orchestrator.end(a.id, EndReason::Cancelled).await.unwrap();
    tokio::time::sleep(Duration::from_secs(121)).await;

    assert_eq!(f.store.list_zones(a.id).await.unwrap().len(), 1);
    assert_eq!(f.store.list_zones(b.id).await.unwrap().len(), 3);
    assert_eq!(f.orchestrator.active_matches(), vec![b.id]);
}
