//! Application state shared across routes

use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{BroadcastBus, EventBus};
use crate::config::Config;
use crate::game::MatchOrchestrator;
use crate::store::{MatchStore, MemoryStore, SupabaseClient, SupabaseStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: Arc<BroadcastBus>,
    pub orchestrator: Arc<MatchOrchestrator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store: Arc<dyn MatchStore> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Using Supabase match store");
                Arc::new(SupabaseStore::new(SupabaseClient::new(supabase)))
            }
            None => {
                warn!("SUPABASE_URL not set, match state is kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    /// State over an explicit store
    pub fn with_store(config: Config, store: Arc<dyn MatchStore>) -> Self {
        let config = Arc::new(config);
        let bus = Arc::new(BroadcastBus::new());

        let orchestrator = Arc::new(MatchOrchestrator::new(
            store,
            bus.clone() as Arc<dyn EventBus>,
            config.current_season.clone(),
        ));

        Self {
            config,
            bus,
            orchestrator,
        }
    }
}
