//! Battle royale match orchestrator
//!
//! Runs each match as an independent set of timers:
//! - zone shrink ticks with zone damage and the final countdown
//! - loot spawn ticks
//! - eliminations, win detection and exactly-once settlement
//!
//! State lives behind the [`store::MatchStore`] boundary and events go out on
//! the [`bus::EventBus`] boundary as `match:{id}` channels.

pub mod app;
pub mod bus;
pub mod config;
pub mod game;
pub mod http;
pub mod store;
pub mod util;
pub mod ws;
