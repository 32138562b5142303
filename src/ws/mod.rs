//! Match event streaming over WebSocket

pub mod handler;
pub mod protocol;

pub use handler::events_handler;
