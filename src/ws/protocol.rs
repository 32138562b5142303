//! Wire types for match event payloads and subscriber frames

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::model::{EliminationCause, EndReason, ZoneRecord};
use crate::game::scoring::Placement;

/// Payload published on a match channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    /// A new zone took effect
    ZoneUpdate { zone: ZoneRecord },

    /// A player left play
    PlayerEliminated {
        player_id: Uuid,
        cause: EliminationCause,
        /// Attacker, for `player` eliminations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eliminated_by: Option<Uuid>,
    },

    /// Settlement finished; sent once per match
    MatchEnded {
        reason: EndReason,
        placements: Vec<Placement>,
    },
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// First frame after the upgrade
    Welcome { match_id: Uuid, server_time: u64 },

    /// A bus event for the subscribed match
    Event { event: MatchEvent },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn elimination_payload_shape() {
        let player_id = Uuid::new_v4();
        let event = MatchEvent::PlayerEliminated {
            player_id,
            cause: EliminationCause::Zone,
            eliminated_by: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "player_eliminated", "player_id": player_id, "cause": "zone" })
        );
    }

    #[test]
    fn match_ended_is_wrapped_in_event_frame() {
        let msg = ServerMsg::Event {
            event: MatchEvent::MatchEnded {
                reason: EndReason::Timeout,
                placements: vec![],
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "match_ended");
        assert_eq!(value["event"]["reason"], "timeout");
    }

    #[test]
    fn client_ping_parses() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"ping","t":42}"#).unwrap();
        let ClientMsg::Ping { t } = msg;
        assert_eq!(t, 42);
    }
}
