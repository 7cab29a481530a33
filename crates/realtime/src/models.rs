use serde::{Deserialize, Serialize};

use shared::clock::ActiveColor;
use shared::models::game::{
    Color, Game, GameResult, GameStatus, QueuedPremove, ResultReason, TimeControl,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovePayload {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<char>,
}

/// Frames the client sends, dispatched on the `action` tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinGame {
        game_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
    MakeMove {
        game_id: String,
        #[serde(rename = "move")]
        mv: MovePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_timestamp: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
    SetPremove {
        game_id: String,
        premove: MovePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
    CancelPremove {
        game_id: String,
    },
    ResignGame {
        game_id: String,
    },
    OfferDraw {
        game_id: String,
    },
    AcceptDraw {
        game_id: String,
    },
    RejectDraw {
        game_id: String,
    },
    CancelGame {
        game_id: String,
    },
    OfferRematch {
        game_id: String,
    },
    AcceptRematch {
        game_id: String,
    },
    RejectRematch {
        game_id: String,
    },
    LeaveGame {
        game_id: String,
    },
}

impl ClientEvent {
    pub fn action(&self) -> &'static str {
        match self {
            ClientEvent::JoinGame { .. } => "join_game",
            ClientEvent::MakeMove { .. } => "make_move",
            ClientEvent::SetPremove { .. } => "set_premove",
            ClientEvent::CancelPremove { .. } => "cancel_premove",
            ClientEvent::ResignGame { .. } => "resign_game",
            ClientEvent::OfferDraw { .. } => "offer_draw",
            ClientEvent::AcceptDraw { .. } => "accept_draw",
            ClientEvent::RejectDraw { .. } => "reject_draw",
            ClientEvent::CancelGame { .. } => "cancel_game",
            ClientEvent::OfferRematch { .. } => "offer_rematch",
            ClientEvent::AcceptRematch { .. } => "accept_rematch",
            ClientEvent::RejectRematch { .. } => "reject_rematch",
            ClientEvent::LeaveGame { .. } => "leave_game",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremoveClearReason {
    Cancelled,
    Rejected,
    Executed,
}

/// Per-viewer snapshot sent on join.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameStateView {
    pub id: String,
    pub white_player_id: String,
    pub black_player_id: String,
    pub history: Vec<String>,
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<GameResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_reason: Option<ResultReason>,
    pub white_ms: i64,
    pub black_ms: i64,
    pub active_color: ActiveColor,
    pub move_count: u32,
    pub time_control: TimeControl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_draw_offer_from: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_premove: Option<MovePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnect_deadline_ms: Option<i64>,
}

impl GameStateView {
    pub fn for_viewer(game: &Game, viewer_id: &str, now_ms: i64) -> Self {
        let projection = shared::clock::project(&game.clock, now_ms);
        let your_color = game.color_of(viewer_id);
        let queued_premove = your_color
            .and_then(|color| game.queued_premoves.get(color))
            .map(|premove: &QueuedPremove| MovePayload {
                from: premove.from.clone(),
                to: premove.to.clone(),
                promotion: premove.promotion,
            });
        GameStateView {
            id: game.id.clone(),
            white_player_id: game.white_player_id.clone(),
            black_player_id: game.black_player_id.clone(),
            history: game.history.clone(),
            status: game.status,
            result: game.result,
            result_reason: game.result_reason,
            white_ms: projection.white_ms,
            black_ms: projection.black_ms,
            active_color: game.clock.active_color,
            move_count: game.clock.move_count,
            time_control: game.time_control.clone(),
            pending_draw_offer_from: game.pending_draw_offer_from,
            your_color,
            queued_premove,
            disconnect_deadline_ms: game.disconnect_deadline_ms,
        }
    }
}

/// Frames the server emits, tagged with `event`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    GameState {
        game: GameStateView,
    },
    MoveMade {
        game_id: String,
        by: Color,
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        promotion: Option<char>,
        notation: String,
        move_no: u32,
    },
    ClockUpdate {
        game_id: String,
        white_ms: i64,
        black_ms: i64,
        active_color: ActiveColor,
    },
    PremoveSet {
        game_id: String,
        by: Color,
        premove: MovePayload,
    },
    PremoveRejected {
        game_id: String,
        reason: String,
    },
    PremoveCleared {
        game_id: String,
        by: Color,
        reason: PremoveClearReason,
    },
    GameOver {
        game_id: String,
        result: GameResult,
        reason: ResultReason,
    },
    DrawOffered {
        game_id: String,
        by: Color,
    },
    DrawRejected {
        game_id: String,
    },
    RematchOffered {
        game_id: String,
        by: Color,
    },
    RematchAccepted {
        game_id: String,
        new_game_id: String,
    },
    RematchRejected {
        game_id: String,
    },
    OpponentDisconnected {
        game_id: String,
        reconnect_deadline_at: i64,
    },
    OpponentReconnected {
        game_id: String,
    },
    OpponentJoined {
        game_id: String,
        user_id: String,
    },
    Ack {
        action: String,
        status: String,
    },
    Error {
        message: String,
    },
    OnlineCount {
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_action_tagged_json() {
        let frame = r#"{"action":"make_move","game_id":"g1","move":{"from":"e2","to":"e4"},"client_timestamp":123}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::MakeMove {
                game_id,
                mv,
                client_timestamp,
                trace_id,
            } => {
                assert_eq!(game_id, "g1");
                assert_eq!(mv.from, "e2");
                assert_eq!(mv.to, "e4");
                assert_eq!(mv.promotion, None);
                assert_eq!(client_timestamp, Some(123));
                assert_eq!(trace_id, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let frame = r#"{"action":"explode","game_id":"g1"}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn server_events_carry_the_event_tag() {
        let event = ServerEvent::GameOver {
            game_id: "g1".to_string(),
            result: GameResult::White,
            reason: ResultReason::Timeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "game_over");
        assert_eq!(json["result"], "white");
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn premove_clear_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PremoveClearReason::Executed).unwrap(),
            "\"executed\""
        );
    }
}
