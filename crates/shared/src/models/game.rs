use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::ClockSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Ongoing,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameResult {
    White,
    Black,
    Draw,
    Aborted,
}

impl GameResult {
    pub fn winner(color: Color) -> GameResult {
        match color {
            Color::White => GameResult::White,
            Color::Black => GameResult::Black,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    Checkmate,
    Stalemate,
    Draw,
    Timeout,
    Resignation,
    DisconnectTimeout,
    DrawAgreed,
    CancelledDueToFirstMoveTimeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub base_minutes: u32,
    pub increment_seconds: u32,
    pub label: String,
}

impl TimeControl {
    pub fn new(base_minutes: u32, increment_seconds: u32, label: &str) -> Self {
        TimeControl {
            base_minutes,
            increment_seconds,
            label: label.to_string(),
        }
    }

    /// Look up one of the named controls offered by matchmaking.
    pub fn named(label: &str) -> Option<TimeControl> {
        match label {
            "bullet" => Some(TimeControl::new(1, 0, "bullet")),
            "blitz" => Some(TimeControl::new(5, 3, "blitz")),
            "rapid" => Some(TimeControl::new(10, 5, "rapid")),
            "classical" => Some(TimeControl::new(30, 20, "classical")),
            _ => None,
        }
    }

    pub fn base_ms(&self) -> i64 {
        i64::from(self.base_minutes) * 60_000
    }

    pub fn increment_ms(&self) -> i64 {
        i64::from(self.increment_seconds) * 1_000
    }
}

/// A move committed while it was not the committing side's turn, waiting to
/// be tried at the next turn-flip. Legality is decided at execution time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedPremove {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<char>,
    pub set_at_ms: i64,
    pub source_move_no: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Per-color premove slots, at most one queued move per side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremoveSlots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white: Option<QueuedPremove>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black: Option<QueuedPremove>,
}

impl PremoveSlots {
    pub fn get(&self, color: Color) -> Option<&QueuedPremove> {
        match color {
            Color::White => self.white.as_ref(),
            Color::Black => self.black.as_ref(),
        }
    }

    pub fn set(&mut self, color: Color, premove: QueuedPremove) {
        match color {
            Color::White => self.white = Some(premove),
            Color::Black => self.black = Some(premove),
        }
    }

    pub fn clear(&mut self, color: Color) -> Option<QueuedPremove> {
        match color {
            Color::White => self.white.take(),
            Color::Black => self.black.take(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.white.is_none() && self.black.is_none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub white_player_id: String,
    pub black_player_id: String,
    pub history: Vec<String>,
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<GameResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_reason: Option<ResultReason>,
    pub clock: ClockSnapshot,
    pub time_control: TimeControl,
    #[serde(default)]
    pub queued_premoves: PremoveSlots,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnect_deadline_ms: Option<i64>,
    #[serde(default)]
    pub stats_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_draw_offer_from: Option<Color>,
    #[serde(default)]
    pub white_draw_offers: u8,
    #[serde(default)]
    pub black_draw_offers: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rematch_offer_from: Option<Color>,
    #[serde(default)]
    pub rematch_declined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_game_id: Option<String>,
    pub created_at_ms: i64,
}

impl Game {
    pub fn new(
        white_player_id: &str,
        black_player_id: &str,
        time_control: TimeControl,
        now_ms: i64,
    ) -> Self {
        let clock = ClockSnapshot::initial(time_control.base_ms(), time_control.increment_ms(), now_ms);
        Game {
            id: Uuid::new_v4().to_string(),
            white_player_id: white_player_id.to_string(),
            black_player_id: black_player_id.to_string(),
            history: Vec::new(),
            status: GameStatus::Ongoing,
            result: None,
            result_reason: None,
            clock,
            time_control,
            queued_premoves: PremoveSlots::default(),
            disconnected_player_id: None,
            disconnect_deadline_ms: None,
            stats_applied: false,
            pending_draw_offer_from: None,
            white_draw_offers: 0,
            black_draw_offers: 0,
            rematch_offer_from: None,
            rematch_declined: false,
            next_game_id: None,
            created_at_ms: now_ms,
        }
    }

    pub fn is_player(&self, player_id: &str) -> bool {
        self.white_player_id == player_id || self.black_player_id == player_id
    }

    pub fn color_of(&self, player_id: &str) -> Option<Color> {
        if self.white_player_id == player_id {
            Some(Color::White)
        } else if self.black_player_id == player_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn player_id_of(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white_player_id,
            Color::Black => &self.black_player_id,
        }
    }

    pub fn draw_offers(&self, color: Color) -> u8 {
        match color {
            Color::White => self.white_draw_offers,
            Color::Black => self.black_draw_offers,
        }
    }
}
