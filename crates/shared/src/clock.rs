//! Chess-clock accounting: a pure transformation over clock snapshots.
//!
//! Nothing here touches wall-clock time or storage; callers pass `now_ms`
//! in, which keeps every rule unit-testable without sleeping.

use serde::{Deserialize, Serialize};

use crate::models::game::Color;

/// Network delay credited back to the mover is capped at this value.
pub const LAG_COMPENSATION_CAP_MS: i64 = 500;

/// White must make the first move within this window or the game aborts.
pub const FIRST_MOVE_WINDOW_MS: i64 = 30_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveColor {
    White,
    Black,
    None,
}

impl ActiveColor {
    pub fn matches(self, color: Color) -> bool {
        match (self, color) {
            (ActiveColor::White, Color::White) | (ActiveColor::Black, Color::Black) => true,
            _ => false,
        }
    }

    pub fn as_color(self) -> Option<Color> {
        match self {
            ActiveColor::White => Some(Color::White),
            ActiveColor::Black => Some(Color::Black),
            ActiveColor::None => None,
        }
    }
}

impl From<Color> for ActiveColor {
    fn from(color: Color) -> Self {
        match color {
            Color::White => ActiveColor::White,
            Color::Black => ActiveColor::Black,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub white_ms: i64,
    pub black_ms: i64,
    pub active_color: ActiveColor,
    pub last_move_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_move_deadline_ms: Option<i64>,
    pub move_count: u32,
    pub base_ms: i64,
    pub increment_ms: i64,
}

impl ClockSnapshot {
    /// Snapshot for a freshly created game: both sides primed to the base
    /// time, clock not yet running, first-move deadline armed.
    pub fn initial(base_ms: i64, increment_ms: i64, now_ms: i64) -> Self {
        ClockSnapshot {
            white_ms: base_ms,
            black_ms: base_ms,
            active_color: ActiveColor::None,
            last_move_at_ms: now_ms,
            first_move_deadline_ms: Some(now_ms + FIRST_MOVE_WINDOW_MS),
            move_count: 0,
            base_ms,
            increment_ms,
        }
    }

    pub fn remaining(&self, color: Color) -> i64 {
        match color {
            Color::White => self.white_ms,
            Color::Black => self.black_ms,
        }
    }

    fn remaining_mut(&mut self, color: Color) -> &mut i64 {
        match color {
            Color::White => &mut self.white_ms,
            Color::Black => &mut self.black_ms,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClockError {
    WrongTurn,
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::WrongTurn => write!(f, "not this side's turn"),
        }
    }
}

impl std::error::Error for ClockError {}

/// Result of committing one half-move to the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub snapshot: ClockSnapshot,
    /// Set when a side flagged; the turn is not flipped in that case.
    pub flagged: Option<Color>,
    pub lag_compensated_ms: i64,
}

/// Commit a half-move by `moving_color` at `now_ms`.
///
/// The first move (white, clock not yet running) starts black's clock
/// without deducting or incrementing. Every later move deducts the elapsed
/// time, credits capped lag compensation when the client timestamp is
/// plausible, adds the increment, and either reports a flag-fall or flips
/// the turn.
pub fn apply_move(
    snapshot: &ClockSnapshot,
    moving_color: Color,
    now_ms: i64,
    client_timestamp_ms: Option<i64>,
) -> Result<MoveOutcome, ClockError> {
    let mut next = *snapshot;

    if next.active_color == ActiveColor::None {
        if moving_color != Color::White {
            return Err(ClockError::WrongTurn);
        }
        next.active_color = ActiveColor::Black;
        next.last_move_at_ms = now_ms;
        next.first_move_deadline_ms = None;
        next.move_count = 1;
        return Ok(MoveOutcome {
            snapshot: next,
            flagged: None,
            lag_compensated_ms: 0,
        });
    }

    if !next.active_color.matches(moving_color) {
        return Err(ClockError::WrongTurn);
    }

    let elapsed = now_ms - next.last_move_at_ms;
    *next.remaining_mut(moving_color) -= elapsed;

    // A missing, non-positive, or future client timestamp earns nothing.
    let lag_compensated_ms = match client_timestamp_ms {
        Some(ts) if ts > 0 && ts <= now_ms => (now_ms - ts).min(LAG_COMPENSATION_CAP_MS),
        _ => 0,
    };
    *next.remaining_mut(moving_color) += lag_compensated_ms;

    *next.remaining_mut(moving_color) += next.increment_ms;

    if next.white_ms <= 0 || next.black_ms <= 0 {
        let flagged = if next.white_ms <= 0 {
            Color::White
        } else {
            Color::Black
        };
        next.white_ms = next.white_ms.max(0);
        next.black_ms = next.black_ms.max(0);
        return Ok(MoveOutcome {
            snapshot: next,
            flagged: Some(flagged),
            lag_compensated_ms,
        });
    }

    next.active_color = ActiveColor::from(moving_color.opposite());
    next.last_move_at_ms = now_ms;
    next.move_count += 1;

    Ok(MoveOutcome {
        snapshot: next,
        flagged: None,
        lag_compensated_ms,
    })
}

/// Remaining time for both sides as of `now_ms`, had no move been made.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockProjection {
    pub white_ms: i64,
    pub black_ms: i64,
    pub flagged: Option<Color>,
}

pub fn project(snapshot: &ClockSnapshot, now_ms: i64) -> ClockProjection {
    let mut white_ms = snapshot.white_ms;
    let mut black_ms = snapshot.black_ms;

    if let Some(active) = snapshot.active_color.as_color() {
        let elapsed = (now_ms - snapshot.last_move_at_ms).max(0);
        match active {
            Color::White => white_ms -= elapsed,
            Color::Black => black_ms -= elapsed,
        }
    }

    let flagged = if white_ms <= 0 && snapshot.active_color == ActiveColor::White {
        Some(Color::White)
    } else if black_ms <= 0 && snapshot.active_color == ActiveColor::Black {
        Some(Color::Black)
    } else {
        None
    };

    ClockProjection {
        white_ms: white_ms.max(0),
        black_ms: black_ms.max(0),
        flagged,
    }
}
