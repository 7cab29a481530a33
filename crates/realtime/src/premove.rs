use dashmap::DashMap;
use tracing::debug;

use shared::models::game::{Color, PremoveSlots, QueuedPremove};
use shared::services::chess_service::ChessService;

use crate::models::MovePayload;

/// Authoritative in-process copy of the queued premoves. The game document
/// holds a durable shadow used to rehydrate after a restart or when a game
/// first lands on this process.
#[derive(Default)]
pub struct PremoveQueue {
    slots: DashMap<String, PremoveSlots>,
}

impl PremoveQueue {
    pub fn new() -> Self {
        PremoveQueue::default()
    }

    pub fn set(&self, game_id: &str, color: Color, premove: QueuedPremove) {
        self.slots
            .entry(game_id.to_string())
            .or_default()
            .set(color, premove);
    }

    pub fn get(&self, game_id: &str, color: Color) -> Option<QueuedPremove> {
        self.slots
            .get(game_id)
            .and_then(|slots| slots.get(color).cloned())
    }

    pub fn clear(&self, game_id: &str, color: Color, reason: &str) -> Option<QueuedPremove> {
        let cleared = self
            .slots
            .get_mut(game_id)
            .and_then(|mut slots| slots.clear(color));
        if cleared.is_some() {
            debug!("Cleared {} premove for game {} ({})", color, game_id, reason);
        }
        cleared
    }

    pub fn clear_all(&self, game_id: &str, reason: &str) {
        if let Some(mut slots) = self.slots.get_mut(game_id) {
            slots.clear(Color::White);
            slots.clear(Color::Black);
            debug!("Cleared all premoves for game {} ({})", game_id, reason);
        }
    }

    /// Seed the queue from the durable shadow. Existing in-memory slots win;
    /// they are newer than anything the store has.
    pub fn rehydrate(&self, game_id: &str, from_durable: &PremoveSlots) {
        self.slots
            .entry(game_id.to_string())
            .or_insert_with(|| from_durable.clone());
    }

    pub fn contains(&self, game_id: &str) -> bool {
        self.slots.contains_key(game_id)
    }

    /// Drop the whole entry once a game completes.
    pub fn evict(&self, game_id: &str) {
        self.slots.remove(game_id);
    }
}

/// Shape-only validation applied when a premove is queued. Legality against
/// the position is decided at execution time, never here.
pub fn validate_premove(payload: &MovePayload) -> Result<(), String> {
    if payload.from == payload.to {
        return Err("Premove squares must differ".to_string());
    }
    if !ChessService::is_valid_square(&payload.from) {
        return Err(format!("Invalid from square: {}", payload.from));
    }
    if !ChessService::is_valid_square(&payload.to) {
        return Err(format!("Invalid to square: {}", payload.to));
    }
    if let Some(piece) = payload.promotion {
        if !ChessService::is_valid_promotion(piece) {
            return Err(format!("Invalid promotion piece: {}", piece));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn premove(from: &str, to: &str) -> QueuedPremove {
        QueuedPremove {
            from: from.to_string(),
            to: to.to_string(),
            promotion: None,
            set_at_ms: 0,
            source_move_no: 0,
            trace_id: None,
        }
    }

    #[test]
    fn set_get_clear_roundtrip() {
        let queue = PremoveQueue::new();
        assert_eq!(queue.get("g1", Color::Black), None);
        queue.set("g1", Color::Black, premove("d7", "d5"));
        assert_eq!(queue.get("g1", Color::Black).unwrap().from, "d7");
        assert_eq!(queue.get("g1", Color::White), None);

        let cleared = queue.clear("g1", Color::Black, "cancelled");
        assert_eq!(cleared.unwrap().to, "d5");
        assert_eq!(queue.clear("g1", Color::Black, "cancelled"), None);
    }

    #[test]
    fn set_overwrites_the_existing_slot() {
        let queue = PremoveQueue::new();
        queue.set("g1", Color::White, premove("e2", "e4"));
        queue.set("g1", Color::White, premove("d2", "d4"));
        assert_eq!(queue.get("g1", Color::White).unwrap().from, "d2");
    }

    #[test]
    fn clear_all_is_idempotent() {
        let queue = PremoveQueue::new();
        queue.set("g1", Color::White, premove("e2", "e4"));
        queue.set("g1", Color::Black, premove("d7", "d5"));
        queue.clear_all("g1", "game over");
        assert_eq!(queue.get("g1", Color::White), None);
        assert_eq!(queue.get("g1", Color::Black), None);
        queue.clear_all("g1", "game over");
        queue.clear_all("missing", "game over");
    }

    #[test]
    fn rehydrate_does_not_clobber_live_slots() {
        let queue = PremoveQueue::new();
        let durable = PremoveSlots {
            white: Some(premove("e2", "e4")),
            black: None,
        };
        queue.rehydrate("g1", &durable);
        assert_eq!(queue.get("g1", Color::White).unwrap().from, "e2");

        queue.set("g1", Color::White, premove("d2", "d4"));
        queue.rehydrate("g1", &durable);
        assert_eq!(queue.get("g1", Color::White).unwrap().from, "d2");
    }

    #[test]
    fn rehydrate_then_read_matches_durable_state() {
        let queue = PremoveQueue::new();
        let durable = PremoveSlots {
            white: None,
            black: Some(premove("g8", "f6")),
        };
        queue.rehydrate("g1", &durable);
        assert!(queue.contains("g1"));
        assert_eq!(queue.get("g1", Color::Black).unwrap().from, "g8");
        queue.evict("g1");
        assert!(!queue.contains("g1"));
    }

    #[test]
    fn shape_validation_rejects_bad_premoves() {
        let ok = MovePayload {
            from: "d7".into(),
            to: "d5".into(),
            promotion: None,
        };
        assert!(validate_premove(&ok).is_ok());

        let same = MovePayload {
            from: "d7".into(),
            to: "d7".into(),
            promotion: None,
        };
        assert!(validate_premove(&same).is_err());

        let bad_square = MovePayload {
            from: "z9".into(),
            to: "d5".into(),
            promotion: None,
        };
        assert!(validate_premove(&bad_square).is_err());

        let bad_promotion = MovePayload {
            from: "e7".into(),
            to: "e8".into(),
            promotion: Some('k'),
        };
        assert!(validate_premove(&bad_promotion).is_err());

        let promotion = MovePayload {
            from: "e7".into(),
            to: "e8".into(),
            promotion: Some('q'),
        };
        assert!(validate_premove(&promotion).is_ok());
    }
}
