#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use realtime::coordinator::now_ms;
use realtime::models::ServerEvent;
use realtime::AppState;
use shared::clock::ActiveColor;
use shared::models::game::{Game, TimeControl};
use shared::repositories::memory::InMemoryGameRepository;
use shared::services::errors::stats_service_errors::StatsServiceError;
use shared::services::stats_service::StatsRecorder;

/// Counts invocations so tests can assert the side effect fired once.
#[derive(Default)]
pub struct CountingStatsRecorder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl StatsRecorder for CountingStatsRecorder {
    async fn record_result(&self, _game: &Game) -> Result<(), StatsServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub stats: Arc<CountingStatsRecorder>,
}

pub fn harness() -> TestHarness {
    let stats = Arc::new(CountingStatsRecorder::default());
    let state = AppState::with_parts(Arc::new(InMemoryGameRepository::new()), stats.clone());
    TestHarness { state, stats }
}

pub struct TestPlayer {
    pub user_id: String,
    pub connection_id: String,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl TestPlayer {
    /// Everything received so far, without waiting.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Register a channel-tapped connection and join it to the game room.
pub async fn join(state: &AppState, user_id: &str, game_id: &str) -> TestPlayer {
    let connection_id = format!("conn-{}", Uuid::new_v4());
    let (tx, rx) = mpsc::unbounded_channel();
    state.fabric.register(&connection_id, user_id, tx);
    state
        .coordinator
        .join_game(&connection_id, user_id, game_id)
        .await
        .expect("join_game failed");
    TestPlayer {
        user_id: user_id.to_string(),
        connection_id,
        rx,
    }
}

pub async fn seed_game(state: &AppState, white: &str, black: &str) -> Game {
    let game = Game::new(white, black, TimeControl::new(5, 0, "5+0"), now_ms());
    state.games.create(&game).await.expect("seed failed");
    game
}

/// Seed a game mid-flight: history applied and the clock running for the
/// side to move.
pub async fn seed_game_with_history(
    state: &AppState,
    white: &str,
    black: &str,
    history: &[&str],
) -> Game {
    let now = now_ms();
    let mut game = Game::new(white, black, TimeControl::new(5, 0, "5+0"), now);
    game.history = history.iter().map(|m| m.to_string()).collect();
    game.clock.move_count = history.len() as u32;
    game.clock.last_move_at_ms = now;
    if !history.is_empty() {
        game.clock.first_move_deadline_ms = None;
        game.clock.active_color = if history.len() % 2 == 0 {
            ActiveColor::White
        } else {
            ActiveColor::Black
        };
    }
    state.games.create(&game).await.expect("seed failed");
    game
}

/// Let spawned persistence tasks land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

pub fn event_name(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::GameState { .. } => "game_state",
        ServerEvent::MoveMade { .. } => "move_made",
        ServerEvent::ClockUpdate { .. } => "clock_update",
        ServerEvent::PremoveSet { .. } => "premove_set",
        ServerEvent::PremoveRejected { .. } => "premove_rejected",
        ServerEvent::PremoveCleared { .. } => "premove_cleared",
        ServerEvent::GameOver { .. } => "game_over",
        ServerEvent::DrawOffered { .. } => "draw_offered",
        ServerEvent::DrawRejected { .. } => "draw_rejected",
        ServerEvent::RematchOffered { .. } => "rematch_offered",
        ServerEvent::RematchAccepted { .. } => "rematch_accepted",
        ServerEvent::RematchRejected { .. } => "rematch_rejected",
        ServerEvent::OpponentDisconnected { .. } => "opponent_disconnected",
        ServerEvent::OpponentReconnected { .. } => "opponent_reconnected",
        ServerEvent::OpponentJoined { .. } => "opponent_joined",
        ServerEvent::Ack { .. } => "ack",
        ServerEvent::Error { .. } => "error",
        ServerEvent::OnlineCount { .. } => "online_count",
    }
}

pub fn event_names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(event_name).collect()
}

pub fn count_events(events: &[ServerEvent], name: &str) -> usize {
    events.iter().filter(|e| event_name(e) == name).count()
}
