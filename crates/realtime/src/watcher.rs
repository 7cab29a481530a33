use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use shared::clock::{self, ActiveColor};
use shared::models::game::{Game, GameResult, ResultReason};
use shared::repositories::game_repository::{GamePatch, GamePredicate, GameRepository};

use crate::coordinator::{now_ms, CoordinatorError, GameCoordinator};
use crate::fabric::{game_room, SessionFabric};
use crate::models::ServerEvent;

pub const DEFAULT_TICK_MS: u64 = 100;

/// Background loop that closes games nobody is pushing forward: expired
/// disconnect graces, missed first-move deadlines, and flag-falls the
/// players have not claimed. Every commit goes through the same
/// conditional-update latch the coordinator uses, so racing it is safe.
pub struct TimeoutWatcher {
    games: Arc<dyn GameRepository>,
    fabric: Arc<SessionFabric>,
    coordinator: Arc<GameCoordinator>,
    tick: Duration,
}

impl TimeoutWatcher {
    pub fn new(
        games: Arc<dyn GameRepository>,
        fabric: Arc<SessionFabric>,
        coordinator: Arc<GameCoordinator>,
        tick_ms: u64,
    ) -> Self {
        TimeoutWatcher {
            games,
            fabric,
            coordinator,
            tick: Duration::from_millis(tick_ms),
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Timeout watcher running at {:?} ticks", self.tick);
            loop {
                interval.tick().await;
                self.run_tick().await;
            }
        })
    }

    /// One full scan. Public so tests can drive the watcher without timers.
    pub async fn run_tick(&self) {
        self.coordinator.evict_released_locks();

        let games = match self.games.list_active().await {
            Ok(games) => games,
            Err(e) => {
                error!("Watcher failed to list active games: {}", e);
                return;
            }
        };

        for game in games {
            let game_id = game.id.clone();
            if let Err(e) = self.check_game(game).await {
                error!("Watcher failed on game {}: {}", game_id, e);
            }
        }
    }

    async fn check_game(&self, mut game: Game) -> Result<(), CoordinatorError> {
        let now = now_ms();

        if let (Some(player_id), Some(deadline)) = (
            game.disconnected_player_id.clone(),
            game.disconnect_deadline_ms,
        ) {
            if deadline <= now {
                return self.settle_disconnect(&mut game, &player_id).await;
            }
        }

        if let Some(deadline) = game.clock.first_move_deadline_ms {
            if game.clock.active_color == ActiveColor::None && now > deadline {
                self.coordinator
                    .commit_termination(
                        &mut game,
                        GamePredicate::ongoing(),
                        GamePatch::new(),
                        GameResult::Aborted,
                        ResultReason::CancelledDueToFirstMoveTimeout,
                    )
                    .await?;
                return Ok(());
            }
        }

        if let Some(flagged) = clock::project(&game.clock, now).flagged {
            self.coordinator
                .commit_termination(
                    &mut game,
                    GamePredicate::ongoing(),
                    GamePatch::new(),
                    GameResult::winner(flagged.opposite()),
                    ResultReason::Timeout,
                )
                .await?;
        }

        Ok(())
    }

    /// The grace window ran out. If the player is actually back in the room
    /// the markers are stale; clear them instead of forfeiting.
    async fn settle_disconnect(
        &self,
        game: &mut Game,
        player_id: &str,
    ) -> Result<(), CoordinatorError> {
        let room = game_room(&game.id);

        if self.fabric.user_present_in_room(&room, player_id) {
            let cleared = self
                .games
                .conditional_update(
                    &game.id,
                    GamePredicate::ongoing().with_disconnected(player_id),
                    GamePatch::new().clear_disconnect(),
                )
                .await?;
            if cleared {
                self.fabric.emit_room(
                    &room,
                    &ServerEvent::OpponentReconnected {
                        game_id: game.id.clone(),
                    },
                );
                info!(
                    "Cleared stale disconnect marker for {} in game {}",
                    player_id, game.id
                );
            }
            return Ok(());
        }

        let color = match game.color_of(player_id) {
            Some(color) => color,
            None => return Ok(()),
        };
        self.coordinator
            .commit_termination(
                game,
                GamePredicate::ongoing().with_disconnected(player_id),
                GamePatch::new(),
                GameResult::winner(color.opposite()),
                ResultReason::DisconnectTimeout,
            )
            .await?;
        Ok(())
    }
}
