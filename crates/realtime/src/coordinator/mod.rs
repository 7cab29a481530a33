pub mod errors;
mod moves;
mod offers;

use std::sync::Arc;
use tracing::{debug, error, info};

use shared::clock::{self, ActiveColor};
use shared::models::game::{Game, GameResult, GameStatus, PremoveSlots, ResultReason};
use shared::repositories::game_repository::{GamePatch, GamePredicate, GameRepository};
use shared::services::stats_service::StatsRecorder;

use crate::fabric::{game_id_of_room, game_room, SessionFabric};
use crate::locks::GameLocks;
use crate::models::{GameStateView, ServerEvent};
use crate::premove::PremoveQueue;

pub use errors::CoordinatorError;

/// A disconnected player forfeits after this grace window.
pub const DISCONNECT_GRACE_MS: i64 = 20_000;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serializes all mutating operations per game and drives the
/// validate → clock → broadcast → persist → premove pipeline.
pub struct GameCoordinator {
    games: Arc<dyn GameRepository>,
    fabric: Arc<SessionFabric>,
    premoves: Arc<PremoveQueue>,
    locks: GameLocks,
    stats: Arc<dyn StatsRecorder>,
}

impl GameCoordinator {
    pub fn new(
        games: Arc<dyn GameRepository>,
        fabric: Arc<SessionFabric>,
        premoves: Arc<PremoveQueue>,
        stats: Arc<dyn StatsRecorder>,
    ) -> Self {
        GameCoordinator {
            games,
            fabric,
            premoves,
            locks: GameLocks::new(),
            stats,
        }
    }

    pub fn evict_released_locks(&self) {
        self.locks.evict_released();
        debug!("Game lock map holds {} entries", self.locks.len());
    }

    pub(crate) async fn load_required(&self, game_id: &str) -> Result<Game, CoordinatorError> {
        self.games
            .load(game_id)
            .await?
            .ok_or(CoordinatorError::GameNotFound)
    }

    /// Seed the in-process premove queue from the durable shadow the first
    /// time this process touches a game.
    pub(crate) fn rehydrate_if_needed(&self, game: &Game) {
        if !game.queued_premoves.is_empty() && !self.premoves.contains(&game.id) {
            self.premoves.rehydrate(&game.id, &game.queued_premoves);
        }
    }

    pub(crate) fn emit_clock_update(&self, game: &Game, now_ms: i64) {
        let projection = clock::project(&game.clock, now_ms);
        self.fabric.emit_room(
            &game_room(&game.id),
            &ServerEvent::ClockUpdate {
                game_id: game.id.clone(),
                white_ms: projection.white_ms,
                black_ms: projection.black_ms,
                active_color: game.clock.active_color,
            },
        );
    }

    /// Persist off the hot path. Failures are logged and the mover gets a
    /// best-effort notification; the broadcast state stays authoritative.
    pub(crate) fn spawn_persist(&self, game_id: &str, notify_user: &str, patch: GamePatch) {
        if patch.is_empty() {
            return;
        }
        let games = self.games.clone();
        let fabric = self.fabric.clone();
        let game_id = game_id.to_string();
        let user_id = notify_user.to_string();
        tokio::spawn(async move {
            if let Err(e) = games.field_patch(&game_id, patch).await {
                error!("Failed to persist patch for game {}: {}", game_id, e);
                fabric.emit_user(
                    &user_id,
                    &ServerEvent::Error {
                        message: "sync error".to_string(),
                    },
                );
            }
        });
    }

    /// The exactly-once termination latch. Whoever wins the conditional
    /// update emits `game_over` and applies the stats side effect; every
    /// other concurrent terminator sees `false` and stays silent.
    pub(crate) async fn commit_termination(
        &self,
        game: &mut Game,
        predicate: GamePredicate,
        base_patch: GamePatch,
        result: GameResult,
        reason: ResultReason,
    ) -> Result<bool, CoordinatorError> {
        let mut terminal_clock = game.clock;
        terminal_clock.active_color = ActiveColor::None;

        let apply_stats = result != GameResult::Aborted;
        let mut patch = base_patch
            .status(GameStatus::Completed)
            .result(result, reason)
            .clock(terminal_clock)
            .clear_all_premoves()
            .clear_disconnect();
        if apply_stats {
            patch = patch.stats_applied(true);
        }

        let modified = self
            .games
            .conditional_update(&game.id, predicate, patch)
            .await?;
        if !modified {
            return Ok(false);
        }

        game.status = GameStatus::Completed;
        game.result = Some(result);
        game.result_reason = Some(reason);
        game.clock = terminal_clock;
        game.queued_premoves = PremoveSlots::default();
        game.disconnected_player_id = None;
        game.disconnect_deadline_ms = None;

        self.premoves.evict(&game.id);
        self.fabric.emit_room(
            &game_room(&game.id),
            &ServerEvent::GameOver {
                game_id: game.id.clone(),
                result,
                reason,
            },
        );
        info!("Game {} completed: {:?} ({:?})", game.id, result, reason);

        if apply_stats {
            game.stats_applied = true;
            if let Err(e) = self.stats.record_result(game).await {
                error!("Failed to record stats for game {}: {}", game.id, e);
            }
        }

        Ok(true)
    }

    /// Read-mostly: no game lock. The reconnect clear races the timeout
    /// watcher through the conditional update; whichever lands first wins.
    pub async fn join_game(
        &self,
        connection_id: &str,
        user_id: &str,
        game_id: &str,
    ) -> Result<(), CoordinatorError> {
        let mut game = self.load_required(game_id).await?;
        if !game.is_player(user_id) {
            return Err(CoordinatorError::NotAPlayer);
        }
        self.rehydrate_if_needed(&game);

        let room = game_room(game_id);
        let already_present = self.fabric.user_present_in_room(&room, user_id);
        self.fabric.join(connection_id, &room);
        if !already_present {
            self.fabric.emit_room(
                &room,
                &ServerEvent::OpponentJoined {
                    game_id: game_id.to_string(),
                    user_id: user_id.to_string(),
                },
            );
        }

        if game.status == GameStatus::Ongoing
            && game.disconnected_player_id.as_deref() == Some(user_id)
        {
            let cleared = self
                .games
                .conditional_update(
                    game_id,
                    GamePredicate::ongoing().with_disconnected(user_id),
                    GamePatch::new().clear_disconnect(),
                )
                .await?;
            if cleared {
                game.disconnected_player_id = None;
                game.disconnect_deadline_ms = None;
                self.fabric.emit_room(
                    &room,
                    &ServerEvent::OpponentReconnected {
                        game_id: game_id.to_string(),
                    },
                );
                info!("Player {} reconnected to game {}", user_id, game_id);
            } else {
                // The watcher won the race; show whatever it decided.
                game = self.load_required(game_id).await?;
            }
        }

        let now = now_ms();
        self.fabric.emit_connection(
            connection_id,
            &ServerEvent::GameState {
                game: GameStateView::for_viewer(&game, user_id, now),
            },
        );
        if game.status == GameStatus::Ongoing && game.clock.active_color != ActiveColor::None {
            self.emit_clock_update(&game, now);
        }
        Ok(())
    }

    /// Called after a connection left its rooms. Arms the disconnect grace
    /// marker for each game where no other connection of the user remains.
    pub async fn handle_disconnect(&self, user_id: &str, game_rooms: &[String]) {
        for room in game_rooms {
            let game_id = match game_id_of_room(room) {
                Some(id) => id,
                None => continue,
            };
            if self.fabric.user_present_in_room(room, user_id) {
                continue;
            }
            if let Err(e) = self.arm_disconnect(user_id, game_id, room).await {
                error!(
                    "Failed to arm disconnect for {} in game {}: {}",
                    user_id, game_id, e
                );
            }
        }
    }

    async fn arm_disconnect(
        &self,
        user_id: &str,
        game_id: &str,
        room: &str,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let game = match self.games.load(game_id).await? {
            Some(game) => game,
            None => return Ok(()),
        };
        if game.status != GameStatus::Ongoing
            || !game.is_player(user_id)
            || game.disconnected_player_id.is_some()
        {
            return Ok(());
        }

        let deadline = now_ms() + DISCONNECT_GRACE_MS;
        let armed = self
            .games
            .conditional_update(
                game_id,
                GamePredicate::ongoing().require_no_disconnect(),
                GamePatch::new().set_disconnect(user_id, deadline),
            )
            .await?;
        if armed {
            self.fabric.emit_room(
                room,
                &ServerEvent::OpponentDisconnected {
                    game_id: game_id.to_string(),
                    reconnect_deadline_at: deadline,
                },
            );
            info!(
                "Armed disconnect grace for {} in game {} (deadline {})",
                user_id, game_id, deadline
            );
        }
        Ok(())
    }
}
