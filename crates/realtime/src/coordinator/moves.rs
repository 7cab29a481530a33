use chess::Board;
use std::time::Instant;
use tracing::{info, warn};

use shared::clock;
use shared::models::game::{Game, GameResult, GameStatus, QueuedPremove, ResultReason};
use shared::repositories::game_repository::{GamePatch, GamePredicate};
use shared::services::chess_service::{ChessService, GameOutcome};
use shared::services::errors::chess_service_errors::ChessServiceError;

use crate::coordinator::{now_ms, CoordinatorError, GameCoordinator};
use crate::fabric::game_room;
use crate::models::{MovePayload, PremoveClearReason, ServerEvent};
use crate::premove::validate_premove;

impl GameCoordinator {
    /// The hot path. Broadcasts go out before the durable write; the
    /// in-memory state committed under the lock is authoritative.
    pub async fn make_move(
        &self,
        user_id: &str,
        game_id: &str,
        mv: &MovePayload,
        client_timestamp_ms: Option<i64>,
        trace_id: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let mut game = self.load_required(game_id).await?;
        if game.status == GameStatus::Completed {
            return Err(CoordinatorError::GameCompleted);
        }
        let color = game
            .color_of(user_id)
            .ok_or(CoordinatorError::NotAPlayer)?;
        self.rehydrate_if_needed(&game);

        let board = ChessService::position_from_history(&game.history)
            .map_err(CoordinatorError::Rules)?;
        if ChessService::side_to_move(&board) != color {
            return Err(CoordinatorError::NotYourTurn);
        }
        let next_board = ChessService::try_move(&board, &mv.from, &mv.to, mv.promotion)
            .map_err(|e| match e {
                ChessServiceError::IllegalMove(msg) | ChessServiceError::ValidationError(msg) => {
                    CoordinatorError::IllegalMove(msg)
                }
                other => CoordinatorError::Rules(other),
            })?;

        let room = game_room(game_id);
        let mut patch = GamePatch::new();

        // An explicit move overrides the mover's own queued premove.
        if self.premoves.clear(game_id, color, "cancelled").is_some() {
            game.queued_premoves.clear(color);
            patch = patch.clear_premove(color);
            self.fabric.emit_room(
                &room,
                &ServerEvent::PremoveCleared {
                    game_id: game_id.to_string(),
                    by: color,
                    reason: PremoveClearReason::Cancelled,
                },
            );
        }

        let now = now_ms();
        let outcome = clock::apply_move(&game.clock, color, now, client_timestamp_ms)
            .map_err(|_| CoordinatorError::NotYourTurn)?;
        game.clock = outcome.snapshot;

        if let Some(flagged) = outcome.flagged {
            // The move never lands; the flag decides the game.
            self.commit_termination(
                &mut game,
                GamePredicate::ongoing(),
                patch,
                GameResult::winner(flagged.opposite()),
                ResultReason::Timeout,
            )
            .await?;
            return Ok(());
        }

        let notation = ChessService::notation(&mv.from, &mv.to, mv.promotion);
        game.history.push(notation.clone());
        let move_no = game.history.len() as u32;
        patch = patch.history(game.history.clone()).clock(game.clock);

        let over = match ChessService::game_outcome(&next_board) {
            GameOutcome::Ongoing => None,
            GameOutcome::Checkmate { winner } => {
                Some((GameResult::winner(winner), ResultReason::Checkmate))
            }
            GameOutcome::Stalemate => Some((GameResult::Draw, ResultReason::Stalemate)),
        };

        self.fabric.emit_room(
            &room,
            &ServerEvent::MoveMade {
                game_id: game_id.to_string(),
                by: color,
                from: mv.from.clone(),
                to: mv.to.clone(),
                promotion: mv.promotion,
                notation,
                move_no,
            },
        );
        self.emit_clock_update(&game, now);

        if let Some((result, reason)) = over {
            self.commit_termination(&mut game, GamePredicate::ongoing(), patch, result, reason)
                .await?;
            return Ok(());
        }

        self.spawn_persist(game_id, user_id, patch);

        // Still inside the critical section: nothing may interleave between
        // this move's commit and the opponent's queued premove.
        self.try_execute_queued_premove(&mut game, &next_board, trace_id)
            .await?;
        Ok(())
    }

    /// Fires the premove of the side that just came to move, if any. The
    /// stretch from turn-flip to the move broadcast is the latency budget
    /// this server is built around.
    async fn try_execute_queued_premove(
        &self,
        game: &mut Game,
        board: &Board,
        trace_id: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let to_move = ChessService::side_to_move(board);
        let premove = match self.premoves.get(&game.id, to_move) {
            Some(premove) => premove,
            None => return Ok(()),
        };

        let started = Instant::now();
        info!(
            game_id = %game.id,
            move_no = game.history.len(),
            trace_id = trace_id.or(premove.trace_id.as_deref()),
            "turn_flipped"
        );

        let room = game_room(&game.id);
        let premover_id = game.player_id_of(to_move).to_string();

        let next_board =
            match ChessService::try_move(board, &premove.from, &premove.to, premove.promotion) {
                Ok(next_board) => next_board,
                Err(e) => {
                    // Speculation failed; the slot is spent either way.
                    self.premoves.clear(&game.id, to_move, "rejected");
                    game.queued_premoves.clear(to_move);
                    self.fabric.emit_user(
                        &premover_id,
                        &ServerEvent::PremoveRejected {
                            game_id: game.id.clone(),
                            reason: e.to_string(),
                        },
                    );
                    self.fabric.emit_room(
                        &room,
                        &ServerEvent::PremoveCleared {
                            game_id: game.id.clone(),
                            by: to_move,
                            reason: PremoveClearReason::Rejected,
                        },
                    );
                    self.spawn_persist(
                        &game.id,
                        &premover_id,
                        GamePatch::new().clear_premove(to_move),
                    );
                    return Ok(());
                }
            };

        let now = now_ms();
        let outcome = clock::apply_move(&game.clock, to_move, now, None)
            .map_err(|_| CoordinatorError::NotYourTurn)?;
        game.clock = outcome.snapshot;
        self.premoves.clear(&game.id, to_move, "executed");
        game.queued_premoves.clear(to_move);

        if let Some(flagged) = outcome.flagged {
            self.commit_termination(
                game,
                GamePredicate::ongoing(),
                GamePatch::new(),
                GameResult::winner(flagged.opposite()),
                ResultReason::Timeout,
            )
            .await?;
            return Ok(());
        }

        let notation = ChessService::notation(&premove.from, &premove.to, premove.promotion);
        game.history.push(notation.clone());
        let move_no = game.history.len() as u32;

        let over = match ChessService::game_outcome(&next_board) {
            GameOutcome::Ongoing => None,
            GameOutcome::Checkmate { winner } => {
                Some((GameResult::winner(winner), ResultReason::Checkmate))
            }
            GameOutcome::Stalemate => Some((GameResult::Draw, ResultReason::Stalemate)),
        };

        self.fabric.emit_room(
            &room,
            &ServerEvent::MoveMade {
                game_id: game.id.clone(),
                by: to_move,
                from: premove.from.clone(),
                to: premove.to.clone(),
                promotion: premove.promotion,
                notation,
                move_no,
            },
        );
        self.emit_clock_update(game, now);
        self.fabric.emit_room(
            &room,
            &ServerEvent::PremoveCleared {
                game_id: game.id.clone(),
                by: to_move,
                reason: PremoveClearReason::Executed,
            },
        );

        let patch = GamePatch::new()
            .history(game.history.clone())
            .clock(game.clock)
            .clear_premove(to_move);

        if let Some((result, reason)) = over {
            self.commit_termination(game, GamePredicate::ongoing(), patch, result, reason)
                .await?;
        } else {
            self.spawn_persist(&game.id, &premover_id, patch);
        }

        let elapsed = started.elapsed();
        if elapsed.as_millis() > 10 {
            warn!(
                "Premove execution for game {} took {:?} past turn-flip",
                game.id, elapsed
            );
        } else {
            info!(game_id = %game.id, elapsed_us = elapsed.as_micros() as u64, "premove_executed");
        }
        // No cascade: the side whose premove just fired must queue anew.
        Ok(())
    }

    pub async fn set_premove(
        &self,
        user_id: &str,
        game_id: &str,
        payload: &MovePayload,
        trace_id: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let mut game = self.load_required(game_id).await?;
        if game.status == GameStatus::Completed {
            return Err(CoordinatorError::GameCompleted);
        }
        let color = game
            .color_of(user_id)
            .ok_or(CoordinatorError::NotAPlayer)?;
        self.rehydrate_if_needed(&game);

        let board = ChessService::position_from_history(&game.history)
            .map_err(CoordinatorError::Rules)?;
        if ChessService::side_to_move(&board) == color {
            return Err(CoordinatorError::InvalidPremove(
                "Cannot premove on your own turn".to_string(),
            ));
        }
        validate_premove(payload).map_err(CoordinatorError::InvalidPremove)?;

        let premove = QueuedPremove {
            from: payload.from.clone(),
            to: payload.to.clone(),
            promotion: payload.promotion,
            set_at_ms: now_ms(),
            source_move_no: game.history.len() as u32,
            trace_id: trace_id.map(|id| id.to_string()),
        };
        self.premoves.set(game_id, color, premove.clone());
        game.queued_premoves.set(color, premove.clone());

        self.fabric.emit_room(
            &game_room(game_id),
            &ServerEvent::PremoveSet {
                game_id: game_id.to_string(),
                by: color,
                premove: payload.clone(),
            },
        );
        self.spawn_persist(game_id, user_id, GamePatch::new().set_premove(color, premove));
        Ok(())
    }

    pub async fn cancel_premove(
        &self,
        user_id: &str,
        game_id: &str,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let game = self.load_required(game_id).await?;
        let color = game
            .color_of(user_id)
            .ok_or(CoordinatorError::NotAPlayer)?;

        if self.premoves.clear(game_id, color, "cancelled").is_some() {
            self.fabric.emit_room(
                &game_room(game_id),
                &ServerEvent::PremoveCleared {
                    game_id: game_id.to_string(),
                    by: color,
                    reason: PremoveClearReason::Cancelled,
                },
            );
            self.spawn_persist(game_id, user_id, GamePatch::new().clear_premove(color));
        }
        Ok(())
    }
}
