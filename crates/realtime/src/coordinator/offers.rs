use tracing::info;

use shared::models::game::{Color, Game, GameResult, GameStatus, ResultReason};
use shared::repositories::game_repository::{GamePatch, GamePredicate};

use crate::coordinator::{now_ms, CoordinatorError, GameCoordinator};
use crate::fabric::game_room;
use crate::models::ServerEvent;

/// Each side may offer a draw at most this many times per game.
pub const DRAW_OFFER_LIMIT: u8 = 2;

/// A game can only be cancelled before both sides have moved.
pub const CANCEL_MOVE_LIMIT: usize = 2;

impl GameCoordinator {
    pub async fn resign(&self, user_id: &str, game_id: &str) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (mut game, color) = self.ongoing_game_for_player(game_id, user_id).await?;
        self.commit_termination(
            &mut game,
            GamePredicate::ongoing(),
            GamePatch::new(),
            GameResult::winner(color.opposite()),
            ResultReason::Resignation,
        )
        .await?;
        Ok(())
    }

    pub async fn offer_draw(&self, user_id: &str, game_id: &str) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (game, color) = self.ongoing_game_for_player(game_id, user_id).await?;
        if game.pending_draw_offer_from.is_some() {
            return Err(CoordinatorError::DrawOfferPending);
        }
        if game.draw_offers(color) >= DRAW_OFFER_LIMIT {
            return Err(CoordinatorError::DrawOfferLimit);
        }

        let count = game.draw_offers(color) + 1;
        let committed = self
            .games
            .conditional_update(
                game_id,
                GamePredicate::ongoing(),
                GamePatch::new()
                    .pending_draw_offer(Some(color))
                    .draw_offers(color, count),
            )
            .await?;
        if !committed {
            return Err(CoordinatorError::GameCompleted);
        }

        self.fabric.emit_room(
            &game_room(game_id),
            &ServerEvent::DrawOffered {
                game_id: game_id.to_string(),
                by: color,
            },
        );
        info!("Draw offered by {} in game {} ({}/2)", user_id, game_id, count);
        Ok(())
    }

    pub async fn accept_draw(&self, user_id: &str, game_id: &str) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (mut game, color) = self.ongoing_game_for_player(game_id, user_id).await?;
        let from = game
            .pending_draw_offer_from
            .ok_or(CoordinatorError::NoPendingDrawOffer)?;
        if from == color {
            return Err(CoordinatorError::NoPendingDrawOffer);
        }

        self.commit_termination(
            &mut game,
            GamePredicate::ongoing().with_pending_draw_offer(from),
            GamePatch::new().pending_draw_offer(None),
            GameResult::Draw,
            ResultReason::DrawAgreed,
        )
        .await?;
        Ok(())
    }

    pub async fn reject_draw(&self, user_id: &str, game_id: &str) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (game, color) = self.ongoing_game_for_player(game_id, user_id).await?;
        let from = game
            .pending_draw_offer_from
            .ok_or(CoordinatorError::NoPendingDrawOffer)?;
        if from == color {
            return Err(CoordinatorError::NoPendingDrawOffer);
        }

        let cleared = self
            .games
            .conditional_update(
                game_id,
                GamePredicate::ongoing().with_pending_draw_offer(from),
                GamePatch::new().pending_draw_offer(None),
            )
            .await?;
        if cleared {
            self.fabric.emit_room(
                &game_room(game_id),
                &ServerEvent::DrawRejected {
                    game_id: game_id.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Abort before the game has really begun.
    pub async fn cancel_early(&self, user_id: &str, game_id: &str) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (mut game, _) = self.ongoing_game_for_player(game_id, user_id).await?;
        if game.history.len() >= CANCEL_MOVE_LIMIT {
            return Err(CoordinatorError::TooLateToCancel);
        }

        self.commit_termination(
            &mut game,
            GamePredicate::ongoing(),
            GamePatch::new(),
            GameResult::Aborted,
            ResultReason::CancelledDueToFirstMoveTimeout,
        )
        .await?;
        Ok(())
    }

    pub async fn offer_rematch(&self, user_id: &str, game_id: &str) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (game, color) = self.completed_game_for_player(game_id, user_id).await?;
        if game.rematch_declined {
            return Err(CoordinatorError::RematchUnavailable(
                "Rematch was declined".to_string(),
            ));
        }
        if game.next_game_id.is_some() {
            return Err(CoordinatorError::RematchUnavailable(
                "A rematch game already exists".to_string(),
            ));
        }
        if game.rematch_offer_from.is_some() {
            return Err(CoordinatorError::RematchUnavailable(
                "A rematch offer is already pending".to_string(),
            ));
        }

        let committed = self
            .games
            .conditional_update(
                game_id,
                GamePredicate::completed().require_next_game_unset(),
                GamePatch::new().rematch_offer(Some(color)),
            )
            .await?;
        if !committed {
            return Err(CoordinatorError::RematchUnavailable(
                "Rematch already resolved".to_string(),
            ));
        }

        self.fabric.emit_room(
            &game_room(game_id),
            &ServerEvent::RematchOffered {
                game_id: game_id.to_string(),
                by: color,
            },
        );
        Ok(())
    }

    /// Creates the follow-up game with colors swapped and a fresh clock.
    /// The next-game latch on the old record makes acceptance exactly-once.
    pub async fn accept_rematch(
        &self,
        user_id: &str,
        game_id: &str,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (game, color) = self.completed_game_for_player(game_id, user_id).await?;
        let offer = game
            .rematch_offer_from
            .ok_or_else(|| CoordinatorError::RematchUnavailable("No rematch offer".to_string()))?;
        if offer == color {
            return Err(CoordinatorError::RematchUnavailable(
                "Cannot accept your own offer".to_string(),
            ));
        }

        let new_game = Game::new(
            &game.black_player_id,
            &game.white_player_id,
            game.time_control.clone(),
            now_ms(),
        );

        let latched = self
            .games
            .conditional_update(
                game_id,
                GamePredicate::completed()
                    .with_rematch_offer(offer)
                    .require_next_game_unset(),
                GamePatch::new()
                    .next_game_id(&new_game.id)
                    .rematch_offer(None),
            )
            .await?;
        if !latched {
            return Err(CoordinatorError::RematchUnavailable(
                "Rematch already resolved".to_string(),
            ));
        }

        self.games.create(&new_game).await?;
        self.fabric.emit_room(
            &game_room(game_id),
            &ServerEvent::RematchAccepted {
                game_id: game_id.to_string(),
                new_game_id: new_game.id.clone(),
            },
        );
        info!(
            "Rematch of game {} accepted; created game {}",
            game_id, new_game.id
        );
        Ok(())
    }

    pub async fn reject_rematch(
        &self,
        user_id: &str,
        game_id: &str,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(game_id);
        let _guard = lock.lock().await;

        let (game, color) = self.completed_game_for_player(game_id, user_id).await?;
        let offer = game
            .rematch_offer_from
            .ok_or_else(|| CoordinatorError::RematchUnavailable("No rematch offer".to_string()))?;
        if offer == color {
            return Err(CoordinatorError::RematchUnavailable(
                "Cannot reject your own offer".to_string(),
            ));
        }

        let committed = self
            .games
            .conditional_update(
                game_id,
                GamePredicate::completed().with_rematch_offer(offer),
                GamePatch::new().rematch_offer(None).rematch_declined(true),
            )
            .await?;
        if committed {
            self.fabric.emit_room(
                &game_room(game_id),
                &ServerEvent::RematchRejected {
                    game_id: game_id.to_string(),
                },
            );
        }
        Ok(())
    }

    async fn ongoing_game_for_player(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<(Game, Color), CoordinatorError> {
        let game = self.load_required(game_id).await?;
        if game.status == GameStatus::Completed {
            return Err(CoordinatorError::GameCompleted);
        }
        let color = game
            .color_of(user_id)
            .ok_or(CoordinatorError::NotAPlayer)?;
        Ok((game, color))
    }

    async fn completed_game_for_player(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<(Game, Color), CoordinatorError> {
        let game = self.load_required(game_id).await?;
        if game.status != GameStatus::Completed {
            return Err(CoordinatorError::RematchUnavailable(
                "Game is still ongoing".to_string(),
            ));
        }
        let color = game
            .color_of(user_id)
            .ok_or(CoordinatorError::NotAPlayer)?;
        Ok((game, color))
    }
}
