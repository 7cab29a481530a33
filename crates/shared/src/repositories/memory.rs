use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::game::{Game, GameStatus};
use crate::repositories::errors::game_repository_errors::GameRepositoryError;
use crate::repositories::game_repository::{GamePatch, GamePredicate, GameRepository};

/// DashMap-backed store with the same conditional-update semantics as the
/// DynamoDB implementation. Used by tests and by `GAME_STORE=memory`
/// deployments.
#[derive(Default)]
pub struct InMemoryGameRepository {
    games: DashMap<String, Game>,
}

impl InMemoryGameRepository {
    pub fn new() -> Self {
        InMemoryGameRepository::default()
    }
}

#[async_trait]
impl GameRepository for InMemoryGameRepository {
    async fn create(&self, game: &Game) -> Result<(), GameRepositoryError> {
        if self.games.contains_key(&game.id) {
            return Err(GameRepositoryError::Conflict);
        }
        self.games.insert(game.id.clone(), game.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Game>, GameRepositoryError> {
        Ok(self.games.get(id).map(|entry| entry.clone()))
    }

    async fn conditional_update(
        &self,
        id: &str,
        predicate: GamePredicate,
        patch: GamePatch,
    ) -> Result<bool, GameRepositoryError> {
        // The entry guard gives the same single-writer view a conditional
        // UpdateItem has.
        match self.games.get_mut(id) {
            Some(mut entry) => {
                if !predicate.matches(&entry) {
                    return Ok(false);
                }
                patch.apply_to(&mut entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn field_patch(&self, id: &str, patch: GamePatch) -> Result<(), GameRepositoryError> {
        if let Some(mut entry) = self.games.get_mut(id) {
            patch.apply_to(&mut entry);
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Game>, GameRepositoryError> {
        Ok(self
            .games
            .iter()
            .filter(|entry| entry.status == GameStatus::Ongoing)
            .map(|entry| entry.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::{GameResult, ResultReason, TimeControl};

    fn game() -> Game {
        Game::new("w", "b", TimeControl::new(5, 3, "blitz"), 0)
    }

    #[tokio::test]
    async fn create_then_load_roundtrips() {
        let repo = InMemoryGameRepository::new();
        let game = game();
        repo.create(&game).await.unwrap();
        let loaded = repo.load(&game.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, game.id);
        assert!(matches!(
            repo.create(&game).await.unwrap_err(),
            GameRepositoryError::Conflict
        ));
        assert!(repo.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_update_is_a_latch() {
        let repo = InMemoryGameRepository::new();
        let game = game();
        repo.create(&game).await.unwrap();

        let terminal = GamePatch::new()
            .status(GameStatus::Completed)
            .result(GameResult::White, ResultReason::Resignation);
        let first = repo
            .conditional_update(&game.id, GamePredicate::ongoing(), terminal.clone())
            .await
            .unwrap();
        assert!(first);

        // Completed games no longer match the ongoing predicate.
        let second = repo
            .conditional_update(&game.id, GamePredicate::ongoing(), terminal)
            .await
            .unwrap();
        assert!(!second);

        let loaded = repo.load(&game.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, GameStatus::Completed);
        assert_eq!(loaded.result, Some(GameResult::White));
    }

    #[tokio::test]
    async fn list_active_excludes_completed() {
        let repo = InMemoryGameRepository::new();
        let a = game();
        let b = game();
        repo.create(&a).await.unwrap();
        repo.create(&b).await.unwrap();
        repo.conditional_update(
            &a.id,
            GamePredicate::ongoing(),
            GamePatch::new()
                .status(GameStatus::Completed)
                .result(GameResult::Draw, ResultReason::DrawAgreed),
        )
        .await
        .unwrap();

        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn field_patch_on_missing_game_is_a_noop() {
        let repo = InMemoryGameRepository::new();
        repo.field_patch("missing", GamePatch::new().stats_applied(true))
            .await
            .unwrap();
        assert!(repo.load("missing").await.unwrap().is_none());
    }
}
