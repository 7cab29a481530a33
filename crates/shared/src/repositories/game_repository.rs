use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use serde::Serialize;
use serde_dynamo::{from_item, to_attribute_value, to_item};
use std::collections::HashMap;

use crate::clock::ClockSnapshot;
use crate::models::game::{Color, Game, GameResult, GameStatus, QueuedPremove, ResultReason};
use crate::repositories::errors::game_repository_errors::GameRepositoryError;

#[cfg(test)]
use mockall::automock;

/// Field-equality match a conditional update must satisfy. Every terminal
/// transition carries at least `status = ongoing`; this is the
/// exactly-once termination latch.
#[derive(Clone, Debug, Default)]
pub struct GamePredicate {
    pub status: Option<GameStatus>,
    pub disconnected_player_id: Option<String>,
    pub disconnect_unset: bool,
    pub pending_draw_offer_from: Option<Color>,
    pub rematch_offer_from: Option<Color>,
    pub next_game_id_unset: bool,
    pub stats_applied: Option<bool>,
}

impl GamePredicate {
    pub fn ongoing() -> Self {
        GamePredicate {
            status: Some(GameStatus::Ongoing),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        GamePredicate {
            status: Some(GameStatus::Completed),
            ..Default::default()
        }
    }

    pub fn with_disconnected(mut self, player_id: &str) -> Self {
        self.disconnected_player_id = Some(player_id.to_string());
        self
    }

    pub fn require_no_disconnect(mut self) -> Self {
        self.disconnect_unset = true;
        self
    }

    pub fn with_pending_draw_offer(mut self, from: Color) -> Self {
        self.pending_draw_offer_from = Some(from);
        self
    }

    pub fn with_rematch_offer(mut self, from: Color) -> Self {
        self.rematch_offer_from = Some(from);
        self
    }

    pub fn require_next_game_unset(mut self) -> Self {
        self.next_game_id_unset = true;
        self
    }

    pub fn with_stats_applied(mut self, applied: bool) -> Self {
        self.stats_applied = Some(applied);
        self
    }

    pub fn matches(&self, game: &Game) -> bool {
        if let Some(status) = self.status {
            if game.status != status {
                return false;
            }
        }
        if let Some(player_id) = &self.disconnected_player_id {
            if game.disconnected_player_id.as_deref() != Some(player_id.as_str()) {
                return false;
            }
        }
        if self.disconnect_unset && game.disconnected_player_id.is_some() {
            return false;
        }
        if let Some(from) = self.pending_draw_offer_from {
            if game.pending_draw_offer_from != Some(from) {
                return false;
            }
        }
        if let Some(from) = self.rematch_offer_from {
            if game.rematch_offer_from != Some(from) {
                return false;
            }
        }
        if self.next_game_id_unset && game.next_game_id.is_some() {
            return false;
        }
        if let Some(applied) = self.stats_applied {
            if game.stats_applied != applied {
                return false;
            }
        }
        true
    }
}

/// Narrow set-of-fields update. Only fields explicitly placed in the patch
/// are written; everything else is untouched, which keeps the hot path off
/// whole-document rewrites.
#[derive(Clone, Debug, Default)]
pub struct GamePatch {
    history: Option<Vec<String>>,
    clock: Option<ClockSnapshot>,
    status: Option<GameStatus>,
    result: Option<GameResult>,
    result_reason: Option<ResultReason>,
    premove_white: Option<Option<QueuedPremove>>,
    premove_black: Option<Option<QueuedPremove>>,
    disconnect: Option<Option<(String, i64)>>,
    pending_draw_offer_from: Option<Option<Color>>,
    white_draw_offers: Option<u8>,
    black_draw_offers: Option<u8>,
    rematch_offer_from: Option<Option<Color>>,
    rematch_declined: Option<bool>,
    next_game_id: Option<String>,
    stats_applied: Option<bool>,
}

impl GamePatch {
    pub fn new() -> Self {
        GamePatch::default()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_none()
            && self.clock.is_none()
            && self.status.is_none()
            && self.result.is_none()
            && self.result_reason.is_none()
            && self.premove_white.is_none()
            && self.premove_black.is_none()
            && self.disconnect.is_none()
            && self.pending_draw_offer_from.is_none()
            && self.white_draw_offers.is_none()
            && self.black_draw_offers.is_none()
            && self.rematch_offer_from.is_none()
            && self.rematch_declined.is_none()
            && self.next_game_id.is_none()
            && self.stats_applied.is_none()
    }

    pub fn history(mut self, history: Vec<String>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn clock(mut self, clock: ClockSnapshot) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn status(mut self, status: GameStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn result(mut self, result: GameResult, reason: ResultReason) -> Self {
        self.result = Some(result);
        self.result_reason = Some(reason);
        self
    }

    pub fn set_premove(mut self, color: Color, premove: QueuedPremove) -> Self {
        match color {
            Color::White => self.premove_white = Some(Some(premove)),
            Color::Black => self.premove_black = Some(Some(premove)),
        }
        self
    }

    pub fn clear_premove(mut self, color: Color) -> Self {
        match color {
            Color::White => self.premove_white = Some(None),
            Color::Black => self.premove_black = Some(None),
        }
        self
    }

    pub fn clear_all_premoves(self) -> Self {
        self.clear_premove(Color::White).clear_premove(Color::Black)
    }

    pub fn set_disconnect(mut self, player_id: &str, deadline_ms: i64) -> Self {
        self.disconnect = Some(Some((player_id.to_string(), deadline_ms)));
        self
    }

    pub fn clear_disconnect(mut self) -> Self {
        self.disconnect = Some(None);
        self
    }

    pub fn pending_draw_offer(mut self, from: Option<Color>) -> Self {
        self.pending_draw_offer_from = Some(from);
        self
    }

    pub fn draw_offers(mut self, color: Color, count: u8) -> Self {
        match color {
            Color::White => self.white_draw_offers = Some(count),
            Color::Black => self.black_draw_offers = Some(count),
        }
        self
    }

    pub fn rematch_offer(mut self, from: Option<Color>) -> Self {
        self.rematch_offer_from = Some(from);
        self
    }

    pub fn rematch_declined(mut self, declined: bool) -> Self {
        self.rematch_declined = Some(declined);
        self
    }

    pub fn next_game_id(mut self, id: &str) -> Self {
        self.next_game_id = Some(id.to_string());
        self
    }

    pub fn stats_applied(mut self, applied: bool) -> Self {
        self.stats_applied = Some(applied);
        self
    }

    /// Apply to an in-memory document; keeps the in-memory store and the
    /// update-expression renderer semantically identical.
    pub fn apply_to(&self, game: &mut Game) {
        if let Some(history) = &self.history {
            game.history = history.clone();
        }
        if let Some(clock) = self.clock {
            game.clock = clock;
        }
        if let Some(status) = self.status {
            game.status = status;
        }
        if let Some(result) = self.result {
            game.result = Some(result);
        }
        if let Some(reason) = self.result_reason {
            game.result_reason = Some(reason);
        }
        if let Some(slot) = &self.premove_white {
            game.queued_premoves.white = slot.clone();
        }
        if let Some(slot) = &self.premove_black {
            game.queued_premoves.black = slot.clone();
        }
        if let Some(disconnect) = &self.disconnect {
            match disconnect {
                Some((player_id, deadline_ms)) => {
                    game.disconnected_player_id = Some(player_id.clone());
                    game.disconnect_deadline_ms = Some(*deadline_ms);
                }
                None => {
                    game.disconnected_player_id = None;
                    game.disconnect_deadline_ms = None;
                }
            }
        }
        if let Some(from) = self.pending_draw_offer_from {
            game.pending_draw_offer_from = from;
        }
        if let Some(count) = self.white_draw_offers {
            game.white_draw_offers = count;
        }
        if let Some(count) = self.black_draw_offers {
            game.black_draw_offers = count;
        }
        if let Some(from) = self.rematch_offer_from {
            game.rematch_offer_from = from;
        }
        if let Some(declined) = self.rematch_declined {
            game.rematch_declined = declined;
        }
        if let Some(id) = &self.next_game_id {
            game.next_game_id = Some(id.clone());
        }
        if let Some(applied) = self.stats_applied {
            game.stats_applied = applied;
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait GameRepository: Send + Sync {
    async fn create(&self, game: &Game) -> Result<(), GameRepositoryError>;
    async fn load(&self, id: &str) -> Result<Option<Game>, GameRepositoryError>;
    /// Apply `patch` iff the stored document matches `predicate`; report
    /// whether a document was modified.
    async fn conditional_update(
        &self,
        id: &str,
        predicate: GamePredicate,
        patch: GamePatch,
    ) -> Result<bool, GameRepositoryError>;
    async fn field_patch(&self, id: &str, patch: GamePatch) -> Result<(), GameRepositoryError>;
    async fn list_active(&self) -> Result<Vec<Game>, GameRepositoryError>;
}

pub struct DynamoDbGameRepository {
    pub client: Client,
    pub table_name: String,
}

impl DynamoDbGameRepository {
    pub fn new(client: Client) -> Self {
        let table_name =
            std::env::var("GAMES_TABLE").expect("GAMES_TABLE environment variable must be set");
        Self { client, table_name }
    }

    async fn update(
        &self,
        id: &str,
        predicate: Option<&GamePredicate>,
        patch: &GamePatch,
    ) -> Result<bool, GameRepositoryError> {
        let mut expr = ExpressionBuilder::new();
        render_patch(patch, &mut expr)?;
        let condition = render_predicate(predicate, &mut expr)?;

        let update_expression = match expr.update_expression() {
            Some(e) => e,
            None => return Ok(true),
        };

        let key = HashMap::from([(
            "id".to_string(),
            to_attribute_value(id).map_err(|e| GameRepositoryError::Serialization(e.to_string()))?,
        )]);

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(key))
            .update_expression(update_expression)
            .condition_expression(condition)
            .set_expression_attribute_names(Some(expr.names));
        if !expr.values.is_empty() {
            request = request.set_expression_attribute_values(Some(expr.values));
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let error_str = e.to_string();
                if error_str.contains("ConditionalCheckFailedException") {
                    Ok(false)
                } else {
                    Err(GameRepositoryError::DynamoDb(error_str))
                }
            }
        }
    }
}

#[async_trait]
impl GameRepository for DynamoDbGameRepository {
    async fn create(&self, game: &Game) -> Result<(), GameRepositoryError> {
        let item =
            to_item(game).map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let error_str = e.to_string();
                if error_str.contains("ConditionalCheckFailedException") {
                    Err(GameRepositoryError::Conflict)
                } else {
                    Err(GameRepositoryError::DynamoDb(error_str))
                }
            }
        }
    }

    async fn load(&self, id: &str) -> Result<Option<Game>, GameRepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(
                "id",
                to_attribute_value(id)
                    .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?,
            )
            .send()
            .await
            .map_err(|e| GameRepositoryError::DynamoDb(e.to_string()))?;
        match output.item {
            Some(item) => {
                let game: Game = from_item(item)
                    .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
                Ok(Some(game))
            }
            None => Ok(None),
        }
    }

    async fn conditional_update(
        &self,
        id: &str,
        predicate: GamePredicate,
        patch: GamePatch,
    ) -> Result<bool, GameRepositoryError> {
        self.update(id, Some(&predicate), &patch).await
    }

    async fn field_patch(&self, id: &str, patch: GamePatch) -> Result<(), GameRepositoryError> {
        self.update(id, None, &patch).await.map(|_| ())
    }

    async fn list_active(&self) -> Result<Vec<Game>, GameRepositoryError> {
        let mut games = Vec::new();
        let mut exclusive_start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("#status = :ongoing")
                .expression_attribute_names("#status", "status")
                .expression_attribute_values(
                    ":ongoing",
                    to_attribute_value(GameStatus::Ongoing)
                        .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?,
                )
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await
                .map_err(|e| GameRepositoryError::DynamoDb(e.to_string()))?;
            if let Some(items) = output.items {
                for item in items {
                    let game: Game = from_item(item)
                        .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
                    games.push(game);
                }
            }
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => break,
            }
        }
        Ok(games)
    }
}

/// Accumulates SET/REMOVE clauses plus the shared attribute name/value
/// placeholder maps used by both the update and condition expressions.
struct ExpressionBuilder {
    sets: Vec<String>,
    removes: Vec<String>,
    conditions: Vec<String>,
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    counter: usize,
}

impl ExpressionBuilder {
    fn new() -> Self {
        ExpressionBuilder {
            sets: Vec::new(),
            removes: Vec::new(),
            conditions: Vec::new(),
            names: HashMap::new(),
            values: HashMap::new(),
            counter: 0,
        }
    }

    fn path(&mut self, segments: &[&str]) -> String {
        segments
            .iter()
            .map(|segment| {
                let placeholder = format!("#n{}", self.counter);
                self.counter += 1;
                self.names
                    .insert(placeholder.clone(), (*segment).to_string());
                placeholder
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn value<T: Serialize>(&mut self, value: &T) -> Result<String, GameRepositoryError> {
        let placeholder = format!(":v{}", self.counter);
        self.counter += 1;
        let attribute = to_attribute_value(value)
            .map_err(|e| GameRepositoryError::Serialization(e.to_string()))?;
        self.values.insert(placeholder.clone(), attribute);
        Ok(placeholder)
    }

    fn set<T: Serialize>(
        &mut self,
        segments: &[&str],
        value: &T,
    ) -> Result<(), GameRepositoryError> {
        let path = self.path(segments);
        let value = self.value(value)?;
        self.sets.push(format!("{} = {}", path, value));
        Ok(())
    }

    fn remove(&mut self, segments: &[&str]) {
        let path = self.path(segments);
        self.removes.push(path);
    }

    fn condition_eq<T: Serialize>(
        &mut self,
        segments: &[&str],
        value: &T,
    ) -> Result<(), GameRepositoryError> {
        let path = self.path(segments);
        let value = self.value(value)?;
        self.conditions.push(format!("{} = {}", path, value));
        Ok(())
    }

    fn condition_absent(&mut self, segments: &[&str]) {
        let path = self.path(segments);
        self.conditions
            .push(format!("attribute_not_exists({})", path));
    }

    fn condition_exists(&mut self, segments: &[&str]) {
        let path = self.path(segments);
        self.conditions.push(format!("attribute_exists({})", path));
    }

    fn update_expression(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.sets.is_empty() {
            parts.push(format!("SET {}", self.sets.join(", ")));
        }
        if !self.removes.is_empty() {
            parts.push(format!("REMOVE {}", self.removes.join(", ")));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    fn condition_expression(&self) -> String {
        self.conditions.join(" AND ")
    }
}

fn render_patch(
    patch: &GamePatch,
    expr: &mut ExpressionBuilder,
) -> Result<(), GameRepositoryError> {
    if let Some(history) = &patch.history {
        expr.set(&["history"], history)?;
    }
    if let Some(clock) = &patch.clock {
        expr.set(&["clock"], clock)?;
    }
    if let Some(status) = &patch.status {
        expr.set(&["status"], status)?;
    }
    if let Some(result) = &patch.result {
        expr.set(&["result"], result)?;
    }
    if let Some(reason) = &patch.result_reason {
        expr.set(&["result_reason"], reason)?;
    }
    if let Some(slot) = &patch.premove_white {
        match slot {
            Some(premove) => expr.set(&["queued_premoves", "white"], premove)?,
            None => expr.remove(&["queued_premoves", "white"]),
        }
    }
    if let Some(slot) = &patch.premove_black {
        match slot {
            Some(premove) => expr.set(&["queued_premoves", "black"], premove)?,
            None => expr.remove(&["queued_premoves", "black"]),
        }
    }
    if let Some(disconnect) = &patch.disconnect {
        match disconnect {
            Some((player_id, deadline_ms)) => {
                expr.set(&["disconnected_player_id"], player_id)?;
                expr.set(&["disconnect_deadline_ms"], deadline_ms)?;
            }
            None => {
                expr.remove(&["disconnected_player_id"]);
                expr.remove(&["disconnect_deadline_ms"]);
            }
        }
    }
    if let Some(from) = &patch.pending_draw_offer_from {
        match from {
            Some(color) => expr.set(&["pending_draw_offer_from"], color)?,
            None => expr.remove(&["pending_draw_offer_from"]),
        }
    }
    if let Some(count) = &patch.white_draw_offers {
        expr.set(&["white_draw_offers"], count)?;
    }
    if let Some(count) = &patch.black_draw_offers {
        expr.set(&["black_draw_offers"], count)?;
    }
    if let Some(from) = &patch.rematch_offer_from {
        match from {
            Some(color) => expr.set(&["rematch_offer_from"], color)?,
            None => expr.remove(&["rematch_offer_from"]),
        }
    }
    if let Some(declined) = &patch.rematch_declined {
        expr.set(&["rematch_declined"], declined)?;
    }
    if let Some(id) = &patch.next_game_id {
        expr.set(&["next_game_id"], id)?;
    }
    if let Some(applied) = &patch.stats_applied {
        expr.set(&["stats_applied"], applied)?;
    }
    Ok(())
}

fn render_predicate(
    predicate: Option<&GamePredicate>,
    expr: &mut ExpressionBuilder,
) -> Result<String, GameRepositoryError> {
    // Updating a missing item would otherwise create a phantom document.
    expr.condition_exists(&["id"]);

    if let Some(predicate) = predicate {
        if let Some(status) = &predicate.status {
            expr.condition_eq(&["status"], status)?;
        }
        if let Some(player_id) = &predicate.disconnected_player_id {
            expr.condition_eq(&["disconnected_player_id"], player_id)?;
        }
        if predicate.disconnect_unset {
            expr.condition_absent(&["disconnected_player_id"]);
        }
        if let Some(from) = &predicate.pending_draw_offer_from {
            expr.condition_eq(&["pending_draw_offer_from"], from)?;
        }
        if let Some(from) = &predicate.rematch_offer_from {
            expr.condition_eq(&["rematch_offer_from"], from)?;
        }
        if predicate.next_game_id_unset {
            expr.condition_absent(&["next_game_id"]);
        }
        if let Some(applied) = &predicate.stats_applied {
            expr.condition_eq(&["stats_applied"], applied)?;
        }
    }

    Ok(expr.condition_expression())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::TimeControl;

    #[test]
    fn predicate_matches_on_status_and_disconnect() {
        let mut game = Game::new("w", "b", TimeControl::new(5, 0, "5+0"), 0);
        assert!(GamePredicate::ongoing().matches(&game));
        assert!(!GamePredicate::completed().matches(&game));
        assert!(GamePredicate::ongoing().require_no_disconnect().matches(&game));

        game.disconnected_player_id = Some("w".to_string());
        game.disconnect_deadline_ms = Some(20_000);
        assert!(GamePredicate::ongoing().with_disconnected("w").matches(&game));
        assert!(!GamePredicate::ongoing().with_disconnected("b").matches(&game));
        assert!(!GamePredicate::ongoing().require_no_disconnect().matches(&game));

        game.status = GameStatus::Completed;
        assert!(!GamePredicate::ongoing().with_disconnected("w").matches(&game));
    }

    #[test]
    fn patch_applies_only_named_fields() {
        let mut game = Game::new("w", "b", TimeControl::new(5, 0, "5+0"), 0);
        let original_clock = game.clock;
        let patch = GamePatch::new()
            .history(vec!["e2e4".to_string()])
            .draw_offers(Color::White, 1)
            .pending_draw_offer(Some(Color::White));
        patch.apply_to(&mut game);
        assert_eq!(game.history, vec!["e2e4".to_string()]);
        assert_eq!(game.white_draw_offers, 1);
        assert_eq!(game.pending_draw_offer_from, Some(Color::White));
        assert_eq!(game.clock, original_clock);
        assert_eq!(game.status, GameStatus::Ongoing);
    }

    #[test]
    fn patch_clears_disconnect_and_premoves() {
        let mut game = Game::new("w", "b", TimeControl::new(5, 0, "5+0"), 0);
        GamePatch::new()
            .set_disconnect("b", 99)
            .set_premove(
                Color::Black,
                QueuedPremove {
                    from: "d7".into(),
                    to: "d5".into(),
                    promotion: None,
                    set_at_ms: 1,
                    source_move_no: 1,
                    trace_id: None,
                },
            )
            .apply_to(&mut game);
        assert_eq!(game.disconnected_player_id.as_deref(), Some("b"));
        assert_eq!(game.disconnect_deadline_ms, Some(99));
        assert!(game.queued_premoves.black.is_some());

        GamePatch::new()
            .clear_disconnect()
            .clear_all_premoves()
            .apply_to(&mut game);
        assert_eq!(game.disconnected_player_id, None);
        assert_eq!(game.disconnect_deadline_ms, None);
        assert!(game.queued_premoves.is_empty());
    }

    #[test]
    fn renders_set_and_remove_clauses() {
        let patch = GamePatch::new()
            .history(vec!["e2e4".to_string()])
            .clear_premove(Color::Black)
            .status(GameStatus::Completed);
        let mut expr = ExpressionBuilder::new();
        render_patch(&patch, &mut expr).unwrap();
        let rendered = expr.update_expression().unwrap();
        assert!(rendered.starts_with("SET "));
        assert!(rendered.contains("REMOVE "));
        assert_eq!(expr.names.len(), 4);
        // history, status.
        assert_eq!(expr.values.len(), 2);
    }

    #[test]
    fn renders_predicate_with_existence_guard() {
        let predicate = GamePredicate::ongoing().with_disconnected("w");
        let mut expr = ExpressionBuilder::new();
        let condition = render_predicate(Some(&predicate), &mut expr).unwrap();
        assert!(condition.starts_with("attribute_exists("));
        assert_eq!(condition.matches(" AND ").count(), 2);
    }

    #[tokio::test]
    async fn mocked_repository_satisfies_the_trait() {
        let mut mock = MockGameRepository::new();
        mock.expect_load().returning(|_| Ok(None));
        mock.expect_conditional_update().returning(|_, _, _| Ok(false));

        assert!(mock.load("g1").await.unwrap().is_none());
        let modified = mock
            .conditional_update("g1", GamePredicate::ongoing(), GamePatch::new())
            .await
            .unwrap();
        assert!(!modified);
    }

    #[test]
    fn empty_patch_renders_no_expression() {
        let mut expr = ExpressionBuilder::new();
        render_patch(&GamePatch::new(), &mut expr).unwrap();
        assert!(expr.update_expression().is_none());
        assert!(GamePatch::new().is_empty());
        assert!(!GamePatch::new().stats_applied(true).is_empty());
    }
}
