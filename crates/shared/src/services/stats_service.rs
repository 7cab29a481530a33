use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use std::collections::HashMap;
use tracing::info;

use crate::models::game::{Game, GameResult};
use crate::services::errors::stats_service_errors::StatsServiceError;

/// Side effect applied once per completed, non-aborted game. The caller
/// owns the exactly-once guarantee; implementations just apply counters.
#[async_trait]
pub trait StatsRecorder: Send + Sync {
    async fn record_result(&self, game: &Game) -> Result<(), StatsServiceError>;
}

pub struct DynamoDbStatsRecorder {
    pub client: Client,
    pub table_name: String,
}

impl DynamoDbStatsRecorder {
    pub fn new(client: Client) -> Self {
        let table_name =
            std::env::var("USERS_TABLE").expect("USERS_TABLE environment variable must be set");
        Self { client, table_name }
    }

    async fn bump(&self, user_id: &str, field: &str) -> Result<(), StatsServiceError> {
        let key = HashMap::from([("id".to_string(), AttributeValue::S(user_id.to_string()))]);
        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(key))
            .update_expression("ADD #field :one")
            .expression_attribute_names("#field", field)
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .send()
            .await
            .map_err(|e| StatsServiceError::DynamoDb(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StatsRecorder for DynamoDbStatsRecorder {
    async fn record_result(&self, game: &Game) -> Result<(), StatsServiceError> {
        let (white_field, black_field) = match game.result {
            Some(GameResult::White) => ("wins", "losses"),
            Some(GameResult::Black) => ("losses", "wins"),
            Some(GameResult::Draw) => ("draws", "draws"),
            Some(GameResult::Aborted) | None => return Ok(()),
        };

        self.bump(&game.white_player_id, white_field).await?;
        self.bump(&game.black_player_id, black_field).await?;
        info!(
            "Recorded result of game {} for {} and {}",
            game.id, game.white_player_id, game.black_player_id
        );
        Ok(())
    }
}

/// Recorder for deployments without a users table, and for tests.
#[derive(Default)]
pub struct NoopStatsRecorder;

#[async_trait]
impl StatsRecorder for NoopStatsRecorder {
    async fn record_result(&self, _game: &Game) -> Result<(), StatsServiceError> {
        Ok(())
    }
}
