use std::sync::Arc;
use tracing::info;

use shared::repositories::game_repository::{DynamoDbGameRepository, GameRepository};
use shared::repositories::memory::InMemoryGameRepository;
use shared::services::stats_service::{DynamoDbStatsRecorder, NoopStatsRecorder, StatsRecorder};

use crate::coordinator::GameCoordinator;
use crate::fabric::SessionFabric;
use crate::premove::PremoveQueue;

#[derive(Clone)]
pub struct AppState {
    pub games: Arc<dyn GameRepository>,
    pub fabric: Arc<SessionFabric>,
    pub premoves: Arc<PremoveQueue>,
    pub coordinator: Arc<GameCoordinator>,
}

impl AppState {
    /// Store selection is environment-driven: `GAME_STORE=memory` keeps
    /// everything in-process, anything else talks to DynamoDB.
    pub async fn new() -> Self {
        let backend = std::env::var("GAME_STORE").unwrap_or_else(|_| "dynamodb".to_string());
        let (games, stats): (Arc<dyn GameRepository>, Arc<dyn StatsRecorder>) =
            if backend == "memory" {
                info!("Using the in-memory game store");
                (
                    Arc::new(InMemoryGameRepository::new()),
                    Arc::new(NoopStatsRecorder),
                )
            } else {
                let config =
                    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                let client = aws_sdk_dynamodb::Client::new(&config);
                (
                    Arc::new(DynamoDbGameRepository::new(client.clone())),
                    Arc::new(DynamoDbStatsRecorder::new(client)),
                )
            };
        Self::with_parts(games, stats)
    }

    /// Constructor injection for tests and embedded servers.
    pub fn with_parts(games: Arc<dyn GameRepository>, stats: Arc<dyn StatsRecorder>) -> Self {
        let fabric = Arc::new(SessionFabric::new());
        let premoves = Arc::new(PremoveQueue::new());
        let coordinator = Arc::new(GameCoordinator::new(
            games.clone(),
            fabric.clone(),
            premoves.clone(),
            stats,
        ));
        AppState {
            games,
            fabric,
            premoves,
            coordinator,
        }
    }
}
