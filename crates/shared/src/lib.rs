pub mod auth;
pub mod clock;
pub mod models;
pub mod repositories;
pub mod services;

pub use models::game::{Color, Game, GameResult, GameStatus, ResultReason, TimeControl};
