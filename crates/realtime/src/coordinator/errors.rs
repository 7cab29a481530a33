use shared::repositories::errors::game_repository_errors::GameRepositoryError;
use shared::services::errors::chess_service_errors::ChessServiceError;

#[derive(Debug)]
pub enum CoordinatorError {
    GameNotFound,
    GameCompleted,
    NotAPlayer,
    NotYourTurn,
    IllegalMove(String),
    InvalidPremove(String),
    DrawOfferPending,
    DrawOfferLimit,
    NoPendingDrawOffer,
    TooLateToCancel,
    RematchUnavailable(String),
    Rules(ChessServiceError),
    Store(GameRepositoryError),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::GameNotFound => write!(f, "Game not found"),
            CoordinatorError::GameCompleted => write!(f, "Game is already over"),
            CoordinatorError::NotAPlayer => write!(f, "Not a player in this game"),
            CoordinatorError::NotYourTurn => write!(f, "Not your turn"),
            CoordinatorError::IllegalMove(msg) => write!(f, "Illegal move: {}", msg),
            CoordinatorError::InvalidPremove(msg) => write!(f, "Invalid premove: {}", msg),
            CoordinatorError::DrawOfferPending => write!(f, "A draw offer is already pending"),
            CoordinatorError::DrawOfferLimit => write!(f, "Draw offer limit reached"),
            CoordinatorError::NoPendingDrawOffer => write!(f, "No draw offer to respond to"),
            CoordinatorError::TooLateToCancel => write!(f, "Game can no longer be cancelled"),
            CoordinatorError::RematchUnavailable(msg) => write!(f, "Rematch unavailable: {}", msg),
            CoordinatorError::Rules(e) => write!(f, "Rules error: {}", e),
            CoordinatorError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<GameRepositoryError> for CoordinatorError {
    fn from(error: GameRepositoryError) -> Self {
        CoordinatorError::Store(error)
    }
}
