use std::fmt;

#[derive(Debug)]
pub enum StatsServiceError {
    Serialization(String),
    DynamoDb(String),
}

impl fmt::Display for StatsServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatsServiceError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StatsServiceError::DynamoDb(msg) => write!(f, "DynamoDB error: {}", msg),
        }
    }
}

impl std::error::Error for StatsServiceError {}
