pub mod chess_service_errors;
pub mod stats_service_errors;
