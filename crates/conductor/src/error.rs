use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generation provider error: {0}")]
    Provider(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("Reservation {0} already committed")]
    ReservationAlreadyCommitted(Uuid),

    #[error("Reservation {0} already released")]
    ReservationAlreadyReleased(Uuid),

    #[error("Reservation {0} is in an inconsistent dual-success state")]
    ReservationConsistency(Uuid),

    #[error("Artifact store error: {0}")]
    Artifact(String),
}
