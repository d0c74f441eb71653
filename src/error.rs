use std::time::Duration;
use thiserror::Error;

use crate::phase::RunPhase;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Stalled while {phase}: {} peer(s) did not transition after {waited:?}: {}", pending.len(), pending.join(", "))]
    Stall {
        phase: String,
        pending: Vec<String>,
        waited: Duration,
    },

    #[error("Invalid phase: expected {expected}, found {actual}")]
    Phase {
        expected: String,
        actual: RunPhase,
    },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Teardown error: {0}")]
    Teardown(String),
}

pub type Result<T> = std::result::Result<T, Error>;
