//! Error types for the fleet simulator.
//!
//! Scheduling operations are total and never return these; only
//! configuration loading and thread management can fail.

use thiserror::Error;

/// Fleet simulator error type.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn robot thread: {0}")]
    Spawn(String),
}

impl From<toml::de::Error> for FleetError {
    fn from(e: toml::de::Error) -> Self {
        FleetError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
