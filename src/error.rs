//! Error types for the seed boundary and asset lookup

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    #[error("Unit {seed} was not found! Available units: {available:?}")]
    NotFound { seed: String, available: Vec<String> },

    #[error("Seed {seed} failed: {message}")]
    Evaluation { seed: String, message: String },

    #[error("Seed task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("Asset {file} is not part of the emission")]
    Missing { file: String },
}
