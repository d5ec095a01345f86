//! Store error types

use thiserror::Error;

/// Errors raised by the recipe and account stores.
///
/// All of these are infrastructure faults. Business outcomes (not found,
/// quota denial) are expressed through return values, never through this type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
