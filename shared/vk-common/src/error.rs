//! Shared error type.

use thiserror::Error;

/// Errors raised while handling platform values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A snowflake id was empty, non-numeric or out of range.
    #[error("invalid snowflake id: {0:?}")]
    InvalidSnowflake(String),
}

pub type Result<T> = std::result::Result<T, Error>;
