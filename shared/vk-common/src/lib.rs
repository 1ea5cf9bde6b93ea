//! Valknut Common Library
//!
//! Platform-facing types shared by the server and the bot process.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
