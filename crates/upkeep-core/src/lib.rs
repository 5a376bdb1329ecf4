//! Shared configuration and error types for the upkeep workspace.

pub mod config;
pub mod error;

pub use config::UpkeepConfig;
pub use error::{Result, UpkeepError};
