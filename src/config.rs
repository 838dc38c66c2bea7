//! Configuration module for Fetcher.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (bind address, port, request body limit)
//! - Fetch settings (request timeout)
//! - History retention
//! - Seed targets registered at startup

mod app;
mod error;

pub use app::{AppConfig, FetchConfig, HistoryConfig, SeedTarget, ServerConfig};
pub use error::ConfigError;
