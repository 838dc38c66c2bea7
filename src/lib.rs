//! Fetcher - periodic URL polling library
//!
//! This crate provides the core of the Fetcher service: a registry of
//! user-registered URLs ("targets"), each polled by its own background worker
//! at a fixed interval, with every attempt recorded in the target's history.
//! It can be used as a library, or run as a standalone binary with the
//! `fetcher` executable.
//!
//! # Architecture
//!
//! - **Executor**: one HTTP GET per dispatch, bounded by a timeout
//! - **History**: append-only log of [`FetchRecord`]s per target
//! - **Worker**: per-target scheduling loop with idempotent cancellation
//! - **Registry**: concurrent keyed store owning target and worker lifecycles
//! - **Server**: REST API over the registry
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fetcher::{HttpExecutor, Registry, TargetSpec};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = HttpExecutor::with_default_timeout()?;
//! let registry = Registry::new(Arc::new(executor));
//!
//! let id = registry
//!     .register(TargetSpec::new("https://httpbin.org/range/15", 7))
//!     .await?;
//! let history = registry.history(id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod executor;
pub mod history;
pub mod registry;
pub mod server;
pub mod target;
pub mod worker;

pub use executor::{FetchError, FetchExecutor, HttpExecutor};
pub use history::{FetchRecord, HistoryLog, Retention};
pub use registry::{Registry, RegistryError};
pub use target::{FieldViolation, Target, TargetSpec, TargetSummary, ValidationError};
pub use worker::{Worker, WorkerHandle, WorkerState};
