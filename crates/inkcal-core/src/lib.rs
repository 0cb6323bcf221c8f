//! # inkcal Core Library
//!
//! Task storage and calendar binning for an e-ink calendar. The `inkcal`
//! CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Task store**: an LRU cache in front of a blocking backend, with
//!   deferred writes coalesced per task and applied on a small worker pool
//! - **Storage**: SQLite task table and TOML configuration
//! - **Calendar**: view ranges and hour/day binning for the 3-day, week
//!   and month layouts
//!
//! ## Key Components
//!
//! - [`TaskStore`]: cached reads, coalesced writes, flush and shutdown
//! - [`TaskBackend`]: the blocking storage contract, implemented by
//!   [`TaskDb`] and [`MemoryBackend`]
//! - [`Config`]: application configuration management
//! - [`calendar`]: binning functions and [`ViewMode`]

pub mod calendar;
pub mod error;
pub mod storage;
pub mod store;
pub mod task;

pub use calendar::{HourBins, ViewMode, WeekGrid};
pub use error::{ConfigError, CoreError, DatabaseError, StoreError, ValidationError};
pub use storage::{Config, TaskDb};
pub use store::{
    BatchOutcome, CacheStats, FlushReport, MemoryBackend, StoreConfig, TaskBackend, TaskStore,
    WriteTicket,
};
pub use task::{Quadrant, Task, TaskId};
