//! # Offpeak - Off-Peak Energy Tracker
//!
//! A small Rust service that derives an off-peak cumulative energy counter
//! from a monotonically increasing import meter. The running total is frozen
//! when a configurable daily peak window opens and the usage accrued inside
//! the window is subtracted once it closes.
//!
//! ## Features
//!
//! - **Snapshot state machine**: freeze-at-start, subtract-after-end with
//!   day-boundary reset and crash recovery
//! - **Crash safe**: snapshots persist after every mutation and restore on
//!   startup; a restart mid-window degrades gracefully
//! - **Hold on unavailability**: unreadable sources keep the last good value
//! - **Configuration**: YAML-based configuration with field-level validation
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `registry`: In-process entity state registry
//! - `tracker`: Core off-peak state machine
//! - `scheduler`: Daily wall-clock triggers
//! - `runtime`: Event loop wiring triggers, registry and persistence
//! - `persistence`: Snapshot persistence and recovery

pub mod config;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod tracker;

// Re-export commonly used types
pub use config::{Config, TrackerConfig};
pub use error::{OffpeakError, Result};
pub use runtime::TrackerRuntime;
pub use tracker::OffPeakTracker;
