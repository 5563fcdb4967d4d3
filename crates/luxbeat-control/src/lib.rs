//! Luxbeat Control - Concurrent Light Command Delivery
//!
//! This crate wires the pure core engine into a running system:
//! - **Scheduler**: per-fixture state machines with rate limiting, dedup,
//!   bounded retry/backoff and fixture isolation
//! - **Fixture adapters**: the async boundary to real light hardware
//! - **Sync events**: the OS2L-style JSON messages delivered by the DJ
//!   application's sync protocol
//! - **Engine runtime**: analysis thread, fixed-rate tick loop and sync
//!   intake, sharing state through lock-free latest-value snapshots
//!
//! ## Modules
//!
//! - [`engine`] - Engine runtime wiring and lifecycle
//! - [`error`] - Error types
//! - [`fixture`] - Fixture adapter trait and capabilities
//! - [`scheduler`] - Light command scheduler
//! - [`stats`] - Observable counters for recoverable errors
//! - [`sync`] - DJ sync event parsing

#![warn(missing_docs)]

/// Engine runtime wiring
pub mod engine;
/// Error types
pub mod error;
/// Fixture adapter boundary
pub mod fixture;
/// Light command scheduler
pub mod scheduler;
/// Observable counters
pub mod stats;
/// DJ sync events
pub mod sync;

pub use engine::{EngineConfig, EngineHandle, LightEngine, SourceFormat};
pub use error::{ControlError, DispatchError, Result};
pub use fixture::{FixtureAdapter, FixtureCapabilities, FixtureInfo, LightCommand};
pub use scheduler::{CommandScheduler, FixtureStatus, SchedulerConfig};
pub use stats::{EngineStats, StatsSnapshot};
pub use sync::{parse_sync_message, SyncEvent};
