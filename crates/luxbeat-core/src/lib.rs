//! Luxbeat Core - Audio-to-Light Domain Model
//!
//! This crate contains the pure engine logic for driving light fixtures from
//! a live audio signal and DJ beat events:
//! - Audio frames and spectral analysis with adaptive per-band normalization
//! - Beat/tempo estimation fused from audio onsets and external beat events
//! - The effect engine: a closed set of effect variants ticked on a fixed
//!   clock, producing per-fixture light intents
//! - Lock-free latest-value snapshots shared between analysis and tick loops
//!
//! Everything here is runtime-agnostic; the concurrent wiring (scheduler,
//! adapters, sync intake) lives in `luxbeat-control`.

#![warn(missing_docs)]

use thiserror::Error;

/// Audio frames and the spectral analyzer
pub mod audio;
/// Beat/tempo estimation
pub mod beat;
/// Engine configuration surface
pub mod config;
/// Effect variants and the effect engine
pub mod effect;
/// Latest-value snapshot handoff
pub mod latest;
/// Light domain types (fixtures, colors, intents)
pub mod light;

pub use audio::{AnalyzerConfig, AudioFrame, BandEnergySet, SpectralAnalyzer};
pub use beat::{BeatConfig, BeatEstimator, BeatEvent, BeatSignal};
pub use config::CoreConfig;
pub use effect::{
    EffectDescriptor, EffectEngine, EffectId, EffectKind, EffectParams, ParamValue,
};
pub use latest::Latest;
pub use light::{Color, FixtureId, LightIntent};

/// Errors produced by the core engine
#[derive(Debug, Error)]
pub enum CoreError {
    /// Audio source parameters are incompatible with the configured analyzer.
    /// Fatal at startup; per-frame occurrences indicate a misbehaving source.
    #[error("config mismatch: {0}")]
    ConfigMismatch(String),

    /// Numerical fault while analyzing a frame (e.g. non-finite samples).
    /// The frame is skipped and analyzer state is left unchanged.
    #[error("analysis fault: {0}")]
    AnalysisFault(String),

    /// A parameter value is outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
