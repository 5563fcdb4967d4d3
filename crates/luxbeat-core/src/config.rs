//! The configuration surface consumed by the core engine.
//!
//! Loading (files, CLI, UI) is external; these types only define the shape
//! and defaults. Everything derives serde so the control layer can compose
//! and deserialize them from whatever format the host uses.

use crate::audio::AnalyzerConfig;
use crate::beat::BeatConfig;
use crate::effect::EffectDescriptor;
use serde::{Deserialize, Serialize};

/// Core engine configuration: analyzer, estimator, tick cadence, effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Spectral analyzer parameters
    pub analyzer: AnalyzerConfig,
    /// Beat estimator parameters
    pub beat: BeatConfig,
    /// Effect tick rate in Hz, independent of the audio frame cadence
    pub tick_hz: u32,
    /// Configured effects
    pub effects: Vec<EffectDescriptor>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            beat: BeatConfig::default(),
            tick_hz: 50,
            effects: Vec::new(),
        }
    }
}
