//! Audio frames and spectral analysis.
//!
//! The capture device (external) delivers fixed-size [`AudioFrame`]s at a
//! fixed sample rate; the [`SpectralAnalyzer`] turns each one into a
//! [`BandEnergySet`] of normalized per-band energies.

mod analyzer;

pub use analyzer::SpectralAnalyzer;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One fixed-size block of interleaved audio samples.
///
/// Immutable once produced. `sample_position` is a monotonic per-channel
/// sample counter assigned by the capture source.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved samples, `frame_len * channels` values
    pub samples: Vec<f32>,
    /// Monotonic sample-count timestamp of the first sample
    pub sample_position: u64,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl AudioFrame {
    /// Number of samples per channel
    pub fn frame_len(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Wall-clock span covered by this frame
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_len() as f64 / self.sample_rate as f64)
    }

    /// Wall-clock offset of this frame from capture start
    pub fn start_time(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_position as f64 / self.sample_rate as f64)
    }
}

/// Configuration for the spectral analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Expected sample rate of incoming frames
    pub sample_rate: u32,
    /// Expected frame length (samples per channel), also the FFT size
    pub window_size: usize,
    /// Expected channel count of incoming frames
    pub channels: u16,
    /// Number of logarithmically spaced frequency bands
    pub band_count: usize,
    /// Per-frame decay factor of the adaptive peak tracker, (0,1)
    pub peak_decay: f32,
    /// Lower edge of the analyzed range in Hz
    pub min_freq: f32,
    /// Upper edge of the analyzed range in Hz (clamped to Nyquist)
    pub max_freq: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            window_size: 2048,
            channels: 2,
            band_count: 6,
            peak_decay: 0.8,
            min_freq: 20.0,
            max_freq: 20000.0,
        }
    }
}

/// Normalized per-band energies for one analyzed frame.
///
/// Every value lies in [0,1]: each band is divided by its own decaying peak
/// so quiet and loud material both use the full range.
#[derive(Debug, Clone, PartialEq)]
pub struct BandEnergySet {
    /// Normalized energy per band, low frequencies first
    pub energies: Vec<f32>,
    /// Sample position of the frame this was computed from
    pub sample_position: u64,
}

impl BandEnergySet {
    /// Number of bands
    pub fn band_count(&self) -> usize {
        self.energies.len()
    }

    /// Average energy of the low third of the bands (sub-bass/bass)
    pub fn bass(&self) -> f32 {
        self.third(0)
    }

    /// Average energy of the middle third of the bands
    pub fn mids(&self) -> f32 {
        self.third(1)
    }

    /// Average energy of the high third of the bands
    pub fn highs(&self) -> f32 {
        self.third(2)
    }

    /// Average energy across all bands
    pub fn level(&self) -> f32 {
        if self.energies.is_empty() {
            return 0.0;
        }
        self.energies.iter().sum::<f32>() / self.energies.len() as f32
    }

    fn third(&self, which: usize) -> f32 {
        let n = self.energies.len();
        if n == 0 {
            return 0.0;
        }
        let start = (which * n / 3).min(n - 1);
        let end = if which == 2 {
            n
        } else {
            ((which + 1) * n / 3).clamp(start + 1, n)
        };
        let slice = &self.energies[start..end];
        slice.iter().sum::<f32>() / slice.len() as f32
    }
}
