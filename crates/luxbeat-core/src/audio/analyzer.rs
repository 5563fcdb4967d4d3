//! FFT-based spectral analyzer with adaptive per-band peak normalization.

use super::{AnalyzerConfig, AudioFrame, BandEnergySet};
use crate::{CoreError, Result};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::{debug, trace};

/// Real-time frequency analyzer.
///
/// One instance owns one set of decaying peak trackers, so distinct engine
/// instances (and tests) never interfere. Not reentrant: `analyze` mutates
/// peak state in place and must be called from a single analysis thread.
pub struct SpectralAnalyzer {
    config: AnalyzerConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    scratch_buffer: Vec<Complex<f32>>,
    mono_buffer: Vec<f32>,
    /// FFT bin range `[start, end)` per band
    band_bins: Vec<(usize, usize)>,
    /// Decaying energy peak per band; persists across frames until `reset`
    peaks: Vec<f32>,
    frames_analyzed: u64,
}

impl SpectralAnalyzer {
    /// Build an analyzer for the given window configuration
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        if config.window_size == 0 || !config.window_size.is_power_of_two() {
            return Err(CoreError::ConfigMismatch(format!(
                "window size must be a power of two, got {}",
                config.window_size
            )));
        }
        if config.sample_rate == 0 || config.channels == 0 || config.band_count == 0 {
            return Err(CoreError::ConfigMismatch(
                "sample rate, channels and band count must be nonzero".into(),
            ));
        }
        if config.window_size < 2 * config.band_count {
            return Err(CoreError::ConfigMismatch(format!(
                "window size {} too small for {} bands",
                config.window_size, config.band_count
            )));
        }
        if !(config.peak_decay > 0.0 && config.peak_decay < 1.0) {
            return Err(CoreError::ConfigMismatch(format!(
                "peak decay must be in (0,1), got {}",
                config.peak_decay
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.window_size);

        // Hann window
        let window: Vec<f32> = (0..config.window_size)
            .map(|i| {
                let t = i as f32 / (config.window_size - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        let band_bins = Self::band_bins(&config);

        debug!(
            sample_rate = config.sample_rate,
            window_size = config.window_size,
            bands = config.band_count,
            "spectral analyzer created"
        );

        Ok(Self {
            fft,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); config.window_size],
            scratch_buffer: vec![Complex::new(0.0, 0.0); config.window_size],
            mono_buffer: vec![0.0; config.window_size],
            band_bins,
            peaks: vec![0.0; config.band_count],
            frames_analyzed: 0,
            config,
        })
    }

    /// Logarithmically spaced band edges mapped onto FFT bins
    fn band_bins(config: &AnalyzerConfig) -> Vec<(usize, usize)> {
        let nyquist = config.sample_rate as f32 / 2.0;
        let fmin = config.min_freq.max(1.0);
        let fmax = config.max_freq.min(nyquist).max(fmin * 2.0);
        let bin_width = config.sample_rate as f32 / config.window_size as f32;
        let half = config.window_size / 2;
        let ratio = fmax / fmin;

        let mut bins = Vec::with_capacity(config.band_count);
        for b in 0..config.band_count {
            let lo = fmin * ratio.powf(b as f32 / config.band_count as f32);
            let hi = fmin * ratio.powf((b + 1) as f32 / config.band_count as f32);
            let start = ((lo / bin_width) as usize).min(half - 1);
            // Every band covers at least one bin even at coarse windows.
            let end = ((hi / bin_width).ceil() as usize).clamp(start + 1, half);
            bins.push((start, end));
        }
        bins
    }

    /// Analyze one frame into normalized per-band energies.
    ///
    /// A frame whose length, rate or channel count disagrees with the
    /// configured window fails with `ConfigMismatch`; a frame carrying
    /// non-finite samples fails with `AnalysisFault` and leaves the peak
    /// trackers untouched.
    pub fn analyze(&mut self, frame: &AudioFrame) -> Result<BandEnergySet> {
        if frame.sample_rate != self.config.sample_rate {
            return Err(CoreError::ConfigMismatch(format!(
                "frame rate {} != configured {}",
                frame.sample_rate, self.config.sample_rate
            )));
        }
        if frame.channels != self.config.channels {
            return Err(CoreError::ConfigMismatch(format!(
                "frame channels {} != configured {}",
                frame.channels, self.config.channels
            )));
        }
        let expected = self.config.window_size * self.config.channels as usize;
        if frame.samples.len() != expected {
            return Err(CoreError::ConfigMismatch(format!(
                "frame has {} samples, expected {}",
                frame.samples.len(),
                expected
            )));
        }
        // Reject malformed frames before any state is mutated.
        if frame.samples.iter().any(|s| !s.is_finite()) {
            return Err(CoreError::AnalysisFault(format!(
                "non-finite sample in frame at position {}",
                frame.sample_position
            )));
        }

        self.downmix(frame);

        for (i, &s) in self.mono_buffer.iter().enumerate() {
            self.fft_buffer[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        let half = self.config.window_size / 2;
        let norm = 1.0 / half as f32;

        let mut energies = Vec::with_capacity(self.band_bins.len());
        for (b, &(start, end)) in self.band_bins.iter().enumerate() {
            let energy: f32 = self.fft_buffer[start..end]
                .iter()
                .map(|c| {
                    let m = c.norm() * norm;
                    m * m
                })
                .sum();

            // Adaptive normalization: decay the peak, then let the current
            // energy raise it immediately so transients never clip above 1.
            self.peaks[b] = energy.max(self.peaks[b] * self.config.peak_decay);
            let value = if self.peaks[b] > 0.0 {
                (energy / self.peaks[b]).clamp(0.0, 1.0)
            } else {
                0.0
            };
            energies.push(value);
        }

        self.frames_analyzed += 1;
        if self.frames_analyzed % 512 == 0 {
            trace!(
                frames = self.frames_analyzed,
                bands = ?&energies[..energies.len().min(3)],
                "analysis progress"
            );
        }

        Ok(BandEnergySet {
            energies,
            sample_position: frame.sample_position,
        })
    }

    fn downmix(&mut self, frame: &AudioFrame) {
        let ch = self.config.channels as usize;
        if ch == 1 {
            self.mono_buffer.copy_from_slice(&frame.samples);
            return;
        }
        for (i, out) in self.mono_buffer.iter_mut().enumerate() {
            let base = i * ch;
            let sum: f32 = frame.samples[base..base + ch].iter().sum();
            *out = sum / ch as f32;
        }
    }

    /// Clear peak-tracker state so a replayed frame sequence reproduces the
    /// output of a fresh instance.
    pub fn reset(&mut self) {
        self.peaks.fill(0.0);
        self.frames_analyzed = 0;
        debug!("spectral analyzer reset");
    }

    /// Frames analyzed since construction or the last reset
    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    /// The analyzer's configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_config() -> AnalyzerConfig {
        AnalyzerConfig {
            channels: 1,
            ..AnalyzerConfig::default()
        }
    }

    fn sine_frame(freq: f32, amplitude: f32, position: u64, config: &AnalyzerConfig) -> AudioFrame {
        let rate = config.sample_rate as f32;
        let samples: Vec<f32> = (0..config.window_size)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * amplitude)
            .collect();
        AudioFrame {
            samples,
            sample_position: position,
            sample_rate: config.sample_rate,
            channels: 1,
        }
    }

    #[test]
    fn rejects_bad_window_size() {
        let config = AnalyzerConfig {
            window_size: 1000,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            SpectralAnalyzer::new(config),
            Err(CoreError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn rejects_window_too_small_for_bands() {
        // Power-of-two sizes below the band count must error, not panic.
        for window_size in [1, 2, 4, 8] {
            let config = AnalyzerConfig {
                window_size,
                ..AnalyzerConfig::default()
            };
            assert!(matches!(
                SpectralAnalyzer::new(config),
                Err(CoreError::ConfigMismatch(_))
            ));
        }
    }

    #[test]
    fn rejects_zero_peak_decay() {
        let config = AnalyzerConfig {
            peak_decay: 0.0,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            SpectralAnalyzer::new(config),
            Err(CoreError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn rejects_mismatched_frames() {
        let config = mono_config();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        let short = AudioFrame {
            samples: vec![0.0; 100],
            sample_position: 0,
            sample_rate: config.sample_rate,
            channels: 1,
        };
        assert!(matches!(
            analyzer.analyze(&short),
            Err(CoreError::ConfigMismatch(_))
        ));

        let wrong_rate = AudioFrame {
            samples: vec![0.0; config.window_size],
            sample_position: 0,
            sample_rate: 48000,
            channels: 1,
        };
        assert!(matches!(
            analyzer.analyze(&wrong_rate),
            Err(CoreError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn energies_stay_in_unit_range() {
        let config = mono_config();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        for (i, freq) in [60.0, 440.0, 2000.0, 8000.0, 60.0, 15000.0].iter().enumerate() {
            let frame = sine_frame(*freq, 0.8, i as u64 * 2048, &config);
            let set = analyzer.analyze(&frame).unwrap();
            assert_eq!(set.band_count(), config.band_count);
            for e in &set.energies {
                assert!((0.0..=1.0).contains(e), "energy out of range: {e}");
            }
        }
    }

    #[test]
    fn bass_band_dominates_for_low_sine() {
        let config = mono_config();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        // A few frames so the peak tracker settles
        let mut set = None;
        for i in 0..4 {
            let frame = sine_frame(100.0, 0.8, i * 2048, &config);
            set = Some(analyzer.analyze(&frame).unwrap());
        }
        let set = set.unwrap();
        assert!(
            set.bass() > set.highs(),
            "bass {} should exceed highs {}",
            set.bass(),
            set.highs()
        );
    }

    #[test]
    fn louder_frame_raises_peak_without_clipping() {
        let config = mono_config();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        for i in 0..8 {
            analyzer.analyze(&sine_frame(100.0, 0.2, i * 2048, &config)).unwrap();
        }
        // A much louder frame must immediately raise the peak: the frame
        // itself normalizes to 1, and an equal follow-up frame must not
        // exceed 1 either.
        let loud = analyzer
            .analyze(&sine_frame(100.0, 1.0, 8 * 2048, &config))
            .unwrap();
        let again = analyzer
            .analyze(&sine_frame(100.0, 1.0, 9 * 2048, &config))
            .unwrap();
        for set in [&loud, &again] {
            for e in &set.energies {
                assert!(*e <= 1.0, "clipped energy {e}");
            }
        }
        // The dominant band saturates at its own peak
        let max = loud.energies.iter().cloned().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-5, "loud frame should hit its peak, max={max}");
    }

    #[test]
    fn non_finite_frame_is_skipped_and_state_unchanged() {
        let config = mono_config();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        let baseline = analyzer
            .analyze(&sine_frame(100.0, 0.5, 0, &config))
            .unwrap();

        let mut bad = sine_frame(100.0, 0.5, 2048, &config);
        bad.samples[17] = f32::NAN;
        assert!(matches!(
            analyzer.analyze(&bad),
            Err(CoreError::AnalysisFault(_))
        ));

        // Same input as the baseline frame: identical peaks would have been
        // decayed exactly once, so equal output proves the fault left state
        // untouched relative to a clean run.
        let mut fresh = SpectralAnalyzer::new(config.clone()).unwrap();
        fresh.analyze(&sine_frame(100.0, 0.5, 0, &config)).unwrap();
        let after_fault = analyzer
            .analyze(&sine_frame(100.0, 0.5, 2048, &config))
            .unwrap();
        let clean = fresh
            .analyze(&sine_frame(100.0, 0.5, 2048, &config))
            .unwrap();
        assert_eq!(after_fault.energies, clean.energies);
        drop(baseline);
    }

    #[test]
    fn reset_replays_identically() {
        let config = mono_config();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        let frames: Vec<AudioFrame> = (0..6)
            .map(|i| sine_frame(100.0 + 50.0 * i as f32, 0.5, i * 2048, &config))
            .collect();

        let first: Vec<_> = frames
            .iter()
            .map(|f| analyzer.analyze(f).unwrap().energies)
            .collect();

        analyzer.reset();
        assert_eq!(analyzer.frames_analyzed(), 0);

        let second: Vec<_> = frames
            .iter()
            .map(|f| analyzer.analyze(f).unwrap().energies)
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn stereo_downmix() {
        let config = AnalyzerConfig::default();
        let mut analyzer = SpectralAnalyzer::new(config.clone()).unwrap();

        // Left and right carrying the same 100Hz sine
        let rate = config.sample_rate as f32;
        let samples: Vec<f32> = (0..config.window_size)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 100.0 * i as f32 / rate).sin() * 0.5;
                [s, s]
            })
            .collect();
        let frame = AudioFrame {
            samples,
            sample_position: 0,
            sample_rate: config.sample_rate,
            channels: 2,
        };
        let set = analyzer.analyze(&frame).unwrap();
        assert!(set.energies.iter().any(|e| *e > 0.0));
    }
}
