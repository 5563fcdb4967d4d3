//! Beat/tempo estimation fused from audio onsets and external DJ beat events.
//!
//! External beat events are ground truth from the DJ deck: they reset the
//! beat phase and dominate the tempo estimate. Between events the phase
//! advances deterministically from elapsed time and the current tempo, and a
//! purely audio-derived estimate (onset envelope over the bass band) takes
//! over when the external source goes quiet, so the output never stalls.

use crate::audio::BandEnergySet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// An external beat event, already decoded from the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Beat position counter from the deck (may skip or repeat)
    pub position: i64,
    /// Deck tempo in BPM
    pub bpm: f32,
    /// Beat strength, [0,1]
    pub strength: f32,
    /// Whether the deck reported a tempo change
    pub tempo_changed: bool,
}

/// The fused beat signal queried by the effect tick loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatSignal {
    /// Position within the current beat cycle, [0,1)
    pub phase: f32,
    /// Estimate confidence, [0,1]
    pub confidence: f32,
    /// Current tempo estimate, if any
    pub tempo_bpm: Option<f32>,
    /// Engine time this signal was computed for
    pub source_timestamp: Duration,
}

impl BeatSignal {
    /// A silent signal with no tempo information
    pub fn idle(t: Duration) -> Self {
        Self {
            phase: 0.0,
            confidence: 0.0,
            tempo_bpm: None,
            source_timestamp: t,
        }
    }

    /// Project the phase forward to `t` assuming the tempo holds.
    ///
    /// Used by the tick loop to extrapolate a published snapshot without
    /// touching the estimator.
    pub fn project(&self, t: Duration) -> BeatSignal {
        let Some(bpm) = self.tempo_bpm else {
            return BeatSignal {
                source_timestamp: t,
                ..*self
            };
        };
        let dt = t.saturating_sub(self.source_timestamp).as_secs_f64();
        let phase = (self.phase as f64 + dt * bpm as f64 / 60.0).fract() as f32;
        BeatSignal {
            phase,
            source_timestamp: t,
            ..*self
        }
    }
}

/// Configuration for the beat estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// How long without an external event before the estimator degrades to
    /// the audio-only tempo and the confidence floor
    pub external_timeout: Duration,
    /// Exponential confidence decay rate per second since the last event
    pub confidence_decay: f32,
    /// Low-but-nonzero confidence once the external source has timed out
    pub confidence_floor: f32,
    /// Weight of the event-implied tempo when blending, [0,1]
    pub external_tempo_weight: f32,
    /// Minimum spacing between detected audio onsets
    pub min_onset_interval: Duration,
    /// Rolling onset-envelope history length (analysis frames)
    pub onset_history: usize,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            external_timeout: Duration::from_secs(3),
            confidence_decay: 0.3,
            confidence_floor: 0.1,
            external_tempo_weight: 0.8,
            min_onset_interval: Duration::from_millis(200),
            onset_history: 32,
        }
    }
}

/// Single fused estimator instance.
///
/// Fed from two sides (`on_audio_energy`, `on_beat_event`); queried with
/// `current_signal` at any time. Queries are pure and non-blocking.
pub struct BeatEstimator {
    config: BeatConfig,
    /// Time of the current phase anchor (a beat boundary)
    anchor: Option<Duration>,
    /// Tempo currently driving the phase
    tempo_bpm: Option<f32>,
    /// Audio-only fallback tempo from onset intervals
    audio_tempo_bpm: Option<f32>,
    last_external: Option<Duration>,
    /// Confidence value as of `confidence_at`
    confidence: f32,
    confidence_at: Duration,
    envelope: VecDeque<f32>,
    onsets: VecDeque<Duration>,
    last_onset: Option<Duration>,
}

impl BeatEstimator {
    /// Create an estimator with the given configuration
    pub fn new(config: BeatConfig) -> Self {
        Self {
            config,
            anchor: None,
            tempo_bpm: None,
            audio_tempo_bpm: None,
            last_external: None,
            confidence: 0.0,
            confidence_at: Duration::ZERO,
            envelope: VecDeque::new(),
            onsets: VecDeque::new(),
            last_onset: None,
        }
    }

    /// Feed one analyzed frame's band energies at engine time `t`
    pub fn on_audio_energy(&mut self, energies: &BandEnergySet, t: Duration) {
        let onset = energies.bass();
        self.envelope.push_back(onset);
        while self.envelope.len() > self.config.onset_history.max(1) {
            self.envelope.pop_front();
        }

        if self.detect_onset(onset, t) {
            self.record_onset(t);
        }

        // Past the external timeout the audio estimate drives the tempo.
        if self.external_timed_out(t) {
            if let Some(audio_bpm) = self.audio_tempo_bpm {
                if self.tempo_bpm != Some(audio_bpm) {
                    self.retarget_tempo(audio_bpm, t);
                }
            }
        }
    }

    /// Apply an external beat event at engine time `t`.
    ///
    /// This is the only place a phase discontinuity is allowed: the phase
    /// resets to 0 at `t` and the tempo blends toward the deck's BPM.
    pub fn on_beat_event(&mut self, event: &BeatEvent, t: Duration) {
        let w = self.config.external_tempo_weight.clamp(0.0, 1.0);
        let blended = match self.tempo_bpm {
            Some(cur) if !event.tempo_changed => w * event.bpm + (1.0 - w) * cur,
            _ => event.bpm,
        };

        self.anchor = Some(t);
        self.tempo_bpm = Some(blended);
        self.last_external = Some(t);

        let strength_conf = 0.5 + 0.5 * event.strength.clamp(0.0, 1.0);
        self.confidence = self.decayed_confidence(t).max(strength_conf).min(1.0);
        self.confidence_at = t;

        trace!(
            position = event.position,
            bpm = event.bpm,
            blended,
            "external beat"
        );
    }

    /// Query the fused signal at engine time `t` without blocking
    pub fn current_signal(&self, t: Duration) -> BeatSignal {
        let phase = match (self.anchor, self.tempo_bpm) {
            (Some(anchor), Some(bpm)) if bpm > 0.0 => {
                let elapsed = t.saturating_sub(anchor).as_secs_f64();
                (elapsed * bpm as f64 / 60.0).fract() as f32
            }
            _ => 0.0,
        };

        let mut confidence = self.decayed_confidence(t);
        if self.tempo_bpm.is_some() && self.external_timed_out(t) {
            confidence = confidence.max(self.config.confidence_floor);
        }

        BeatSignal {
            phase,
            confidence: confidence.clamp(0.0, 1.0),
            tempo_bpm: self.tempo_bpm,
            source_timestamp: t,
        }
    }

    /// Tempo derived purely from audio onsets, if enough were observed
    pub fn audio_tempo(&self) -> Option<f32> {
        self.audio_tempo_bpm
    }

    fn decayed_confidence(&self, t: Duration) -> f32 {
        let elapsed = t.saturating_sub(self.confidence_at).as_secs_f32();
        self.confidence * (-self.config.confidence_decay * elapsed).exp()
    }

    fn external_timed_out(&self, t: Duration) -> bool {
        match self.last_external {
            Some(at) => t.saturating_sub(at) > self.config.external_timeout,
            None => true,
        }
    }

    fn detect_onset(&self, onset: f32, t: Duration) -> bool {
        if self.envelope.len() < 8 || onset < 0.05 {
            return false;
        }
        if let Some(last) = self.last_onset {
            if t.saturating_sub(last) < self.config.min_onset_interval {
                return false;
            }
        }
        let avg = self.envelope.iter().sum::<f32>() / self.envelope.len() as f32;
        onset > avg * 1.5
    }

    fn record_onset(&mut self, t: Duration) {
        self.last_onset = Some(t);
        self.onsets.push_back(t);
        while self.onsets.len() > 16 {
            self.onsets.pop_front();
        }

        if let Some(bpm) = self.tempo_from_onsets() {
            self.audio_tempo_bpm = Some(bpm);
        }

        // An onset landing near the predicted beat boundary corroborates the
        // estimate, so confidence rises sharply.
        let signal = self.current_signal(t);
        if signal.tempo_bpm.is_some() && (signal.phase < 0.15 || signal.phase > 0.85) {
            self.confidence = (self.decayed_confidence(t) + 0.25).min(1.0);
            self.confidence_at = t;
        }

        // With no external source at all, the first corroborated onset
        // becomes the phase anchor so effects have something to follow.
        if self.anchor.is_none() {
            self.anchor = Some(t);
            if self.tempo_bpm.is_none() {
                self.tempo_bpm = self.audio_tempo_bpm;
            }
            if self.tempo_bpm.is_some() {
                debug!(bpm = ?self.tempo_bpm, "anchored to audio-derived beat");
            }
        }
    }

    /// Median-filtered tempo from recent onset intervals, folded into the
    /// 60-200 BPM range
    fn tempo_from_onsets(&self) -> Option<f32> {
        if self.onsets.len() < 4 {
            return None;
        }
        let mut intervals: Vec<f64> = self
            .onsets
            .iter()
            .zip(self.onsets.iter().skip(1))
            .map(|(a, b)| b.saturating_sub(*a).as_secs_f64())
            .collect();
        intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        // Keep the middle 50% to drop double-triggers and gaps
        let trimmed = if intervals.len() >= 4 {
            let quarter = intervals.len() / 4;
            &intervals[quarter..intervals.len() - quarter]
        } else {
            &intervals[..]
        };
        if trimmed.is_empty() {
            return None;
        }
        let avg = trimmed.iter().sum::<f64>() / trimmed.len() as f64;
        if avg <= 0.001 {
            return None;
        }

        let bpm = (60.0 / avg) as f32;
        let folded = if (60.0..=200.0).contains(&bpm) {
            bpm
        } else if (200.0..=400.0).contains(&bpm) {
            bpm / 2.0
        } else if (30.0..60.0).contains(&bpm) {
            bpm * 2.0
        } else {
            return None;
        };
        Some((folded * 10.0).round() / 10.0)
    }

    /// Switch to a new tempo while keeping the phase continuous.
    ///
    /// Internal drift must never produce a phase discontinuity, so the
    /// anchor is moved such that the current phase is preserved under the
    /// new tempo.
    fn retarget_tempo(&mut self, bpm: f32, t: Duration) {
        if bpm <= 0.0 {
            return;
        }
        let phase = self.current_signal(t).phase;
        let period = 60.0 / bpm as f64;
        let offset = Duration::from_secs_f64(phase as f64 * period);
        self.anchor = Some(t.saturating_sub(offset));
        self.tempo_bpm = Some(bpm);
        debug!(bpm, "tempo retargeted to audio estimate");
    }
}
