//! Effect variants and the effect engine.
//!
//! Effects are a closed set of variants sharing one tick contract: each tick
//! an instance maps (beat signal, band energies, elapsed time, parameters)
//! to light intents for its target fixtures, mutating nothing but its own
//! state. The engine ticks all enabled instances on a fixed cadence that is
//! independent of the audio frame cadence.

use crate::audio::BandEnergySet;
use crate::beat::BeatSignal;
use crate::light::{Color, FixtureId, LightIntent};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Identifier of one configured effect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(pub String);

impl EffectId {
    /// Create an effect id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EffectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of effect variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    /// Brightness peak at the top of every beat
    BeatPulse,
    /// Hue/saturation/brightness driven by bass/mids/highs
    AudioReactive,
    /// Continuous hue rotation
    RainbowCycle,
    /// A brightness peak travelling across the target fixtures
    Chase,
    /// Rapid on/off square wave
    Strobe,
    /// Constant configured color
    Static,
}

/// Live-tunable effect parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParams {
    /// Speed multiplier, [0,10]
    pub speed: f32,
    /// Intensity scale, [0,1]
    pub intensity: f32,
    /// Base color where the variant uses one
    pub color: Option<Color>,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            intensity: 1.0,
            color: None,
        }
    }
}

impl EffectParams {
    /// Check all parameters are inside their valid ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=10.0).contains(&self.speed) || !self.speed.is_finite() {
            return Err(CoreError::InvalidParameter(format!(
                "invalid speed: {}",
                self.speed
            )));
        }
        if !(0.0..=1.0).contains(&self.intensity) || !self.intensity.is_finite() {
            return Err(CoreError::InvalidParameter(format!(
                "invalid intensity: {}",
                self.intensity
            )));
        }
        if let Some(color) = &self.color {
            color.validate()?;
        }
        Ok(())
    }
}

/// A value for a live parameter update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Numeric parameter (`speed`, `intensity`)
    Number(f32),
    /// Base color parameter (`color`)
    Color(Color),
}

/// Configuration of one effect: which variant, how, and where.
///
/// Immutable during a run apart from `enabled` and the parameter values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectDescriptor {
    /// Unique effect id
    pub id: EffectId,
    /// Variant
    pub kind: EffectKind,
    /// Tunable parameters
    #[serde(default)]
    pub params: EffectParams,
    /// Target fixtures, in chase order where ordering matters
    pub targets: Vec<FixtureId>,
    /// Conflict-resolution priority (higher wins at the scheduler)
    #[serde(default)]
    pub priority: i32,
    /// Whether the effect is active
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Mutable per-instance state, owned exclusively by one instance.
///
/// Created when the effect becomes active and dropped when it is disabled,
/// so re-enabling always starts fresh.
#[derive(Debug, Clone, Default)]
struct EffectState {
    /// Generic cycle accumulator (rainbow hue, strobe phase), in cycles
    cycle_phase: f32,
    /// Chase head position, in fixture steps
    chase_pos: f32,
}

struct EffectInstance {
    descriptor: EffectDescriptor,
    state: Option<EffectState>,
}

impl EffectInstance {
    fn new(descriptor: EffectDescriptor) -> Self {
        let state = descriptor.enabled.then(EffectState::default);
        Self { descriptor, state }
    }

    fn tick(
        &mut self,
        signal: &BeatSignal,
        energies: Option<&BandEnergySet>,
        dt: Duration,
        out: &mut Vec<LightIntent>,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let d = &self.descriptor;
        let params = &d.params;
        let dt_s = dt.as_secs_f32();

        match d.kind {
            EffectKind::BeatPulse => {
                let beat_period = signal
                    .tempo_bpm
                    .filter(|bpm| *bpm > 0.0)
                    .map(|bpm| 60.0 / bpm)
                    .unwrap_or(0.5);
                // Bright for the first quarter of the beat, then relax to a
                // 50% base over another quarter beat.
                let (brightness, transition) = if signal.phase < 0.25 {
                    (0.25 + 0.75 * params.intensity, Duration::ZERO)
                } else {
                    (0.5, Duration::from_secs_f32(beat_period * 0.25))
                };
                let base = params.color.unwrap_or_else(|| Color::white(1.0));
                let color = Color {
                    brightness,
                    ..base
                };
                for fixture in &d.targets {
                    out.push(self.intent(fixture, color, transition));
                }
            }
            EffectKind::AudioReactive => {
                // No analysis yet: stay silent rather than flash a default.
                let Some(set) = energies else { return };
                let color = Color {
                    hue: (set.bass() / 3.0).clamp(0.0, 1.0 / 3.0),
                    saturation: set.mids().clamp(0.0, 1.0),
                    brightness: (set.highs() * params.intensity).clamp(0.0, 1.0),
                    kelvin: None,
                };
                for fixture in &d.targets {
                    out.push(self.intent(fixture, color, Duration::ZERO));
                }
            }
            EffectKind::RainbowCycle => {
                let hue = {
                    state.cycle_phase =
                        (state.cycle_phase + dt_s * 0.3 * params.speed).rem_euclid(1.0);
                    state.cycle_phase
                };
                let color = Color {
                    hue,
                    saturation: 1.0,
                    brightness: 0.5 * params.intensity,
                    kelvin: None,
                };
                for fixture in &d.targets {
                    out.push(self.intent(fixture, color, Duration::from_millis(100)));
                }
            }
            EffectKind::Chase => {
                let len = d.targets.len();
                if len == 0 {
                    return;
                }
                let pos = {
                    state.chase_pos = (state.chase_pos + dt_s * 5.0 * params.speed) % len as f32;
                    state.chase_pos
                };
                let base = params.color.unwrap_or_else(|| Color::white(1.0));
                for (i, fixture) in d.targets.iter().enumerate() {
                    let raw = (i as f32 - pos).abs();
                    // Wrap distance around the chase loop
                    let dist = raw.min(len as f32 - raw);
                    let falloff = (1.0 - dist / len as f32).max(0.0);
                    let color = Color {
                        brightness: falloff * params.intensity,
                        ..base
                    };
                    out.push(self.intent(fixture, color, Duration::from_millis(50)));
                }
            }
            EffectKind::Strobe => {
                // 100ms base period scaled by speed, 50% duty cycle
                let period = 0.1 / params.speed.max(0.01);
                let on = {
                    state.cycle_phase = (state.cycle_phase + dt_s / period).rem_euclid(1.0);
                    state.cycle_phase < 0.5
                };
                let base = params.color.unwrap_or_else(|| Color::white(1.0));
                let color = Color {
                    brightness: if on { params.intensity } else { 0.0 },
                    ..base
                };
                for fixture in &d.targets {
                    out.push(self.intent(fixture, color, Duration::ZERO));
                }
            }
            EffectKind::Static => {
                let base = params.color.unwrap_or_else(|| Color::white(0.5));
                let color = Color {
                    brightness: (base.brightness * params.intensity).clamp(0.0, 1.0),
                    ..base
                };
                for fixture in &d.targets {
                    out.push(self.intent(fixture, color, Duration::ZERO));
                }
            }
        }
    }

    fn intent(&self, fixture: &FixtureId, color: Color, transition: Duration) -> LightIntent {
        LightIntent {
            fixture: fixture.clone(),
            color: color.clamped(),
            transition,
            priority: self.descriptor.priority,
            source_effect: self.descriptor.id.clone(),
        }
    }
}

/// Holds all configured effect instances and ticks the enabled ones.
///
/// Instances may target overlapping fixture sets; conflicts are resolved
/// downstream by the scheduler. No instance can read another's state.
pub struct EffectEngine {
    instances: Vec<EffectInstance>,
}

impl EffectEngine {
    /// Build an engine from validated descriptors
    pub fn new(descriptors: Vec<EffectDescriptor>) -> Result<Self> {
        let mut engine = Self {
            instances: Vec::new(),
        };
        for d in descriptors {
            engine.add(d)?;
        }
        Ok(engine)
    }

    /// Add one effect. Ids must be unique.
    pub fn add(&mut self, descriptor: EffectDescriptor) -> Result<()> {
        descriptor.params.validate()?;
        if self.find(&descriptor.id).is_some() {
            return Err(CoreError::InvalidParameter(format!(
                "duplicate effect id: {}",
                descriptor.id
            )));
        }
        if descriptor.targets.is_empty() {
            warn!(effect = %descriptor.id, "effect has no target fixtures");
        }
        debug!(effect = %descriptor.id, kind = ?descriptor.kind, "effect added");
        self.instances.push(EffectInstance::new(descriptor));
        Ok(())
    }

    /// Remove an effect entirely
    pub fn remove(&mut self, id: &EffectId) -> Result<()> {
        let before = self.instances.len();
        self.instances.retain(|i| &i.descriptor.id != id);
        if self.instances.len() == before {
            return Err(CoreError::InvalidParameter(format!("unknown effect: {id}")));
        }
        Ok(())
    }

    /// Enable or disable an effect. Idempotent: disabling drops its state,
    /// re-enabling starts from fresh state.
    pub fn set_enabled(&mut self, id: &EffectId, enabled: bool) -> Result<()> {
        let instance = self
            .find_mut(id)
            .ok_or_else(|| CoreError::InvalidParameter(format!("unknown effect: {id}")))?;
        if instance.descriptor.enabled == enabled {
            return Ok(());
        }
        instance.descriptor.enabled = enabled;
        instance.state = enabled.then(EffectState::default);
        debug!(effect = %id, enabled, "effect toggled");
        Ok(())
    }

    /// Update a parameter by name (`speed`, `intensity`, `color`)
    pub fn set_param(&mut self, id: &EffectId, name: &str, value: ParamValue) -> Result<()> {
        let instance = self
            .find_mut(id)
            .ok_or_else(|| CoreError::InvalidParameter(format!("unknown effect: {id}")))?;
        let mut params = instance.descriptor.params;
        match (name, value) {
            ("speed", ParamValue::Number(v)) => params.speed = v,
            ("intensity", ParamValue::Number(v)) => params.intensity = v,
            ("color", ParamValue::Color(c)) => params.color = Some(c),
            _ => {
                return Err(CoreError::InvalidParameter(format!(
                    "unknown parameter {name:?} for effect {id}"
                )))
            }
        }
        params.validate()?;
        instance.descriptor.params = params;
        Ok(())
    }

    /// Whether an effect with this id exists
    pub fn contains(&self, id: &EffectId) -> bool {
        self.find(id).is_some()
    }

    /// Whether the given effect exists and is enabled
    pub fn is_enabled(&self, id: &EffectId) -> bool {
        self.find(id).map(|i| i.descriptor.enabled).unwrap_or(false)
    }

    /// Tick every enabled instance and collect their intents
    pub fn tick(
        &mut self,
        signal: &BeatSignal,
        energies: Option<&BandEnergySet>,
        dt: Duration,
    ) -> Vec<LightIntent> {
        let mut intents = Vec::new();
        for instance in &mut self.instances {
            instance.tick(signal, energies, dt, &mut intents);
        }
        intents
    }

    fn find(&self, id: &EffectId) -> Option<&EffectInstance> {
        self.instances.iter().find(|i| &i.descriptor.id == id)
    }

    fn find_mut(&mut self, id: &EffectId) -> Option<&mut EffectInstance> {
        self.instances.iter_mut().find(|i| &i.descriptor.id == id)
    }
}
