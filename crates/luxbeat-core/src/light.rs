//! Light domain types: fixture identifiers, colors, and light intents.

use crate::effect::EffectId;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of one independently addressable light fixture.
///
/// Discovery assigns these; the engine treats them as opaque keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureId(pub String);

impl FixtureId {
    /// Create a fixture id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FixtureId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// HSB color with an optional color temperature.
///
/// Hue, saturation and brightness are normalized to [0,1]; kelvin is the
/// usual 1500-9000 lamp range and only meaningful for fixtures that
/// advertise temperature support.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Hue position on the color wheel, [0,1)
    pub hue: f32,
    /// Saturation, [0,1]
    pub saturation: f32,
    /// Brightness, [0,1]
    pub brightness: f32,
    /// Color temperature in kelvin, 1500-9000
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kelvin: Option<u16>,
}

impl Color {
    /// Full HSB color without a temperature component
    pub fn hsb(hue: f32, saturation: f32, brightness: f32) -> Self {
        Self {
            hue,
            saturation,
            brightness,
            kelvin: None,
        }
    }

    /// Neutral white at the given brightness
    pub fn white(brightness: f32) -> Self {
        Self {
            hue: 0.0,
            saturation: 0.0,
            brightness,
            kelvin: Some(3500),
        }
    }

    /// All channels zero (lamp visually off)
    pub fn off() -> Self {
        Self::white(0.0)
    }

    /// Check all channels are inside their valid ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.hue) || !self.hue.is_finite() {
            return Err(CoreError::InvalidParameter(format!(
                "hue out of range: {}",
                self.hue
            )));
        }
        if !(0.0..=1.0).contains(&self.saturation) || !self.saturation.is_finite() {
            return Err(CoreError::InvalidParameter(format!(
                "saturation out of range: {}",
                self.saturation
            )));
        }
        if !(0.0..=1.0).contains(&self.brightness) || !self.brightness.is_finite() {
            return Err(CoreError::InvalidParameter(format!(
                "brightness out of range: {}",
                self.brightness
            )));
        }
        if let Some(k) = self.kelvin {
            if !(1500..=9000).contains(&k) {
                return Err(CoreError::InvalidParameter(format!(
                    "kelvin out of range: {k}"
                )));
            }
        }
        Ok(())
    }

    /// Return a copy with every channel clamped into range
    pub fn clamped(&self) -> Self {
        Self {
            hue: self.hue.rem_euclid(1.0),
            saturation: self.saturation.clamp(0.0, 1.0),
            brightness: self.brightness.clamp(0.0, 1.0),
            kelvin: self.kelvin.map(|k| k.clamp(1500, 9000)),
        }
    }

    /// Whether two colors are indistinguishable within `tolerance`.
    ///
    /// Hue distance is measured around the wheel. Used by the scheduler to
    /// suppress redundant commands.
    pub fn approx_eq(&self, other: &Color, tolerance: f32) -> bool {
        let dh = {
            let d = (self.hue - other.hue).abs();
            d.min(1.0 - d)
        };
        // Hue is irrelevant when both colors are fully desaturated.
        let hue_matters = self.saturation > tolerance || other.saturation > tolerance;
        (!hue_matters || dh <= tolerance)
            && (self.saturation - other.saturation).abs() <= tolerance
            && (self.brightness - other.brightness).abs() <= tolerance
            && self.kelvin == other.kelvin
    }
}

/// One effect's desired state for one fixture, produced each tick.
///
/// Intents are ephemeral: the scheduler consumes them immediately and they
/// are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LightIntent {
    /// Target fixture
    pub fixture: FixtureId,
    /// Desired color
    pub color: Color,
    /// Fade duration toward the desired color
    pub transition: Duration,
    /// Conflict-resolution priority (higher wins)
    pub priority: i32,
    /// Effect instance that produced this intent
    pub source_effect: EffectId,
}
