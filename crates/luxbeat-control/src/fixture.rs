//! The fixture adapter boundary.
//!
//! Discovery, transport and session handling for real lights live outside
//! the engine; it only consumes a list of fixture ids with capability
//! descriptors and pushes commands through the [`FixtureAdapter`] trait.

use crate::error::DispatchError;
use luxbeat_core::{Color, FixtureId};
use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// What one fixture can do, as reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureCapabilities {
    /// Fixture can render hue/saturation
    pub supports_color: bool,
    /// Fixture can render a color temperature
    pub supports_kelvin: bool,
    /// Minimum spacing the hardware tolerates between commands
    pub min_command_interval: Duration,
}

impl Default for FixtureCapabilities {
    fn default() -> Self {
        Self {
            supports_color: true,
            supports_kelvin: true,
            min_command_interval: Duration::from_millis(50),
        }
    }
}

/// One known fixture: id plus capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureInfo {
    /// Fixture id assigned by discovery
    pub id: FixtureId,
    /// Capability descriptor
    #[serde(default)]
    pub capabilities: FixtureCapabilities,
}

impl FixtureInfo {
    /// A fixture with default capabilities
    pub fn new(id: impl Into<FixtureId>) -> Self {
        Self {
            id: id.into(),
            capabilities: FixtureCapabilities::default(),
        }
    }
}

/// The resolved command the scheduler hands to an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCommand {
    /// Target color
    pub color: Color,
    /// Fade duration toward the target
    pub transition: Duration,
}

impl LightCommand {
    /// Clamp the command to what the fixture can actually render:
    /// desaturate for fixtures without color, drop kelvin when unsupported.
    pub fn respecting(&self, caps: &FixtureCapabilities) -> LightCommand {
        let mut color = self.color;
        if !caps.supports_color {
            color.hue = 0.0;
            color.saturation = 0.0;
        }
        if !caps.supports_kelvin {
            color.kelvin = None;
        }
        LightCommand {
            color,
            transition: self.transition,
        }
    }

    /// Whether two commands would be visually identical within `tolerance`.
    ///
    /// Transition time is not compared: two fades toward the same target
    /// end in the same state, so the second is redundant.
    pub fn approx_eq(&self, other: &LightCommand, tolerance: f32) -> bool {
        self.color.approx_eq(&other.color, tolerance)
    }

    /// The command's color as linear-ish sRGB components in [0,1], for
    /// adapters that only speak RGB.
    pub fn rgb(&self) -> (f32, f32, f32) {
        let hsv = Hsv::new(
            self.color.hue * 360.0,
            self.color.saturation,
            self.color.brightness,
        );
        let rgb = Srgb::from_color(hsv);
        (rgb.red, rgb.green, rgb.blue)
    }
}

/// Async boundary to one light transport.
///
/// `send` resolves when the command has been handed to the hardware (or the
/// transport gave up). Implementations must tolerate concurrent sends to
/// *different* fixtures; the scheduler serializes sends per fixture.
pub trait FixtureAdapter: Send + Sync + 'static {
    /// Deliver one command to one fixture
    fn send(
        &self,
        fixture: &FixtureId,
        command: &LightCommand,
    ) -> impl Future<Output = std::result::Result<(), DispatchError>> + Send;
}
