//! DJ sync events (OS2L-style).
//!
//! The DJ application pushes newline-delimited JSON objects tagged by an
//! `evt` field: `beat` (beat grid + BPM), `cmd` (a bound control value) and
//! `btn` (button/deck state). Session handling of the socket itself is
//! external; this module only decodes and validates single messages into
//! engine-facing [`SyncEvent`]s. Arrival order is event order, and the
//! estimator tolerates missing or duplicated events.

use crate::error::{ControlError, Result};
use luxbeat_core::beat::BeatEvent;
use serde::Deserialize;

/// Raw wire message, tagged by `evt`
#[derive(Debug, Deserialize)]
#[serde(tag = "evt", rename_all = "lowercase")]
enum WireMessage {
    Beat {
        pos: i64,
        bpm: f32,
        #[serde(default = "default_strength")]
        strength: f32,
        #[serde(default)]
        change: bool,
    },
    Cmd {
        id: u8,
        param: f32,
    },
    Btn {
        name: String,
        state: String,
        #[serde(default)]
        page: Option<String>,
    },
}

fn default_strength() -> f32 {
    100.0
}

/// A validated, engine-facing sync event
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A beat on the deck's beat grid
    Beat(BeatEvent),
    /// A bound control value, normalized to [0,1]
    Command {
        /// Command slot, 1-4
        id: u8,
        /// Normalized value
        value: f32,
    },
    /// A button or deck state change
    Button {
        /// Button name (deck selectors arrive here)
        name: String,
        /// Pressed/released
        pressed: bool,
        /// Optional page the button lives on
        page: Option<String>,
    },
}

/// Decode and validate one sync protocol message.
///
/// Out-of-range fields are rejected rather than clamped: a deck reporting a
/// BPM of 0 or a strength of 400 is feeding us garbage, and garbage must
/// not reach the estimator.
pub fn parse_sync_message(text: &str) -> Result<SyncEvent> {
    let message: WireMessage = serde_json::from_str(text)?;
    match message {
        WireMessage::Beat {
            pos,
            bpm,
            strength,
            change,
        } => {
            if !(30.0..=300.0).contains(&bpm) {
                return Err(ControlError::InvalidMessage(format!(
                    "beat bpm out of range: {bpm}"
                )));
            }
            if !(0.0..=100.0).contains(&strength) {
                return Err(ControlError::InvalidMessage(format!(
                    "beat strength out of range: {strength}"
                )));
            }
            Ok(SyncEvent::Beat(BeatEvent {
                position: pos,
                bpm,
                strength: strength / 100.0,
                tempo_changed: change,
            }))
        }
        WireMessage::Cmd { id, param } => {
            if !(1..=4).contains(&id) {
                return Err(ControlError::InvalidMessage(format!(
                    "cmd id out of range: {id}"
                )));
            }
            if !(0.0..=100.0).contains(&param) {
                return Err(ControlError::InvalidMessage(format!(
                    "cmd param out of range: {param}"
                )));
            }
            Ok(SyncEvent::Command {
                id,
                value: param / 100.0,
            })
        }
        WireMessage::Btn { name, state, page } => {
            if name.is_empty() {
                return Err(ControlError::InvalidMessage("empty button name".into()));
            }
            let pressed = match state.as_str() {
                "on" => true,
                "off" => false,
                other => {
                    return Err(ControlError::InvalidMessage(format!(
                        "invalid button state: {other:?}"
                    )))
                }
            };
            Ok(SyncEvent::Button {
                name,
                pressed,
                page,
            })
        }
    }
}
