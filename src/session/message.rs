use crate::consts::PWM_MAX;
use crate::indicator::{on_off, IndicatorPreference};
use crate::mode::OperatingMode;
use serde::Deserialize;
use tracing::warn;

/// Publish packet as received from the broker.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }
    }
}

/// Commands the remote controller sends to us.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Incoming {
    /// Engage ("ON") or release (anything else) the relay.
    SetRelay(bool),
    SetMode(OperatingMode),
    SetIndicator {
        /// Indicator name, eg. NetworkLed.
        name: String,
        update: IndicatorUpdate,
    },
}

/// Partial indicator change; at least one field is set.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IndicatorUpdate {
    pub on: Option<bool>,
    /// Already clamped to 0..=PWM_MAX.
    pub brightness: Option<u16>,
}

impl IndicatorUpdate {
    /// Parse `{"state":"ON"|"OFF","brightness":<int>}`. State is
    /// case-insensitive, brightness is clamped. Returns None on garbage.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        #[derive(Deserialize)]
        struct Raw {
            state: Option<String>,
            brightness: Option<i64>,
        }

        let raw: Raw = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    "Malformed indicator payload '{}': {}",
                    String::from_utf8_lossy(payload),
                    err
                );
                return None;
            }
        };

        let on = match raw.state.as_deref() {
            None => None,
            Some(state) => match on_off::parse(state) {
                Some(on) => Some(on),
                None => {
                    warn!("Invalid indicator state '{}', ignoring message", state);
                    return None;
                }
            },
        };
        let brightness = raw
            .brightness
            .map(|b| b.clamp(0, PWM_MAX as i64) as u16);

        if on.is_none() && brightness.is_none() {
            warn!("Indicator payload carries neither state nor brightness");
            return None;
        }
        Some(Self { on, brightness })
    }

    pub fn apply(&self, preference: &IndicatorPreference) -> IndicatorPreference {
        IndicatorPreference {
            brightness: self.brightness.unwrap_or(preference.brightness),
            on: self.on.unwrap_or(preference.on),
        }
    }
}
