//! Status LED multiplexing.
//!
//! Each indicator has a stored preference (brightness + on/off). The network
//! indicator additionally shows connectivity problems by blinking, which
//! overrides the preference until the broker session is up (or MQTT is
//! disabled). LEDs are active-low: PWM level `PWM_MAX` is dark.

use crate::consts::{
    BLINK_AWAITING_BROKER_MS, BLINK_NO_NETWORK_MS, BLINK_RECONNECTING_MS, PWM_MAX,
};
use crate::session::Phase;
use serde::{Deserialize, Serialize};

/// Stored indicator setting. Serialized as `{"brightness":<int>,"state":"ON"|"OFF"}`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorPreference {
    /// 0..=PWM_MAX
    pub brightness: u16,
    #[serde(rename = "state", with = "on_off")]
    pub on: bool,
}

impl Default for IndicatorPreference {
    fn default() -> Self {
        Self {
            brightness: PWM_MAX / 2,
            on: true,
        }
    }
}

impl IndicatorPreference {
    /// Steady PWM level for this preference.
    pub fn pwm_level(&self) -> u16 {
        if self.on {
            PWM_MAX - self.brightness.min(PWM_MAX)
        } else {
            PWM_MAX
        }
    }
}

/// "ON"/"OFF" strings for booleans; any letter case is accepted on input.
pub mod on_off {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(value: &str) -> Option<bool> {
        if value.eq_ignore_ascii_case("ON") {
            Some(true)
        } else if value.eq_ignore_ascii_case("OFF") {
            Some(false)
        } else {
            None
        }
    }

    pub fn serialize<S: Serializer>(on: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *on { "ON" } else { "OFF" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("expected ON or OFF, got '{}'", raw)))
    }
}

/// Connectivity facts the network indicator reacts to.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct LinkState {
    pub phase: Phase,
    /// Device has network reachability (not in access point mode).
    pub network_up: bool,
    /// A broker session was established before and got lost.
    pub reconnecting: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum IndicatorMode {
    Blink { interval_ms: u64 },
    Steady { level: u16 },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct IndicatorOutput {
    pub mode: IndicatorMode,
    /// Instantaneous PWM level for the pin.
    pub level: u16,
}

/// Blink cadence for the link, or None when the preference applies.
pub fn blink_interval(link: &LinkState) -> Option<u64> {
    match link.phase {
        Phase::NotConfigured | Phase::Connected => None,
        Phase::Connecting | Phase::Disconnected => Some(if !link.network_up {
            BLINK_NO_NETWORK_MS
        } else if link.reconnecting {
            BLINK_RECONNECTING_MS
        } else {
            BLINK_AWAITING_BROKER_MS
        }),
    }
}

/// Drives one indicator pin.
#[derive(Debug)]
pub struct IndicatorMux {
    /// Show connectivity blinking on this indicator.
    follows_link: bool,
    /// Last level written to the pin.
    applied: Option<u16>,
}

impl IndicatorMux {
    pub fn new(follows_link: bool) -> Self {
        Self {
            follows_link,
            applied: None,
        }
    }

    /// Pure computation of the indicator output at `now`. Blink phases are
    /// derived from the clock, so repeated calls give the same answer.
    pub fn compute_output(
        &self,
        link: &LinkState,
        preference: &IndicatorPreference,
        now: u64,
    ) -> IndicatorOutput {
        let blink = if self.follows_link {
            blink_interval(link)
        } else {
            None
        };

        match blink {
            Some(interval_ms) => {
                let lit = (now / interval_ms) % 2 == 0;
                IndicatorOutput {
                    mode: IndicatorMode::Blink { interval_ms },
                    level: if lit { 0 } else { PWM_MAX },
                }
            }
            None => {
                let level = preference.pwm_level();
                IndicatorOutput {
                    mode: IndicatorMode::Steady { level },
                    level,
                }
            }
        }
    }

    /// Compute the output and return the level to write, only if it differs
    /// from what the pin already has.
    pub fn update(
        &mut self,
        link: &LinkState,
        preference: &IndicatorPreference,
        now: u64,
    ) -> Option<u16> {
        let level = self.compute_output(link, preference, now).level;
        if self.applied == Some(level) {
            return None;
        }
        self.applied = Some(level);
        Some(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(phase: Phase, network_up: bool, reconnecting: bool) -> LinkState {
        LinkState {
            phase,
            network_up,
            reconnecting,
        }
    }

    #[test]
    fn steady_polarity_is_active_low() {
        let on = IndicatorPreference {
            brightness: 0,
            on: true,
        };
        assert_eq!(on.pwm_level(), PWM_MAX);

        let full = IndicatorPreference {
            brightness: PWM_MAX,
            on: true,
        };
        assert_eq!(full.pwm_level(), 0);

        let mid = IndicatorPreference {
            brightness: 300,
            on: true,
        };
        assert_eq!(mid.pwm_level(), PWM_MAX - 300);

        let off = IndicatorPreference {
            brightness: 300,
            on: false,
        };
        assert_eq!(off.pwm_level(), PWM_MAX);
    }

    #[test]
    fn blink_reasons() {
        assert_eq!(
            blink_interval(&link(Phase::Connecting, false, false)),
            Some(BLINK_NO_NETWORK_MS)
        );
        assert_eq!(
            blink_interval(&link(Phase::Connecting, true, false)),
            Some(BLINK_AWAITING_BROKER_MS)
        );
        assert_eq!(
            blink_interval(&link(Phase::Disconnected, true, true)),
            Some(BLINK_RECONNECTING_MS)
        );
        assert_eq!(blink_interval(&link(Phase::Connected, true, false)), None);
        assert_eq!(
            blink_interval(&link(Phase::NotConfigured, false, false)),
            None
        );
    }

    #[test]
    fn blink_toggles_with_clock() {
        let mux = IndicatorMux::new(true);
        let l = link(Phase::Connecting, true, false);
        let pref = IndicatorPreference::default();

        let a = mux.compute_output(&l, &pref, 0);
        let b = mux.compute_output(&l, &pref, 499);
        let c = mux.compute_output(&l, &pref, 500);
        assert_eq!(
            a.mode,
            IndicatorMode::Blink {
                interval_ms: BLINK_AWAITING_BROKER_MS
            }
        );
        assert_eq!(a.level, 0);
        assert_eq!(b.level, 0);
        assert_eq!(c.level, PWM_MAX);
    }

    #[test]
    fn connected_reverts_to_preference() {
        let mut mux = IndicatorMux::new(true);
        let pref = IndicatorPreference {
            brightness: 1000,
            on: true,
        };

        assert_eq!(
            mux.update(&link(Phase::Connecting, true, false), &pref, 0),
            Some(0)
        );
        assert_eq!(
            mux.update(&link(Phase::Connected, true, false), &pref, 10),
            Some(23)
        );
    }

    #[test]
    fn non_following_indicator_never_blinks() {
        let mux = IndicatorMux::new(false);
        let pref = IndicatorPreference {
            brightness: 100,
            on: true,
        };
        let out = mux.compute_output(&link(Phase::Connecting, false, false), &pref, 0);
        assert_eq!(out.mode, IndicatorMode::Steady { level: PWM_MAX - 100 });
    }

    #[test]
    fn update_is_idempotent() {
        let mut mux = IndicatorMux::new(true);
        let l = link(Phase::Connected, true, false);
        let pref = IndicatorPreference::default();

        assert_eq!(
            mux.compute_output(&l, &pref, 42),
            mux.compute_output(&l, &pref, 42)
        );
        assert!(mux.update(&l, &pref, 42).is_some());
        assert_eq!(mux.update(&l, &pref, 42), None);
        assert_eq!(mux.update(&l, &pref, 43), None);
    }

    #[test]
    fn preference_survives_persistence() {
        let pref = IndicatorPreference {
            brightness: 777,
            on: true,
        };
        let stored = serde_yaml::to_string(&pref).unwrap();
        let restored: IndicatorPreference = serde_yaml::from_str(&stored).unwrap();
        assert_eq!(restored.pwm_level(), pref.pwm_level());

        let json = serde_json::to_string(&pref).unwrap();
        assert_eq!(json, r#"{"brightness":777,"state":"ON"}"#);
    }

    #[test]
    fn state_is_case_insensitive() {
        let pref: IndicatorPreference =
            serde_json::from_str(r#"{"brightness":5,"state":"off"}"#).unwrap();
        assert!(!pref.on);
        assert!(serde_json::from_str::<IndicatorPreference>(r#"{"brightness":5,"state":"dim"}"#)
            .is_err());
    }
}
