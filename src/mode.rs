//! Operating mode policy: maps button gestures onto relay actions.
//!
//! In `Basic` mode the button toggles the relay locally. In `Smart` mode the
//! relay is closed when the broker session comes up so that smart bulbs
//! behind it keep power. From then on the button leaves the relay alone and
//! the remote controller reacts to the published gestures instead. Without a
//! broker session a `Smart` device falls back to `Basic` behavior. A long
//! press while `Smart` and connected demotes the device to `Basic`.

use crate::gesture::Gesture;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    #[default]
    Basic,
    Smart,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Basic => "BASIC",
            OperatingMode::Smart => "SMART",
        }
    }

    /// Exact, case-sensitive match on the mode name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BASIC" => Some(OperatingMode::Basic),
            "SMART" => Some(OperatingMode::Smart),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RelayAction {
    None,
    Toggle,
    ForceOn,
    ForceOff,
}

impl RelayAction {
    /// New relay state after applying this action to `current`.
    pub fn apply(self, current: bool) -> bool {
        match self {
            RelayAction::None => current,
            RelayAction::Toggle => !current,
            RelayAction::ForceOn => true,
            RelayAction::ForceOff => false,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Decision {
    pub relay: RelayAction,
    pub mode_change: Option<OperatingMode>,
}

impl Decision {
    fn relay(relay: RelayAction) -> Self {
        Self {
            relay,
            mode_change: None,
        }
    }
}

/// Called only when the gesture classifier reports a change.
pub fn on_gesture_changed(gesture: Gesture, mode: OperatingMode, connected: bool) -> Decision {
    match (mode, connected) {
        (OperatingMode::Smart, true) => match gesture {
            Gesture::PressedLong => Decision {
                relay: RelayAction::ForceOff,
                mode_change: Some(OperatingMode::Basic),
            },
            // The remote controller owns the relay.
            _ => Decision::relay(RelayAction::None),
        },
        // Basic, or Smart without a remote controller.
        _ => match gesture {
            Gesture::ReleasedShort => Decision::relay(RelayAction::Toggle),
            _ => Decision::relay(RelayAction::None),
        },
    }
}

/// Relay action when the mode or the broker link changes without a gesture.
/// Entering Smart+connected closes the relay.
pub fn on_link_changed(mode: OperatingMode, connected: bool) -> RelayAction {
    match (mode, connected) {
        (OperatingMode::Smart, true) => RelayAction::ForceOn,
        _ => RelayAction::None,
    }
}
