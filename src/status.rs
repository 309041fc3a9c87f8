use crate::gesture::Gesture;
use crate::indicator::IndicatorPreference;
use crate::mode::OperatingMode;
use serde::Serialize;
use std::collections::BTreeMap;

/// Device state as reported to MQTT subscribers and the HTTP status page.
/// Built fresh for every report.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub relay: bool,
    #[serde(rename = "switch")]
    pub gesture: Gesture,
    pub mode: OperatingMode,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub indicators: BTreeMap<String, IndicatorPreference>,
}

impl StatusSnapshot {
    pub fn new(
        relay: bool,
        gesture: Gesture,
        mode: OperatingMode,
        indicators: &BTreeMap<String, IndicatorPreference>,
    ) -> Self {
        Self {
            relay,
            gesture,
            mode,
            indicators: indicators.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("All should be serializable")
    }
}
