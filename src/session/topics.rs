use crate::consts::{TOPIC_MODE, TOPIC_RELAY, TOPIC_SET, TOPIC_STATUS};
use std::collections::BTreeMap;

/// Channels of one indicator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IndicatorTopics {
    /// `<N>/<Indicator>`: current state, published.
    pub state: String,
    /// `<N>/<Indicator>/set`: commands, subscribed.
    pub set: String,
}

/// All channel names of a device, derived from its name.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Topics {
    /// `<N>/Status`, publish only.
    pub status: String,
    /// `<N>/Relay`, subscribed.
    pub relay: String,
    /// `<N>/Mode`, subscribed.
    pub mode: String,
    pub indicators: BTreeMap<String, IndicatorTopics>,
}

impl Topics {
    pub fn new<'a, I>(device_name: &str, indicators: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let indicators = indicators
            .into_iter()
            .map(|name| {
                let state = format!("{}/{}", device_name, name);
                let set = format!("{}/{}", state, TOPIC_SET);
                (name.to_string(), IndicatorTopics { state, set })
            })
            .collect();

        Self {
            status: format!("{}/{}", device_name, TOPIC_STATUS),
            relay: format!("{}/{}", device_name, TOPIC_RELAY),
            mode: format!("{}/{}", device_name, TOPIC_MODE),
            indicators,
        }
    }

    /// Every channel we subscribe to after connecting.
    pub fn subscriptions(&self) -> Vec<&str> {
        let mut topics = vec![self.relay.as_str(), self.mode.as_str()];
        topics.extend(self.indicators.values().map(|t| t.set.as_str()));
        topics
    }

    /// Indicator addressed by a `/set` channel.
    pub fn indicator_for_set(&self, topic: &str) -> Option<&str> {
        self.indicators
            .iter()
            .find(|(_, t)| t.set == topic)
            .map(|(name, _)| name.as_str())
    }
}
