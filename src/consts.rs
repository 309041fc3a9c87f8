// Timing, PWM range and channel naming shared by the control core.

/// Software version
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const RELAY_NAME: &str = "smart-relay";

/// Full-scale PWM value. LEDs are active-low: `PWM_MAX` is dark, `0` is fully lit.
pub const PWM_MAX: u16 = 1023;

/// Press duration after which a held button counts as a long press.
pub const DEFAULT_LONG_PRESS_MS: u64 = 2000;
pub const MIN_LONG_PRESS_MS: u64 = 100;
pub const MAX_LONG_PRESS_MS: u64 = 60_000;

/// Fixed delay between broker connection attempts. Not exponential.
pub const RECONNECT_BACKOFF_MS: u64 = 5000;
/// Delay between periodic status publications.
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 10_000;
pub const MQTT_KEEP_ALIVE_SECS: u64 = 5;

/// Blink cadences of the network indicator.
pub const BLINK_NO_NETWORK_MS: u64 = 2000;
pub const BLINK_AWAITING_BROKER_MS: u64 = 500;
pub const BLINK_RECONNECTING_MS: u64 = 100;

/// Client identifiers are `<prefix>-<low 3 octets of the hardware address>`.
pub const CLIENT_ID_PREFIX: &str = "SmartRelay";

// Channel suffixes, appended to `<device name>/`.
pub const TOPIC_STATUS: &str = "Status";
pub const TOPIC_RELAY: &str = "Relay";
pub const TOPIC_MODE: &str = "Mode";
pub const TOPIC_SET: &str = "set";

/// Indicator that mirrors connectivity with blink patterns.
pub const NETWORK_LED: &str = "NetworkLed";
/// Optional indicator under the button. Always steady.
pub const BUTTON_LED: &str = "ButtonLed";
