use crate::consts::{
    BUTTON_LED, DEFAULT_LONG_PRESS_MS, DEFAULT_PUBLISH_INTERVAL_MS, MAX_LONG_PRESS_MS,
    MIN_LONG_PRESS_MS, NETWORK_LED, PWM_MAX,
};
use crate::indicator::IndicatorPreference;
use crate::mode::OperatingMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Six-octet hardware (MAC) address, written as `aa:bb:cc:dd:ee:ff`.
#[derive(Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareAddress(pub [u8; 6]);

impl HardwareAddress {
    /// All zeroes, the default when the address was never provisioned.
    pub fn is_unset(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl FromStr for HardwareAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c: char| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Hardware address '{}' is too short", s))?;
            if part.len() != 2 {
                anyhow::bail!("Invalid octet '{}' in hardware address '{}'", part, s);
            }
            *octet = u8::from_str_radix(part, 16)?;
        }
        if parts.next().is_some() {
            anyhow::bail!("Hardware address '{}' is too long", s);
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for HardwareAddress {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl From<HardwareAddress> for String {
    fn from(addr: HardwareAddress) -> String {
        addr.to_string()
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl fmt::Debug for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareAddress({})", self)
    }
}

#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MqttConfig {
    /// Broker hostname. Empty disables MQTT entirely.
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 1883,
            username: "homeassistant".to_string(),
            password: String::new(),
        }
    }
}

impl MqttConfig {
    pub fn enabled(&self) -> bool {
        !self.server.is_empty()
    }
}

// Keep the password out of the logs.
impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Prefix of every MQTT topic.
    pub device_name: String,
    pub hardware_address: HardwareAddress,
    pub mqtt: MqttConfig,
    pub long_press_ms: u64,
    pub publish_interval_ms: u64,
    /// Persisted; changed by long presses and remote commands.
    pub mode: OperatingMode,
    /// Persisted; changed by remote commands.
    pub indicators: BTreeMap<String, IndicatorPreference>,
}

impl Default for Config {
    fn default() -> Self {
        let mut indicators = BTreeMap::new();
        indicators.insert(NETWORK_LED.to_string(), IndicatorPreference::default());
        Self {
            device_name: "T4EU".to_string(),
            hardware_address: HardwareAddress::default(),
            mqtt: MqttConfig::default(),
            long_press_ms: DEFAULT_LONG_PRESS_MS,
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
            mode: OperatingMode::Basic,
            indicators,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let handle = File::open(filename)?;
        let data: Config = serde_yaml::from_reader(handle)?;

        Ok(data)
    }

    /// Range checks. Components downstream trust these values.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(MIN_LONG_PRESS_MS..=MAX_LONG_PRESS_MS).contains(&self.long_press_ms) {
            anyhow::bail!(
                "long_press_ms {} outside of [{}, {}]",
                self.long_press_ms,
                MIN_LONG_PRESS_MS,
                MAX_LONG_PRESS_MS
            );
        }
        if self.device_name.is_empty() {
            anyhow::bail!("device_name must not be empty");
        }
        if self.device_name.contains(['/', '+', '#']) {
            anyhow::bail!(
                "device_name '{}' must not contain '/', '+' or '#'",
                self.device_name
            );
        }
        if self.mqtt.port == 0 {
            anyhow::bail!("mqtt.port must not be 0");
        }
        for (name, pref) in &self.indicators {
            if name != NETWORK_LED && name != BUTTON_LED {
                anyhow::bail!(
                    "Unknown indicator '{}'. Known: {}, {}",
                    name,
                    NETWORK_LED,
                    BUTTON_LED
                );
            }
            if pref.brightness > PWM_MAX {
                anyhow::bail!(
                    "Indicator {} brightness {} above {}",
                    name,
                    pref.brightness,
                    PWM_MAX
                );
            }
        }
        Ok(())
    }
}

/// Persists the mutable part of the configuration.
pub trait Store {
    fn save(&mut self, config: &Config) -> anyhow::Result<()>;
}

/// Writes the whole configuration back to its YAML file.
pub struct YamlStore {
    path: PathBuf,
}

impl YamlStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl Store for YamlStore {
    fn save(&mut self, config: &Config) -> anyhow::Result<()> {
        let data = serde_yaml::to_string(config)?;
        // Sibling file + rename, the original stays intact until the swap.
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }
}
