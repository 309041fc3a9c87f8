use super::{Incoming, IndicatorUpdate, Topics, Transport};
use crate::config::{Config, HardwareAddress, MqttConfig};
use crate::consts::{CLIENT_ID_PREFIX, RECONNECT_BACKOFF_MS};
use crate::mode::OperatingMode;
use crate::status::StatusSnapshot;
use tracing::{debug, error, info, warn};

/// Broker session lifecycle.
/// NotConfigured -> Connecting -> Connected <-> Disconnected -> Connecting ...
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Phase {
    /// Broker address empty. Nothing is attempted until reconfigured.
    NotConfigured,
    Connecting,
    Connected,
    Disconnected,
}

/// Client identifier derived from the low 3 octets of the hardware address.
pub fn client_id(hw: &HardwareAddress) -> String {
    format!(
        "{}-{:02x}{:02x}{:02x}",
        CLIENT_ID_PREFIX, hw.0[3], hw.0[4], hw.0[5]
    )
}

/// Owns the broker connection: retries, subscriptions, status publishing
/// and decoding of inbound commands.
pub struct Session<T: Transport> {
    transport: T,
    client_id: String,
    /// None when MQTT is disabled.
    broker: Option<MqttConfig>,
    topics: Topics,
    phase: Phase,
    /// Time of the last failed attempt. None allows an immediate attempt.
    last_attempt: Option<u64>,
    /// None forces the next publish.
    last_publish: Option<u64>,
    /// A session was up at some point since the last configure.
    established: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            client_id: String::new(),
            broker: None,
            topics: Topics::default(),
            phase: Phase::NotConfigured,
            last_attempt: None,
            last_publish: None,
            established: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Lost a session that was up, and trying to get it back.
    pub fn reconnecting(&self) -> bool {
        self.established && matches!(self.phase, Phase::Connecting | Phase::Disconnected)
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Apply broker settings and rebuild channel names. Drops any live session.
    pub fn configure(&mut self, config: &Config) {
        if self.phase == Phase::Connected {
            info!("Reconfigured, closing MQTT session");
            self.transport.disconnect();
        }

        self.client_id = client_id(&config.hardware_address);
        self.topics = Topics::new(
            &config.device_name,
            config.indicators.keys().map(String::as_str),
        );
        self.last_attempt = None;
        self.last_publish = None;
        self.established = false;

        if config.mqtt.enabled() {
            self.broker = Some(config.mqtt.clone());
            self.phase = Phase::Connecting;
            if config.hardware_address.is_unset() {
                warn!(
                    "hardware_address not set, client id {} is shared with every unprovisioned device",
                    self.client_id
                );
            }
            info!(
                "MQTT broker {}:{}, client {}",
                config.mqtt.server, config.mqtt.port, self.client_id
            );
        } else {
            self.broker = None;
            self.phase = Phase::NotConfigured;
            info!("MQTT server not set, not connecting");
        }
    }

    /// Close the session for good; only `configure` starts it again.
    pub async fn close(&mut self) {
        if self.phase == Phase::Connected {
            info!("Closing MQTT session");
        }
        self.transport.close().await;
        self.broker = None;
        self.phase = Phase::NotConfigured;
    }

    /// Keep the session alive, reconnect when due, and return the commands
    /// received in this tick.
    pub async fn tick(&mut self, now: u64) -> Vec<Incoming> {
        let mut commands = Vec::new();
        if self.phase == Phase::NotConfigured {
            return commands;
        }

        if self.phase == Phase::Connected {
            let mut inbox = Vec::new();
            let result = self.transport.poll(&mut inbox).await;
            commands.extend(
                inbox
                    .iter()
                    .filter_map(|msg| self.on_message(&msg.topic, &msg.payload)),
            );
            if let Err(err) = result {
                warn!("MQTT session lost: {}", err);
                self.transport.disconnect();
                self.phase = Phase::Disconnected;
            }
        }

        if self.phase != Phase::Connected && self.attempt_due(now) {
            self.reconnect(now).await;
        }
        commands
    }

    fn attempt_due(&self, now: u64) -> bool {
        match self.last_attempt {
            None => true,
            Some(at) => now.saturating_sub(at) >= RECONNECT_BACKOFF_MS,
        }
    }

    async fn reconnect(&mut self, now: u64) {
        let Some(broker) = self.broker.as_ref() else {
            return;
        };
        self.phase = Phase::Connecting;

        let addr = match self.transport.resolve(&broker.server, broker.port).await {
            Ok(addr) => addr,
            Err(err) => {
                warn!(
                    "Unable to resolve hostname {}: {}. Trying again in {} ms",
                    broker.server, err, RECONNECT_BACKOFF_MS
                );
                self.last_attempt = Some(now);
                self.phase = Phase::Disconnected;
                return;
            }
        };

        info!(
            "Attempting MQTT connection to {}:{} ({})",
            broker.server, broker.port, addr
        );
        let result = self
            .transport
            .connect(addr, &self.client_id, &broker.username, &broker.password)
            .await;
        if let Err(err) = result {
            warn!(
                "MQTT connection failed: {}. Trying again in {} ms",
                err, RECONNECT_BACKOFF_MS
            );
            self.transport.disconnect();
            self.phase = Phase::Disconnected;
            self.last_attempt = Some(now);
            return;
        }

        for topic in self.topics.subscriptions() {
            if let Err(err) = self.transport.subscribe(topic) {
                error!("Unable to subscribe to {}: {}", topic, err);
                self.transport.disconnect();
                self.phase = Phase::Disconnected;
                self.last_attempt = Some(now);
                return;
            }
            debug!("Subscribed to {}", topic);
        }

        info!("MQTT connected as {}", self.client_id);
        self.phase = Phase::Connected;
        self.established = true;
        self.last_attempt = None;
        self.last_publish = None;
    }

    /// Make the next `publish_if_due` publish regardless of the interval.
    pub fn reset_publish_timer(&mut self) {
        self.last_publish = None;
    }

    /// Publish the status (and indicator states) when the interval elapsed
    /// or when `force` is set. Returns true if a publish happened.
    pub fn publish_if_due<F>(&mut self, now: u64, interval: u64, force: bool, snapshot: F) -> bool
    where
        F: FnOnce() -> StatusSnapshot,
    {
        if self.phase != Phase::Connected {
            return false;
        }
        let due = match self.last_publish {
            None => true,
            Some(at) => now.saturating_sub(at) > interval,
        };
        if !(due || force) {
            return false;
        }

        let snapshot = snapshot();
        let payload = snapshot.to_json();
        if let Err(err) = self.transport.publish(&self.topics.status, &payload) {
            warn!("Unable to publish status to {}: {}", self.topics.status, err);
            return false;
        }
        debug!("Published {} to {}", payload, self.topics.status);

        for (name, preference) in &snapshot.indicators {
            let Some(topics) = self.topics.indicators.get(name) else {
                continue;
            };
            let payload = serde_json::to_string(preference).expect("All should be serializable");
            if let Err(err) = self.transport.publish(&topics.state, &payload) {
                warn!("Unable to publish indicator state to {}: {}", topics.state, err);
            }
        }

        self.last_publish = Some(now);
        true
    }

    /// Decode a message received on one of our channels.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> Option<Incoming> {
        if topic == self.topics.relay {
            // Exact match only; everything else releases the relay.
            let on = payload == b"ON";
            info!("Relay command: {}", if on { "ON" } else { "OFF" });
            Some(Incoming::SetRelay(on))
        } else if topic == self.topics.mode {
            let name = String::from_utf8_lossy(payload);
            match OperatingMode::from_name(&name) {
                Some(mode) => {
                    info!("Mode command: {}", mode.as_str());
                    Some(Incoming::SetMode(mode))
                }
                None => {
                    warn!("Unknown mode '{}', ignoring", name);
                    None
                }
            }
        } else if let Some(name) = self.topics.indicator_for_set(topic) {
            let update = IndicatorUpdate::parse(payload)?;
            info!("Indicator {} command: {:?}", name, update);
            Some(Incoming::SetIndicator {
                name: name.to_string(),
                update,
            })
        } else {
            info!("Unknown topic {} - ignoring", topic);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::Gesture;
    use crate::session::InboundMessage;
    use std::collections::VecDeque;
    use std::net::SocketAddr;

    #[derive(Default)]
    struct FakeTransport {
        resolve_fails: bool,
        connect_fails: bool,
        poll_fails: bool,
        connected: bool,
        resolves: usize,
        /// (address, client id, username)
        connects: Vec<(SocketAddr, String, String)>,
        subscribed: Vec<String>,
        published: Vec<(String, String)>,
        pending: VecDeque<InboundMessage>,
    }

    impl Transport for FakeTransport {
        async fn resolve(&mut self, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
            self.resolves += 1;
            if self.resolve_fails {
                anyhow::bail!("Unknown host {}", host);
            }
            Ok(SocketAddr::from(([10, 0, 0, 2], port)))
        }

        async fn connect(
            &mut self,
            addr: SocketAddr,
            client_id: &str,
            username: &str,
            _password: &str,
        ) -> anyhow::Result<()> {
            self.connects
                .push((addr, client_id.to_string(), username.to_string()));
            if self.connect_fails {
                anyhow::bail!("Connection refused");
            }
            self.connected = true;
            Ok(())
        }

        fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
            self.subscribed.push(topic.to_string());
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &str) -> anyhow::Result<()> {
            if !self.connected {
                anyhow::bail!("No MQTT session");
            }
            self.published.push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        async fn poll(&mut self, inbox: &mut Vec<InboundMessage>) -> anyhow::Result<()> {
            if self.poll_fails {
                anyhow::bail!("Connection reset");
            }
            inbox.extend(self.pending.drain(..));
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    fn config(server: &str) -> Config {
        let mut config = Config::default();
        config.mqtt.server = server.to_string();
        config.hardware_address = HardwareAddress([0x5c, 0xcf, 0x7f, 0x0a, 0x1b, 0x2c]);
        config
    }

    fn session(config: &Config) -> Session<FakeTransport> {
        let mut session = Session::new(FakeTransport::default());
        session.configure(config);
        session
    }

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot::new(
            true,
            Gesture::Idle,
            OperatingMode::Basic,
            &Config::default().indicators,
        )
    }

    #[test]
    fn client_id_uses_low_octets() {
        let hw = HardwareAddress([0x5c, 0xcf, 0x7f, 0x0a, 0x1b, 0x2c]);
        assert_eq!(client_id(&hw), "SmartRelay-0a1b2c");
    }

    #[tokio::test]
    async fn empty_server_is_not_configured() {
        let mut s = session(&config(""));
        assert_eq!(s.phase(), Phase::NotConfigured);

        for now in [0, 5_000, 1_000_000] {
            assert!(s.tick(now).await.is_empty());
        }
        assert_eq!(s.phase(), Phase::NotConfigured);
        assert_eq!(s.transport().resolves, 0);
        assert!(!s.publish_if_due(1_000_000, 10, true, snapshot));
    }

    #[tokio::test]
    async fn connects_and_subscribes() {
        let mut s = session(&config("broker.local"));
        assert_eq!(s.phase(), Phase::Connecting);

        s.tick(0).await;
        assert_eq!(s.phase(), Phase::Connected);
        assert!(!s.reconnecting());

        let t = s.transport();
        assert_eq!(
            t.connects,
            vec![(
                SocketAddr::from(([10, 0, 0, 2], 1883)),
                "SmartRelay-0a1b2c".to_string(),
                "homeassistant".to_string()
            )]
        );
        assert_eq!(
            t.subscribed,
            vec!["T4EU/Relay", "T4EU/Mode", "T4EU/NetworkLed/set"]
        );
    }

    #[tokio::test]
    async fn resolve_failure_retries_on_fixed_backoff() {
        let mut s = session(&config("broker.local"));
        s.transport_mut().resolve_fails = true;

        s.tick(0).await;
        assert_eq!(s.phase(), Phase::Disconnected);
        assert_eq!(s.transport().resolves, 1);
        assert!(s.transport().connects.is_empty());

        s.tick(4_999).await;
        assert_eq!(s.transport().resolves, 1);
        s.tick(5_000).await;
        assert_eq!(s.transport().resolves, 2);

        s.transport_mut().resolve_fails = false;
        s.tick(9_999).await;
        assert_eq!(s.phase(), Phase::Disconnected);
        s.tick(10_000).await;
        assert_eq!(s.phase(), Phase::Connected);
    }

    #[tokio::test]
    async fn connect_failure_retries_indefinitely() {
        let mut s = session(&config("broker.local"));
        s.transport_mut().connect_fails = true;

        for attempt in 0..20u64 {
            s.tick(attempt * 5_000).await;
            s.tick(attempt * 5_000 + 2_500).await;
            assert_eq!(s.phase(), Phase::Disconnected);
        }
        assert_eq!(s.transport().connects.len(), 20);
        assert!(!s.reconnecting());
    }

    #[tokio::test]
    async fn lost_session_reconnects_immediately() {
        let mut s = session(&config("broker.local"));
        s.tick(0).await;
        assert_eq!(s.phase(), Phase::Connected);

        s.transport_mut().poll_fails = true;
        s.transport_mut().connect_fails = true;
        s.tick(100).await;
        assert_eq!(s.phase(), Phase::Disconnected);
        assert_eq!(s.transport().connects.len(), 2);
        assert!(s.reconnecting());

        s.transport_mut().poll_fails = false;
        s.transport_mut().connect_fails = false;
        s.tick(5_100).await;
        assert_eq!(s.phase(), Phase::Connected);
        assert!(!s.reconnecting());
    }

    #[tokio::test]
    async fn publishes_on_interval_or_when_forced() {
        let mut s = session(&config("broker.local"));
        assert!(!s.publish_if_due(0, 10_000, true, snapshot));

        s.tick(0).await;
        assert!(s.publish_if_due(0, 10_000, false, snapshot));
        assert!(!s.publish_if_due(5_000, 10_000, false, snapshot));
        assert!(!s.publish_if_due(10_000, 10_000, false, snapshot));
        assert!(s.publish_if_due(10_001, 10_000, false, snapshot));
        assert!(s.publish_if_due(10_002, 10_000, true, snapshot));

        s.reset_publish_timer();
        assert!(s.publish_if_due(10_003, 10_000, false, snapshot));

        let published = &s.transport().published;
        assert_eq!(published.len(), 8);
        assert_eq!(published[0].0, "T4EU/Status");
        assert_eq!(
            published[0].1,
            r#"{"relay":true,"switch":"IDLE","mode":"BASIC","indicators":{"NetworkLed":{"brightness":511,"state":"ON"}}}"#
        );
        assert_eq!(published[1].0, "T4EU/NetworkLed");
        assert_eq!(published[1].1, r#"{"brightness":511,"state":"ON"}"#);
    }

    #[tokio::test]
    async fn routes_inbound_commands() {
        let mut s = session(&config("broker.local"));
        s.tick(0).await;

        s.transport_mut().pending.extend([
            InboundMessage::new("T4EU/Relay", b"ON"),
            InboundMessage::new("T4EU/Relay", b"on"),
            InboundMessage::new("T4EU/Mode", b"SMART"),
            InboundMessage::new("T4EU/Mode", b"smart"),
            InboundMessage::new("T4EU/NetworkLed/set", br#"{"state":"on","brightness":2000}"#),
            InboundMessage::new("T4EU/NetworkLed/set", b"not json"),
            InboundMessage::new("T4EU/Status", b"{}"),
            InboundMessage::new("Other/Relay", b"ON"),
        ]);
        let commands = s.tick(10).await;

        assert_eq!(
            commands,
            vec![
                Incoming::SetRelay(true),
                Incoming::SetRelay(false),
                Incoming::SetMode(OperatingMode::Smart),
                Incoming::SetIndicator {
                    name: "NetworkLed".to_string(),
                    update: IndicatorUpdate {
                        on: Some(true),
                        brightness: Some(crate::consts::PWM_MAX),
                    },
                },
            ]
        );
        assert_eq!(s.phase(), Phase::Connected);
    }

    #[tokio::test]
    async fn clearing_server_drops_session() {
        let mut s = session(&config("broker.local"));
        s.tick(0).await;
        assert!(s.transport().connected);

        let mut renamed = config("");
        renamed.device_name = "Kitchen".to_string();
        s.configure(&renamed);
        assert!(!s.transport().connected);
        assert_eq!(s.phase(), Phase::NotConfigured);
        assert_eq!(s.topics().status, "Kitchen/Status");
    }

    #[tokio::test]
    async fn close_stops_retrying() {
        let mut s = session(&config("broker.local"));
        s.tick(0).await;
        s.close().await;
        assert!(!s.transport().connected);
        s.tick(60_000).await;
        assert_eq!(s.phase(), Phase::NotConfigured);
        assert_eq!(s.transport().connects.len(), 1);
    }
}
