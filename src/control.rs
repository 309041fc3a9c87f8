//! The appliance loop: button -> mode policy -> broker session -> indicators.
//!
//! Everything runs from `tick`, one pass per iteration in a fixed order.
//! The loop is the single writer of the relay, the LEDs and the stored
//! preferences.

use crate::config::{Config, Store};
use crate::consts::NETWORK_LED;
use crate::gesture::{Gesture, GestureClassifier};
use crate::hal::Board;
use crate::indicator::{IndicatorMux, LinkState};
use crate::mode::{self, OperatingMode};
use crate::session::{Incoming, Phase, Session, Transport};
use crate::status::StatusSnapshot;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

pub struct ControlLoop<B: Board, T: Transport, S: Store> {
    config: Config,
    board: B,
    store: S,
    gestures: GestureClassifier,
    session: Session<T>,
    indicators: BTreeMap<String, IndicatorMux>,
    relay: bool,
    /// Publish on the next chance, without waiting for the interval.
    needs_publish: bool,
    /// Smart mode with a live session, as of the end of the previous tick.
    smart_linked: bool,
}

impl<B: Board, T: Transport, S: Store> ControlLoop<B, T, S> {
    /// `config` must already be validated.
    pub fn new(config: Config, mut board: B, transport: T, store: S) -> Self {
        board.set_relay(false);
        let mut control = Self {
            gestures: GestureClassifier::new(config.long_press_ms),
            config,
            board,
            store,
            session: Session::new(transport),
            indicators: BTreeMap::new(),
            relay: false,
            needs_publish: true,
            smart_linked: false,
        };
        control.apply_config();
        control
    }

    /// Replace the configuration, eg. after the provisioning page saved it.
    pub fn reconfigure(&mut self, config: Config) {
        info!("Applying new configuration");
        self.config = config;
        self.apply_config();
    }

    /// Close the broker session before exiting.
    pub async fn shutdown(&mut self) {
        self.session.close().await;
    }

    fn apply_config(&mut self) {
        self.gestures.set_long_press(self.config.long_press_ms);
        self.session.configure(&self.config);
        self.indicators = self
            .config
            .indicators
            .keys()
            .map(|name| (name.clone(), IndicatorMux::new(name == NETWORK_LED)))
            .collect();
        self.smart_linked = false;
        self.needs_publish = true;

        // Smart mode is meaningless without a broker.
        if !self.config.mqtt.enabled() && self.config.mode != OperatingMode::Basic {
            info!("MQTT disabled, falling back to BASIC mode");
            self.config.mode = OperatingMode::Basic;
            self.persist();
        }
    }

    /// One control iteration at monotonic time `now` (ms).
    pub async fn tick(&mut self, now: u64) {
        let pressed = self.board.button_pressed();
        let (gesture, changed) = self.gestures.sample(pressed, now);
        if changed {
            debug!("Button: {}", gesture.as_str());
            // Remote controllers act on gestures in Smart mode.
            self.needs_publish = true;
            let decision =
                mode::on_gesture_changed(gesture, self.config.mode, self.session.is_connected());
            self.set_relay(decision.relay.apply(self.relay));
            if let Some(mode) = decision.mode_change {
                self.set_mode(mode);
            }
        }

        for command in self.session.tick(now).await {
            self.handle(command);
        }
        self.hold_smart_relay();

        let (relay, mode, indicators) = (self.relay, self.config.mode, &self.config.indicators);
        let published = self.session.publish_if_due(
            now,
            self.config.publish_interval_ms,
            self.needs_publish,
            || StatusSnapshot::new(relay, gesture, mode, indicators),
        );
        if published {
            self.needs_publish = false;
        }

        let link = LinkState {
            phase: self.session.phase(),
            network_up: self.board.network_up(),
            reconnecting: self.session.reconnecting(),
        };
        for (name, mux) in self.indicators.iter_mut() {
            let Some(preference) = self.config.indicators.get(name) else {
                continue;
            };
            if let Some(level) = mux.update(&link, preference, now) {
                self.board.set_indicator(name, level);
            }
        }
    }

    fn handle(&mut self, command: Incoming) {
        match command {
            Incoming::SetRelay(on) => self.set_relay(on),
            Incoming::SetMode(mode) => {
                self.set_mode(mode);
                self.session.reset_publish_timer();
            }
            Incoming::SetIndicator { name, update } => {
                let Some(current) = self.config.indicators.get_mut(&name) else {
                    warn!("Command for unknown indicator {}", name);
                    return;
                };
                let updated = update.apply(current);
                let changed = updated != *current;
                *current = updated;
                if changed {
                    info!(
                        "Indicator {} set to {} brightness {}",
                        name,
                        if updated.on { "ON" } else { "OFF" },
                        updated.brightness
                    );
                    self.persist();
                }
                self.session.reset_publish_timer();
            }
        }
    }

    /// Apply the policy when Smart+connected is entered or left.
    fn hold_smart_relay(&mut self) {
        let connected = self.session.is_connected();
        let smart_linked = self.config.mode == OperatingMode::Smart && connected;
        if smart_linked != self.smart_linked {
            let action = mode::on_link_changed(self.config.mode, connected);
            self.set_relay(action.apply(self.relay));
            self.smart_linked = smart_linked;
        }
    }

    fn set_relay(&mut self, on: bool) {
        if on == self.relay {
            return;
        }
        self.relay = on;
        self.board.set_relay(on);
        self.needs_publish = true;
    }

    fn set_mode(&mut self, mode: OperatingMode) {
        if mode == self.config.mode {
            return;
        }
        info!(
            "Mode {} -> {}",
            self.config.mode.as_str(),
            mode.as_str()
        );
        self.config.mode = mode;
        self.needs_publish = true;
        self.persist();
    }

    fn persist(&mut self) {
        if let Err(err) = self.store.save(&self.config) {
            error!("Unable to save configuration: {:?}", err);
        }
    }

    /// Current state for the HTTP status page.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::new(
            self.relay,
            self.gestures.gesture(),
            self.config.mode,
            &self.config.indicators,
        )
    }

    pub fn status_json(&self) -> String {
        self.snapshot().to_json()
    }

    pub fn relay(&self) -> bool {
        self.relay
    }

    pub fn gesture(&self) -> Gesture {
        self.gestures.gesture()
    }

    pub fn mode(&self) -> OperatingMode {
        self.config.mode
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
