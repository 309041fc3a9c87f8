//! Pins and clock seen by the control loop.

use std::collections::BTreeMap;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Physical I/O of the appliance.
pub trait Board {
    /// Raw button level, true while held.
    fn button_pressed(&mut self) -> bool;
    fn set_relay(&mut self, on: bool);
    /// Write a PWM level to the named indicator.
    fn set_indicator(&mut self, name: &str, level: u16);
    /// Station link is up. False while in access point (provisioning) mode.
    fn network_up(&self) -> bool;
}

/// Monotonic milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Host-side board: the button is driven from stdin, outputs are logged.
pub struct SimBoard {
    button: watch::Receiver<bool>,
    relay: bool,
    indicators: BTreeMap<String, u16>,
}

impl SimBoard {
    /// Spawns the stdin reader. Must be called within a tokio runtime.
    pub fn start() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(read_button(tx));
        Self::new(rx)
    }

    pub fn new(button: watch::Receiver<bool>) -> Self {
        Self {
            button,
            relay: false,
            indicators: BTreeMap::new(),
        }
    }

    pub fn relay(&self) -> bool {
        self.relay
    }
}

/// `p`/`press` holds the button, `r`/`release` lets it go.
async fn read_button(tx: watch::Sender<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("Error reading button input: {}", err);
                break;
            }
        };
        match line.trim() {
            "p" | "press" => {
                tx.send_replace(true);
            }
            "r" | "release" => {
                tx.send_replace(false);
            }
            "" => continue,
            other => warn!("Unknown button command '{}'. Use p/press or r/release", other),
        }
    }
    info!("Button input closed");
}

impl Board for SimBoard {
    fn button_pressed(&mut self) -> bool {
        *self.button.borrow()
    }

    fn set_relay(&mut self, on: bool) {
        self.relay = on;
        info!("Relay {}", if on { "ON" } else { "OFF" });
    }

    fn set_indicator(&mut self, name: &str, level: u16) {
        self.indicators.insert(name.to_string(), level);
        debug!("Indicator {} PWM {}", name, level);
    }

    fn network_up(&self) -> bool {
        true
    }
}
