use super::InboundMessage;
use crate::consts::MQTT_KEEP_ALIVE_SECS;
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Upper bound for getting DISCONNECT onto the wire.
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a poll waits for the next network event before giving the
/// loop back.
const POLL_WINDOW: Duration = Duration::from_millis(1);
const MAX_EVENTS_PER_POLL: usize = 32;
const REQUEST_QUEUE: usize = 10;

/// Publish/subscribe session used by the connectivity state machine.
/// Every operation is bounded in time; none of them may block the loop.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Resolve the broker hostname.
    async fn resolve(&mut self, host: &str, port: u16) -> anyhow::Result<SocketAddr>;

    /// Establish a session. Replaces any previous one.
    async fn connect(
        &mut self,
        addr: SocketAddr,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<()>;

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()>;

    fn publish(&mut self, topic: &str, payload: &str) -> anyhow::Result<()>;

    /// Drive the session and collect received messages into `inbox`.
    /// An error means the session is gone.
    async fn poll(&mut self, inbox: &mut Vec<InboundMessage>) -> anyhow::Result<()>;

    /// Close the session, if any, without waiting for the broker.
    fn disconnect(&mut self);

    /// Close the session and wait until the close was delivered.
    async fn close(&mut self) {
        self.disconnect();
    }
}

/// MQTT over TCP, backed by rumqttc.
pub struct MqttTransport {
    session: Option<(AsyncClient, EventLoop)>,
    /// Event loop of a closed session, still flushing its DISCONNECT.
    closing: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            session: None,
            closing: None,
        }
    }

    fn client(&self) -> anyhow::Result<&AsyncClient> {
        match &self.session {
            Some((client, _)) => Ok(client),
            None => anyhow::bail!("No MQTT session"),
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a closed session until the queued DISCONNECT was written.
async fn flush_disconnect(mut event_loop: EventLoop) {
    let sent = timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => continue,
                Err(err) => return Err(err),
            }
        }
    })
    .await;
    match sent {
        Ok(Ok(())) => debug!("MQTT disconnect sent"),
        Ok(Err(err)) => debug!("MQTT connection closed before disconnect: {}", err),
        Err(_) => debug!("MQTT disconnect not sent within {:?}", DISCONNECT_TIMEOUT),
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> anyhow::Result<ConnAck> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            return Ok(ack);
        }
    }
}

impl Transport for MqttTransport {
    async fn resolve(&mut self, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
        let mut addrs = timeout(RESOLVE_TIMEOUT, tokio::net::lookup_host((host, port))).await??;
        addrs
            .next()
            .ok_or_else(|| anyhow::anyhow!("No address found for {}", host))
    }

    async fn connect(
        &mut self,
        addr: SocketAddr,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<()> {
        self.disconnect();

        let mut mqttoptions = MqttOptions::new(client_id, addr.ip().to_string(), addr.port());
        mqttoptions.set_keep_alive(Duration::from_secs(MQTT_KEEP_ALIVE_SECS));
        if !username.is_empty() {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, REQUEST_QUEUE);
        let ack = timeout(CONNECT_TIMEOUT, wait_for_connack(&mut event_loop)).await??;
        if ack.code != ConnectReturnCode::Success {
            anyhow::bail!("Broker refused connection: {:?}", ack.code);
        }

        self.session = Some((client, event_loop));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        self.client()?.try_subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> anyhow::Result<()> {
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_string())?;
        Ok(())
    }

    async fn poll(&mut self, inbox: &mut Vec<InboundMessage>) -> anyhow::Result<()> {
        let Some((_, event_loop)) = self.session.as_mut() else {
            anyhow::bail!("No MQTT session");
        };

        for _ in 0..MAX_EVENTS_PER_POLL {
            let notification = match timeout(POLL_WINDOW, event_loop.poll()).await {
                Ok(notification) => notification?,
                // Nothing pending.
                Err(_) => return Ok(()),
            };
            match notification {
                Event::Incoming(Packet::Publish(msg)) => {
                    debug!("RX message to {} with payload '{:?}'", msg.topic, msg.payload);
                    inbox.push(InboundMessage::new(&msg.topic, &msg.payload));
                }
                Event::Incoming(Packet::Disconnect) => {
                    anyhow::bail!("Broker closed the session");
                }
                // Pings, acks and our own outgoing packets.
                _ => continue,
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some((client, event_loop)) = self.session.take() else {
            return;
        };
        if let Err(err) = client.try_disconnect() {
            debug!("Disconnect request not queued: {}", err);
            return;
        }
        // The request only leaves once the event loop is polled again.
        match Handle::try_current() {
            Ok(handle) => self.closing = Some(handle.spawn(flush_disconnect(event_loop))),
            Err(_) => debug!("No runtime, dropping MQTT session without disconnect"),
        }
    }

    async fn close(&mut self) {
        self.disconnect();
        if let Some(task) = self.closing.take() {
            if let Err(err) = task.await {
                debug!("Disconnect task failed: {}", err);
            }
        }
    }
}
