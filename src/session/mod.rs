mod connection;
mod message;
mod topics;
mod transport;

pub use connection::{client_id, Phase, Session};
pub use message::{InboundMessage, Incoming, IndicatorUpdate};
pub use topics::{IndicatorTopics, Topics};
pub use transport::{MqttTransport, Transport};
