mod codec;
mod connection;
mod connector;
mod envelope;
mod event;
mod listener;
mod message;
mod reliability;
mod socket;
mod stats;
mod tracking;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{DecodeError, WireReader, WireWriter};
pub use connection::{ConnectionManager, Peer, ServerFull};
pub use connector::{Connector, ConnectorState};
pub use envelope::{
    DeliveryMode, EnvelopeError, EnvelopeHeader, HEADER_LEN, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE,
    sequence_greater_than,
};
pub use event::{DisconnectReason, TransportEvent};
pub use listener::Listener;
pub use message::{Message, MessageType};
pub use reliability::Channel;
pub use socket::{Datagram, Socket};
pub use stats::NetworkStats;
pub use tracking::{AckTracker, ReceiveTracker};

pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
