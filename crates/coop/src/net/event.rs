use std::fmt;

use super::envelope::DeliveryMode;
use super::message::Message;
use crate::PlayerId;

#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerConnected {
        player_id: PlayerId,
        name: String,
    },
    Accepted {
        player_id: PlayerId,
        map_seed: i32,
    },
    PeerDisconnected {
        player_id: PlayerId,
        reason: DisconnectReason,
    },
    Message {
        from: PlayerId,
        mode: DeliveryMode,
        message: Message,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    Shutdown,
    Remote(String),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Shutdown => "shut down",
            DisconnectReason::Remote(reason) => reason,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
