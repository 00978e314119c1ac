use crate::PlayerId;
use crate::net::{DisconnectReason, Message};

use super::ConnectionState;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    PlayerConnected {
        player_id: PlayerId,
    },
    PlayerDisconnected {
        player_id: PlayerId,
        reason: DisconnectReason,
    },
    ConnectionStateChanged {
        state: ConnectionState,
    },
    PacketReceived {
        sender: PlayerId,
        message: Message,
    },
}
