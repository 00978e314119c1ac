pub mod config;
pub mod net;
pub mod session;
pub mod sync;

pub use config::{ConfigError, CoopConfig, DEFAULT_PORT, NetConfig};
pub use net::{DecodeError, DeliveryMode, DisconnectReason, Message, MessageType, NetworkStats};
pub use session::{
    ConnectionState, NetworkSession, Player, Session, SessionError, SessionEvent,
};
pub use sync::{EntityHandle, GameAdapter, SyncError, Synchronizers};

pub type PlayerId = i32;
pub type NetId = i32;

pub const HOST_PLAYER_ID: PlayerId = 0;
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
