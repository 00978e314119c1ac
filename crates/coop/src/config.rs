use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_MAX_PLAYERS: usize = 4;
pub const DEFAULT_TICK_RATE: u32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// User-facing multiplayer settings. Every field has a default so partial TOML
/// files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoopConfig {
    pub server_address: String,
    pub server_port: u16,
    pub max_players: usize,
    pub tick_rate: u32,

    pub friendly_fire: bool,
    pub shared_loot: bool,
    pub xp_multiplier: f32,
    pub credit_timer_multiplier: f32,

    pub show_nameplates: bool,
    pub show_player_health: bool,
    pub nameplate_distance: f32,

    pub log_packets: bool,
}

impl Default for CoopConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            max_players: DEFAULT_MAX_PLAYERS,
            tick_rate: DEFAULT_TICK_RATE,
            friendly_fire: false,
            shared_loot: true,
            xp_multiplier: 2.0,
            credit_timer_multiplier: 1.5,
            show_nameplates: true,
            show_player_health: true,
            nameplate_distance: 50.0,
            log_packets: false,
        }
    }
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value < min || value > max || value.is_nan() {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

impl CoopConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CoopConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check("server_port", self.server_port as f64, 1024.0, 65535.0)?;
        check("max_players", self.max_players as f64, 2.0, 6.0)?;
        check("tick_rate", self.tick_rate as f64, 20.0, 128.0)?;
        check("xp_multiplier", self.xp_multiplier as f64, 1.0, 5.0)?;
        check(
            "credit_timer_multiplier",
            self.credit_timer_multiplier as f64,
            1.0,
            3.0,
        )?;
        check("nameplate_distance", self.nameplate_distance as f64, 10.0, 100.0)?;
        Ok(())
    }

    pub fn net_config(&self) -> NetConfig {
        NetConfig {
            log_packets: self.log_packets,
            ..NetConfig::default()
        }
    }
}

/// Transport tuning. Not exposed in the config file.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub peer_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub queue_capacity: usize,
    pub max_drain_per_poll: usize,
    pub log_packets: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(1),
            queue_capacity: 4096,
            max_drain_per_poll: 1024,
            log_packets: false,
        }
    }
}
