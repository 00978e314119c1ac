use std::time::{Duration, Instant};

use anyhow::Result;
use glam::Vec3;
use log::{info, warn};

use coop::sync::{MapState, MapSync};
use coop::{CoopConfig, Session, SessionEvent, Synchronizers};

use crate::world::{EntityKind, HeadlessWorld};

const FRAME_SLEEP: Duration = Duration::from_millis(1);
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct HostOptions {
    pub seed: Option<i32>,
    pub difficulty: i32,
    pub enemies: usize,
}

/// One headless participant: a session plus the synchronizers driving a
/// stand-in world.
pub struct CoopNode {
    session: Session,
    sync: Synchronizers,
    world: HeadlessWorld,
    host_options: Option<HostOptions>,
    seeded: bool,
    last_frame: Instant,
    last_status: Instant,
}

impl CoopNode {
    fn new(session: Session, host_options: Option<HostOptions>) -> Self {
        let now = Instant::now();
        Self {
            session,
            sync: Synchronizers::new(),
            world: HeadlessWorld::new(),
            host_options,
            seeded: false,
            last_frame: now,
            last_status: now,
        }
    }

    pub fn host(config: CoopConfig, name: &str, options: HostOptions) -> Result<Self> {
        let port = config.server_port;
        let max_players = config.max_players;
        let mut session = Session::new(config);
        session.host(port, max_players, name)?;
        info!("hosting on port {port} for up to {max_players} players");
        Ok(Self::new(session, Some(options)))
    }

    pub fn join(config: CoopConfig, name: &str) -> Result<Self> {
        let address = config.server_address.clone();
        let port = config.server_port;
        let mut session = Session::new(config);
        session.connect(&address, port, name)?;
        Ok(Self::new(session, None))
    }

    pub fn run(&mut self, duration: Option<Duration>) {
        let started = Instant::now();
        while !duration.is_some_and(|d| started.elapsed() >= d) {
            self.tick_once();
            if !self.session.is_connected() && !self.is_connecting() {
                info!("session ended");
                break;
            }
            std::thread::sleep(FRAME_SLEEP);
        }

        if let Some(stats) = self.session.stats() {
            info!(
                "sent {} packets ({} bytes), received {} packets ({} bytes), {} resends",
                stats.packets_sent,
                stats.bytes_sent,
                stats.packets_received,
                stats.bytes_received,
                stats.resends
            );
        }
        self.session.shutdown();
    }

    fn is_connecting(&self) -> bool {
        self.session.state() == coop::ConnectionState::Connecting
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.session.update(dt);
        let events: Vec<SessionEvent> = self.session.drain_events().collect();
        for event in &events {
            log_event(event);
            self.sync.handle_event(event, &mut self.session, &mut self.world);
        }

        // Spawns only reach peers that are already connected.
        if self.session.is_connected() && self.session.player_count() > 1 {
            self.start_run_once();
        }

        self.world.step(dt);
        let local = self.world.local_player();
        self.sync
            .update(dt, Some(&local), &mut self.session, &mut self.world);

        if now.duration_since(self.last_status) >= STATUS_INTERVAL {
            self.last_status = now;
            self.log_status();
        }
    }

    /// Host only: picks the level seed and fills the arena.
    fn start_run_once(&mut self) {
        let Some(options) = self.host_options else {
            return;
        };
        if self.seeded {
            return;
        }
        self.seeded = true;

        let map = MapState {
            seed: options.seed.unwrap_or_else(MapSync::generate_seed),
            difficulty: options.difficulty,
            biome_id: 0,
        };
        if let Err(e) = self
            .sync
            .map
            .set_map_seed(map, &mut self.session, &mut self.world)
        {
            warn!("could not set map seed: {e}");
        }

        for i in 0..options.enemies {
            let angle = i as f32 * std::f32::consts::TAU / options.enemies as f32;
            let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * 10.0;
            let velocity = Vec3::new(-angle.sin(), 0.0, angle.cos()) * 2.0;
            let handle = self.world.spawn_wandering_enemy(i as i32 % 4, position, velocity);
            let registered = self.sync.enemies.register_enemy(
                handle,
                i as i32 % 4,
                0,
                position,
                100.0,
                &mut self.session,
            );
            if let Err(e) = registered {
                warn!("enemy {i} not synced: {e}");
                break;
            }
        }
    }

    fn log_status(&self) {
        let players: Vec<String> = self
            .session
            .players()
            .map(|p| format!("{}#{} {:.0}ms", p.name, p.id, p.latency_ms))
            .collect();
        info!(
            "players [{}], {} remote avatars, {} enemies, seed {:?}",
            players.join(", "),
            self.world
                .count(|k| matches!(k, EntityKind::RemotePlayer(_))),
            self.world.count(|k| matches!(k, EntityKind::Enemy(_))),
            self.world.map().map(|m| m.seed)
        );
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PlayerConnected { player_id } => info!("player {player_id} joined"),
        SessionEvent::PlayerDisconnected { player_id, reason } => {
            info!("player {player_id} left ({reason})")
        }
        SessionEvent::ConnectionStateChanged { state } => info!("session is now {state:?}"),
        SessionEvent::PacketReceived { sender, message } => {
            log::trace!("{:?} from player {sender}", message.message_type())
        }
    }
}
