use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::reliability::Channel;
use crate::PlayerId;

#[derive(Debug, thiserror::Error)]
#[error("server full ({0} peers)")]
pub struct ServerFull(pub usize);

#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub player_id: PlayerId,
    pub name: String,
    pub channel: Channel,
    last_receive_time: Instant,
}

impl Peer {
    pub fn new(addr: SocketAddr, player_id: PlayerId, name: String, now: Instant) -> Self {
        Self {
            addr,
            player_id,
            name,
            channel: Channel::new(now),
            last_receive_time: now,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_receive_time) > timeout
    }

    pub fn touch(&mut self, now: Instant) {
        if now > self.last_receive_time {
            self.last_receive_time = now;
        }
    }
}

/// Connected peers on the hosting side, keyed both by address and by the
/// player id handed out on accept. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct ConnectionManager {
    peers_by_addr: HashMap<SocketAddr, PlayerId>,
    peers: BTreeMap<PlayerId, Peer>,
    next_player_id: PlayerId,
    max_peers: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_peers: usize, timeout: Duration) -> Self {
        Self {
            peers_by_addr: HashMap::new(),
            peers: BTreeMap::new(),
            next_player_id: 1,
            max_peers,
            timeout,
        }
    }

    pub fn accept(
        &mut self,
        addr: SocketAddr,
        name: String,
        now: Instant,
    ) -> Result<&mut Peer, ServerFull> {
        if self.peers.len() >= self.max_peers {
            return Err(ServerFull(self.max_peers));
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;

        self.peers_by_addr.insert(addr, player_id);
        Ok(self
            .peers
            .entry(player_id)
            .or_insert(Peer::new(addr, player_id, name, now)))
    }

    pub fn id_by_addr(&self, addr: &SocketAddr) -> Option<PlayerId> {
        self.peers_by_addr.get(addr).copied()
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&Peer> {
        self.peers.get(&player_id)
    }

    pub fn get_mut(&mut self, player_id: PlayerId) -> Option<&mut Peer> {
        self.peers.get_mut(&player_id)
    }

    pub fn remove(&mut self, player_id: PlayerId) -> Option<Peer> {
        let peer = self.peers.remove(&player_id)?;
        self.peers_by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    /// Removes every peer silent for longer than the timeout. A removed peer
    /// is returned once and never again.
    pub fn cleanup_timed_out(&mut self, now: Instant) -> Vec<Peer> {
        let timed_out: Vec<PlayerId> = self
            .peers
            .values()
            .filter(|p| p.is_timed_out(self.timeout, now))
            .map(|p| p.player_id)
            .collect();

        timed_out.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_capacity() {
        let now = Instant::now();
        let mut connections = ConnectionManager::new(3, Duration::from_secs(10));

        for port in 1..=3 {
            connections.accept(addr(port), format!("p{port}"), now).unwrap();
        }
        assert!(connections.accept(addr(4), "late".into(), now).is_err());
        assert_eq!(connections.len(), 3);
    }

    #[test]
    fn test_ids_increase_and_are_not_reused() {
        let now = Instant::now();
        let mut connections = ConnectionManager::new(3, Duration::from_secs(10));

        let a = connections.accept(addr(1), "a".into(), now).unwrap().player_id;
        let b = connections.accept(addr(2), "b".into(), now).unwrap().player_id;
        connections.remove(a);
        let c = connections.accept(addr(3), "c".into(), now).unwrap().player_id;

        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(connections.id_by_addr(&addr(1)), None);
        assert_eq!(connections.id_by_addr(&addr(3)), Some(3));
    }

    #[test]
    fn test_timeout_reported_once() {
        let start = Instant::now();
        let mut connections = ConnectionManager::new(3, Duration::from_secs(10));
        connections.accept(addr(1), "quiet".into(), start).unwrap();
        connections.accept(addr(2), "chatty".into(), start).unwrap();

        let later = start + Duration::from_secs(11);
        if let Some(peer) = connections.get_mut(2) {
            peer.touch(later);
        }

        let removed = connections.cleanup_timed_out(later);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].player_id, 1);
        assert!(connections.cleanup_timed_out(later).is_empty());
    }
}
