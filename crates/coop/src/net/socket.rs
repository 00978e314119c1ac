use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};

use super::envelope::{EnvelopeHeader, HEADER_LEN, MAX_DATAGRAM_SIZE};
use super::stats::NetworkStats;
use crate::config::NetConfig;

#[derive(Debug)]
pub struct Datagram {
    pub from: SocketAddr,
    pub header: EnvelopeHeader,
    pub payload: Bytes,
    pub received_at: Instant,
}

/// UDP endpoint with a background receive task. The task only frames
/// envelopes and queues them; decoding happens wherever `poll` is called.
pub struct Socket {
    sender: std::net::UdpSocket,
    local_addr: SocketAddr,
    inbound: mpsc::Receiver<Datagram>,
    shutdown: Option<oneshot::Sender<()>>,
    stats: NetworkStats,
    max_drain: usize,
    log_packets: bool,
    runtime: Option<Runtime>,
}

impl Socket {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: &NetConfig) -> io::Result<Self> {
        let std_socket = std::net::UdpSocket::bind(addr)?;
        std_socket.set_nonblocking(true)?;
        let local_addr = std_socket.local_addr()?;
        let sender = std_socket.try_clone()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("coop-net-io")
            .enable_all()
            .build()?;

        let receiver = {
            let _guard = runtime.enter();
            UdpSocket::from_std(std_socket)?
        };

        let (tx, inbound) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        runtime.spawn(receive_loop(receiver, tx, shutdown_rx));

        debug!("socket bound on {local_addr}");

        Ok(Self {
            sender,
            local_addr,
            inbound,
            shutdown: Some(shutdown),
            stats: NetworkStats::default(),
            max_drain: config.max_drain_per_poll.max(1),
            log_packets: config.log_packets,
            runtime: Some(runtime),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    /// Best effort. Failures are logged and counted, never returned.
    pub fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "dropping {} byte datagram to {addr}: exceeds {MAX_DATAGRAM_SIZE}",
                datagram.len()
            );
            self.stats.send_errors += 1;
            return;
        }

        match self.sender.send_to(datagram, addr) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                if self.log_packets {
                    trace!("-> {addr} {bytes} bytes");
                }
            }
            Err(e) => {
                warn!("send to {addr} failed: {e}");
                self.stats.send_errors += 1;
            }
        }
    }

    /// Drains up to the configured number of queued datagrams. The rest stay
    /// queued for the next call.
    pub fn poll(&mut self) -> Vec<Datagram> {
        let mut datagrams = Vec::new();
        while datagrams.len() < self.max_drain {
            match self.inbound.try_recv() {
                Ok(datagram) => {
                    self.stats
                        .record_received(datagram.payload.len() + HEADER_LEN);
                    if self.log_packets {
                        trace!(
                            "<- {} {:?} seq {} ({} bytes)",
                            datagram.from,
                            datagram.header.mode,
                            datagram.header.sequence,
                            datagram.payload.len()
                        );
                    }
                    datagrams.push(datagram);
                }
                Err(_) => break,
            }
        }
        datagrams
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    inbound: mpsc::Sender<Datagram>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let (header, payload) = match EnvelopeHeader::parse(&buf[..len]) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!("discarding datagram from {from}: {e}");
                            continue;
                        }
                    };

                    let datagram = Datagram {
                        from,
                        header,
                        payload: Bytes::copy_from_slice(payload),
                        received_at: Instant::now(),
                    };

                    match inbound.try_send(datagram) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("inbound queue full, dropping datagram from {from}");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Err(e) => {
                    // ICMP unreachable surfaces here on some platforms.
                    debug!("recv error: {e}");
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }
    }

    debug!("receive task stopped");
}
