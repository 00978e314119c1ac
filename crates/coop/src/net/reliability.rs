use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::debug;

use super::envelope::{DeliveryMode, EnvelopeHeader};
use super::tracking::{AckTracker, MAX_RTO, ReceiveTracker};

const MAX_TRACKED_PACKETS: usize = 256;
const MAX_ORDERED_BUFFER: usize = 1024;

#[derive(Debug)]
struct InFlight {
    mode: DeliveryMode,
    channel_seq: u32,
    payload: Bytes,
    packet_sequences: Vec<u32>,
    last_sent: Instant,
    sends: u32,
}

/// Per-peer reliability state: packet sequencing and acks, retransmission of
/// reliable messages, duplicate suppression, ordered and sequenced delivery.
#[derive(Debug)]
pub struct Channel {
    next_sequence: u32,
    acks: AckTracker,
    received: ReceiveTracker,
    next_channel_seq: [u32; 4],
    in_flight: Vec<InFlight>,
    unordered_floor: u32,
    unordered_seen: BTreeSet<u32>,
    ordered_next: u32,
    ordered_buffer: BTreeMap<u32, Bytes>,
    sequenced_last: u32,
    needs_ack: bool,
    last_send: Instant,
}

impl Channel {
    pub fn new(now: Instant) -> Self {
        Self {
            next_sequence: 1,
            acks: AckTracker::new(MAX_TRACKED_PACKETS),
            received: ReceiveTracker::new(),
            next_channel_seq: [1; 4],
            in_flight: Vec::new(),
            unordered_floor: 0,
            unordered_seen: BTreeSet::new(),
            ordered_next: 1,
            ordered_buffer: BTreeMap::new(),
            sequenced_last: 0,
            needs_ack: false,
            last_send: now,
        }
    }

    fn next_header(
        &mut self,
        mode: DeliveryMode,
        channel_seq: u32,
        now: Instant,
    ) -> EnvelopeHeader {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        self.acks.track_packet(sequence, now);

        let (ack, ack_bits) = self.received.ack_data();
        self.needs_ack = false;
        self.last_send = now;

        EnvelopeHeader {
            mode,
            sequence,
            ack,
            ack_bits,
            channel_seq,
        }
    }

    /// Wraps a message payload into an envelope ready for the socket.
    pub fn prepare(&mut self, mode: DeliveryMode, payload: Bytes, now: Instant) -> Bytes {
        let channel_seq = match mode {
            DeliveryMode::Unreliable => 0,
            _ => {
                let slot = &mut self.next_channel_seq[mode as usize];
                let seq = *slot;
                *slot = slot.wrapping_add(1);
                seq
            }
        };

        let header = self.next_header(mode, channel_seq, now);
        let datagram = header.encode(&payload);

        if mode.is_reliable() {
            self.in_flight.push(InFlight {
                mode,
                channel_seq,
                payload,
                packet_sequences: vec![header.sequence],
                last_sent: now,
                sends: 1,
            });
        }

        datagram
    }

    pub fn ack_only(&mut self, now: Instant) -> Bytes {
        self.next_header(DeliveryMode::Unreliable, 0, now).encode(&[])
    }

    /// Envelopes for reliable messages whose ack is overdue. Each resend goes
    /// out under a fresh packet sequence and waits twice as long as the last,
    /// up to the RTO ceiling. Messages stay in flight until acked or until the
    /// peer is dropped for silence.
    pub fn due_resends(&mut self, now: Instant) -> Vec<Bytes> {
        let rto = self.acks.rto();
        let mut due = Vec::new();

        let mut in_flight = std::mem::take(&mut self.in_flight);
        for message in &mut in_flight {
            if now.duration_since(message.last_sent) < resend_interval(rto, message.sends) {
                continue;
            }

            let header = self.next_header(message.mode, message.channel_seq, now);
            message.packet_sequences.push(header.sequence);
            message.last_sent = now;
            message.sends += 1;
            due.push(header.encode(&message.payload));
        }
        self.in_flight = in_flight;

        due
    }

    /// Processes one incoming envelope and returns the payloads that are now
    /// deliverable, in delivery order.
    pub fn receive(&mut self, header: &EnvelopeHeader, payload: Bytes, now: Instant) -> Vec<Bytes> {
        let acked = self.acks.process_ack(header.ack, header.ack_bits, now);
        if !acked.is_empty() {
            self.in_flight
                .retain(|m| !m.packet_sequences.iter().any(|s| acked.contains(s)));
        }

        // Left unrecorded so the packet is not acked and the sender retries.
        if self.ordered_buffer_rejects(header) {
            debug!("ordered buffer full, dropping message {}", header.channel_seq);
            return Vec::new();
        }
        if !self.received.record_received(header.sequence) {
            return Vec::new();
        }
        if payload.is_empty() {
            return Vec::new();
        }
        self.needs_ack = true;

        let seq = header.channel_seq;
        match header.mode {
            DeliveryMode::Unreliable => vec![payload],
            DeliveryMode::ReliableUnordered => {
                if seq <= self.unordered_floor || !self.unordered_seen.insert(seq) {
                    return Vec::new();
                }
                while self.unordered_seen.remove(&(self.unordered_floor + 1)) {
                    self.unordered_floor += 1;
                }
                vec![payload]
            }
            DeliveryMode::ReliableOrdered => {
                if seq < self.ordered_next {
                    return Vec::new();
                }
                if seq > self.ordered_next {
                    self.ordered_buffer.insert(seq, payload);
                    return Vec::new();
                }

                let mut ready = vec![payload];
                self.ordered_next += 1;
                while let Some(next) = self.ordered_buffer.remove(&self.ordered_next) {
                    ready.push(next);
                    self.ordered_next += 1;
                }
                ready
            }
            DeliveryMode::Sequenced => {
                if seq <= self.sequenced_last {
                    return Vec::new();
                }
                self.sequenced_last = seq;
                vec![payload]
            }
        }
    }

    fn ordered_buffer_rejects(&self, header: &EnvelopeHeader) -> bool {
        header.mode == DeliveryMode::ReliableOrdered
            && header.channel_seq > self.ordered_next
            && self.ordered_buffer.len() >= MAX_ORDERED_BUFFER
            && !self.ordered_buffer.contains_key(&header.channel_seq)
    }

    pub fn needs_ack(&self) -> bool {
        self.needs_ack
    }

    pub fn since_last_send(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_send)
    }

    pub fn rtt_ms(&self) -> Option<f32> {
        self.acks.has_sample().then(|| self.acks.srtt())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

}

fn resend_interval(rto: Duration, sends: u32) -> Duration {
    rto.saturating_mul(1 << sends.saturating_sub(1).min(8)).min(MAX_RTO.max(rto))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::envelope::EnvelopeHeader;

    fn deliver(to: &mut Channel, datagram: &Bytes, now: Instant) -> Vec<Bytes> {
        let (header, payload) = EnvelopeHeader::parse(datagram).unwrap();
        to.receive(&header, Bytes::copy_from_slice(payload), now)
    }

    fn payload(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn test_reliable_message_resent_until_acked() {
        let start = Instant::now();
        let mut a = Channel::new(start);
        let mut b = Channel::new(start);

        let _lost = a.prepare(DeliveryMode::ReliableOrdered, payload(1), start);
        assert_eq!(a.in_flight(), 1);

        assert!(a.due_resends(start + Duration::from_millis(10)).is_empty());
        let resends = a.due_resends(start + Duration::from_secs(2));
        assert_eq!(resends.len(), 1);

        let later = start + Duration::from_secs(2);
        assert_eq!(deliver(&mut b, &resends[0], later), vec![payload(1)]);

        let ack = b.ack_only(later);
        assert!(deliver(&mut a, &ack, later).is_empty());
        assert_eq!(a.in_flight(), 0);
    }

    #[test]
    fn test_ordered_delivery_buffers_gaps() {
        let now = Instant::now();
        let mut a = Channel::new(now);
        let mut b = Channel::new(now);

        let first = a.prepare(DeliveryMode::ReliableOrdered, payload(1), now);
        let second = a.prepare(DeliveryMode::ReliableOrdered, payload(2), now);
        let third = a.prepare(DeliveryMode::ReliableOrdered, payload(3), now);

        assert!(deliver(&mut b, &third, now).is_empty());
        assert!(deliver(&mut b, &second, now).is_empty());
        assert_eq!(
            deliver(&mut b, &first, now),
            vec![payload(1), payload(2), payload(3)]
        );
    }

    #[test]
    fn test_unordered_delivers_once() {
        let start = Instant::now();
        let mut a = Channel::new(start);
        let mut b = Channel::new(start);

        let original = a.prepare(DeliveryMode::ReliableUnordered, payload(7), start);
        let resend = a.due_resends(start + Duration::from_secs(2)).remove(0);

        assert_eq!(deliver(&mut b, &resend, start), vec![payload(7)]);
        assert!(deliver(&mut b, &original, start).is_empty());
    }

    #[test]
    fn test_sequenced_drops_stale() {
        let now = Instant::now();
        let mut a = Channel::new(now);
        let mut b = Channel::new(now);

        let old = a.prepare(DeliveryMode::Sequenced, payload(1), now);
        let new = a.prepare(DeliveryMode::Sequenced, payload(2), now);

        assert_eq!(deliver(&mut b, &new, now), vec![payload(2)]);
        assert!(deliver(&mut b, &old, now).is_empty());
        assert_eq!(a.in_flight(), 0);
    }

    #[test]
    fn test_duplicate_datagram_dropped() {
        let now = Instant::now();
        let mut a = Channel::new(now);
        let mut b = Channel::new(now);

        let datagram = a.prepare(DeliveryMode::Unreliable, payload(4), now);
        assert_eq!(deliver(&mut b, &datagram, now).len(), 1);
        assert!(deliver(&mut b, &datagram, now).is_empty());
    }

    #[test]
    fn test_ack_only_does_not_request_ack() {
        let now = Instant::now();
        let mut a = Channel::new(now);
        let mut b = Channel::new(now);

        let datagram = a.prepare(DeliveryMode::Unreliable, payload(4), now);
        deliver(&mut b, &datagram, now);
        assert!(b.needs_ack());

        let ack = b.ack_only(now);
        assert!(!b.needs_ack());
        deliver(&mut a, &ack, now);
        assert!(!a.needs_ack());
    }

    #[test]
    fn test_ordered_stream_survives_long_outage() {
        let start = Instant::now();
        let mut a = Channel::new(start);
        let mut b = Channel::new(start);

        let _lost = a.prepare(DeliveryMode::ReliableOrdered, payload(1), start);

        let mut now = start;
        for _ in 0..200 {
            now += Duration::from_millis(50);
            a.due_resends(now);
        }
        assert_eq!(a.in_flight(), 1);

        let second = a.prepare(DeliveryMode::ReliableOrdered, payload(2), now);
        assert!(deliver(&mut b, &second, now).is_empty());

        now += Duration::from_secs(2);
        let resends = a.due_resends(now);
        let delivered: Vec<Bytes> = resends
            .iter()
            .flat_map(|datagram| deliver(&mut b, datagram, now))
            .collect();
        assert_eq!(delivered, vec![payload(1), payload(2)]);
    }

    #[test]
    fn test_resend_backoff_is_capped() {
        let rto = Duration::from_millis(50);
        assert_eq!(resend_interval(rto, 1), rto);
        assert_eq!(resend_interval(rto, 3), Duration::from_millis(200));
        assert_eq!(resend_interval(rto, 30), MAX_RTO);
    }

    #[test]
    fn test_full_ordered_buffer_leaves_message_unacked() {
        let start = Instant::now();
        let mut a = Channel::new(start);
        let mut b = Channel::new(start);

        let numbered = |n: u32| Bytes::copy_from_slice(&n.to_le_bytes());
        let datagrams: Vec<Bytes> = (1..=MAX_ORDERED_BUFFER as u32 + 2)
            .map(|n| a.prepare(DeliveryMode::ReliableOrdered, numbered(n), start))
            .collect();

        for datagram in &datagrams[1..] {
            assert!(deliver(&mut b, datagram, start).is_empty());
        }
        let in_order = deliver(&mut b, &datagrams[0], start);
        assert_eq!(in_order.len(), MAX_ORDERED_BUFFER + 1);

        let ack = b.ack_only(start);
        deliver(&mut a, &ack, start);

        let later = start + Duration::from_secs(2);
        let delivered: Vec<Bytes> = a
            .due_resends(later)
            .iter()
            .flat_map(|datagram| deliver(&mut b, datagram, later))
            .collect();
        assert_eq!(delivered, vec![numbered(MAX_ORDERED_BUFFER as u32 + 2)]);
    }
}
