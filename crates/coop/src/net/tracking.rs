use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::envelope::sequence_greater_than;

const MIN_RTO: Duration = Duration::from_millis(50);
pub(super) const MAX_RTO: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct SentPacket {
    sequence: u32,
    send_time: Instant,
    acked: bool,
}

/// Outgoing packet sequences waiting for the peer's ack, plus the RTT estimate
/// built from the acks that do arrive.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<SentPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    sampled: bool,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
            sampled: false,
        }
    }

    pub fn track_packet(&mut self, sequence: u32, now: Instant) {
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }

        self.pending.push_back(SentPacket {
            sequence,
            send_time: now,
            acked: false,
        });
    }

    pub fn process_ack(&mut self, ack: u32, ack_bits: u32, now: Instant) -> Vec<u32> {
        let mut acked_sequences = Vec::new();
        let mut rtt_samples = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= 32 && (ack_bits & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                acked_sequences.push(pending.sequence);
                rtt_samples.push(now.duration_since(pending.send_time).as_secs_f32() * 1000.0);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }

        acked_sequences
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if !self.sampled {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.sampled = true;
            return;
        }

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn has_sample(&self) -> bool {
        self.sampled
    }

    pub fn rto(&self) -> Duration {
        let ms = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(ms.max(0.0) / 1000.0).clamp(MIN_RTO, MAX_RTO)
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Incoming packet sequences: duplicate filter and the ack/ack_bits pair
/// echoed back on every outgoing envelope.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bits: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bits: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            if diff < 32 {
                self.received_bits = (self.received_bits << diff) | (1 << (diff - 1));
            } else if diff == 32 {
                self.received_bits = 1 << 31;
            } else {
                self.received_bits = 0;
            }
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bits |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bits) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bits & 0b11, 0b11);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bits) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bits & 0b11, 0b11);
    }

    #[test]
    fn test_receive_tracker_gap() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(3);

        let (ack, bits) = tracker.ack_data();
        assert_eq!(ack, 3);
        // 2 missing, 1 present
        assert_eq!(bits & 0b11, 0b10);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(1));
        assert!(!tracker.record_received(1));
        assert!(tracker.record_received(2));
    }

    #[test]
    fn test_ack_through_bitfield() {
        let mut acks = AckTracker::new(64);
        let mut receiver = ReceiveTracker::new();
        let now = Instant::now();

        for sequence in 1..=5 {
            acks.track_packet(sequence, now);
        }
        for sequence in [1, 2, 4, 5] {
            receiver.record_received(sequence);
        }

        let (ack, bits) = receiver.ack_data();
        let mut acked = acks.process_ack(ack, bits, now + Duration::from_millis(20));
        acked.sort_unstable();

        assert_eq!(acked, vec![1, 2, 4, 5]);
        assert_eq!(acks.unacked_count(), 1);
    }

    #[test]
    fn test_ack_tracker_rtt() {
        let mut tracker = AckTracker::new(32);
        let sent = Instant::now();

        tracker.track_packet(1, sent);
        tracker.process_ack(1, 0, sent + Duration::from_millis(40));

        assert!(tracker.has_sample());
        assert!((tracker.srtt() - 40.0).abs() < 1.0);
    }

    #[test]
    fn test_rto_is_clamped() {
        let mut tracker = AckTracker::new(32);
        let sent = Instant::now();

        tracker.track_packet(1, sent);
        tracker.process_ack(1, 0, sent + Duration::from_millis(1));
        assert_eq!(tracker.rto(), MIN_RTO);

        let mut slow = AckTracker::new(32);
        slow.track_packet(1, sent);
        slow.process_ack(1, 0, sent + Duration::from_secs(5));
        assert_eq!(slow.rto(), MAX_RTO);
    }
}
