//! Sequencing for the reliable-ordered channel.
//!
//! The sender numbers every reliable payload and keeps it until the peer
//! acknowledges that number, resending anything left unacknowledged for longer
//! than the resend interval. The receiver acknowledges every reliable datagram
//! it sees (including duplicates, since the earlier ack may have been lost),
//! buffers early arrivals, and releases payloads strictly in sequence order.
//!
//! Both halves work inside a window of [`MAX_RELIABLE_WINDOW`] sequence
//! numbers. The sender refuses new payloads once the oldest unacknowledged one
//! is a full window behind, and the receiver ignores anything a full window
//! ahead of the next expected number. Sequence numbers wrap.

use crate::{Channel, Packet};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default time before an unacknowledged reliable payload is sent again
pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_millis(200);

/// Sequence numbers that may be outstanding at once on one channel
pub const MAX_RELIABLE_WINDOW: u32 = 256;

/// The peer has left a full window of payloads unacknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reliable window full: {0} payloads awaiting acknowledgement")]
pub struct WindowFull(pub usize);

/// True if `sequence` comes before `reference`, allowing for wrap-around
fn is_before(sequence: u32, reference: u32) -> bool {
    (sequence.wrapping_sub(reference) as i32) < 0
}

#[derive(Debug)]
struct InFlight {
    sequence: u32,
    payload: Vec<u8>,
    last_sent: Instant,
}

/// Outgoing half of the reliable-ordered channel
#[derive(Debug, Default)]
pub struct ReliableSender {
    next_sequence: u32,
    in_flight: VecDeque<InFlight>,
}

impl ReliableSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numbers the payload, keeps it for resending and returns the datagram to
    /// send. Fails without consuming a sequence number when the window is full.
    pub fn push(&mut self, payload: Vec<u8>, now: Instant) -> Result<Packet, WindowFull> {
        if self.is_full() {
            return Err(WindowFull(self.in_flight.len()));
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.in_flight.push_back(InFlight {
            sequence,
            payload: payload.clone(),
            last_sent: now,
        });

        Ok(Packet::Data {
            channel: Channel::ReliableOrdered,
            sequence,
            payload,
        })
    }

    /// No new payload can be sent until the oldest one is acknowledged
    pub fn is_full(&self) -> bool {
        self.in_flight.front().is_some_and(|oldest| {
            self.next_sequence.wrapping_sub(oldest.sequence) >= MAX_RELIABLE_WINDOW
        })
    }

    /// Forgets an acknowledged payload. Returns false for unknown or repeated acks.
    pub fn acknowledge(&mut self, sequence: u32) -> bool {
        match self
            .in_flight
            .iter()
            .position(|entry| entry.sequence == sequence)
        {
            Some(index) => {
                self.in_flight.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the datagrams whose last transmission is older than `interval`
    /// and restarts their timers.
    pub fn due_for_resend(&mut self, now: Instant, interval: Duration) -> Vec<Packet> {
        self.in_flight
            .iter_mut()
            .filter(|entry| now.duration_since(entry.last_sent) >= interval)
            .map(|entry| {
                entry.last_sent = now;
                Packet::Data {
                    channel: Channel::ReliableOrdered,
                    sequence: entry.sequence,
                    payload: entry.payload.clone(),
                }
            })
            .collect()
    }

    /// Number of payloads still waiting for an ack
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Incoming half of the reliable-ordered channel
#[derive(Debug, Default)]
pub struct ReliableReceiver {
    next_expected: u32,
    early: BTreeMap<u32, Vec<u8>>,
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one reliable datagram and returns every payload that is now
    /// deliverable, in order. Duplicates, already delivered sequences and
    /// sequences beyond the window yield nothing and are not kept.
    pub fn receive(&mut self, sequence: u32, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if is_before(sequence, self.next_expected) || self.is_beyond_window(sequence) {
            return Vec::new();
        }
        self.early.entry(sequence).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(payload) = self.early.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        ready
    }

    /// Sequences this far ahead are dropped unacknowledged so the sender
    /// retransmits them once the window has moved.
    pub fn is_beyond_window(&self, sequence: u32) -> bool {
        !is_before(sequence, self.next_expected)
            && sequence.wrapping_sub(self.next_expected) >= MAX_RELIABLE_WINDOW
    }

    /// Payloads received ahead of a gap
    pub fn buffered(&self) -> usize {
        self.early.len()
    }
}
