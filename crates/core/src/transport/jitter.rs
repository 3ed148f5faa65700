//! Reordering buffer for incoming media packets.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::media::rtp::RegularPacket;

struct Entry {
    packet: RegularPacket,
    id: u64,
}

impl Entry {
    fn order(&self, other: &Self) -> Ordering {
        self.packet
            .header
            .presentation_cmp(&other.packet.header)
            .then_with(|| {
                (self.packet.sequence_number().wrapping_sub(other.packet.sequence_number()) as i16)
                    .cmp(&0)
            })
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order(other)
    }
}

/// Priority queue of packets in presentation order.
///
/// Every insertion gets a fresh id so a waiting consumer can tell that a
/// different packet moved to the head even when it carries the same
/// timestamp. Packets whose sequence number is already resident are
/// dropped.
#[derive(Default)]
pub struct JitterQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    resident: HashSet<u16>,
    last_popped: Option<u16>,
    inserted: u64,
}

impl JitterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Insert a packet. Returns `false` for a duplicate.
    pub fn push(&mut self, packet: RegularPacket) -> bool {
        if !self.resident.insert(packet.sequence_number()) {
            return false;
        }
        self.inserted += 1;
        self.heap.push(Reverse(Entry {
            packet,
            id: self.inserted,
        }));
        true
    }

    pub fn peek(&self) -> Option<&RegularPacket> {
        self.heap.peek().map(|Reverse(entry)| &entry.packet)
    }

    /// Insertion id of the current head.
    pub fn head_id(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.id)
    }

    pub fn pop(&mut self) -> Option<RegularPacket> {
        let Reverse(entry) = self.heap.pop()?;
        self.resident.remove(&entry.packet.sequence_number());
        self.last_popped = Some(entry.packet.sequence_number());
        Some(entry.packet)
    }

    /// Number of packets ever inserted.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Whether a packet with `sequence_number` was already handed out,
    /// judged against the most recently popped sequence number.
    pub fn is_played_out(&self, sequence_number: u16) -> bool {
        self.last_popped
            .is_some_and(|last| (sequence_number.wrapping_sub(last) as i16) <= 0)
    }

    /// Resident packets in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &RegularPacket> {
        self.heap.iter().map(|Reverse(entry)| &entry.packet)
    }
}
