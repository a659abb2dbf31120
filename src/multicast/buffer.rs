use std::{cmp::{Ordering, Reverse}, collections::BinaryHeap};

use super::{message::Timestamped, timestamp::Timestamp, ProcessId};
use crate::common::{MulticastError, Result};

/*
    Messages in transit from p to q are held in a buffer that always yields
    the smallest timestamp first, whatever order they were pushed in. This
    per-link gate is the only ordering the protocol asks of the transport.
*/

struct Slot<M> {
    timestamp: Timestamp,
    seq: u64,
    message: M,
}

impl<M> PartialEq for Slot<M> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl<M> Eq for Slot<M> {}

impl<M> PartialOrd for Slot<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for Slot<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.seq.cmp(&other.seq))
    }
}

pub struct ChannelBuffer<M> {
    heap: BinaryHeap<Reverse<Slot<M>>>,
    next_seq: u64,
}

impl<M: Timestamped> ChannelBuffer<M> {
    pub fn new() -> Self {
        ChannelBuffer {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, message: M) {
        let slot = Slot {
            timestamp: message.timestamp(),
            seq: self.next_seq,
            message,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(slot));
    }

    pub fn pop_min(&mut self) -> Option<M> {
        self.heap.pop().map(|Reverse(slot)| slot.message)
    }

    pub fn peek_min(&self) -> Option<&M> {
        self.heap.peek().map(|Reverse(slot)| &slot.message)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<M: Timestamped> Default for ChannelBuffer<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed `N x N` arena of channel buffers, indexed by `(from, to)`.
pub struct ChannelTable<M> {
    processes: u32,
    slots: Vec<ChannelBuffer<M>>,
}

impl<M: Timestamped> ChannelTable<M> {
    pub fn new(processes: u32) -> Self {
        let slots = (0..processes as usize * processes as usize)
            .map(|_| ChannelBuffer::new())
            .collect();
        ChannelTable { processes, slots }
    }

    pub fn push(&mut self, from: ProcessId, to: ProcessId, message: M) -> Result<()> {
        let index = channel_index(self.processes, from, to)?;
        self.slots[index].push(message);
        Ok(())
    }

    pub fn pop_min(&mut self, from: ProcessId, to: ProcessId) -> Result<Option<M>> {
        let index = channel_index(self.processes, from, to)?;
        Ok(self.slots[index].pop_min())
    }

    /// Every `(from, to)` pair with at least one buffered message.
    pub fn ready_channels(&self) -> Vec<(ProcessId, ProcessId)> {
        let n = self.processes;
        (1..=n)
            .flat_map(|from| (1..=n).map(move |to| (from, to)))
            .zip(self.slots.iter())
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(pair, _)| pair)
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().map(ChannelBuffer::len).sum()
    }
}

/// Position of the `(from, to)` buffer in a row-major `N x N` arena.
pub fn channel_index(processes: u32, from: ProcessId, to: ProcessId) -> Result<usize> {
    for p in [from, to] {
        if p == 0 || p > processes {
            return Err(MulticastError::UnknownProcess(p));
        }
    }
    Ok((from as usize - 1) * processes as usize + (to as usize - 1))
}
