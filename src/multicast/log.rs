use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{timestamp::Timestamp, MulticastId, ProcessId};
use crate::common::{MulticastError, Result};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Start,
    Proposed,
    Committed,
}

impl Phase {
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Start => Some(Phase::Proposed),
            Phase::Proposed => Some(Phase::Committed),
            Phase::Committed => None,
        }
    }
}

/// What one process knows about one multicast id.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct LogEntry {
    pub phase: Phase,
    /// Set on the designated sender once it has issued the multicast.
    pub originated: bool,
    pub local_ts: Option<Timestamp>,
    pub proposals: BTreeMap<ProcessId, Timestamp>,
    pub global_ts: Option<Timestamp>,
    pub delivered: bool,
    pub delivery_count: u32,
    pub payload: Option<Vec<u8>>,
}

impl LogEntry {
    fn advance(&mut self, id: MulticastId, to: Phase) -> Result<()> {
        if self.phase.next() != Some(to) {
            return Err(MulticastError::PhaseViolation {
                id,
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}

/*
    Entries are created the first time a process touches an id and are
    only mutated by that process. Once delivered, an entry may be retired:
    at that point every proposal addressed to this process has arrived, so
    any further traffic for the id is a protocol violation.
*/

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct MessageLog {
    entries: BTreeMap<MulticastId, LogEntry>,
    retired: BTreeSet<MulticastId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: MulticastId) -> Option<&LogEntry> {
        self.entries.get(&id)
    }

    pub fn phase(&self, id: MulticastId) -> Phase {
        self.entries.get(&id).map(|e| e.phase).unwrap_or_default()
    }

    pub fn is_retired(&self, id: MulticastId) -> bool {
        self.retired.contains(&id)
    }

    pub fn is_delivered(&self, id: MulticastId) -> bool {
        self.is_retired(id) || self.entries.get(&id).is_some_and(|e| e.delivered)
    }

    pub fn entries(&self) -> impl Iterator<Item = (MulticastId, &LogEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: MulticastId) -> Result<&mut LogEntry> {
        if self.retired.contains(&id) {
            return Err(MulticastError::Retired(id));
        }
        Ok(self.entries.entry(id).or_default())
    }

    pub fn mark_originated(&mut self, id: MulticastId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if entry.originated {
            return Err(MulticastError::AlreadyMulticast(id));
        }
        entry.originated = true;
        Ok(())
    }

    pub fn is_originated(&self, id: MulticastId) -> bool {
        self.is_retired(id) || self.entries.get(&id).is_some_and(|e| e.originated)
    }

    pub fn record_local(&mut self, id: MulticastId, local_ts: Timestamp, payload: Vec<u8>) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.advance(id, Phase::Proposed)?;
        entry.local_ts = Some(local_ts);
        entry.payload = Some(payload);
        Ok(())
    }

    /// Records a proposal and returns how many distinct proposals are now held.
    pub fn record_proposal(&mut self, id: MulticastId, from: ProcessId, ts: Timestamp) -> Result<usize> {
        let entry = self.entry_mut(id)?;
        if entry.phase == Phase::Committed {
            return Err(MulticastError::LateProposal { id, from });
        }
        if entry.proposals.contains_key(&from) {
            return Err(MulticastError::DuplicateProposal { id, from });
        }
        entry.proposals.insert(from, ts);
        Ok(entry.proposals.len())
    }

    pub fn commit(&mut self, id: MulticastId, global_ts: Timestamp) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.advance(id, Phase::Committed)?;
        entry.global_ts = Some(global_ts);
        Ok(())
    }

    /// Local timestamps of every id still waiting for its global timestamp.
    pub fn outstanding(&self) -> impl Iterator<Item = (MulticastId, Timestamp)> + '_ {
        self.entries.iter().filter_map(|(id, entry)| match (entry.phase, entry.local_ts) {
            (Phase::Proposed, Some(local)) => Some((*id, local)),
            _ => None,
        })
    }

    /// The committed, undelivered id with the smallest global timestamp.
    pub fn next_committed(&self) -> Option<(MulticastId, Timestamp)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.phase == Phase::Committed && !entry.delivered)
            .filter_map(|(id, entry)| entry.global_ts.map(|ts| (*id, ts)))
            .min_by_key(|(_, ts)| *ts)
    }

    pub fn mark_delivered(&mut self, id: MulticastId) -> Result<&LogEntry> {
        let entry = self.entry_mut(id)?;
        if entry.phase != Phase::Committed || entry.delivered {
            return Err(MulticastError::PhaseViolation {
                id,
                from: entry.phase,
                to: Phase::Committed,
            });
        }
        entry.delivered = true;
        entry.delivery_count += 1;
        Ok(entry)
    }

    /// Drops delivered entries, keeping only their ids. Returns how many were retired.
    pub fn retire_delivered(&mut self) -> usize {
        let delivered: Vec<MulticastId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.delivered)
            .map(|(id, _)| *id)
            .collect();
        for id in &delivered {
            self.entries.remove(id);
            self.retired.insert(*id);
        }
        delivered.len()
    }
}
