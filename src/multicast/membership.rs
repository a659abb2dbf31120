use std::collections::{BTreeMap, BTreeSet};

use super::{MulticastId, ProcessId};
use crate::common::{crypto::Pubkey, MulticastError, Result};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Group {
    pub sender: ProcessId,
    pub members: BTreeSet<ProcessId>,
}

impl Group {
    pub fn new(sender: ProcessId, members: impl IntoIterator<Item = ProcessId>) -> Self {
        Group {
            sender,
            members: members.into_iter().collect(),
        }
    }

    pub fn is_member(&self, process: ProcessId) -> bool {
        self.members.contains(&process)
    }
}

/// Maps a multicast id to its sender and destination set.
///
/// Resolution must be stable: every process asking about the same id
/// gets the same answer for the lifetime of the system.
pub trait GroupResolver: Send + Sync {
    fn resolve(&self, id: MulticastId) -> Result<Group>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticMembership {
    groups: BTreeMap<MulticastId, Group>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: MulticastId, group: Group) -> Result<()> {
        if !group.is_member(group.sender) {
            return Err(MulticastError::Config(format!(
                "sender {} of multicast {} is not in its own group",
                group.sender, id
            )));
        }
        if self.groups.contains_key(&id) {
            return Err(MulticastError::Config(format!("multicast {} registered twice", id)));
        }
        self.groups.insert(id, group);
        Ok(())
    }
}

impl GroupResolver for StaticMembership {
    fn resolve(&self, id: MulticastId) -> Result<Group> {
        self.groups
            .get(&id)
            .cloned()
            .ok_or(MulticastError::UnknownMulticast(id))
    }
}

/// Public keys of every process, used to authenticate incoming envelopes.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    pub members: BTreeMap<ProcessId, Pubkey>,
}

impl PeerDirectory {
    pub fn new(members: BTreeMap<ProcessId, Pubkey>) -> Self {
        PeerDirectory { members }
    }

    pub fn is_signed_by(&self, process: ProcessId, pubkey: &Pubkey) -> bool {
        self.members.get(&process) == Some(pubkey)
    }
}
