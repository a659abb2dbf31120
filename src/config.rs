//! Cluster configuration.

use std::{collections::BTreeSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    common::{MulticastError, Result},
    multicast::{Group, MulticastId, ProcessId, StaticMembership},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of processes, identified `1..=processes`.
    pub processes: u32,
    /// Depth of each node's command queue.
    pub channel_capacity: usize,
    /// Depth of each node's delivery queue.
    pub delivery_buffer: usize,
    pub retire_delivered: bool,
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: MulticastId,
    pub sender: ProcessId,
    pub members: Vec<ProcessId>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            processes: 3,
            channel_capacity: 100,
            delivery_buffer: 100,
            retire_delivered: false,
            groups: vec![
                GroupConfig { id: 1, sender: 1, members: vec![1, 2, 3] },
                GroupConfig { id: 2, sender: 2, members: vec![1, 2, 3] },
                GroupConfig { id: 3, sender: 3, members: vec![2, 3] },
            ],
        }
    }
}

impl ClusterConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ClusterConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processes == 0 {
            return Err(MulticastError::Config("at least one process is required".into()));
        }
        if self.channel_capacity == 0 || self.delivery_buffer == 0 {
            return Err(MulticastError::Config("queue capacities must be non-zero".into()));
        }
        let mut ids = BTreeSet::new();
        for group in &self.groups {
            if !ids.insert(group.id) {
                return Err(MulticastError::Config(format!("multicast {} listed twice", group.id)));
            }
            if group.members.is_empty() {
                return Err(MulticastError::Config(format!("multicast {} has no members", group.id)));
            }
            if !group.members.contains(&group.sender) {
                return Err(MulticastError::Config(format!(
                    "sender {} of multicast {} is not in its own group",
                    group.sender, group.id
                )));
            }
            for p in &group.members {
                if *p == 0 || *p > self.processes {
                    return Err(MulticastError::Config(format!(
                        "multicast {} names process {} outside 1..={}",
                        group.id, p, self.processes
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn process_ids(&self) -> impl Iterator<Item = ProcessId> {
        1..=self.processes
    }

    pub fn membership(&self) -> Result<StaticMembership> {
        let mut membership = StaticMembership::new();
        for group in &self.groups {
            membership.register(group.id, Group::new(group.sender, group.members.iter().copied()))?;
        }
        Ok(membership)
    }
}
