use std::fmt;

use serde::{Deserialize, Serialize};

use super::ProcessId;

/*
    Every event is stamped with the pair (t, g): the process clock value
    and the id of the process that generated it. Timestamps are totally
    ordered lexicographically, first by t and then by g, so no two
    processes can produce equal timestamps.
*/

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Timestamp {
    pub t: u64,
    pub g: ProcessId,
}

impl Timestamp {
    /// Placeholder for "unassigned". Never meaningful in a comparison.
    pub const NULL: Timestamp = Timestamp { t: 0, g: 0 };

    pub fn new(t: u64, g: ProcessId) -> Self {
        Timestamp { t, g }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub fn to_be_bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&self.t.to_be_bytes());
        bytes[8..].copy_from_slice(&self.g.to_be_bytes());
        bytes
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.t, self.g)
    }
}

/// Picks the agreed timestamp out of a complete proposal set.
///
/// The largest `t` wins and ties go to the *largest* source id. The policy
/// is fixed: every group member must select the same proposal.
pub fn select_global<I>(proposals: I) -> Option<Timestamp>
where
    I: IntoIterator<Item = Timestamp>,
{
    proposals.into_iter().max_by(|a, b| a.t.cmp(&b.t).then(a.g.cmp(&b.g)))
}
