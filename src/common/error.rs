use thiserror::Error;

use crate::multicast::{MulticastId, Phase, ProcessId};

pub type Result<T> = std::result::Result<T, MulticastError>;

#[derive(Debug, Error)]
pub enum MulticastError {
    // Protocol violations: the offending message is logged and dropped.
    #[error("process {process} is not the designated sender of multicast {id} (sender is {sender})")]
    NotSender {
        id: MulticastId,
        process: ProcessId,
        sender: ProcessId,
    },

    #[error("multicast {0} has already been issued")]
    AlreadyMulticast(MulticastId),

    #[error("process {process} is not a member of multicast {id}'s group")]
    NotMember { id: MulticastId, process: ProcessId },

    #[error("multicast {id} received twice at process {process}")]
    DuplicateMulticast { id: MulticastId, process: ProcessId },

    #[error("multicast {id} arrived from {actual}, expected sender {expected}")]
    UnexpectedSource {
        id: MulticastId,
        expected: ProcessId,
        actual: ProcessId,
    },

    #[error("duplicate proposal for multicast {id} from process {from}")]
    DuplicateProposal { id: MulticastId, from: ProcessId },

    #[error("proposal for multicast {id} from process {from} arrived after commit")]
    LateProposal { id: MulticastId, from: ProcessId },

    #[error("multicast {0} has been retired from the message log")]
    Retired(MulticastId),

    #[error("illegal phase transition {from:?} -> {to:?} for multicast {id}")]
    PhaseViolation { id: MulticastId, from: Phase, to: Phase },

    #[error("envelope claiming source {0} failed signature verification")]
    InvalidSignature(ProcessId),

    // Collaborator failures: surfaced to the caller, never retried here.
    #[error("no group registered for multicast {0}")]
    UnknownMulticast(MulticastId),

    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("node {0} is no longer running")]
    NodeStopped(ProcessId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl MulticastError {
    /// Errors caused by a bad wire message rather than a failing collaborator.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            MulticastError::NotSender { .. }
                | MulticastError::AlreadyMulticast(_)
                | MulticastError::NotMember { .. }
                | MulticastError::DuplicateMulticast { .. }
                | MulticastError::UnexpectedSource { .. }
                | MulticastError::DuplicateProposal { .. }
                | MulticastError::LateProposal { .. }
                | MulticastError::Retired(_)
                | MulticastError::PhaseViolation { .. }
                | MulticastError::InvalidSignature(_)
        )
    }
}
