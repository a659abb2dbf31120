use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha512};

use super::{timestamp::Timestamp, MulticastId, ProcessId};
use crate::common::crypto::{Digest, Keypair, Signature};

/*
    Two kinds of message travel between processes. A multicast message
    announces the payload and is stamped by its sender. A propose message
    carries one destination's locally assigned timestamp for that payload
    and is broadcast to the whole destination group, the proposer included.
*/

pub trait Hashable {
    fn hash(&self) -> Digest;
}

/// Anything that can sit in a channel ordering buffer.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum MessageKind {
    Multicast { payload: Vec<u8> },
    Propose,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub timestamp: Timestamp,
    pub id: MulticastId,
    pub source: ProcessId,
}

impl WireMessage {
    pub fn multicast(timestamp: Timestamp, id: MulticastId, source: ProcessId, payload: Vec<u8>) -> Self {
        WireMessage {
            kind: MessageKind::Multicast { payload },
            timestamp,
            id,
            source,
        }
    }

    pub fn propose(timestamp: Timestamp, id: MulticastId, source: ProcessId) -> Self {
        WireMessage {
            kind: MessageKind::Propose,
            timestamp,
            id,
            source,
        }
    }
}

impl Timestamped for WireMessage {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Hashable for WireMessage {
    fn hash(&self) -> Digest {
        let mut hasher = Sha512::new();
        match &self.kind {
            MessageKind::Multicast { payload } => {
                hasher.update([1u8]);
                hasher.update((payload.len() as u64).to_be_bytes());
                hasher.update(payload);
            }
            MessageKind::Propose => hasher.update([2u8]),
        }
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.id.to_be_bytes());
        hasher.update(self.source.to_be_bytes());
        let result = hasher.finalize();
        let mut digest = [0u8; 64];
        digest.copy_from_slice(&result[..]);
        digest
    }
}

/// A wire message signed by its source, as it travels over the transport.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub message: WireMessage,
    pub sig: Signature,
}

impl Envelope {
    pub fn seal(message: WireMessage, keypair: &Keypair) -> Self {
        let sig = keypair.sign(&message.hash());
        Envelope { message, sig }
    }

    pub fn verify(&self) -> bool {
        self.sig.verify(&self.message.hash())
    }
}

impl Timestamped for Envelope {
    fn timestamp(&self) -> Timestamp {
        self.message.timestamp
    }
}
