use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::{
    common::{MulticastError, Result},
    multicast::{channel_index, ChannelBuffer, Envelope, ProcessId},
};

/// What a node needs from the network underneath it.
///
/// `receive_minimum` must hand out the smallest-timestamp envelope buffered
/// on the `(from, to)` link. Nothing stronger is required.
pub trait Transport: Send + Sync + 'static {
    fn processes(&self) -> u32;

    fn send_on_channel(&self, from: ProcessId, to: ProcessId, envelope: Envelope) -> Result<()>;

    fn receive_minimum(&self, from: ProcessId, to: ProcessId) -> Result<Option<Envelope>>;

    /// Signalled whenever something is sent to `to`.
    fn ready(&self, to: ProcessId) -> Result<Arc<Notify>>;
}

/// Every directed link lives in one process-local `N x N` table.
pub struct InMemoryNetwork {
    processes: u32,
    channels: Vec<Mutex<ChannelBuffer<Envelope>>>,
    ready: Vec<Arc<Notify>>,
}

impl InMemoryNetwork {
    pub fn new(processes: u32) -> Self {
        let links = processes as usize * processes as usize;
        InMemoryNetwork {
            processes,
            channels: (0..links).map(|_| Mutex::new(ChannelBuffer::new())).collect(),
            ready: (0..processes).map(|_| Arc::new(Notify::new())).collect(),
        }
    }

    fn channel(&self, from: ProcessId, to: ProcessId) -> Result<MutexGuard<'_, ChannelBuffer<Envelope>>> {
        let index = channel_index(self.processes, from, to)?;
        self.channels[index]
            .lock()
            .map_err(|_| MulticastError::Transport(format!("channel {} -> {} poisoned", from, to)))
    }

    pub fn in_flight(&self, from: ProcessId, to: ProcessId) -> Result<usize> {
        Ok(self.channel(from, to)?.len())
    }
}

impl Transport for InMemoryNetwork {
    fn processes(&self) -> u32 {
        self.processes
    }

    fn send_on_channel(&self, from: ProcessId, to: ProcessId, envelope: Envelope) -> Result<()> {
        self.channel(from, to)?.push(envelope);
        self.ready(to)?.notify_one();
        Ok(())
    }

    fn receive_minimum(&self, from: ProcessId, to: ProcessId) -> Result<Option<Envelope>> {
        Ok(self.channel(from, to)?.pop_min())
    }

    fn ready(&self, to: ProcessId) -> Result<Arc<Notify>> {
        if to == 0 || to > self.processes {
            return Err(MulticastError::UnknownProcess(to));
        }
        Ok(self.ready[to as usize - 1].clone())
    }
}
