use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use super::{
    node::{Node, NodeHandle},
    transport::InMemoryNetwork,
};
use crate::{
    common::{crypto::Keypair, MulticastError, Result},
    config::ClusterConfig,
    multicast::{Delivery, GroupResolver, MulticastEngine, PeerDirectory, ProcessId},
};

/// A full set of nodes wired together over one in-memory network.
pub struct Cluster {
    handles: BTreeMap<ProcessId, NodeHandle>,
    deliveries: BTreeMap<ProcessId, mpsc::Receiver<Delivery>>,
    tasks: Vec<(ProcessId, JoinHandle<Result<()>>)>,
}

impl Cluster {
    /// Spawns one node per process. Must be called from within a tokio runtime.
    pub fn start(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        let membership: Arc<dyn GroupResolver> = Arc::new(config.membership()?);
        let network = Arc::new(InMemoryNetwork::new(config.processes));

        let keypairs: BTreeMap<ProcessId, Keypair> =
            config.process_ids().map(|p| (p, Keypair::new_pair())).collect();
        let peers = PeerDirectory::new(keypairs.iter().map(|(p, k)| (*p, k.pubkey())).collect());

        let mut handles = BTreeMap::new();
        let mut deliveries = BTreeMap::new();
        let mut tasks = Vec::new();
        for (id, keypair) in keypairs {
            let engine = MulticastEngine::new(id, membership.clone()).with_retirement(config.retire_delivered);
            let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_buffer);
            let (node, handle) = Node::new(
                engine,
                keypair,
                peers.clone(),
                network.clone(),
                config.channel_capacity,
                delivery_tx,
            )?;
            tasks.push((id, node.spawn()));
            handles.insert(id, handle);
            deliveries.insert(id, delivery_rx);
        }
        info!("Cluster started with {} processes", config.processes);

        Ok(Cluster {
            handles,
            deliveries,
            tasks,
        })
    }

    pub fn handle(&self, process: ProcessId) -> Result<&NodeHandle> {
        self.handles
            .get(&process)
            .ok_or(MulticastError::UnknownProcess(process))
    }

    /// Takes ownership of a process's delivery stream.
    pub fn take_deliveries(&mut self, process: ProcessId) -> Option<mpsc::Receiver<Delivery>> {
        self.deliveries.remove(&process)
    }

    /// Waits for the next `count` deliveries at `process`.
    pub async fn collect(&mut self, process: ProcessId, count: usize, timeout: Duration) -> Result<Vec<Delivery>> {
        let receiver = self
            .deliveries
            .get_mut(&process)
            .ok_or(MulticastError::UnknownProcess(process))?;
        collect_deliveries(receiver, process, count, timeout).await
    }

    pub async fn shutdown(self) -> Result<()> {
        for handle in self.handles.values() {
            // A node that already stopped has nothing left to shut down.
            let _ = handle.shutdown().await;
        }
        for (id, task) in self.tasks {
            match task.await {
                Ok(result) => result?,
                Err(e) => {
                    warn!("Node {}: task failed: {}", id, e);
                    return Err(MulticastError::NodeStopped(id));
                }
            }
        }
        Ok(())
    }
}

/// Reads `count` deliveries from one process's stream, waiting at most
/// `timeout` for each.
pub async fn collect_deliveries(
    receiver: &mut mpsc::Receiver<Delivery>,
    process: ProcessId,
    count: usize,
    timeout: Duration,
) -> Result<Vec<Delivery>> {
    let mut collected = Vec::with_capacity(count);
    while collected.len() < count {
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(delivery)) => collected.push(delivery),
            Ok(None) => return Err(MulticastError::NodeStopped(process)),
            Err(_) => {
                return Err(MulticastError::Transport(format!(
                    "process {} delivered {} of {} before timing out",
                    process,
                    collected.len(),
                    count
                )))
            }
        }
    }
    Ok(collected)
}
