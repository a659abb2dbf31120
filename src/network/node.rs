use std::{collections::VecDeque, sync::Arc};

use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, Notify,
    },
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::transport::Transport;
use crate::{
    common::{crypto::Keypair, MulticastError, Result},
    multicast::{
        Delivery, Effects, EngineSnapshot, Envelope, MulticastEngine, MulticastId, Outbound,
        PeerDirectory, ProcessId,
    },
};

/*
    One task per process. The task is the only owner of the process's
    engine, so the three protocol actions never overlap. Inbound links are
    serviced round-robin, one minimum-timestamp message per link per pass,
    so a busy peer cannot starve the others. When a pass finds nothing the
    task sleeps until a message or a command arrives.

    Deliveries are queued inside the node and handed to the listener only
    as fast as it reads them, so a slow listener never stops the task from
    answering commands or proposing on other ids. Sends that the transport
    refuses are logged and dropped; a partial fan-out is left to the
    transport to retry.
*/

pub enum NodeCommand {
    Multicast {
        id: MulticastId,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<MulticastId>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct NodeHandle {
    id: ProcessId,
    cmd_tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Issues multicast `id`. Only valid at the id's designated sender.
    pub async fn request_multicast(&self, id: MulticastId, payload: impl Into<Vec<u8>>) -> Result<MulticastId> {
        let (reply, response) = oneshot::channel();
        self.send(NodeCommand::Multicast {
            id,
            payload: payload.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| MulticastError::NodeStopped(self.id))?
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(NodeCommand::Snapshot { reply }).await?;
        response.await.map_err(|_| MulticastError::NodeStopped(self.id))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(NodeCommand::Shutdown).await
    }

    async fn send(&self, command: NodeCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| MulticastError::NodeStopped(self.id))
    }
}

pub struct Node<T: Transport> {
    pub id: ProcessId,
    pub keypair: Keypair,
    pub peers: PeerDirectory,
    engine: MulticastEngine,
    network: Arc<T>,
    ready: Arc<Notify>,
    cmd_rx: mpsc::Receiver<NodeCommand>,
    delivery_tx: mpsc::Sender<Delivery>,
    undelivered: VecDeque<Delivery>,
}

impl<T: Transport> Node<T> {
    pub fn new(
        engine: MulticastEngine,
        keypair: Keypair,
        peers: PeerDirectory,
        network: Arc<T>,
        capacity: usize,
        delivery_tx: mpsc::Sender<Delivery>,
    ) -> Result<(Self, NodeHandle)> {
        let id = engine.id();
        let ready = network.ready(id)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let node = Node {
            id,
            keypair,
            peers,
            engine,
            network,
            ready,
            cmd_rx,
            delivery_tx,
            undelivered: VecDeque::new(),
        };
        Ok((node, NodeHandle { id, cmd_tx }))
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Node {}: running", self.id);
        loop {
            while let Ok(command) = self.cmd_rx.try_recv() {
                if !self.handle_command(command) {
                    info!("Node {}: shutting down", self.id);
                    return Ok(());
                }
            }

            self.flush_deliveries();
            if self.service_inbound()? {
                continue;
            }

            let delivery_tx = self.delivery_tx.clone();
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            info!("Node {}: shutting down", self.id);
                            return Ok(());
                        }
                    }
                    None => {
                        info!("Node {}: all handles dropped, stopping", self.id);
                        return Ok(());
                    }
                },
                _ = self.ready.notified() => {}
                permit = delivery_tx.reserve(), if !self.undelivered.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(delivery) = self.undelivered.pop_front() {
                            permit.send(delivery);
                        }
                    }
                    Err(_) => self.drop_undelivered(),
                },
            }
        }
    }

    // Returns false once the node should stop.
    fn handle_command(&mut self, command: NodeCommand) -> bool {
        match command {
            NodeCommand::Multicast { id, payload, reply } => {
                let result = self.start_multicast(id, payload);
                if let Err(e) = &result {
                    warn!("Node {}: multicast {} rejected: {}", self.id, id, e);
                }
                let _ = reply.send(result);
                true
            }
            NodeCommand::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
                true
            }
            NodeCommand::Shutdown => false,
        }
    }

    // The id counts as issued once the engine stamps it, even if some sends fail.
    fn start_multicast(&mut self, id: MulticastId, payload: Vec<u8>) -> Result<MulticastId> {
        let outbound = self.engine.multicast(id, payload)?;
        self.send_all(outbound);
        Ok(id)
    }

    /// One pass over every inbound link. Returns whether anything was consumed.
    fn service_inbound(&mut self) -> Result<bool> {
        let mut progressed = false;
        for from in 1..=self.network.processes() {
            if let Some(envelope) = self.network.receive_minimum(from, self.id)? {
                progressed = true;
                self.process(from, envelope);
            }
        }
        Ok(progressed)
    }

    fn process(&mut self, from: ProcessId, envelope: Envelope) {
        let source = envelope.message.source;
        if source != from || !self.peers.is_signed_by(source, &envelope.sig.signer) || !envelope.verify() {
            warn!("Node {}: dropping envelope on link {} -> {}: {}", self.id, from, self.id, MulticastError::InvalidSignature(source));
            return;
        }

        let id = envelope.message.id;
        match self.engine.handle(envelope.message) {
            Ok(effects) => self.apply(effects),
            Err(e) if e.is_protocol_violation() => {
                warn!("Node {}: dropping message for multicast {} from {}: {}", self.id, id, source, e);
            }
            Err(e) => {
                error!("Node {}: failed to process multicast {} from {}: {}", self.id, id, source, e);
            }
        }
    }

    fn apply(&mut self, effects: Effects) {
        self.send_all(effects.outbound);
        self.undelivered.extend(effects.delivered);
        self.flush_deliveries();
    }

    /// Hands queued deliveries to the listener until its buffer is full.
    fn flush_deliveries(&mut self) {
        while let Some(delivery) = self.undelivered.pop_front() {
            match self.delivery_tx.try_send(delivery) {
                Ok(()) => {}
                Err(TrySendError::Full(delivery)) => {
                    self.undelivered.push_front(delivery);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    self.drop_undelivered();
                    return;
                }
            }
        }
    }

    fn drop_undelivered(&mut self) {
        debug!("Node {}: delivery listener gone, dropping queued deliveries", self.id);
        self.undelivered.clear();
    }

    fn send_all(&self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            let id = message.id;
            let envelope = Envelope::seal(message, &self.keypair);
            if let Err(e) = self.network.send_on_channel(self.id, to, envelope) {
                error!("Node {}: failed to send multicast {} traffic to {}: {}", self.id, id, to, e);
            }
        }
    }
}
