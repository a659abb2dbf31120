use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    clock::Clock,
    log::{MessageLog, Phase},
    membership::{Group, GroupResolver},
    message::{MessageKind, WireMessage},
    timestamp::{select_global, Timestamp},
    MulticastId, ProcessId,
};
use crate::common::{MulticastError, Result};

/*
    Each process runs three actions over its own clock and message log.

    multicast:         the designated sender ticks its clock and sends the
                       stamped payload to every member of the group.
    receive-multicast: a member ticks its clock, records (clock, self) as
                       its local timestamp and broadcasts it as a proposal.
    receive-propose:   a member records the proposal; once every member has
                       proposed it picks the largest one as the global
                       timestamp, raises its clock to match and commits.

    A committed id is delivered once no id still waiting for its global
    timestamp holds a local timestamp below it: the final timestamp of such
    an id can only be at least its local one, so nothing can later slot in
    ahead of what has been delivered.
*/

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Outbound {
    pub to: ProcessId,
    pub message: WireMessage,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Delivery {
    pub process: ProcessId,
    pub id: MulticastId,
    pub global_ts: Timestamp,
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    pub delivered: Vec<Delivery>,
}

/// Durable protocol state of one process.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub process: ProcessId,
    pub clock: Clock,
    pub log: MessageLog,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub struct MulticastEngine {
    id: ProcessId,
    clock: Clock,
    log: MessageLog,
    membership: Arc<dyn GroupResolver>,
    retire_delivered: bool,
}

impl MulticastEngine {
    pub fn new(id: ProcessId, membership: Arc<dyn GroupResolver>) -> Self {
        MulticastEngine {
            id,
            clock: Clock::new(),
            log: MessageLog::new(),
            membership,
            retire_delivered: false,
        }
    }

    pub fn restore(snapshot: EngineSnapshot, membership: Arc<dyn GroupResolver>) -> Self {
        MulticastEngine {
            id: snapshot.process,
            clock: snapshot.clock,
            log: snapshot.log,
            membership,
            retire_delivered: false,
        }
    }

    /// Drop delivered entries from the log after every delivery.
    pub fn with_retirement(mut self, retire_delivered: bool) -> Self {
        self.retire_delivered = retire_delivered;
        self
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            process: self.id,
            clock: self.clock,
            log: self.log.clone(),
        }
    }

    pub fn multicast(&mut self, id: MulticastId, payload: Vec<u8>) -> Result<Vec<Outbound>> {
        let group = self.membership.resolve(id)?;
        if group.sender != self.id {
            return Err(MulticastError::NotSender {
                id,
                process: self.id,
                sender: group.sender,
            });
        }
        if self.log.is_originated(id) {
            return Err(MulticastError::AlreadyMulticast(id));
        }
        self.log.mark_originated(id)?;

        let timestamp = Timestamp::new(self.clock.tick(), self.id);
        debug!("Process {}: multicast {} stamped {}", self.id, id, timestamp);

        let message = WireMessage::multicast(timestamp, id, self.id, payload);
        Ok(fan_out(&group, message))
    }

    pub fn handle(&mut self, message: WireMessage) -> Result<Effects> {
        match message.kind {
            MessageKind::Multicast { payload } => {
                self.receive_multicast(message.id, message.source, payload)
            }
            MessageKind::Propose => {
                self.receive_propose(message.id, message.source, message.timestamp)
            }
        }
    }

    fn receive_multicast(&mut self, id: MulticastId, source: ProcessId, payload: Vec<u8>) -> Result<Effects> {
        let group = self.membership.resolve(id)?;
        if !group.is_member(self.id) {
            return Err(MulticastError::NotMember { id, process: self.id });
        }
        if source != group.sender {
            return Err(MulticastError::UnexpectedSource {
                id,
                expected: group.sender,
                actual: source,
            });
        }
        if self.log.is_retired(id) || self.log.phase(id) != Phase::Start {
            return Err(MulticastError::DuplicateMulticast { id, process: self.id });
        }

        let local_ts = Timestamp::new(self.clock.tick(), self.id);
        self.log.record_local(id, local_ts, payload)?;
        debug!("Process {}: proposing {} for multicast {}", self.id, local_ts, id);

        Ok(Effects {
            outbound: fan_out(&group, WireMessage::propose(local_ts, id, self.id)),
            delivered: Vec::new(),
        })
    }

    fn receive_propose(&mut self, id: MulticastId, source: ProcessId, proposal: Timestamp) -> Result<Effects> {
        let group = self.membership.resolve(id)?;
        if !group.is_member(self.id) {
            return Err(MulticastError::NotMember { id, process: self.id });
        }
        if !group.is_member(source) {
            return Err(MulticastError::NotMember { id, process: source });
        }

        let collected = self.log.record_proposal(id, source, proposal)?;
        debug!(
            "Process {}: proposal {} from {} for multicast {} ({}/{})",
            self.id,
            proposal,
            source,
            id,
            collected,
            group.members.len()
        );
        if collected < group.members.len() {
            return Ok(Effects::default());
        }

        let global_ts = self
            .log
            .get(id)
            .and_then(|entry| select_global(entry.proposals.values().copied()))
            .ok_or(MulticastError::PhaseViolation {
                id,
                from: Phase::Proposed,
                to: Phase::Committed,
            })?;
        self.log.commit(id, global_ts)?;
        self.clock.observe(global_ts.t);
        debug!("Process {}: committed multicast {} at {}", self.id, id, global_ts);

        Ok(Effects {
            outbound: Vec::new(),
            delivered: self.deliver_ready()?,
        })
    }

    /// Whether `id` is committed, undelivered, and below every outstanding local timestamp.
    pub fn can_deliver(&self, id: MulticastId) -> bool {
        let Some(entry) = self.log.get(id) else {
            return false;
        };
        if entry.delivered || entry.phase != Phase::Committed {
            return false;
        }
        let Some(global_ts) = entry.global_ts else {
            return false;
        };
        self.log.outstanding().all(|(_, local_ts)| global_ts < local_ts)
    }

    fn deliver_ready(&mut self) -> Result<Vec<Delivery>> {
        let mut delivered = Vec::new();
        // Committed ids go out in global timestamp order. If the smallest is
        // blocked by an outstanding id, every larger one is blocked too.
        while let Some((id, global_ts)) = self.log.next_committed() {
            if !self.can_deliver(id) {
                break;
            }
            let entry = self.log.mark_delivered(id)?;
            let payload = entry.payload.clone().unwrap_or_default();
            info!("Process {}: delivered multicast {} at {}", self.id, id, global_ts);
            delivered.push(Delivery {
                process: self.id,
                id,
                global_ts,
                payload,
            });
        }
        if self.retire_delivered && !delivered.is_empty() {
            let retired = self.log.retire_delivered();
            debug!("Process {}: retired {} log entries", self.id, retired);
        }
        Ok(delivered)
    }
}

fn fan_out(group: &Group, message: WireMessage) -> Vec<Outbound> {
    group
        .members
        .iter()
        .map(|to| Outbound {
            to: *to,
            message: message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};

    use super::*;
    use crate::multicast::membership::StaticMembership;

    fn membership(groups: Vec<(MulticastId, ProcessId, Vec<ProcessId>)>) -> Arc<dyn GroupResolver> {
        let mut membership = StaticMembership::new();
        for (id, sender, members) in groups {
            membership.register(id, Group::new(sender, members)).unwrap();
        }
        Arc::new(membership)
    }

    fn engines(n: ProcessId, membership: &Arc<dyn GroupResolver>) -> BTreeMap<ProcessId, MulticastEngine> {
        (1..=n).map(|p| (p, MulticastEngine::new(p, membership.clone()))).collect()
    }

    // Hands every outbound message to its destination in send order until nothing is left.
    fn pump(
        engines: &mut BTreeMap<ProcessId, MulticastEngine>,
        initial: Vec<Outbound>,
    ) -> BTreeMap<ProcessId, Vec<Delivery>> {
        let mut queue: VecDeque<Outbound> = initial.into();
        let mut deliveries: BTreeMap<ProcessId, Vec<Delivery>> = BTreeMap::new();
        while let Some(outbound) = queue.pop_front() {
            let engine = engines.get_mut(&outbound.to).unwrap();
            let effects = engine.handle(outbound.message).unwrap();
            queue.extend(effects.outbound);
            deliveries.entry(outbound.to).or_default().extend(effects.delivered);
        }
        deliveries
    }

    #[test]
    fn test_single_multicast_to_three_processes() {
        let membership = membership(vec![(1, 1, vec![1, 2, 3])]);
        let mut engines = engines(3, &membership);

        let outbound = engines.get_mut(&1).unwrap().multicast(1, b"m1".to_vec()).unwrap();
        assert_eq!(outbound.len(), 3);
        assert!(outbound.iter().all(|o| o.message.timestamp == Timestamp::new(1, 1)));

        let deliveries = pump(&mut engines, outbound);

        // The sender ticked once to multicast and once more on its own receipt.
        let local = |p: ProcessId| engines[&p].log().get(1).unwrap().local_ts;
        assert_eq!(local(1), Some(Timestamp::new(2, 1)));
        assert_eq!(local(2), Some(Timestamp::new(1, 2)));
        assert_eq!(local(3), Some(Timestamp::new(1, 3)));

        for p in 1..=3 {
            let entry = engines[&p].log().get(1).unwrap();
            assert_eq!(entry.global_ts, Some(Timestamp::new(2, 1)));
            assert_eq!(entry.delivery_count, 1);
            assert_eq!(engines[&p].clock(), 2);
            assert_eq!(deliveries[&p].len(), 1);
            assert_eq!(deliveries[&p][0].payload, b"m1".to_vec());
        }
    }

    #[test]
    fn test_tie_on_t_goes_to_largest_source() {
        let membership = membership(vec![(1, 1, vec![1, 2, 3]), (2, 2, vec![2, 3])]);
        let mut engines = engines(3, &membership);

        // Multicast 2 commits at (2,2) and leaves processes 2 and 3 at clock 2.
        let first = engines.get_mut(&2).unwrap().multicast(2, Vec::new()).unwrap();
        pump(&mut engines, first);
        assert_eq!(engines[&3].log().get(2).unwrap().global_ts, Some(Timestamp::new(2, 2)));

        let outbound = engines.get_mut(&1).unwrap().multicast(1, Vec::new()).unwrap();
        pump(&mut engines, outbound);

        let entry = engines[&1].log().get(1).unwrap();
        assert_eq!(entry.proposals[&1], Timestamp::new(2, 1));
        assert_eq!(entry.proposals[&2], Timestamp::new(3, 2));
        assert_eq!(entry.proposals[&3], Timestamp::new(3, 3));
        for p in 1..=3 {
            assert_eq!(engines[&p].log().get(1).unwrap().global_ts, Some(Timestamp::new(3, 3)));
            assert_eq!(engines[&p].clock(), 3);
        }
    }

    #[test]
    fn test_outstanding_message_blocks_delivery() {
        let membership = membership(vec![(1, 1, vec![1, 2]), (2, 2, vec![1, 2])]);
        let mut engines = engines(2, &membership);

        // Both processes receive both multicasts before any proposal moves.
        let m1 = engines.get_mut(&1).unwrap().multicast(1, Vec::new()).unwrap();
        let m2 = engines.get_mut(&2).unwrap().multicast(2, Vec::new()).unwrap();
        let mut proposals = Vec::new();
        for outbound in m1.into_iter().chain(m2) {
            let effects = engines.get_mut(&outbound.to).unwrap().handle(outbound.message).unwrap();
            proposals.extend(effects.outbound);
        }
        assert_eq!(engines[&1].log().get(1).unwrap().local_ts, Some(Timestamp::new(2, 1)));
        assert_eq!(engines[&1].log().get(2).unwrap().local_ts, Some(Timestamp::new(3, 1)));

        // Multicast 2 commits at (3,2) on process 1 but (2,1) is still outstanding.
        let (for_two, rest): (Vec<_>, Vec<_>) = proposals.into_iter().partition(|o| o.message.id == 2);
        let mut delivered = Vec::new();
        for outbound in for_two.into_iter().filter(|o| o.to == 1) {
            delivered.extend(engines.get_mut(&1).unwrap().handle(outbound.message).unwrap().delivered);
        }
        assert_eq!(engines[&1].log().phase(2), Phase::Committed);
        assert_eq!(engines[&1].log().get(2).unwrap().global_ts, Some(Timestamp::new(3, 2)));
        assert!(!engines[&1].can_deliver(2));
        assert!(delivered.is_empty());

        // Multicast 1 commits at (2,2) and unblocks both, smallest first.
        for outbound in rest.into_iter().filter(|o| o.to == 1) {
            delivered.extend(engines.get_mut(&1).unwrap().handle(outbound.message).unwrap().delivered);
        }
        let order: Vec<(MulticastId, Timestamp)> = delivered.iter().map(|d| (d.id, d.global_ts)).collect();
        assert_eq!(order, vec![(1, Timestamp::new(2, 2)), (2, Timestamp::new(3, 2))]);
    }

    #[test]
    fn test_only_designated_sender_multicasts_once() {
        let membership = membership(vec![(1, 1, vec![1, 2])]);
        let mut engines = engines(2, &membership);

        assert!(matches!(
            engines.get_mut(&2).unwrap().multicast(1, Vec::new()),
            Err(MulticastError::NotSender { id: 1, process: 2, sender: 1 })
        ));
        assert!(matches!(
            engines.get_mut(&1).unwrap().multicast(7, Vec::new()),
            Err(MulticastError::UnknownMulticast(7))
        ));

        engines.get_mut(&1).unwrap().multicast(1, Vec::new()).unwrap();
        assert_eq!(engines[&1].clock(), 1);
        assert!(matches!(
            engines.get_mut(&1).unwrap().multicast(1, Vec::new()),
            Err(MulticastError::AlreadyMulticast(1))
        ));
        assert_eq!(engines[&1].clock(), 1);
    }

    #[test]
    fn test_rejects_protocol_violations() {
        let membership = membership(vec![(1, 1, vec![1, 2])]);
        let mut engine = MulticastEngine::new(2, membership.clone());

        let forged = WireMessage::multicast(Timestamp::new(1, 2), 1, 2, Vec::new());
        assert!(matches!(engine.handle(forged), Err(MulticastError::UnexpectedSource { .. })));

        let genuine = WireMessage::multicast(Timestamp::new(1, 1), 1, 1, Vec::new());
        engine.handle(genuine.clone()).unwrap();
        assert!(matches!(engine.handle(genuine), Err(MulticastError::DuplicateMulticast { .. })));

        let outsider = WireMessage::propose(Timestamp::new(1, 3), 1, 3);
        assert!(matches!(engine.handle(outsider), Err(MulticastError::NotMember { process: 3, .. })));

        let mut stranger = MulticastEngine::new(3, membership);
        let stray = WireMessage::multicast(Timestamp::new(1, 1), 1, 1, Vec::new());
        assert!(matches!(stranger.handle(stray), Err(MulticastError::NotMember { process: 3, .. })));
    }

    #[test]
    fn test_retirement_drops_delivered_entries() {
        let membership = membership(vec![(1, 1, vec![1, 2])]);
        let mut engines: BTreeMap<ProcessId, MulticastEngine> = (1..=2)
            .map(|p| (p, MulticastEngine::new(p, membership.clone()).with_retirement(true)))
            .collect();

        let outbound = engines.get_mut(&1).unwrap().multicast(1, Vec::new()).unwrap();
        let deliveries = pump(&mut engines, outbound);

        for p in 1..=2 {
            assert_eq!(deliveries[&p].len(), 1);
            assert!(engines[&p].log().is_empty());
            assert!(engines[&p].log().is_delivered(1));
        }
        assert!(matches!(
            engines.get_mut(&1).unwrap().multicast(1, Vec::new()),
            Err(MulticastError::AlreadyMulticast(1))
        ));
    }

    #[test]
    fn test_snapshot_restores_state() {
        let membership = membership(vec![(1, 1, vec![1, 2])]);
        let mut engine = MulticastEngine::new(2, membership.clone());
        engine.handle(WireMessage::multicast(Timestamp::new(1, 1), 1, 1, b"p".to_vec())).unwrap();

        let json = engine.snapshot().to_json().unwrap();
        let mut restored = MulticastEngine::restore(EngineSnapshot::from_json(&json).unwrap(), membership);
        assert_eq!(restored.clock(), 1);
        assert_eq!(restored.log(), engine.log());

        restored.handle(WireMessage::propose(Timestamp::new(2, 1), 1, 1)).unwrap();
        let effects = restored.handle(WireMessage::propose(Timestamp::new(1, 2), 1, 2)).unwrap();
        assert_eq!(effects.delivered.len(), 1);
        assert_eq!(effects.delivered[0].global_ts, Timestamp::new(2, 1));
        assert_eq!(restored.clock(), 2);
    }
}
