//! Deterministic, single-threaded execution of a whole cluster.
//!
//! Every step picks one enabled action at random from a seeded RNG: either
//! a pending multicast request at its sender, or the minimum message on some
//! non-empty link. Same seed, same interleaving. Used to check the ordering
//! properties across many schedules without real concurrency.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::trace;

use crate::{
    common::{MulticastError, Result},
    config::{ClusterConfig, GroupConfig},
    multicast::{
        ChannelTable, Delivery, GroupResolver, MulticastEngine, MulticastId, Outbound, ProcessId,
        Timestamp, WireMessage,
    },
};

enum Action {
    Issue(usize),
    Consume(ProcessId, ProcessId),
}

pub struct Simulation {
    engines: BTreeMap<ProcessId, MulticastEngine>,
    channels: ChannelTable<WireMessage>,
    groups: Vec<GroupConfig>,
    pending: Vec<(ProcessId, MulticastId)>,
    requested: BTreeSet<MulticastId>,
    rng: StdRng,
    deliveries: BTreeMap<ProcessId, Vec<Delivery>>,
    clock_history: BTreeMap<ProcessId, Vec<u64>>,
    stamped: BTreeMap<ProcessId, Vec<Timestamp>>,
    steps: usize,
}

impl Simulation {
    pub fn new(config: &ClusterConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let membership: Arc<dyn GroupResolver> = Arc::new(config.membership()?);
        let engines = config
            .process_ids()
            .map(|p| {
                let engine = MulticastEngine::new(p, membership.clone()).with_retirement(config.retire_delivered);
                (p, engine)
            })
            .collect();

        Ok(Simulation {
            engines,
            channels: ChannelTable::new(config.processes),
            groups: config.groups.clone(),
            pending: Vec::new(),
            requested: BTreeSet::new(),
            rng: StdRng::seed_from_u64(seed),
            deliveries: config.process_ids().map(|p| (p, Vec::new())).collect(),
            clock_history: config.process_ids().map(|p| (p, vec![0])).collect(),
            stamped: BTreeMap::new(),
            steps: 0,
        })
    }

    /// Queues multicast `id` at its designated sender, to be issued at some later step.
    pub fn request(&mut self, id: MulticastId) -> Result<()> {
        let group = self
            .groups
            .iter()
            .find(|g| g.id == id)
            .ok_or(MulticastError::UnknownMulticast(id))?;
        self.pending.push((group.sender, id));
        self.requested.insert(id);
        Ok(())
    }

    pub fn request_all(&mut self) -> Result<()> {
        let ids: Vec<MulticastId> = self.groups.iter().map(|g| g.id).collect();
        ids.into_iter().try_for_each(|id| self.request(id))
    }

    /// Runs one enabled action. Returns false when nothing is left to do.
    pub fn step(&mut self) -> Result<bool> {
        let mut enabled: Vec<Action> = (0..self.pending.len()).map(Action::Issue).collect();
        enabled.extend(
            self.channels
                .ready_channels()
                .into_iter()
                .map(|(from, to)| Action::Consume(from, to)),
        );
        if enabled.is_empty() {
            return Ok(false);
        }

        let choice = self.rng.gen_range(0..enabled.len());
        match enabled.swap_remove(choice) {
            Action::Issue(index) => {
                let (sender, id) = self.pending.swap_remove(index);
                trace!("step {}: process {} multicasts {}", self.steps, sender, id);
                let outbound = self.engine_mut(sender)?.multicast(id, id.to_be_bytes().to_vec())?;
                self.route(sender, outbound)?;
            }
            Action::Consume(from, to) => {
                if let Some(message) = self.channels.pop_min(from, to)? {
                    trace!("step {}: process {} consumes {:?} from {}", self.steps, to, message.kind, from);
                    let effects = self.engine_mut(to)?.handle(message)?;
                    self.route(to, effects.outbound)?;
                    self.deliveries.entry(to).or_default().extend(effects.delivered);
                }
            }
        }
        self.steps += 1;
        Ok(true)
    }

    /// Steps until no action is enabled, or `max_steps` have run. Returns the steps taken.
    pub fn run_to_quiescence(&mut self, max_steps: usize) -> Result<usize> {
        let start = self.steps;
        while self.steps - start < max_steps && self.step()? {}
        Ok(self.steps - start)
    }

    pub fn engine(&self, process: ProcessId) -> Option<&MulticastEngine> {
        self.engines.get(&process)
    }

    pub fn deliveries(&self) -> &BTreeMap<ProcessId, Vec<Delivery>> {
        &self.deliveries
    }

    pub fn in_flight(&self) -> usize {
        self.channels.in_flight()
    }

    fn engine_mut(&mut self, process: ProcessId) -> Result<&mut MulticastEngine> {
        self.engines
            .get_mut(&process)
            .ok_or(MulticastError::UnknownProcess(process))
    }

    fn route(&mut self, source: ProcessId, outbound: Vec<Outbound>) -> Result<()> {
        let clock = self.engine_mut(source)?.clock();
        self.clock_history.entry(source).or_default().push(clock);
        if let Some(first) = outbound.first() {
            self.stamped.entry(source).or_default().push(first.message.timestamp);
        }
        for Outbound { to, message } in outbound {
            self.channels.push(source, to, message)?;
        }
        Ok(())
    }

    /// Every pair of processes delivers their common ids in the same relative order.
    pub fn total_order_holds(&self) -> bool {
        let orders: Vec<Vec<MulticastId>> = self
            .deliveries
            .values()
            .map(|d| d.iter().map(|d| d.id).collect())
            .collect();
        orders.iter().all(|a| {
            orders.iter().all(|b| {
                let common: BTreeSet<MulticastId> =
                    a.iter().filter(|id| b.contains(*id)).copied().collect();
                let project = |order: &Vec<MulticastId>| -> Vec<MulticastId> {
                    order.iter().filter(|id| common.contains(*id)).copied().collect()
                };
                project(a) == project(b)
            })
        })
    }

    /// Each process delivers in ascending global timestamp, and all agree on each id's timestamp.
    pub fn follows_global_timestamps(&self) -> bool {
        let mut agreed: BTreeMap<MulticastId, Timestamp> = BTreeMap::new();
        self.deliveries.values().all(|delivered| {
            delivered.windows(2).all(|w| w[0].global_ts < w[1].global_ts)
                && delivered
                    .iter()
                    .all(|d| *agreed.entry(d.id).or_insert(d.global_ts) == d.global_ts)
        })
    }

    pub fn delivered_exactly_once(&self) -> bool {
        self.deliveries.iter().all(|(process, delivered)| {
            let unique: BTreeSet<MulticastId> = delivered.iter().map(|d| d.id).collect();
            let counted = self.engines[process]
                .log()
                .entries()
                .all(|(_, entry)| entry.delivery_count <= 1);
            unique.len() == delivered.len() && counted
        })
    }

    /// Every requested id reached every member of its group.
    pub fn all_delivered(&self) -> bool {
        self.groups
            .iter()
            .filter(|g| self.requested.contains(&g.id))
            .all(|g| {
                g.members.iter().all(|p| {
                    self.deliveries
                        .get(p)
                        .is_some_and(|d| d.iter().any(|d| d.id == g.id))
                })
            })
    }

    pub fn clocks_monotonic(&self) -> bool {
        self.clock_history
            .values()
            .all(|history| history.windows(2).all(|w| w[0] <= w[1]))
    }

    /// No process ever stamped two different messages with the same timestamp.
    pub fn timestamps_unique(&self) -> bool {
        self.stamped.values().all(|stamps| {
            let unique: BTreeSet<&Timestamp> = stamps.iter().collect();
            unique.len() == stamps.len()
        })
    }
}
