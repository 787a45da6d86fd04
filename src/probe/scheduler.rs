//! Bounded worker pool that keeps directory latencies fresh.
//!
//! `W` slots each run a self-feeding loop: take the next pending target
//! (nodes before hubs), probe it, write the result back, repeat. When both
//! queues are drained and every slot is idle the run is complete.
//!
//! Restarting with [`ProbeScheduler::ping_all`] tears down whatever each
//! slot is doing. Every slot carries an epoch; bumping it under the state
//! lock means a superseded task can neither take new work nor write a
//! result, and its interrupted target goes back to the front of the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::prober::Prober;
use crate::events::{EventBus, TopologyEvent};
use crate::servers::{Directories, Latency, Scope};

/// Extra time granted to a prober past its own timeout before the slot
/// gives up on it.
const GUARD_MARGIN: Duration = Duration::from_millis(500);

/// What a slot is measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub scope: Scope,
    pub id: usize,
}

/// A queued target plus the directory generation it was queued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Job {
    target: ProbeTarget,
    generation: u64,
}

#[derive(Debug, Default)]
struct Slot {
    epoch: u64,
    running: bool,
    current: Option<Job>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct State {
    nodes: VecDeque<Job>,
    hubs: VecDeque<Job>,
    slots: Vec<Slot>,
    complete: bool,
    max_in_flight: usize,
}

impl State {
    fn next_job(&mut self) -> Option<Job> {
        self.nodes.pop_front().or_else(|| self.hubs.pop_front())
    }

    fn queue_mut(&mut self, scope: Scope) -> &mut VecDeque<Job> {
        match scope {
            Scope::Nodes => &mut self.nodes,
            Scope::Hubs => &mut self.hubs,
        }
    }

    fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.current.is_some()).count()
    }

    fn is_idle(&self) -> bool {
        self.nodes.is_empty() && self.hubs.is_empty() && self.slots.iter().all(|s| !s.running)
    }
}

struct Inner {
    prober: Arc<dyn Prober>,
    directories: Arc<Directories>,
    events: Arc<EventBus>,
    probe_timeout: Duration,
    state: Mutex<State>,
    idle: Notify,
}

/// Drives latency probes across both directories.
#[derive(Clone)]
pub struct ProbeScheduler {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl ProbeScheduler {
    pub fn new(
        workers: usize,
        probe_timeout: Duration,
        prober: Arc<dyn Prober>,
        directories: Arc<Directories>,
        events: Arc<EventBus>,
        runtime: Handle,
    ) -> Self {
        let slots = (0..workers.max(1)).map(|_| Slot::default()).collect();
        Self {
            inner: Arc::new(Inner {
                prober,
                directories,
                events,
                probe_timeout,
                state: Mutex::new(State {
                    slots,
                    complete: true,
                    ..Default::default()
                }),
                idle: Notify::new(),
            }),
            runtime,
        }
    }

    /// Queue every entry of `scope` and (re)start all slots.
    ///
    /// The scope's previous queue is replaced, not appended to.
    pub fn ping_all(&self, scope: Scope) {
        let (generation, count) = {
            let dir = self.inner.directories.get(scope).read();
            (dir.generation(), dir.len())
        };
        log::info!("Pinging all {} {}s", count, scope);

        let mut state = self.inner.state.lock();
        *state.queue_mut(scope) = (0..count)
            .map(|id| Job {
                target: ProbeTarget { scope, id },
                generation,
            })
            .collect();

        // Tear down whatever the slots were doing; interrupted work goes back first.
        for index in 0..state.slots.len() {
            let slot = &mut state.slots[index];
            slot.epoch += 1;
            slot.running = false;
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
            if let Some(job) = slot.current.take() {
                log::debug!("Slot {} interrupted while probing {:?}", index, job.target);
                let still_queued = state
                    .queue_mut(job.target.scope)
                    .iter()
                    .any(|j| j.target == job.target);
                if !still_queued {
                    state.queue_mut(job.target.scope).push_front(job);
                }
            }
        }

        if state.nodes.is_empty() && state.hubs.is_empty() {
            let was_complete = state.complete;
            state.complete = true;
            drop(state);
            if !was_complete {
                self.inner.events.emit(TopologyEvent::ProbingComplete);
            }
            self.inner.idle.notify_waiters();
            return;
        }

        state.complete = false;
        let pending = state.nodes.len() + state.hubs.len();
        let to_start = state.slots.len().min(pending);
        for index in 0..to_start {
            let epoch = state.slots[index].epoch;
            state.slots[index].running = true;
            let inner = Arc::clone(&self.inner);
            let handle = self.runtime.spawn(run_slot(inner, index, epoch));
            state.slots[index].handle = Some(handle);
        }
    }

    /// True once the last run drained both queues.
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().complete
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight()
    }

    /// Highest number of simultaneous probes seen so far.
    pub fn max_in_flight(&self) -> usize {
        self.inner.state.lock().max_in_flight
    }

    pub fn pending(&self) -> usize {
        let state = self.inner.state.lock();
        state.nodes.len() + state.hubs.len()
    }

    pub fn workers(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    /// Resolve once the current run is complete.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    /// Abort every slot and drop all pending work.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        state.nodes.clear();
        state.hubs.clear();
        for slot in state.slots.iter_mut() {
            slot.epoch += 1;
            slot.running = false;
            slot.current = None;
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
        }
        state.complete = true;
        drop(state);
        self.inner.idle.notify_waiters();
    }
}

async fn run_slot(inner: Arc<Inner>, index: usize, epoch: u64) {
    loop {
        let job = {
            let mut state = inner.state.lock();
            if state.slots[index].epoch != epoch {
                return;
            }
            match state.next_job() {
                Some(job) => {
                    state.slots[index].current = Some(job);
                    let in_flight = state.in_flight();
                    state.max_in_flight = state.max_in_flight.max(in_flight);
                    job
                }
                None => {
                    let slot = &mut state.slots[index];
                    slot.current = None;
                    slot.running = false;
                    slot.handle = None;
                    let finished = state.is_idle() && !state.complete;
                    if finished {
                        state.complete = true;
                    }
                    drop(state);
                    if finished {
                        log::info!("Probing complete");
                        inner.events.emit(TopologyEvent::ProbingComplete);
                        inner.idle.notify_waiters();
                    }
                    return;
                }
            }
        };

        let address = {
            let dir = inner.directories.get(job.target.scope).read();
            if dir.generation() == job.generation {
                dir.get(job.target.id).map(|r| r.address.clone())
            } else {
                None
            }
        };
        let address = match address {
            Some(a) => a,
            None => {
                log::debug!("Skipping stale probe target {:?}", job.target);
                continue;
            }
        };

        log::debug!("Slot {} probing {} {} ({})", index, job.target.scope, job.target.id, address);
        let latency = match tokio::time::timeout(
            inner.probe_timeout + GUARD_MARGIN,
            inner.prober.probe(&address, inner.probe_timeout),
        )
        .await
        {
            Ok(latency) => latency,
            Err(_) => {
                log::debug!("Probe of {} overran its guard", address);
                Latency::Failed
            }
        };

        {
            let mut state = inner.state.lock();
            if state.slots[index].epoch != epoch {
                return;
            }
            state.slots[index].current = None;
        }

        let written = {
            let mut dir = inner.directories.get(job.target.scope).write();
            if dir.generation() == job.generation {
                dir.set_latency(job.target.id, latency);
                true
            } else {
                false
            }
        };
        if written {
            log::debug!("{} {} latency {:?}", job.target.scope, job.target.id, latency);
            inner.events.emit(TopologyEvent::PingUpdated {
                target: job.target,
                latency,
            });
        }
    }
}
