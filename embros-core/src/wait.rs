//! Readiness aggregation: the wait-set is the executor's only blocking point.
//!
//! A [`WaitSet`] is sized once from per-kind entity counts, refilled with
//! endpoint references each cycle, and then blocked on. Endpoints wake the
//! blocked thread through the shared [`WaitSignal`]; timers are woken by
//! deadline arithmetic instead.

use crate::{
    endpoint::{RawTimer, Waitable},
    error::{Error, Result},
};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Per-kind entity totals used to size a wait-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityCounters {
    pub subscriptions: usize,
    pub guard_conditions: usize,
    pub timers: usize,
    pub clients: usize,
    pub services: usize,
    pub events: usize,
}

impl EntityCounters {
    /// Adds `other` into `self`.
    pub fn add(&mut self, other: &EntityCounters) {
        self.subscriptions += other.subscriptions;
        self.guard_conditions += other.guard_conditions;
        self.timers += other.timers;
        self.clients += other.clients;
        self.services += other.services;
        self.events += other.events;
    }

    /// Subtracts `other` from `self`.
    pub fn sub(&mut self, other: &EntityCounters) {
        self.subscriptions -= other.subscriptions;
        self.guard_conditions -= other.guard_conditions;
        self.timers -= other.timers;
        self.clients -= other.clients;
        self.services -= other.services;
        self.events -= other.events;
    }
}

/// Kind of a wait-set slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Subscription,
    GuardCondition,
    Timer,
    Client,
    Service,
}

/// Wake-up channel shared between a blocked wait-set and its endpoints.
///
/// Endpoints call [`WaitSignal::notify`] when data arrives; the wait-set
/// consumes the latched flag before each readiness scan so that an arrival
/// during the scan is never lost.
pub struct WaitSignal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl WaitSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Wakes the waiter, if any.
    pub fn notify(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cond.notify_all();
    }
}

struct Slots {
    entries: Vec<Arc<dyn Waitable>>,
    ready: Vec<bool>,
    capacity: usize,
}

impl Slots {
    fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::new();
        entries.reserve_exact(capacity);
        let mut ready = Vec::new();
        ready.reserve_exact(capacity);
        Self {
            entries,
            ready,
            capacity,
        }
    }

    fn push(&mut self, entry: Arc<dyn Waitable>) -> Result<usize> {
        if self.entries.len() == self.capacity {
            return Err(Error::WaitSetFull);
        }
        self.entries.push(entry);
        self.ready.push(false);
        Ok(self.entries.len() - 1)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.ready.clear();
    }

    /// Latches readiness for slots that are not already marked.
    /// Returns true if any slot is ready.
    fn scan(&mut self) -> bool {
        let mut any = false;
        for (i, entry) in self.entries.iter().enumerate() {
            if !self.ready[i] && entry.ready() {
                self.ready[i] = true;
            }
            any |= self.ready[i];
        }
        any
    }
}

/// Fixed-capacity readiness aggregator.
pub struct WaitSet {
    signal: Arc<WaitSignal>,
    capacities: EntityCounters,
    subscriptions: Slots,
    guard_conditions: Slots,
    clients: Slots,
    services: Slots,
    timers: Vec<Arc<dyn RawTimer>>,
    timers_ready: Vec<bool>,
}

impl WaitSet {
    /// Allocates slot storage for `counters` entities. This is the only
    /// allocation a wait-set ever performs.
    pub fn new(counters: &EntityCounters) -> Self {
        let mut timers = Vec::new();
        timers.reserve_exact(counters.timers);
        let mut timers_ready = Vec::new();
        timers_ready.reserve_exact(counters.timers);
        Self {
            signal: WaitSignal::new(),
            capacities: *counters,
            subscriptions: Slots::with_capacity(counters.subscriptions),
            guard_conditions: Slots::with_capacity(counters.guard_conditions),
            clients: Slots::with_capacity(counters.clients),
            services: Slots::with_capacity(counters.services),
            timers,
            timers_ready,
        }
    }

    /// The counters this wait-set was sized with.
    pub fn capacities(&self) -> &EntityCounters {
        &self.capacities
    }

    /// Empties every slot vector. Capacity is retained, so refilling the
    /// wait-set on the next cycle does not reallocate.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.guard_conditions.clear();
        self.clients.clear();
        self.services.clear();
        self.timers.clear();
        self.timers_ready.clear();
    }

    pub fn add_subscription(&mut self, endpoint: Arc<dyn Waitable>) -> Result<usize> {
        endpoint.attach(&self.signal);
        self.subscriptions.push(endpoint)
    }

    pub fn add_guard_condition(&mut self, endpoint: Arc<dyn Waitable>) -> Result<usize> {
        endpoint.attach(&self.signal);
        self.guard_conditions.push(endpoint)
    }

    pub fn add_client(&mut self, endpoint: Arc<dyn Waitable>) -> Result<usize> {
        endpoint.attach(&self.signal);
        self.clients.push(endpoint)
    }

    pub fn add_service(&mut self, endpoint: Arc<dyn Waitable>) -> Result<usize> {
        endpoint.attach(&self.signal);
        self.services.push(endpoint)
    }

    pub fn add_timer(&mut self, timer: Arc<dyn RawTimer>) -> Result<usize> {
        if self.timers.len() == self.capacities.timers {
            return Err(Error::WaitSetFull);
        }
        self.timers.push(timer);
        self.timers_ready.push(false);
        Ok(self.timers.len() - 1)
    }

    /// True if the slot at `index` was ready when the last `wait` returned.
    pub fn is_ready(&self, kind: WaitKind, index: usize) -> bool {
        let ready = match kind {
            WaitKind::Subscription => &self.subscriptions.ready,
            WaitKind::GuardCondition => &self.guard_conditions.ready,
            WaitKind::Client => &self.clients.ready,
            WaitKind::Service => &self.services.ready,
            WaitKind::Timer => &self.timers_ready,
        };
        ready.get(index).copied().unwrap_or(false)
    }

    fn scan(&mut self) -> bool {
        let now = Instant::now();
        let mut any = false;
        any |= self.subscriptions.scan();
        any |= self.guard_conditions.scan();
        any |= self.clients.scan();
        any |= self.services.scan();
        for (i, timer) in self.timers.iter().enumerate() {
            if !self.timers_ready[i]
                && timer.next_deadline().is_some_and(|deadline| deadline <= now)
            {
                self.timers_ready[i] = true;
            }
            any |= self.timers_ready[i];
        }
        any
    }

    fn earliest_timer_deadline(&self) -> Option<Instant> {
        self.timers
            .iter()
            .filter_map(|timer| timer.next_deadline())
            .min()
    }

    /// Blocks until any registered entity is ready or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when at least one entity became ready, `Ok(false)`
    /// on timeout. Readiness is latched and queried with [`WaitSet::is_ready`].
    pub fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            // Consume the pending wake-up before scanning, so an arrival
            // during the scan leaves the flag set for the next park.
            {
                let mut fired = self.signal.fired.lock();
                *fired = false;
            }

            if self.scan() {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }

            let mut until = deadline;
            if let Some(timer_deadline) = self.earliest_timer_deadline() {
                until = until.min(timer_deadline);
            }

            let mut fired = self.signal.fired.lock();
            if !*fired {
                self.signal.cond.wait_until(&mut fired, until);
            }
        }
    }
}
