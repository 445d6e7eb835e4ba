//! Fixed-capacity handle table.
//!
//! Storage is reserved exactly once; live handles occupy the prefix in
//! insertion order. Removal shifts the tail left so the surviving order
//! is preserved.

use crate::handle::{Handle, HandleKind};
use embros_core::{EntityCounters, Error, Result};

pub(crate) struct HandleTable {
    handles: Vec<Handle>,
    capacity: usize,
    counters: EntityCounters,
    action_clients: usize,
    action_servers: usize,
}

impl HandleTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut handles = Vec::new();
        handles.reserve_exact(capacity);
        Self {
            handles,
            capacity,
            counters: EntityCounters::default(),
            action_clients: 0,
            action_servers: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait-set sizing counts for the current table contents.
    pub(crate) fn counters(&self) -> EntityCounters {
        self.counters
    }

    pub(crate) fn action_clients(&self) -> usize {
        self.action_clients
    }

    pub(crate) fn action_servers(&self) -> usize {
        self.action_servers
    }

    pub(crate) fn handles(&self) -> &[Handle] {
        &self.handles
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Handle> {
        self.handles.iter_mut()
    }

    pub(crate) fn push(&mut self, handle: Handle) -> Result<()> {
        if self.handles.len() == self.capacity {
            return Err(Error::CapacityExceeded);
        }
        self.counters.add(&handle.entry.wait_set_entities());
        match handle.entry.kind() {
            HandleKind::ActionClient => self.action_clients += 1,
            HandleKind::ActionServer => self.action_servers += 1,
            _ => {}
        }
        self.handles.push(handle);
        debug_assert_eq!(self.counters, self.census());
        Ok(())
    }

    /// Removes the handle whose endpoint address is `addr` and whose kind
    /// satisfies `matches_kind`. The tail shifts left by one.
    pub(crate) fn remove_where(
        &mut self,
        addr: usize,
        matches_kind: impl Fn(HandleKind) -> bool,
    ) -> Result<()> {
        let position = self
            .handles
            .iter()
            .position(|handle| {
                handle.entry.endpoint_addr() == addr && matches_kind(handle.entry.kind())
            })
            .ok_or(Error::NotFound)?;
        let handle = self.handles.remove(position);
        self.counters.sub(&handle.entry.wait_set_entities());
        match handle.entry.kind() {
            HandleKind::ActionClient => self.action_clients -= 1,
            HandleKind::ActionServer => self.action_servers -= 1,
            _ => {}
        }
        debug_assert_eq!(self.counters, self.census());
        Ok(())
    }

    /// Recounts wait-set entities from scratch. Must always agree with the
    /// incrementally maintained counters.
    pub(crate) fn census(&self) -> EntityCounters {
        let mut counters = EntityCounters::default();
        for handle in &self.handles {
            counters.add(&handle.entry.wait_set_entities());
        }
        counters
    }
}
