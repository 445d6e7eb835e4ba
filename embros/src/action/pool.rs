//! Arena-backed goal pool with intrusive free/used lists.
//!
//! Slots are allocated once; the free and used lists are `Option<usize>`
//! heads with per-slot `next` indices, so acquiring and releasing a goal
//! never touches the allocator.

struct Slot<S> {
    value: Option<S>,
    next: Option<usize>,
}

pub(crate) struct GoalPool<S> {
    slots: Vec<Slot<S>>,
    free_head: Option<usize>,
    used_head: Option<usize>,
    used: usize,
}

impl<S> GoalPool<S> {
    pub(crate) fn new(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        for i in 0..size {
            slots.push(Slot {
                value: None,
                next: if i + 1 < size { Some(i + 1) } else { None },
            });
        }
        Self {
            slots,
            free_head: if size > 0 { Some(0) } else { None },
            used_head: None,
            used: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.slots.len() - self.used
    }

    /// Moves a slot from the free list to the used list. `None` when the
    /// pool is exhausted.
    pub(crate) fn acquire(&mut self, value: S) -> Option<usize> {
        let index = self.free_head?;
        self.free_head = self.slots[index].next;
        self.slots[index].value = Some(value);
        self.slots[index].next = self.used_head;
        self.used_head = Some(index);
        self.used += 1;
        Some(index)
    }

    /// Returns a slot to the free list, yielding its value.
    pub(crate) fn release(&mut self, index: usize) -> Option<S> {
        let value = self.slots.get_mut(index)?.value.take()?;

        let mut prev: Option<usize> = None;
        let mut cursor = self.used_head;
        while let Some(current) = cursor {
            if current == index {
                match prev {
                    Some(prev) => self.slots[prev].next = self.slots[index].next,
                    None => self.used_head = self.slots[index].next,
                }
                break;
            }
            prev = Some(current);
            cursor = self.slots[current].next;
        }

        self.slots[index].next = self.free_head;
        self.free_head = Some(index);
        self.used -= 1;
        Some(value)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&S> {
        self.slots.get(index)?.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut S> {
        self.slots.get_mut(index)?.value.as_mut()
    }

    /// Head of the used list. Walk with [`GoalPool::next_used`]; grabbing
    /// the successor before releasing the current slot keeps the walk
    /// valid across releases.
    pub(crate) fn used_head(&self) -> Option<usize> {
        self.used_head
    }

    pub(crate) fn next_used(&self, index: usize) -> Option<usize> {
        self.slots.get(index)?.next
    }

    /// First used slot satisfying `predicate`.
    pub(crate) fn find(&self, predicate: impl Fn(&S) -> bool) -> Option<usize> {
        let mut cursor = self.used_head;
        while let Some(index) = cursor {
            if let Some(value) = self.slots[index].value.as_ref()
                && predicate(value)
            {
                return Some(index);
            }
            cursor = self.slots[index].next;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = GoalPool::new(2);
        assert_eq!(pool.free_count(), 2);

        let first = pool.acquire(10).unwrap();
        let second = pool.acquire(20).unwrap();
        assert_eq!(pool.free_count(), 0);
        assert!(pool.acquire(30).is_none());

        assert_eq!(pool.release(first), Some(10));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.get(second), Some(&20));
    }

    #[test]
    fn test_release_mid_walk() {
        let mut pool = GoalPool::new(3);
        for value in 1..=3 {
            pool.acquire(value).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = pool.used_head();
        while let Some(index) = cursor {
            cursor = pool.next_used(index);
            let value = *pool.get(index).unwrap();
            seen.push(value);
            if value == 2 {
                let _ = pool.release(index);
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.find(|v| *v == 2).is_none());
    }

    #[test]
    fn test_reuse_released_slot() {
        let mut pool = GoalPool::new(1);
        let index = pool.acquire("a").unwrap();
        let _ = pool.release(index);
        assert_eq!(pool.acquire("b"), Some(index));
    }

    #[test]
    fn test_zero_sized_pool() {
        let mut pool = GoalPool::<u8>::new(0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool.acquire(1).is_none());
    }
}
