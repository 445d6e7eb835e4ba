//! Intra-process topics.
//!
//! Each subscription owns an unbounded queue; publishing clones the
//! message into every live subscription's queue and wakes its wait-set.

use crate::signal::SignalSlot;
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use embros_core::{Result, Subscribe, WaitSignal, Waitable};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub(crate) struct TopicHub<T> {
    subscriptions: Vec<(Sender<T>, Weak<Subscription<T>>)>,
}

impl<T> TopicHub<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self) -> Arc<Subscription<T>> {
        let (sender, receiver) = unbounded();
        let subscription = Arc::new(Subscription {
            receiver,
            signal: SignalSlot::new(),
        });
        self.subscriptions
            .push((sender, Arc::downgrade(&subscription)));
        subscription
    }
}

/// Sending half of a topic.
pub struct Publisher<T> {
    pub(crate) hub: Arc<Mutex<TopicHub<T>>>,
}

impl<T: Clone> Publisher<T> {
    /// Delivers `message` to every live subscription.
    pub fn publish(&self, message: &T) -> Result<()> {
        let mut hub = self.hub.lock();
        hub.subscriptions.retain(|(sender, subscription)| {
            let Some(subscription) = subscription.upgrade() else {
                return false;
            };
            if sender.send(message.clone()).is_ok() {
                subscription.signal.notify();
            }
            true
        });
        Ok(())
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
        }
    }
}

/// Receiving half of a topic.
pub struct Subscription<T> {
    receiver: Receiver<T>,
    signal: SignalSlot,
}

impl<T: Send + 'static> Waitable for Subscription<T> {
    fn ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    fn attach(&self, signal: &Arc<WaitSignal>) {
        self.signal.set(signal);
    }
}

impl<T: Send + 'static> Subscribe<T> for Subscription<T> {
    fn try_take(&self) -> Result<Option<T>> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout() {
        let hub = Arc::new(Mutex::new(TopicHub::<u32>::new()));
        let first = hub.lock().subscribe();
        let second = hub.lock().subscribe();
        let publisher = Publisher { hub };

        publisher.publish(&7).unwrap();

        assert_eq!(first.try_take().unwrap(), Some(7));
        assert_eq!(second.try_take().unwrap(), Some(7));
        assert_eq!(first.try_take().unwrap(), None);
    }

    #[test]
    fn test_dead_subscription_pruned() {
        let hub = Arc::new(Mutex::new(TopicHub::<u32>::new()));
        let subscription = hub.lock().subscribe();
        drop(subscription);

        let publisher = Publisher { hub: hub.clone() };
        publisher.publish(&1).unwrap();

        assert!(hub.lock().subscriptions.is_empty());
    }
}
