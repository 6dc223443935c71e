//! StateChannel — single-slot, push-based broadcast
//!
//! Holds the latest value, replays it to every new subscriber, then pushes
//! each subsequent publish to all live subscribers in subscription order.
//!
//! Delivery is synchronous on the publishing thread. A publish issued while a
//! delivery is already running (an observer publishing back into the channel
//! it observes, or another thread racing) is queued and delivered by the
//! running loop once the current value has reached every observer. The lock
//! is never held while observers run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    /// Publish sequence at subscribe time; older queued values are skipped.
    joined_at: u64,
    active: Arc<AtomicBool>,
    observer: Observer<T>,
}

struct Inner<T> {
    value: Option<T>,
    observers: Vec<Entry<T>>,
    next_id: u64,
    published: u64,
    delivering: bool,
    pending: VecDeque<(u64, T)>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct StateChannel<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for StateChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for StateChannel<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: None,
                observers: Vec::new(),
                next_id: 0,
                published: 0,
                delivering: false,
                pending: VecDeque::new(),
            })),
        }
    }
}

impl<T> std::fmt::Debug for StateChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("StateChannel")
            .field("has_value", &inner.value.is_some())
            .field("subscribers", &inner.observers.len())
            .finish()
    }
}

/// Resets the delivering flag if an observer panics mid-delivery.
struct DeliveryGuard<'a, T> {
    inner: &'a Mutex<Inner<T>>,
    armed: bool,
}

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = lock(self.inner);
            inner.delivering = false;
            inner.pending.clear();
        }
    }
}

impl<T: Clone + Send + 'static> StateChannel<T> {
    /// An empty channel; `current_value()` is `None` until the first publish.
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel seeded with an initial value.
    pub fn with_value(value: T) -> Self {
        let channel = Self::default();
        lock(&channel.inner).value = Some(value);
        channel
    }

    pub fn current_value(&self) -> Option<T> {
        lock(&self.inner).value.clone()
    }

    pub fn has_value(&self) -> bool {
        lock(&self.inner).value.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).observers.len()
    }

    /// Store `value` and deliver it to every live subscriber.
    pub fn publish(&self, value: T) {
        {
            let mut inner = lock(&self.inner);
            inner.published += 1;
            let seq = inner.published;
            inner.value = Some(value.clone());
            inner.pending.push_back((seq, value));
            if inner.delivering {
                debug!(queued = inner.pending.len(), "publish queued behind delivery");
                return;
            }
            inner.delivering = true;
        }

        let mut guard = DeliveryGuard {
            inner: &self.inner,
            armed: true,
        };
        loop {
            let (next, observers) = {
                let mut inner = lock(&self.inner);
                let Some((seq, next)) = inner.pending.pop_front() else {
                    inner.delivering = false;
                    break;
                };
                let observers: Vec<(Arc<AtomicBool>, Observer<T>)> = inner
                    .observers
                    .iter()
                    .filter(|e| e.joined_at < seq)
                    .map(|e| (e.active.clone(), e.observer.clone()))
                    .collect();
                (next, observers)
            };
            for (active, observer) in observers {
                if active.load(Ordering::Acquire) {
                    observer(&next);
                }
            }
        }
        guard.armed = false;
    }

    /// Register `observer`. The current value, if any, is delivered to it
    /// before this call returns; values queued before it joined are not.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observer: Observer<T> = Arc::new(observer);
        let active = Arc::new(AtomicBool::new(true));
        let (id, replay) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            let joined_at = inner.published;
            inner.observers.push(Entry {
                id,
                joined_at,
                active: active.clone(),
                observer: observer.clone(),
            });
            (id, inner.value.clone())
        };

        if let Some(value) = replay {
            observer(&value);
        }

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            active,
            detach: Mutex::new(Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).observers.retain(|e| e.id != id);
                }
            }))),
        }
    }
}

/// Handle returned by [`StateChannel::subscribe`]. Dropping it does not
/// unsubscribe; call [`Subscription::cancel`].
pub struct Subscription {
    active: Arc<AtomicBool>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Remove the observer. Safe to call more than once.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
        let detach = lock(&self.detach).take();
        if let Some(detach) = detach {
            detach();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
