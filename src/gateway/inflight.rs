//! Per-key fetch coalescing.
//!
//! The first miss on a key becomes the leader and fetches. Misses arriving
//! while that fetch runs become followers: they subscribe to the leader's
//! slot and receive whatever it publishes, failures included, so N
//! concurrent misses cost one backend call and one timeout.
//!
//! A slot lives from the leader's [`InflightFetches::join`] until its
//! [`FlightLeader`] drops. The gateway moves a successful leader into the
//! background store task, so latecomers keep joining the finished flight
//! until the entry is readable from the store. A leader dropped without
//! publishing (panic, cancelled request) closes the slot and its followers
//! fetch on their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::cache::CacheKey;

type Slot<T> = Arc<watch::Sender<Option<T>>>;
type Slots<T> = Arc<Mutex<HashMap<CacheKey, Slot<T>>>>;

/// In-flight fetches by cache key. Cheap to clone.
pub struct InflightFetches<T> {
    slots: Slots<T>,
}

/// Role handed out by [`InflightFetches::join`].
pub enum Flight<T> {
    Leader(FlightLeader<T>),
    Follower(FlightFollower<T>),
}

impl<T: Clone> InflightFetches<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lead a fetch for `key`, or follow the one already running.
    pub fn join(&self, key: &CacheKey) -> Flight<T> {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(key) {
            return Flight::Follower(FlightFollower {
                outcome: slot.subscribe(),
            });
        }
        let (sender, _) = watch::channel(None);
        let slot = Arc::new(sender);
        slots.insert(key.clone(), Arc::clone(&slot));
        Flight::Leader(FlightLeader {
            key: key.clone(),
            slot,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Keys with a live slot.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for InflightFetches<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InflightFetches<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

/// The caller that fetches. Dropping it frees the key.
pub struct FlightLeader<T> {
    key: CacheKey,
    slot: Slot<T>,
    slots: Slots<T>,
}

impl<T> FlightLeader<T> {
    /// Hand `outcome` to every current and future follower of this flight.
    pub fn publish(&self, outcome: T) {
        self.slot.send_replace(Some(outcome));
    }
}

impl<T> Drop for FlightLeader<T> {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        // a newer flight may own the key already
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
        {
            slots.remove(&self.key);
        }
    }
}

/// A caller waiting on someone else's fetch.
pub struct FlightFollower<T> {
    outcome: watch::Receiver<Option<T>>,
}

impl<T: Clone> FlightFollower<T> {
    /// The leader's outcome, or `None` if the leader went away without one
    /// or `limit` elapsed first.
    pub async fn outcome(mut self, limit: Duration) -> Option<T> {
        let ready = (*self.outcome.borrow_and_update()).clone();
        if ready.is_some() {
            return ready;
        }
        match tokio::time::timeout(limit, self.outcome.wait_for(Option::is_some)).await {
            Ok(Ok(published)) => (*published).clone(),
            _ => None,
        }
    }
}

fn lock<T>(slots: &Slots<T>) -> MutexGuard<'_, HashMap<CacheKey, Slot<T>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
