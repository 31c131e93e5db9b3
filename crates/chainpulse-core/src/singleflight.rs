//! Single-flight collapsing of identical in-flight fetches.
//!
//! The first caller for a key becomes the leader and drives the real work;
//! everyone else joining before completion receives the leader's result over
//! a broadcast channel. Keys are removed before the result is sent, so a
//! caller arriving after completion starts a fresh flight.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

const FLIGHT_CHANNEL_CAPACITY: usize = 4;

/// Role handed to a caller joining a flight.
///
/// Both roles carry a receiver: the leader typically hands the actual work
/// to a task that may outlive its own deadline and awaits the result like
/// any follower.
pub enum Flight<T> {
    /// This caller must arrange for [`FlightGroup::complete`] to be called.
    Leader(broadcast::Receiver<T>),
    /// Another caller is already working; await its result here.
    Follower(broadcast::Receiver<T>),
}

impl<T> Flight<T> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }

    pub fn into_receiver(self) -> broadcast::Receiver<T> {
        match self {
            Self::Leader(rx) | Self::Follower(rx) => rx,
        }
    }
}

/// Keyed single-flight group.
///
/// `T` is the shared result; it must be `Clone` because every follower gets
/// its own copy.
pub struct FlightGroup<T> {
    in_flight: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone> FlightGroup<T> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Join the flight for `key`, becoming the leader if none exists.
    ///
    /// Followers subscribe under the same lock that registered the leader,
    /// so a result can never be sent between join and subscribe.
    pub fn join(&self, key: &str) -> Flight<T> {
        let mut in_flight = self.lock();
        if let Some(sender) = in_flight.get(key) {
            return Flight::Follower(sender.subscribe());
        }

        let (sender, receiver) = broadcast::channel(FLIGHT_CHANNEL_CAPACITY);
        in_flight.insert(key.to_owned(), sender);
        Flight::Leader(receiver)
    }

    /// Publish the leader's result and retire the flight.
    ///
    /// The entry is removed before sending, so late joiners cannot attach to
    /// a flight that already resolved.
    pub fn complete(&self, key: &str, value: T) {
        let sender = self.lock().remove(key);
        if let Some(sender) = sender {
            // No receivers just means every follower already gave up.
            let _ = sender.send(value);
        }
    }

    /// Retire a flight without publishing, leaving followers to their
    /// channel's close error. Used when the leader panics or is cancelled.
    pub fn abandon(&self, key: &str) {
        let _ = self.lock().remove(key);
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<T>>> {
        self.in_flight
            .lock()
            .expect("single-flight lock is not poisoned")
    }
}

impl<T: Clone> Default for FlightGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}
