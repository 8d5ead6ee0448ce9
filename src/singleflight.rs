use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// Deduplicates concurrent computations by key: the first caller becomes
/// the leader and must publish a result, later callers become followers
/// and wait (bounded) for the leader's value.
pub struct SingleFlight<T: Clone> {
    inflight: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

/// What `begin` hands back: leaders get the publish handle, followers get
/// a receiver to wait on.
pub enum Flight<T: Clone> {
    Leader(FlightGuard<T>),
    Follower(watch::Receiver<Option<T>>),
}

/// Leader-side handle. `publish` removes the key and broadcasts the value;
/// dropping without publishing wakes followers with no value so they can
/// recompute on their own.
pub struct FlightGuard<T: Clone> {
    key: String,
    sender: Option<watch::Sender<Option<T>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight computation for `key`, or start one.
    pub fn begin(&self, key: &str) -> Flight<T> {
        let mut map = self.inflight.lock().unwrap();

        if let Some(rx) = map.get(key) {
            // A closed channel with no value means the previous leader
            // died without publishing; take over as the new leader.
            let dead = rx.has_changed().is_err() && rx.borrow().is_none();
            if !dead {
                debug!(key, "joining in-flight computation");
                return Flight::Follower(rx.clone());
            }
        }

        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            sender: Some(tx),
        })
    }

    fn finish(&self, key: &str) {
        self.inflight.lock().unwrap().remove(key);
    }

    /// Complete the flight as leader: unregister the key, then broadcast.
    /// Unregistering first means a caller arriving after publish starts a
    /// fresh computation instead of receiving a possibly stale value.
    pub fn publish(&self, guard: &mut FlightGuard<T>, value: T) {
        self.finish(&guard.key);
        if let Some(tx) = guard.sender.take() {
            let _ = tx.send(Some(value));
        }
    }

    /// Follower side: wait up to `timeout` for the leader's value. Returns
    /// None on timeout or if the leader went away without publishing.
    pub async fn wait(
        &self,
        mut rx: watch::Receiver<Option<T>>,
        timeout: Duration,
    ) -> Option<T> {
        match tokio::time::timeout(timeout, rx.wait_for(|v| v.is_some())).await {
            // Published value.
            Ok(Ok(value)) => value.clone(),
            // Channel closed before a value was published.
            Ok(Err(_)) => None,
            // Timed out.
            Err(_) => None,
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
