//! Policy state store.
//!
//! Keyed mutable state that must survive across invocations of the same
//! compiled flow: circuit breaker counters and timers, debounce generations,
//! throttle timestamps. Entries are created lazily on first use and never
//! evicted (a documented gap pending a product decision).
//!
//! The outer maps are locked only to create or fetch an entry; every entry
//! carries its own mutex, so reads and writes to a given `(flow, node)` key
//! are linearized without ever serializing unrelated keys against each
//! other. The store is passed through the execution context, never held as
//! a process global, so engine instances in tests stay isolated.

use flowscript_ast::CircuitPolicy;
use flowscript_resolve::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Key of one policy entry: the owning flow plus the node's arena id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyKey {
    pub flow: String,
    pub node: NodeId,
}

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// What the breaker decided for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run the step. `trial` marks the single half-open probe.
    Execute { trial: bool },
    /// Fail fast without invoking the step.
    Reject,
}

/// Per-key circuit breaker entry.
#[derive(Debug, Clone)]
pub struct CircuitEntry {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    /// True while the half-open probe is still running.
    trial_in_flight: bool,
}

impl Default for CircuitEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

impl CircuitEntry {
    /// Decide whether a call may proceed, transitioning Open → HalfOpen when
    /// the cooldown has elapsed. Must be called under the entry lock, which
    /// guarantees exactly one caller wins the half-open trial.
    pub fn admit(&mut self, policy: &CircuitPolicy, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Execute { trial: false },
            CircuitState::Open => match self.opened_at {
                Some(opened) if now.duration_since(opened) >= policy.cooldown => {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Admission::Execute { trial: true }
                }
                Some(_) => Admission::Reject,
                None => {
                    // Inconsistent entry; re-arm the cooldown.
                    self.opened_at = Some(now);
                    Admission::Reject
                }
            },
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Reject
                } else {
                    self.trial_in_flight = true;
                    Admission::Execute { trial: true }
                }
            }
        }
    }

    /// Record a successful call: any success closes the breaker.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    /// Record a failed call. A failed trial reopens immediately; in Closed
    /// state the consecutive-failure counter trips the breaker at the
    /// configured threshold.
    pub fn record_failure(&mut self, policy: &CircuitPolicy, now: Instant, trial: bool) {
        self.consecutive_failures += 1;
        if trial || self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            self.trial_in_flight = false;
        } else if self.consecutive_failures >= policy.failure_threshold {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    /// Release a half-open trial slot without deciding (cancelled trial).
    pub fn abort_trial(&mut self) {
        self.trial_in_flight = false;
    }
}

/// Per-key debounce entry: a generation counter bumped on every trigger.
#[derive(Debug, Clone, Default)]
pub struct DebounceEntry {
    pub generation: u64,
}

/// Per-key throttle entry.
#[derive(Debug, Clone, Default)]
pub struct ThrottleEntry {
    pub last_fire_at: Option<Instant>,
}

/// Keyed runtime policy state, shared across concurrent executions.
#[derive(Debug, Default)]
pub struct PolicyStore {
    circuits: Mutex<HashMap<PolicyKey, Arc<Mutex<CircuitEntry>>>>,
    debounces: Mutex<HashMap<PolicyKey, Arc<Mutex<DebounceEntry>>>>,
    throttles: Mutex<HashMap<PolicyKey, Arc<Mutex<ThrottleEntry>>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or lazily create the circuit entry for a key.
    pub fn circuit(&self, key: &PolicyKey) -> Arc<Mutex<CircuitEntry>> {
        self.circuits
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Fetch or lazily create the debounce entry for a key.
    pub fn debounce(&self, key: &PolicyKey) -> Arc<Mutex<DebounceEntry>> {
        self.debounces
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Fetch or lazily create the throttle entry for a key.
    pub fn throttle(&self, key: &PolicyKey) -> Arc<Mutex<ThrottleEntry>> {
        self.throttles
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Atomically swap a circuit's state if it currently equals `expected`.
    pub fn compare_and_swap(
        &self,
        key: &PolicyKey,
        expected: CircuitState,
        next: CircuitState,
    ) -> bool {
        let entry = self.circuit(key);
        let mut entry = entry.lock();
        if entry.state == expected {
            entry.state = next;
            true
        } else {
            false
        }
    }

    /// Current circuit state for a key, if the entry exists.
    pub fn circuit_state(&self, key: &PolicyKey) -> Option<CircuitState> {
        self.circuits
            .lock()
            .get(key)
            .map(|entry| entry.lock().state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(node: u32) -> PolicyKey {
        PolicyKey {
            flow: "test".to_string(),
            node: NodeId(node),
        }
    }

    fn policy() -> CircuitPolicy {
        CircuitPolicy {
            failure_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trips_after_threshold() {
        let store = PolicyStore::new();
        let entry = store.circuit(&key(1));
        let policy = policy();
        let now = Instant::now();

        let mut e = entry.lock();
        assert_eq!(e.admit(&policy, now), Admission::Execute { trial: false });
        e.record_failure(&policy, now, false);
        assert_eq!(e.state, CircuitState::Closed);
        e.record_failure(&policy, now, false);
        assert_eq!(e.state, CircuitState::Open);
        assert_eq!(e.admit(&policy, now), Admission::Reject);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_half_open_admits_one_trial() {
        let store = PolicyStore::new();
        let entry = store.circuit(&key(1));
        let policy = policy();
        let opened = Instant::now();

        {
            let mut e = entry.lock();
            e.record_failure(&policy, opened, false);
            e.record_failure(&policy, opened, false);
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        let later = Instant::now();

        let mut e = entry.lock();
        assert_eq!(e.admit(&policy, later), Admission::Execute { trial: true });
        // A concurrent caller while the trial is in flight is rejected.
        assert_eq!(e.admit(&policy, later), Admission::Reject);

        e.record_success();
        assert_eq!(e.state, CircuitState::Closed);
        assert_eq!(e.admit(&policy, later), Admission::Execute { trial: false });
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_fresh_cooldown() {
        let store = PolicyStore::new();
        let entry = store.circuit(&key(1));
        let policy = policy();
        let t0 = Instant::now();

        {
            let mut e = entry.lock();
            e.record_failure(&policy, t0, false);
            e.record_failure(&policy, t0, false);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        let t1 = Instant::now();
        {
            let mut e = entry.lock();
            assert_eq!(e.admit(&policy, t1), Admission::Execute { trial: true });
            e.record_failure(&policy, t1, true);
            assert_eq!(e.state, CircuitState::Open);
            assert_eq!(e.opened_at, Some(t1));
            assert_eq!(e.admit(&policy, t1), Admission::Reject);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn compare_and_swap_linearizes_state_changes() {
        let store = PolicyStore::new();
        let k = key(1);
        // Entry starts closed.
        assert!(store.compare_and_swap(&k, CircuitState::Closed, CircuitState::Open));
        // Second CAS from Closed must fail.
        assert!(!store.compare_and_swap(&k, CircuitState::Closed, CircuitState::Open));
        assert_eq!(store.circuit_state(&k), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_are_isolated_per_key() {
        let store = PolicyStore::new();
        let policy = policy();
        let now = Instant::now();

        {
            let entry = store.circuit(&key(1));
            let mut e = entry.lock();
            e.record_failure(&policy, now, false);
            e.record_failure(&policy, now, false);
        }
        assert_eq!(store.circuit_state(&key(1)), Some(CircuitState::Open));
        // A different node id is a different entry.
        let other = store.circuit(&key(2));
        assert_eq!(other.lock().state, CircuitState::Closed);
    }
}
