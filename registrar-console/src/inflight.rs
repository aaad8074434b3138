//! Per-subject in-flight tracking.
//!
//! A subject moves `Idle -> Processing -> Done` on success and back to `Idle` when the
//! attempt fails. The transition out of `Processing` is tied to [`InFlightGuard`], so
//! an early return or a dropped future can never leave a subject stuck.
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectState {
    Idle,
    Processing,
    Done,
}

/// Why [`InFlight::begin`] refused to start an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    Processing,
    Done,
}

#[derive(Debug)]
pub struct InFlight<K> {
    states: Arc<Mutex<HashMap<K, SubjectState>>>,
}

impl<K> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<K>(states: &Mutex<HashMap<K, SubjectState>>) -> MutexGuard<'_, HashMap<K, SubjectState>> {
    states.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &K) -> SubjectState {
        lock(&self.states)
            .get(key)
            .copied()
            .unwrap_or(SubjectState::Idle)
    }

    /// Atomically move `key` from `Idle` to `Processing`.
    pub fn begin(&self, key: K) -> Result<InFlightGuard<K>, Busy> {
        let mut states = lock(&self.states);
        match states.get(&key).copied().unwrap_or(SubjectState::Idle) {
            SubjectState::Processing => Err(Busy::Processing),
            SubjectState::Done => Err(Busy::Done),
            SubjectState::Idle => {
                states.insert(key.clone(), SubjectState::Processing);
                Ok(InFlightGuard {
                    states: Arc::clone(&self.states),
                    key,
                    completed: false,
                })
            }
        }
    }

    /// Forget a `Done` subject so it can be acted on again. `Processing` is left alone.
    pub fn reopen(&self, key: &K) {
        let mut states = lock(&self.states);
        if states.get(key) == Some(&SubjectState::Done) {
            states.remove(key);
        }
    }

    #[cfg(test)]
    fn processing_count(&self) -> usize {
        lock(&self.states)
            .values()
            .filter(|s| **s == SubjectState::Processing)
            .count()
    }
}

/// Holds a subject in `Processing`; dropping it without [`InFlightGuard::complete`]
/// returns the subject to `Idle`.
#[derive(Debug)]
pub struct InFlightGuard<K: Eq + Hash> {
    states: Arc<Mutex<HashMap<K, SubjectState>>>,
    key: K,
    completed: bool,
}

impl<K: Eq + Hash + Clone> InFlightGuard<K> {
    pub fn complete(mut self) {
        lock(&self.states).insert(self.key.clone(), SubjectState::Done);
        self.completed = true;
    }
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        if !self.completed {
            lock(&self.states).remove(&self.key);
        }
    }
}
