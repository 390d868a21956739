//! ==============================================================================
//! timers.rs - keyed one-shot deadlines
//! ==============================================================================
//!
//! purpose:
//!     at most one live deadline per key: scheduling an existing key replaces it.
//!     nothing fires by itself; the owner asks for `next_deadline()`, sleeps until
//!     then and collects `take_expired(now)`.
//!
//! relationships:
//!     - used by: reconciler.rs (debounced publishes, button fade ticks)
//!
//! ==============================================================================

use std::collections::BTreeMap;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Timers<K, V = ()> {
    entries: BTreeMap<K, (Instant, V)>,
}

impl<K: Ord + Copy, V> Timers<K, V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// arm `key`, replacing any earlier deadline; returns the payload it replaced
    pub fn schedule(&mut self, key: K, deadline: Instant, value: V) -> Option<V> {
        self.entries.insert(key, (deadline, value)).map(|(_, old)| old)
    }

    pub fn cancel(&mut self, key: K) -> Option<V> {
        self.entries.remove(&key).map(|(_, value)| value)
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|(deadline, _)| *deadline).min()
    }

    /// remove and return every entry due at `now`, earliest first
    pub fn take_expired(&mut self, now: Instant) -> Vec<(K, V)> {
        let due: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        let mut expired: Vec<(Instant, K, V)> = due
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(deadline, value)| (deadline, key, value)))
            .collect();
        expired.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        expired.into_iter().map(|(_, key, value)| (key, value)).collect()
    }
}

impl<K: Ord + Copy, V> Default for Timers<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
