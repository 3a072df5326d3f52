//! Keyed event queue with per-key coalescing.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use tracing::debug;

/// Operation carried by a queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Set operation (create or update)
    Set,
    /// Delete operation
    Del,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Set => f.write_str("SET"),
            Operation::Del => f.write_str("DEL"),
        }
    }
}

/// Key, operation and payload of one queued event.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOp<T> {
    /// The key (e.g., a resource name)
    pub key: String,
    /// The operation (Set or Del)
    pub op: Operation,
    /// Event payload
    pub data: T,
}

impl<T> KeyOp<T> {
    /// Creates a new entry.
    pub fn new(key: impl Into<String>, op: Operation, data: T) -> Self {
        Self {
            key: key.into(),
            op,
            data,
        }
    }

    /// Creates a Set entry.
    pub fn set(key: impl Into<String>, data: T) -> Self {
        Self::new(key, Operation::Set, data)
    }

    /// Creates a Del entry.
    pub fn del(key: impl Into<String>, data: T) -> Self {
        Self::new(key, Operation::Del, data)
    }
}

/// Configuration for a Consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Name used in logs
    pub name: String,
    /// Maximum entries returned by one [`Consumer::pop_batch`]
    pub batch_size: usize,
}

impl ConsumerConfig {
    /// Creates a new consumer config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: 128,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Queue of pending events, coalesced per key.
///
/// # Coalescing
///
/// When multiple operations arrive for the same key:
/// - DEL clears any pending entries for the key and is kept alone
/// - SET after SET replaces the pending SET (newest payload wins)
/// - SET after DEL is appended (ordering is kept)
pub struct Consumer<T> {
    config: ConsumerConfig,
    /// Pending entries indexed by key
    to_sync: BTreeMap<String, VecDeque<KeyOp<T>>>,
    /// Total count of pending entries
    pending_count: usize,
}

impl<T> Consumer<T> {
    /// Creates a new consumer with the given configuration.
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            to_sync: BTreeMap::new(),
            pending_count: 0,
        }
    }

    /// Returns true if there are pending entries.
    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    /// Returns the number of pending entries.
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Adds entries to the queue with coalescing.
    pub fn add_to_sync(&mut self, entries: impl IntoIterator<Item = KeyOp<T>>) {
        for entry in entries {
            self.add_single_entry(entry);
        }
    }

    fn add_single_entry(&mut self, entry: KeyOp<T>) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();

        match entry.op {
            Operation::Del => {
                self.pending_count -= queue.len();
                queue.clear();
                queue.push_back(entry);
                self.pending_count += 1;
            }
            Operation::Set => {
                if let Some(last) = queue.back_mut() {
                    if last.op == Operation::Set {
                        debug!(consumer = %self.config.name, key = %entry.key, "Coalesced pending SET");
                        *last = entry;
                        return;
                    }
                }
                queue.push_back(entry);
                self.pending_count += 1;
            }
        }
    }

    /// Drains all pending entries, grouped by key in key order.
    pub fn drain(&mut self) -> Vec<KeyOp<T>> {
        let mut result = Vec::with_capacity(self.pending_count);

        for (_key, queue) in std::mem::take(&mut self.to_sync) {
            result.extend(queue);
        }

        self.pending_count = 0;
        result
    }

    /// Pops up to `batch_size` entries, never splitting a key's queue.
    pub fn pop_batch(&mut self) -> Vec<KeyOp<T>> {
        let mut result = Vec::new();

        while result.len() < self.config.batch_size {
            let Some((_key, queue)) = self.to_sync.pop_first() else {
                break;
            };
            self.pending_count -= queue.len();
            result.extend(queue);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> Consumer<&'static str> {
        Consumer::new(ConsumerConfig::new("STATIC_ROUTE"))
    }

    #[test]
    fn test_consumer_basic() {
        let mut consumer = consumer();

        assert!(!consumer.has_pending());

        consumer.add_to_sync(vec![KeyOp::set("route-a", "gen1")]);

        assert!(consumer.has_pending());
        assert_eq!(consumer.pending_count(), 1);
    }

    #[test]
    fn test_consumer_set_coalesces() {
        let mut consumer = consumer();

        consumer.add_to_sync(vec![KeyOp::set("route-a", "gen1")]);
        consumer.add_to_sync(vec![KeyOp::set("route-a", "gen2")]);

        assert_eq!(consumer.pending_count(), 1);

        let entries = consumer.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, "gen2");
    }

    #[test]
    fn test_consumer_del_clears_set() {
        let mut consumer = consumer();

        consumer.add_to_sync(vec![KeyOp::set("route-a", "gen1")]);
        consumer.add_to_sync(vec![KeyOp::del("route-a", "gen1")]);

        assert_eq!(consumer.pending_count(), 1);

        let entries = consumer.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].op, Operation::Del);
    }

    #[test]
    fn test_consumer_del_then_set() {
        let mut consumer = consumer();

        consumer.add_to_sync(vec![
            KeyOp::del("route-a", "gen1"),
            KeyOp::set("route-a", "gen2"),
        ]);

        assert_eq!(consumer.pending_count(), 2);

        let entries = consumer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].op, Operation::Del);
        assert_eq!(entries[1].op, Operation::Set);
    }

    #[test]
    fn test_consumer_keys_are_independent() {
        let mut consumer = consumer();

        consumer.add_to_sync(vec![
            KeyOp::set("route-b", "b1"),
            KeyOp::set("route-a", "a1"),
            KeyOp::del("route-b", "b1"),
        ]);

        let entries = consumer.drain();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["route-a", "route-b"]);
        assert_eq!(entries[1].op, Operation::Del);
    }

    #[test]
    fn test_pop_batch_keeps_key_queues_whole() {
        let mut consumer = Consumer::new(ConsumerConfig::new("t").with_batch_size(1));

        consumer.add_to_sync(vec![
            KeyOp::del("route-a", "a1"),
            KeyOp::set("route-a", "a2"),
            KeyOp::set("route-b", "b1"),
        ]);

        let first = consumer.pop_batch();
        assert_eq!(first.len(), 2);
        assert_eq!(consumer.pending_count(), 1);

        let second = consumer.pop_batch();
        assert_eq!(second[0].key, "route-b");
        assert!(!consumer.has_pending());
    }
}
