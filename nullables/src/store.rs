//! Nullable store: thread-safe in-memory ordered storage for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use keel_store::{BatchOp, ReadView, Store, StoreError, WriteBatch};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory [`Store`] backed by a `BTreeMap`.
///
/// Batches are applied under a single lock, so readers see either none or
/// all of a batch. Read views share the map until the next write copies
/// it. Writes can be made to fail or to stall on demand to exercise the
/// fatal-commit path and slow disks.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Arc<Entries>>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    batches_written: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Arc<Entries>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent `write` fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Block the writing thread for `delay` before every batch.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of batches successfully applied.
    pub fn batches_written(&self) -> usize {
        self.batches_written.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn find_in(entries: &Entries, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    entries
        .range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// One version of the map, as of the moment the view was taken.
struct MemoryView(Arc<Entries>);

impl ReadView for MemoryView {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.0.get(key).cloned())
    }

    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(find_in(&self.0, prefix))
    }
}

impl ReadView for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn find(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(find_in(&self.entries(), prefix))
    }
}

impl Store for MemoryStore {
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        let mut guard = self.entries();
        let entries = Arc::make_mut(&mut guard);
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        self.batches_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_view(&self) -> Result<Arc<dyn ReadView>, StoreError> {
        Ok(Arc::new(MemoryView(Arc::clone(&self.entries()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_applies_puts_and_deletes() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a1".to_vec(), b"x".to_vec());
        batch.put(b"a2".to_vec(), b"y".to_vec());
        store.write(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(b"a1".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(b"a1").unwrap(), None);
        assert_eq!(store.get(b"a2").unwrap(), Some(b"y".to_vec()));
        assert_eq!(store.batches_written(), 2);
    }

    #[test]
    fn find_is_prefix_bounded_and_ordered() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for key in [&b"b2"[..], b"a9", b"b1", b"c0"] {
            batch.put(key.to_vec(), vec![]);
        }
        store.write(batch).unwrap();

        let keys: Vec<_> = store.find(b"b").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);
    }

    #[test]
    fn injected_failure_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        assert!(store.write(batch).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn view_keeps_the_version_it_was_taken_at() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"old".to_vec());
        store.write(batch).unwrap();

        let view = store.read_view().unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"new".to_vec());
        batch.put(b"k2".to_vec(), b"x".to_vec());
        store.write(batch).unwrap();

        assert_eq!(view.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(view.find(b"k").unwrap().len(), 1);
        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
    }
}
