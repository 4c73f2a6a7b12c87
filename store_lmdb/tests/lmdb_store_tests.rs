use std::sync::Arc;

use keel_store::{ReadView, Snapshot, Store, WriteBatch};
use keel_store_lmdb::LmdbStore;
use keel_types::{AccountState, Fixed8, Hash256, ScriptHash, StorageItem, StorageKey};

const MAP_SIZE: usize = 1 << 26;

#[test]
fn batch_is_applied_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), MAP_SIZE).unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"\x01a".to_vec(), b"one".to_vec());
    batch.put(b"\x01b".to_vec(), b"two".to_vec());
    store.write(batch).unwrap();

    let mut batch = WriteBatch::new();
    batch.delete(b"\x01a".to_vec());
    batch.put(b"\x02a".to_vec(), b"three".to_vec());
    store.write(batch).unwrap();

    assert_eq!(store.get(b"\x01a").unwrap(), None);
    assert_eq!(store.get(b"\x01b").unwrap(), Some(b"two".to_vec()));
    assert_eq!(store.get(b"\x02a").unwrap(), Some(b"three".to_vec()));
}

#[test]
fn find_returns_prefix_entries_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), MAP_SIZE).unwrap();

    let mut batch = WriteBatch::new();
    for key in [&b"\x70c"[..], b"\x70a", b"\x71a", b"\x70b", b"\x6fz"] {
        batch.put(key.to_vec(), vec![0]);
    }
    store.write(batch).unwrap();

    let keys: Vec<_> = store.find(b"\x70").unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"\x70a".to_vec(), b"\x70b".to_vec(), b"\x70c".to_vec()]);
}

#[test]
fn snapshot_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let owner = ScriptHash::digest(b"owner");
    let asset = Hash256::digest(b"asset");
    {
        let store: Arc<dyn Store> = Arc::new(LmdbStore::open(dir.path(), MAP_SIZE).unwrap());
        let mut snapshot = Snapshot::new(store).unwrap();
        let mut account = AccountState::new(owner);
        account.credit(asset, Fixed8::from_units(42));
        snapshot.accounts.add(owner, account).unwrap();
        snapshot
            .storages
            .add(StorageKey { script_hash: owner, key: b"k".to_vec() }, StorageItem { value: vec![7] })
            .unwrap();
        snapshot.commit().unwrap();
    }

    let store: Arc<dyn Store> = Arc::new(LmdbStore::open(dir.path(), MAP_SIZE).unwrap());
    let snapshot = Snapshot::new(store).unwrap();
    assert_eq!(snapshot.accounts.get(&owner).unwrap().balance(&asset), Fixed8::from_units(42));
    assert_eq!(snapshot.storages.find(owner.as_bytes()).unwrap().len(), 1);
}

#[test]
fn snapshot_keeps_reading_the_state_it_was_opened_on() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(LmdbStore::open(dir.path(), MAP_SIZE).unwrap());
    let owner = ScriptHash::digest(b"owner");

    let before = Snapshot::new(Arc::clone(&store)).unwrap();
    let mut writer = Snapshot::new(Arc::clone(&store)).unwrap();
    writer.accounts.add(owner, AccountState::new(owner)).unwrap();
    writer.commit().unwrap();

    assert!(!before.accounts.contains(&owner).unwrap());
    assert!(writer.accounts.contains(&owner).unwrap());
    assert!(Snapshot::new(store).unwrap().accounts.contains(&owner).unwrap());
}

#[test]
fn read_view_ignores_later_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::open(dir.path(), MAP_SIZE).unwrap();
    let view = store.read_view().unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"\x01a".to_vec(), b"one".to_vec());
    store.write(batch).unwrap();

    assert_eq!(view.get(b"\x01a").unwrap(), None);
    assert!(view.find(b"\x01").unwrap().is_empty());
    assert_eq!(store.get(b"\x01a").unwrap(), Some(b"one".to_vec()));
}
