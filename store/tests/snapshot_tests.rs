use std::sync::Arc;

use keel_nullables::MemoryStore;
use keel_store::{Snapshot, Store, StoreError, TrackState};
use keel_types::{
    AccountState, Fixed8, Hash256, HashIndexState, ScriptHash, StorageItem, StorageKey,
};
use proptest::prelude::*;

fn fresh() -> (Arc<MemoryStore>, Snapshot) {
    let store = Arc::new(MemoryStore::new());
    let snapshot = Snapshot::new(store.clone() as Arc<dyn Store>).unwrap();
    (store, snapshot)
}

fn storage_key(owner: &ScriptHash, key: &[u8]) -> StorageKey {
    StorageKey { script_hash: *owner, key: key.to_vec() }
}

#[test]
fn staged_value_visible_before_commit_only_to_owner() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();

    assert!(snapshot.accounts.contains(&owner).unwrap());
    let other = Snapshot::new(store.clone() as Arc<dyn Store>).unwrap();
    assert!(!other.accounts.contains(&owner).unwrap());
    assert!(store.is_empty());
}

#[test]
fn commit_is_visible_to_new_snapshots() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    let asset = Hash256::digest(b"asset");
    snapshot
        .accounts
        .get_and_change_or(&owner, || AccountState::new(owner))
        .unwrap()
        .credit(asset, Fixed8::from_units(5));
    snapshot.block_hash_index.put(HashIndexState { hash: Hash256::digest(b"tip"), index: 3 });
    snapshot.commit().unwrap();

    assert_eq!(store.batches_written(), 1);
    let reader = Snapshot::new(store as Arc<dyn Store>).unwrap();
    assert_eq!(reader.accounts.get(&owner).unwrap().balance(&asset), Fixed8::from_units(5));
    assert_eq!(reader.height().unwrap(), Some(3));
    assert!(!snapshot.accounts.is_dirty());
}

#[test]
fn snapshot_does_not_see_commits_made_after_it_was_taken() {
    let (store, _) = fresh();
    let owner = ScriptHash::digest(b"owner");
    let asset = Hash256::digest(b"asset");
    let reader = Snapshot::new(store.clone() as Arc<dyn Store>).unwrap();

    let mut writer = Snapshot::new(store.clone() as Arc<dyn Store>).unwrap();
    writer.accounts.add(owner, AccountState::new(owner)).unwrap();
    writer.block_hash_index.put(HashIndexState { hash: Hash256::digest(b"tip"), index: 1 });
    writer.commit().unwrap();

    assert!(!reader.accounts.contains(&owner).unwrap());
    assert!(reader.accounts.find(&[]).unwrap().is_empty());
    assert_eq!(reader.height().unwrap(), None);

    // The writer moves on to a view that includes its own commit.
    writer
        .accounts
        .get_and_change(&owner)
        .unwrap()
        .credit(asset, Fixed8::from_units(1));
    assert_eq!(writer.height().unwrap(), Some(1));
}

#[test]
fn dropped_snapshot_leaves_store_untouched() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();
    drop(snapshot);
    assert!(store.is_empty());
    assert_eq!(store.batches_written(), 0);
}

#[test]
fn add_existing_key_is_duplicate() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();
    assert!(matches!(
        snapshot.accounts.add(owner, AccountState::new(owner)),
        Err(StoreError::Duplicate(_))
    ));
    snapshot.commit().unwrap();

    let mut next = Snapshot::new(store as Arc<dyn Store>).unwrap();
    assert!(matches!(
        next.accounts.add(owner, AccountState::new(owner)),
        Err(StoreError::Duplicate(_))
    ));
}

#[test]
fn get_and_change_on_missing_key_is_not_found() {
    let (_store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"ghost");
    assert!(matches!(snapshot.accounts.get_and_change(&owner), Err(StoreError::NotFound(_))));
    assert!(matches!(snapshot.accounts.get(&owner), Err(StoreError::NotFound(_))));
}

#[test]
fn delete_of_stored_key_tombstones_until_commit() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();
    snapshot.commit().unwrap();

    let mut next = Snapshot::new(store.clone() as Arc<dyn Store>).unwrap();
    next.accounts.delete(&owner).unwrap();
    assert!(!next.accounts.contains(&owner).unwrap());
    let states: Vec<_> = next.accounts.changes().map(|(_, _, s)| s).collect();
    assert_eq!(states, vec![TrackState::Deleted]);

    // Still present for anyone else until commit.
    assert!(Snapshot::new(store.clone() as Arc<dyn Store>).unwrap().accounts.contains(&owner).unwrap());
    next.commit().unwrap();
    assert!(!Snapshot::new(store as Arc<dyn Store>).unwrap().accounts.contains(&owner).unwrap());
}

#[test]
fn delete_of_added_key_leaves_nothing_to_write() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();
    snapshot.accounts.delete(&owner).unwrap();
    assert!(!snapshot.accounts.is_dirty());
    snapshot.commit().unwrap();
    assert!(store.is_empty());
}

#[test]
fn re_add_after_delete_becomes_changed() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();
    snapshot.commit().unwrap();

    let mut next = Snapshot::new(store as Arc<dyn Store>).unwrap();
    next.accounts.delete(&owner).unwrap();
    let mut frozen = AccountState::new(owner);
    frozen.is_frozen = true;
    next.accounts.add(owner, frozen).unwrap();
    let states: Vec<_> = next.accounts.changes().map(|(_, _, s)| s).collect();
    assert_eq!(states, vec![TrackState::Changed]);
    assert!(next.accounts.get(&owner).unwrap().is_frozen);
}

#[test]
fn find_merges_overlay_and_store_in_key_order() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"contract");
    for key in [&b"b"[..], b"d", b"f"] {
        snapshot
            .storages
            .add(storage_key(&owner, key), StorageItem { value: key.to_vec() })
            .unwrap();
    }
    snapshot.commit().unwrap();

    let mut next = Snapshot::new(store as Arc<dyn Store>).unwrap();
    next.storages.add(storage_key(&owner, b"a"), StorageItem { value: b"a".to_vec() }).unwrap();
    next.storages.add(storage_key(&owner, b"e"), StorageItem { value: b"e".to_vec() }).unwrap();
    next.storages.delete(&storage_key(&owner, b"d")).unwrap();
    next.storages.get_and_change(&storage_key(&owner, b"f")).unwrap().value = b"F".to_vec();

    let found = next.storages.find(owner.as_bytes()).unwrap();
    let keys: Vec<_> = found.iter().map(|(k, _)| k.key.clone()).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"e".to_vec(), b"f".to_vec()]);
    assert_eq!(found[3].1.value, b"F".to_vec());
}

#[test]
fn find_is_scoped_to_prefix() {
    let (_store, mut snapshot) = fresh();
    let first = ScriptHash::digest(b"first");
    let second = ScriptHash::digest(b"second");
    snapshot.storages.add(storage_key(&first, b"k"), StorageItem { value: vec![1] }).unwrap();
    snapshot.storages.add(storage_key(&second, b"k"), StorageItem { value: vec![2] }).unwrap();

    let found = snapshot.storages.find(first.as_bytes()).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0.script_hash, first);
}

#[test]
fn failed_commit_surfaces_backend_error() {
    let (store, mut snapshot) = fresh();
    let owner = ScriptHash::digest(b"owner");
    snapshot.accounts.add(owner, AccountState::new(owner)).unwrap();
    store.fail_writes(true);
    assert!(matches!(snapshot.commit(), Err(StoreError::Backend(_))));
    assert!(store.is_empty());
}

proptest! {
    #[test]
    fn find_returns_sorted_unique_keys(
        stored in proptest::collection::btree_set(proptest::collection::vec(any::<u8>(), 1..4), 0..12),
        staged in proptest::collection::btree_set(proptest::collection::vec(any::<u8>(), 1..4), 0..12),
    ) {
        let (store, mut snapshot) = fresh();
        let owner = ScriptHash::digest(b"owner");
        for key in &stored {
            snapshot.storages.add(storage_key(&owner, key), StorageItem { value: vec![] }).unwrap();
        }
        snapshot.commit().unwrap();

        let mut next = Snapshot::new(store as Arc<dyn Store>).unwrap();
        for key in &staged {
            let _ = next.storages.get_and_change_or(&storage_key(&owner, key), || StorageItem { value: vec![1] });
        }
        let keys: Vec<Vec<u8>> = next
            .storages
            .find(owner.as_bytes())
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.key)
            .collect();
        let expected: Vec<Vec<u8>> = stored.union(&staged).cloned().collect();
        prop_assert_eq!(keys, expected);
    }
}
