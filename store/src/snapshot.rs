//! Point-in-time, mutable view of ledger state.
//!
//! A snapshot bundles one [`DataCache`] per entity family over one
//! [`ReadView`] taken when the snapshot is created, so every read sees the
//! store as of that instant plus the snapshot's own staged changes, however
//! many batches other writers commit meanwhile. [`Snapshot::commit`] is the
//! only operation that writes: it gathers every staged change into a single
//! [`WriteBatch`], applies it atomically, clears the overlay and moves the
//! snapshot onto a fresh view that includes its own commit. Dropping an
//! uncommitted snapshot discards its changes without side effects.

use std::sync::Arc;

use keel_types::{
    AccountState, AssetState, Block, BlockState, ContractState, Hash256, HashIndexState, Header,
    HeaderHashList, PublicKey, ScriptHash, SpentCoinState, StorageItem, StorageKey, Transaction,
    TransactionOutput, TransactionState, UnspentCoinState, ValidatorState,
};

use crate::{DataCache, MetaCache, Prefix, ReadView, Store, StoreError, WriteBatch};

pub struct Snapshot {
    store: Arc<dyn Store>,
    pub blocks: DataCache<Hash256, BlockState>,
    pub transactions: DataCache<Hash256, TransactionState>,
    pub accounts: DataCache<ScriptHash, AccountState>,
    pub unspent_coins: DataCache<Hash256, UnspentCoinState>,
    pub spent_coins: DataCache<Hash256, SpentCoinState>,
    pub validators: DataCache<PublicKey, ValidatorState>,
    pub assets: DataCache<Hash256, AssetState>,
    pub contracts: DataCache<ScriptHash, ContractState>,
    pub storages: DataCache<StorageKey, StorageItem>,
    pub header_hash_list: DataCache<u32, HeaderHashList>,
    pub block_hash_index: MetaCache<HashIndexState>,
    pub header_hash_index: MetaCache<HashIndexState>,
    /// The block being applied, when this is the persisting snapshot.
    pub persisting_block: Option<Block>,
}

impl Snapshot {
    /// A snapshot of the store's current committed state.
    pub fn new(store: Arc<dyn Store>) -> Result<Self, StoreError> {
        let view = store.read_view()?;
        Ok(Self {
            blocks: DataCache::new(Arc::clone(&view), Prefix::Block),
            transactions: DataCache::new(Arc::clone(&view), Prefix::Transaction),
            accounts: DataCache::new(Arc::clone(&view), Prefix::Account),
            unspent_coins: DataCache::new(Arc::clone(&view), Prefix::UnspentCoin),
            spent_coins: DataCache::new(Arc::clone(&view), Prefix::SpentCoin),
            validators: DataCache::new(Arc::clone(&view), Prefix::Validator),
            assets: DataCache::new(Arc::clone(&view), Prefix::Asset),
            contracts: DataCache::new(Arc::clone(&view), Prefix::Contract),
            storages: DataCache::new(Arc::clone(&view), Prefix::Storage),
            header_hash_list: DataCache::new(Arc::clone(&view), Prefix::HeaderHashList),
            block_hash_index: MetaCache::new(Arc::clone(&view), Prefix::CurrentBlock),
            header_hash_index: MetaCache::new(view, Prefix::CurrentHeader),
            persisting_block: None,
            store,
        })
    }

    fn rebind(&mut self, view: Arc<dyn ReadView>) {
        self.blocks.rebind(Arc::clone(&view));
        self.transactions.rebind(Arc::clone(&view));
        self.accounts.rebind(Arc::clone(&view));
        self.unspent_coins.rebind(Arc::clone(&view));
        self.spent_coins.rebind(Arc::clone(&view));
        self.validators.rebind(Arc::clone(&view));
        self.assets.rebind(Arc::clone(&view));
        self.contracts.rebind(Arc::clone(&view));
        self.storages.rebind(Arc::clone(&view));
        self.header_hash_list.rebind(Arc::clone(&view));
        self.block_hash_index.rebind(Arc::clone(&view));
        self.header_hash_index.rebind(view);
    }

    /// Flush every staged change as one atomic batch and clear the overlay.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        self.blocks.write_into(&mut batch)?;
        self.transactions.write_into(&mut batch)?;
        self.accounts.write_into(&mut batch)?;
        self.unspent_coins.write_into(&mut batch)?;
        self.spent_coins.write_into(&mut batch)?;
        self.validators.write_into(&mut batch)?;
        self.assets.write_into(&mut batch)?;
        self.contracts.write_into(&mut batch)?;
        self.storages.write_into(&mut batch)?;
        self.header_hash_list.write_into(&mut batch)?;
        self.block_hash_index.write_into(&mut batch)?;
        self.header_hash_index.write_into(&mut batch)?;

        let ops = batch.len();
        self.store.write(batch)?;
        tracing::trace!(ops, "snapshot committed");

        self.blocks.clear();
        self.transactions.clear();
        self.accounts.clear();
        self.unspent_coins.clear();
        self.spent_coins.clear();
        self.validators.clear();
        self.assets.clear();
        self.contracts.clear();
        self.storages.clear();
        self.header_hash_list.clear();
        self.block_hash_index.clear();
        self.header_hash_index.clear();
        let view = self.store.read_view()?;
        self.rebind(view);
        Ok(())
    }

    /// Height of the last persisted block; `None` before genesis.
    pub fn height(&self) -> Result<Option<u32>, StoreError> {
        Ok(self.block_hash_index.try_get()?.map(|s| s.index))
    }

    pub fn current_block_hash(&self) -> Result<Option<Hash256>, StoreError> {
        Ok(self.block_hash_index.try_get()?.map(|s| s.hash))
    }

    /// Whether the full block (not only its header) is stored.
    pub fn contains_block(&self, hash: &Hash256) -> Result<bool, StoreError> {
        Ok(self.blocks.try_get(hash)?.is_some_and(|s| s.trimmed.is_block()))
    }

    pub fn contains_transaction(&self, hash: &Hash256) -> Result<bool, StoreError> {
        self.transactions.contains(hash)
    }

    pub fn get_header(&self, hash: &Hash256) -> Result<Option<Header>, StoreError> {
        Ok(self.blocks.try_get(hash)?.map(|s| s.trimmed.header))
    }

    /// Reassemble a full block from its trimmed form.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        let Some(state) = self.blocks.try_get(hash)? else {
            return Ok(None);
        };
        if !state.trimmed.is_block() {
            return Ok(None);
        }
        let mut transactions = Vec::with_capacity(state.trimmed.hashes.len());
        for tx_hash in &state.trimmed.hashes {
            let tx = self.transactions.get(tx_hash)?;
            transactions.push(tx.transaction);
        }
        Ok(Some(Block {
            header: state.trimmed.header,
            transactions,
        }))
    }

    /// Running total of system fees up to and including block `hash`.
    pub fn system_fee_amount(&self, hash: &Hash256) -> Result<i64, StoreError> {
        Ok(self.blocks.try_get(hash)?.map_or(0, |s| s.system_fee_amount))
    }

    pub fn get_transaction(&self, hash: &Hash256) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.try_get(hash)?.map(|s| s.transaction))
    }

    /// The output referenced by `(hash, index)` if it exists and is unspent.
    pub fn get_unspent(
        &self,
        hash: &Hash256,
        index: u16,
    ) -> Result<Option<TransactionOutput>, StoreError> {
        let Some(coins) = self.unspent_coins.try_get(hash)? else {
            return Ok(None);
        };
        if !coins.is_unspent(index) {
            return Ok(None);
        }
        let Some(tx) = self.transactions.try_get(hash)? else {
            return Ok(None);
        };
        Ok(tx.transaction.outputs.get(index as usize).cloned())
    }
}
