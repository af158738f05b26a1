//! State repository boundary
//!
//! Every chain-state read and write made by validation and apply goes through
//! [`StateRepository`]. Calls within one transition run sequentially; isolation between
//! transitions touching the same identity is the repository's responsibility.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::asset_lock::InstantLock;
use crate::constants::OUT_POINT_SIZE;
use crate::execution_context::{ExecutionContext, Operation};
use crate::identity::Identity;
use crate::transaction::{OutPoint, Transaction};
use crate::types::*;

#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn fetch_identity(
        &self,
        id: &Identifier,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<Option<Identity>>;

    async fn store_identity(&self, identity: &Identity, ctx: &mut ExecutionContext) -> anyhow::Result<()>;

    async fn update_identity(&self, identity: &Identity, ctx: &mut ExecutionContext) -> anyhow::Result<()>;

    async fn store_identity_public_key_hashes(
        &self,
        identity_id: &Identifier,
        public_key_hashes: &[Hash160],
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<()>;

    /// Owner of each hash in the global key index, aligned with `public_key_hashes`
    async fn fetch_identity_ids_by_public_key_hashes(
        &self,
        public_key_hashes: &[Hash160],
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<Vec<Option<Identifier>>>;

    async fn fetch_transaction(
        &self,
        hash: &Hash,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<Option<FetchedTransaction>>;

    async fn is_asset_lock_transaction_out_point_already_used(
        &self,
        out_point: &OutPoint,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<bool>;

    async fn mark_asset_lock_transaction_out_point_as_used(
        &self,
        out_point: &OutPoint,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<()>;

    async fn verify_instant_lock(
        &self,
        instant_lock: &InstantLock,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<bool>;

    async fn fetch_latest_platform_core_chain_locked_height(&self) -> anyhow::Result<Option<u32>>;

    async fn fetch_latest_platform_block_time(&self) -> anyhow::Result<TimestampMillis>;

    /// Portion of `amount` paid for storage in `epoch` that can still be distributed,
    /// and the undistributable leftovers
    async fn calculate_storage_fee_distribution_amount_and_leftovers(
        &self,
        amount: Credits,
        epoch: EpochIndex,
    ) -> anyhow::Result<(Credits, Credits)>;
}

/// Number of epochs a storage fee is spread over
pub const STORAGE_FEE_DISTRIBUTION_EPOCHS: u64 = 1000;

#[derive(Debug, Default)]
struct MemoryState {
    identities: HashMap<Identifier, Identity>,
    public_key_hashes: HashMap<Hash160, Identifier>,
    transactions: HashMap<Hash, FetchedTransaction>,
    used_out_points: HashSet<[u8; OUT_POINT_SIZE]>,
    core_chain_locked_height: Option<u32>,
    block_time: TimestampMillis,
    current_epoch: EpochIndex,
    reject_instant_locks: bool,
}

/// In-process repository. Records read and write operations into the execution
/// context and leaves state untouched under dry-run.
#[derive(Debug, Default)]
pub struct InMemoryStateRepository {
    state: RwLock<MemoryState>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_identity(&self, identity: Identity) {
        let mut state = self.state.write().await;
        for key in &identity.public_keys {
            if let Ok(hash) = key.hash() {
                state.public_key_hashes.insert(hash, identity.id);
            }
        }
        state.identities.insert(identity.id, identity);
    }

    pub async fn insert_transaction(&self, transaction: Transaction, height: Option<u32>) {
        let mut state = self.state.write().await;
        state
            .transactions
            .insert(transaction.txid(), FetchedTransaction { data: transaction, height });
    }

    pub async fn set_core_chain_locked_height(&self, height: Option<u32>) {
        self.state.write().await.core_chain_locked_height = height;
    }

    pub async fn set_block_time(&self, block_time: TimestampMillis) {
        self.state.write().await.block_time = block_time;
    }

    pub async fn set_current_epoch(&self, epoch: EpochIndex) {
        self.state.write().await.current_epoch = epoch;
    }

    pub async fn set_reject_instant_locks(&self, reject: bool) {
        self.state.write().await.reject_instant_locks = reject;
    }

    pub async fn identity(&self, id: &Identifier) -> Option<Identity> {
        self.state.read().await.identities.get(id).cloned()
    }

    pub async fn identity_count(&self) -> usize {
        self.state.read().await.identities.len()
    }

    pub async fn is_out_point_used(&self, out_point: &OutPoint) -> bool {
        self.state.read().await.used_out_points.contains(&out_point.to_bytes())
    }

    pub async fn identity_id_by_public_key_hash(&self, hash: &Hash160) -> Option<Identifier> {
        self.state.read().await.public_key_hashes.get(hash).copied()
    }
}

fn encoded_size(identity: &Identity) -> u64 {
    identity.to_buffer().map(|buffer| buffer.len() as u64).unwrap_or_default()
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn fetch_identity(
        &self,
        id: &Identifier,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<Option<Identity>> {
        let identity = self.state.read().await.identities.get(id).cloned();
        let value_size = identity.as_ref().map(encoded_size).unwrap_or_default();
        ctx.add_operation(Operation::Read { key_size: 32, value_size });
        Ok(identity)
    }

    async fn store_identity(&self, identity: &Identity, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        ctx.add_operation(Operation::Create { key_size: 32, value_size: encoded_size(identity) });
        if ctx.is_dry_run() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        if state.identities.contains_key(&identity.id) {
            anyhow::bail!("identity {} is already stored", identity.id);
        }
        state.identities.insert(identity.id, identity.clone());
        debug!(identity_id = %identity.id, "stored identity");
        Ok(())
    }

    async fn update_identity(&self, identity: &Identity, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        ctx.add_operation(Operation::Create { key_size: 32, value_size: encoded_size(identity) });
        if ctx.is_dry_run() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        match state.identities.get_mut(&identity.id) {
            Some(stored) => *stored = identity.clone(),
            None => anyhow::bail!("identity {} is not stored", identity.id),
        }
        Ok(())
    }

    async fn store_identity_public_key_hashes(
        &self,
        identity_id: &Identifier,
        public_key_hashes: &[Hash160],
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<()> {
        for _ in public_key_hashes {
            ctx.add_operation(Operation::Create { key_size: 20, value_size: 32 });
        }
        if ctx.is_dry_run() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        for hash in public_key_hashes {
            state.public_key_hashes.insert(*hash, *identity_id);
        }
        Ok(())
    }

    async fn fetch_identity_ids_by_public_key_hashes(
        &self,
        public_key_hashes: &[Hash160],
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<Vec<Option<Identifier>>> {
        let state = self.state.read().await;
        Ok(public_key_hashes
            .iter()
            .map(|hash| {
                let owner = state.public_key_hashes.get(hash).copied();
                ctx.add_operation(Operation::Read {
                    key_size: 20,
                    value_size: if owner.is_some() { 32 } else { 0 },
                });
                owner
            })
            .collect())
    }

    async fn fetch_transaction(
        &self,
        hash: &Hash,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<Option<FetchedTransaction>> {
        let transaction = self.state.read().await.transactions.get(hash).cloned();
        let value_size = transaction
            .as_ref()
            .map(|fetched| fetched.data.serialize().len() as u64)
            .unwrap_or_default();
        ctx.add_operation(Operation::Read { key_size: 32, value_size });
        Ok(transaction)
    }

    async fn is_asset_lock_transaction_out_point_already_used(
        &self,
        out_point: &OutPoint,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<bool> {
        ctx.add_operation(Operation::Read { key_size: OUT_POINT_SIZE as u64, value_size: 1 });
        Ok(self.state.read().await.used_out_points.contains(&out_point.to_bytes()))
    }

    async fn mark_asset_lock_transaction_out_point_as_used(
        &self,
        out_point: &OutPoint,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<()> {
        ctx.add_operation(Operation::Create { key_size: OUT_POINT_SIZE as u64, value_size: 1 });
        if ctx.is_dry_run() {
            return Ok(());
        }
        self.state.write().await.used_out_points.insert(out_point.to_bytes());
        Ok(())
    }

    async fn verify_instant_lock(
        &self,
        _instant_lock: &InstantLock,
        _ctx: &mut ExecutionContext,
    ) -> anyhow::Result<bool> {
        Ok(!self.state.read().await.reject_instant_locks)
    }

    async fn fetch_latest_platform_core_chain_locked_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.state.read().await.core_chain_locked_height)
    }

    async fn fetch_latest_platform_block_time(&self) -> anyhow::Result<TimestampMillis> {
        Ok(self.state.read().await.block_time)
    }

    async fn calculate_storage_fee_distribution_amount_and_leftovers(
        &self,
        amount: Credits,
        epoch: EpochIndex,
    ) -> anyhow::Result<(Credits, Credits)> {
        let current_epoch = self.state.read().await.current_epoch;
        let paid_epochs = current_epoch.saturating_sub(epoch) as u64;
        let remaining_epochs = STORAGE_FEE_DISTRIBUTION_EPOCHS.saturating_sub(paid_epochs);

        let per_epoch = amount / STORAGE_FEE_DISTRIBUTION_EPOCHS;
        let leftovers = amount % STORAGE_FEE_DISTRIBUTION_EPOCHS;
        Ok((per_epoch * remaining_epochs, leftovers))
    }
}
