//! Asset lock proofs binding a funding output to an identity
//!
//! An instant proof carries its funding transaction inline; a chain proof carries only the
//! out-point and a claimed chain-locked height, so its output is looked up through the
//! repository.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, ProtocolError, Result, ValidationResult};
use crate::execution_context::ExecutionContext;
use crate::hashing::{canonical_decode_from, canonical_encode, hash};
use crate::repository::StateRepository;
use crate::transaction::{OutPoint, Transaction, TransactionOutput};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetLockProofType {
    Instant = 0,
    Chain = 1,
}

impl TryFrom<u8> for AssetLockProofType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AssetLockProofType::Instant),
            1 => Ok(AssetLockProofType::Chain),
            other => Err(ProtocolError::UnknownAssetLockProofType(other)),
        }
    }
}

/// Quorum-signed lock on a base-chain transaction's inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantLock {
    pub inputs: Vec<OutPoint>,
    pub txid: Hash,
    pub signature: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantAssetLockProof {
    pub instant_lock: InstantLock,
    pub transaction: Transaction,
    pub output_index: u32,
}

impl InstantAssetLockProof {
    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.transaction.txid(), self.output_index)
    }

    pub fn output(&self) -> Option<&TransactionOutput> {
        self.transaction.output(self.output_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAssetLockProof {
    pub core_chain_locked_height: u32,
    pub out_point: OutPoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLockProof {
    Instant(InstantAssetLockProof),
    Chain(ChainAssetLockProof),
}

/// Wire form: discriminant tag plus the canonical encoding of the variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAssetLockProof {
    pub proof_type: u8,
    pub payload: ByteString,
}

impl AssetLockProof {
    pub fn proof_type(&self) -> AssetLockProofType {
        match self {
            AssetLockProof::Instant(_) => AssetLockProofType::Instant,
            AssetLockProof::Chain(_) => AssetLockProofType::Chain,
        }
    }

    pub fn out_point(&self) -> OutPoint {
        match self {
            AssetLockProof::Instant(proof) => proof.out_point(),
            AssetLockProof::Chain(proof) => proof.out_point,
        }
    }

    /// Identity id bound to this proof: H(outPoint)
    pub fn create_identifier(&self) -> Identifier {
        Identifier::new(hash(&self.out_point().to_bytes()))
    }

    pub fn to_raw(&self) -> Result<RawAssetLockProof> {
        let payload = match self {
            AssetLockProof::Instant(proof) => canonical_encode(proof)?,
            AssetLockProof::Chain(proof) => canonical_encode(proof)?,
        };
        Ok(RawAssetLockProof { proof_type: self.proof_type() as u8, payload })
    }

    pub fn from_raw(raw: &RawAssetLockProof) -> Result<Self> {
        let mut cursor = raw.payload.as_slice();
        let proof = match AssetLockProofType::try_from(raw.proof_type)? {
            AssetLockProofType::Instant => AssetLockProof::Instant(canonical_decode_from(&mut cursor)?),
            AssetLockProofType::Chain => AssetLockProof::Chain(canonical_decode_from(&mut cursor)?),
        };
        if !cursor.is_empty() {
            return Err(ProtocolError::Serialization(format!(
                "{} trailing bytes after asset lock proof",
                cursor.len()
            )));
        }
        Ok(proof)
    }

    /// Resolve the funding output.
    ///
    /// Chain proofs under dry-run skip the repository and return a stand-in output with
    /// an empty script so fees can be estimated without chain state.
    pub async fn fetch_output(
        &self,
        repository: &dyn StateRepository,
        config: &ConsensusConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<TransactionOutput> {
        match self {
            AssetLockProof::Instant(proof) => proof
                .output()
                .cloned()
                .ok_or(ProtocolError::AssetLockOutputNotFound { output_index: proof.output_index }),
            AssetLockProof::Chain(proof) => {
                if ctx.is_dry_run() {
                    debug!(
                        satoshis = config.dry_run_chain_output_satoshis,
                        "dry run: using stand-in chain asset lock output"
                    );
                    return Ok(TransactionOutput {
                        value: config.dry_run_chain_output_satoshis,
                        script_pubkey: vec![],
                    });
                }

                let fetched = repository
                    .fetch_transaction(&proof.out_point.hash, ctx)
                    .await?
                    .ok_or(ProtocolError::AssetLockTransactionNotFound {
                        transaction_id: proof.out_point.hash,
                    })?;

                fetched
                    .data
                    .output(proof.out_point.index)
                    .cloned()
                    .ok_or(ProtocolError::AssetLockOutputNotFound { output_index: proof.out_point.index })
            }
        }
    }

    /// Structure checks that need no chain state
    pub fn validate_structure(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        if let AssetLockProof::Instant(proof) = self {
            let transaction_id = proof.transaction.txid();
            if proof.instant_lock.txid != transaction_id {
                result.add_error(ConsensusError::IdentityAssetLockProofLockedTransactionMismatch {
                    instant_lock_transaction_id: proof.instant_lock.txid,
                    asset_lock_transaction_id: transaction_id,
                });
            }
            if proof.output().is_none() {
                result.add_error(ConsensusError::IdentityAssetLockTransactionOutputNotFound {
                    output_index: proof.output_index,
                });
            }
        }
        result
    }

    /// Chain-state checks: lock verified or chain-locked, output well formed and unused
    pub async fn validate(
        &self,
        repository: &dyn StateRepository,
        ctx: &mut ExecutionContext,
    ) -> Result<ValidationResult> {
        match self {
            AssetLockProof::Instant(proof) => {
                let structure = self.validate_structure();
                if !structure.is_valid() {
                    return Ok(structure);
                }

                if !repository.verify_instant_lock(&proof.instant_lock, ctx).await? {
                    return Ok(ConsensusError::InvalidInstantAssetLockProofSignature.into());
                }

                validate_asset_lock_transaction(&proof.transaction, proof.output_index, repository, ctx).await
            }
            AssetLockProof::Chain(proof) => {
                let current_height = repository
                    .fetch_latest_platform_core_chain_locked_height()
                    .await?
                    .unwrap_or(0);

                if proof.core_chain_locked_height > current_height {
                    return Ok(ConsensusError::InvalidAssetLockProofCoreChainHeight {
                        proof_core_chain_locked_height: proof.core_chain_locked_height,
                        current_core_chain_locked_height: current_height,
                    }
                    .into());
                }

                if ctx.is_dry_run() {
                    return Ok(ValidationResult::new());
                }

                let Some(fetched) = repository.fetch_transaction(&proof.out_point.hash, ctx).await? else {
                    return Ok(ConsensusError::AssetLockTransactionIsNotFound {
                        transaction_id: proof.out_point.hash,
                    }
                    .into());
                };

                let confirmed = matches!(fetched.height, Some(height) if height <= proof.core_chain_locked_height);
                if !confirmed {
                    return Ok(ConsensusError::InvalidAssetLockProofTransactionHeight {
                        proof_core_chain_locked_height: proof.core_chain_locked_height,
                        transaction_height: fetched.height,
                    }
                    .into());
                }

                validate_asset_lock_transaction(&fetched.data, proof.out_point.index, repository, ctx).await
            }
        }
    }
}

/// Public key hash committed by an asset lock credit output
pub fn credit_output_public_key_hash(output: &TransactionOutput) -> Option<Hash160> {
    output.data()?.try_into().ok()
}

async fn validate_asset_lock_transaction(
    transaction: &Transaction,
    output_index: u32,
    repository: &dyn StateRepository,
    ctx: &mut ExecutionContext,
) -> Result<ValidationResult> {
    let Some(output) = transaction.output(output_index) else {
        return Ok(ConsensusError::IdentityAssetLockTransactionOutputNotFound { output_index }.into());
    };

    if !output.is_data_out() {
        return Ok(ConsensusError::InvalidIdentityAssetLockTransactionOutput { output_index }.into());
    }

    if credit_output_public_key_hash(output).is_none() {
        return Ok(ConsensusError::InvalidAssetLockTransactionOutputReturnSize { output_index }.into());
    }

    let out_point = OutPoint::new(transaction.txid(), output_index);
    if repository
        .is_asset_lock_transaction_out_point_already_used(&out_point, ctx)
        .await?
    {
        return Ok(ConsensusError::IdentityAssetLockTransactionOutPointAlreadyExists {
            transaction_id: out_point.hash,
            output_index,
        }
        .into());
    }

    Ok(ValidationResult::new())
}
