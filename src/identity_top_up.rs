//! Balance top-up of an existing identity funded by an asset lock

use serde::Serialize;
use tracing::info;

use crate::asset_lock::{AssetLockProof, RawAssetLockProof};
use crate::config::ConsensusConfig;
use crate::constants::PROTOCOL_VERSION;
use crate::error::{ProtocolError, Result, ValidationResult};
use crate::execution_context::ExecutionContext;
use crate::hashing::{canonical_decode_from, split_protocol_version};
use crate::identity::Identity;
use crate::repository::StateRepository;
use crate::state_transition::{
    decode_signature_fields, encode_with_signature, to_json_value, StateTransitionLike, StateTransitionType,
};
use crate::types::*;

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityTopUpTransition {
    pub protocol_version: u32,
    pub identity_id: Identifier,
    pub asset_lock_proof: AssetLockProof,
    pub signature: Option<ByteString>,
    execution_context: ExecutionContext,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonView<'a> {
    protocol_version: u32,
    #[serde(rename = "type")]
    transition_type: u8,
    identity_id: String,
    asset_lock_proof: RawAssetLockProof,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a ByteString>,
}

impl IdentityTopUpTransition {
    pub fn new(identity_id: Identifier, asset_lock_proof: AssetLockProof) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            identity_id,
            asset_lock_proof,
            signature: None,
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let (protocol_version, mut cursor) = split_protocol_version(buffer)?;
        let tag: u8 = canonical_decode_from(&mut cursor)?;
        if tag != StateTransitionType::IdentityTopUp as u8 {
            return Err(ProtocolError::InvalidStateTransitionType(tag));
        }
        Self::decode_body(protocol_version, &mut cursor)
    }

    pub(crate) fn decode_body(protocol_version: u32, cursor: &mut &[u8]) -> Result<Self> {
        let (identity_id, raw_proof): (Identifier, RawAssetLockProof) = canonical_decode_from(cursor)?;
        let signature: Option<ByteString> = decode_signature_fields(cursor)?;

        Ok(Self {
            protocol_version,
            identity_id,
            asset_lock_proof: AssetLockProof::from_raw(&raw_proof)?,
            signature,
            execution_context: ExecutionContext::new(),
        })
    }

    pub fn validate_structure(&self) -> ValidationResult {
        self.asset_lock_proof.validate_structure()
    }

    pub async fn validate_state(&mut self, repository: &dyn StateRepository) -> Result<ValidationResult> {
        self.asset_lock_proof.validate(repository, &mut self.execution_context).await
    }

    /// Credit the funding output to the identity, then consume the out-point.
    ///
    /// Under dry-run the target identity is replaced by the largest identity the protocol
    /// admits so the recorded write reflects the worst case.
    pub async fn apply(&mut self, repository: &dyn StateRepository, config: &ConsensusConfig) -> Result<Identity> {
        let out_point = self.asset_lock_proof.out_point();
        let ctx = &mut self.execution_context;

        let output = self.asset_lock_proof.fetch_output(repository, config, ctx).await?;
        let credits = config.convert_satoshi_to_credits(output.value)?;

        let mut identity = if ctx.is_dry_run() {
            Identity::biggest_possible(config.dry_run_identity_key_count)
        } else {
            repository
                .fetch_identity(&self.identity_id, ctx)
                .await?
                .ok_or(ProtocolError::IdentityNotFound { identity_id: self.identity_id })?
        };

        let balance = identity.increase_balance(credits)?;
        repository.update_identity(&identity, ctx).await?;
        repository.mark_asset_lock_transaction_out_point_as_used(&out_point, ctx).await?;

        info!(identity_id = %self.identity_id, credits, balance, dry_run = ctx.is_dry_run(), "identity topped up");

        Ok(identity)
    }
}

impl StateTransitionLike for IdentityTopUpTransition {
    fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    fn transition_type(&self) -> StateTransitionType {
        StateTransitionType::IdentityTopUp
    }

    fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    fn set_signature(&mut self, signature: Option<ByteString>) {
        self.signature = signature;
    }

    fn owner_id(&self) -> Identifier {
        self.identity_id
    }

    fn encode_body(&self, skip_signature: bool) -> Result<ByteString> {
        let body = (self.transition_type() as u8, self.identity_id, self.asset_lock_proof.to_raw()?);
        encode_with_signature(&body, &self.signature, skip_signature)
    }

    fn to_json(&self, skip_signature: bool) -> Result<serde_json::Value> {
        to_json_value(&JsonView {
            protocol_version: self.protocol_version,
            transition_type: self.transition_type() as u8,
            identity_id: self.identity_id.to_string(),
            asset_lock_proof: self.asset_lock_proof.to_raw()?,
            signature: if skip_signature { None } else { self.signature.as_ref() },
        })
    }

    fn execution_context(&self) -> &ExecutionContext {
        &self.execution_context
    }

    fn execution_context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.execution_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_lock::ChainAssetLockProof;
    use crate::identity::{IdentityPublicKey, KeyType, Purpose, SecurityLevel};
    use crate::repository::InMemoryStateRepository;
    use crate::transaction::{OutPoint, Transaction, TransactionOutput};

    fn funding_transaction() -> Transaction {
        Transaction {
            version: 3,
            inputs: vec![],
            outputs: vec![TransactionOutput::credit_output(&[4; 20], 2_500)],
            lock_time: 0,
        }
    }

    fn stored_identity() -> Identity {
        let key = IdentityPublicKey::new(0, KeyType::EcdsaHash160, Purpose::Authentication, SecurityLevel::Master, vec![1; 20]);
        Identity::new(Identifier::new([7; 32]), vec![key], 500)
    }

    fn transition() -> IdentityTopUpTransition {
        let proof = AssetLockProof::Chain(ChainAssetLockProof {
            core_chain_locked_height: 10,
            out_point: OutPoint::new(funding_transaction().txid(), 0),
        });
        IdentityTopUpTransition::new(stored_identity().id, proof)
    }

    #[test]
    fn test_round_trip() {
        let mut transition = transition();
        transition.signature = Some(vec![1; 65]);

        let decoded = IdentityTopUpTransition::from_buffer(&transition.to_buffer(false).unwrap()).unwrap();
        assert_eq!(decoded, transition);

        let unsigned = IdentityTopUpTransition::from_buffer(&transition.to_buffer(true).unwrap()).unwrap();
        assert_eq!(unsigned.signature, None);
    }

    #[test]
    fn test_wrong_type_tag() {
        let mut buffer = transition().to_buffer(false).unwrap();
        buffer[1] = StateTransitionType::IdentityCreate as u8;
        assert!(matches!(
            IdentityTopUpTransition::from_buffer(&buffer),
            Err(ProtocolError::InvalidStateTransitionType(2))
        ));
    }

    #[tokio::test]
    async fn test_apply_increases_balance_only() {
        let repository = InMemoryStateRepository::new();
        repository.insert_identity(stored_identity()).await;
        repository.insert_transaction(funding_transaction(), Some(5)).await;
        let mut transition = transition();

        let identity = transition.apply(&repository, &ConsensusConfig::default()).await.unwrap();

        assert_eq!(identity.balance, 500 + 2_500_000);
        assert_eq!(identity.revision, 0);
        assert_eq!(identity.public_keys, stored_identity().public_keys);
        assert_eq!(repository.identity(&identity.id).await, Some(identity));
        assert!(repository.is_out_point_used(&transition.asset_lock_proof.out_point()).await);
    }

    #[tokio::test]
    async fn test_apply_missing_identity_is_fatal() {
        let repository = InMemoryStateRepository::new();
        repository.insert_transaction(funding_transaction(), Some(5)).await;

        let result = transition().apply(&repository, &ConsensusConfig::default()).await;

        assert!(matches!(result, Err(ProtocolError::IdentityNotFound { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_uses_biggest_identity() {
        let repository = InMemoryStateRepository::new();
        let config = ConsensusConfig::default();
        let mut transition = transition();
        transition.set_execution_context(ExecutionContext::dry_run());

        let identity = transition.apply(&repository, &config).await.unwrap();

        assert_eq!(identity.public_keys.len(), config.dry_run_identity_key_count);
        assert_eq!(identity.balance, config.dry_run_chain_output_satoshis * config.credits_per_satoshi);
        assert_eq!(repository.identity_count().await, 0);
        assert!(!repository.is_out_point_used(&transition.asset_lock_proof.out_point()).await);
    }
}
