//! Identity creation funded by an asset lock

use serde::Serialize;
use tracing::info;

use crate::asset_lock::{AssetLockProof, RawAssetLockProof};
use crate::config::ConsensusConfig;
use crate::constants::PROTOCOL_VERSION;
use crate::error::{ConsensusError, ProtocolError, Result, ValidationResult};
use crate::execution_context::ExecutionContext;
use crate::hashing::{canonical_decode_from, split_protocol_version};
use crate::identity::{Identity, IdentityPublicKey};
use crate::public_keys::{validate_public_keys, validate_public_keys_unique, validate_required_master_key};
use crate::repository::StateRepository;
use crate::state_transition::{
    decode_signature_fields, encode_with_signature, public_keys_for_encoding, to_json_value, StateTransitionLike,
    StateTransitionType,
};
use crate::types::*;

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCreateTransition {
    pub protocol_version: u32,
    pub asset_lock_proof: AssetLockProof,
    pub public_keys: Vec<IdentityPublicKey>,
    pub signature: Option<ByteString>,
    execution_context: ExecutionContext,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonView<'a> {
    protocol_version: u32,
    #[serde(rename = "type")]
    transition_type: u8,
    asset_lock_proof: RawAssetLockProof,
    public_keys: Vec<IdentityPublicKey>,
    identity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a ByteString>,
}

impl IdentityCreateTransition {
    pub fn new(asset_lock_proof: AssetLockProof, public_keys: Vec<IdentityPublicKey>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            asset_lock_proof,
            public_keys,
            signature: None,
            execution_context: ExecutionContext::new(),
        }
    }

    /// Id of the identity this transition creates, derived from the asset lock out-point
    pub fn identity_id(&self) -> Identifier {
        self.asset_lock_proof.create_identifier()
    }

    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let (protocol_version, mut cursor) = split_protocol_version(buffer)?;
        let tag: u8 = canonical_decode_from(&mut cursor)?;
        if tag != StateTransitionType::IdentityCreate as u8 {
            return Err(ProtocolError::InvalidStateTransitionType(tag));
        }
        Self::decode_body(protocol_version, &mut cursor)
    }

    pub(crate) fn decode_body(protocol_version: u32, cursor: &mut &[u8]) -> Result<Self> {
        let (raw_proof, public_keys): (RawAssetLockProof, Vec<IdentityPublicKey>) = canonical_decode_from(cursor)?;
        let signature: Option<ByteString> = decode_signature_fields(cursor)?;

        Ok(Self {
            protocol_version,
            asset_lock_proof: AssetLockProof::from_raw(&raw_proof)?,
            public_keys,
            signature,
            execution_context: ExecutionContext::new(),
        })
    }

    pub fn validate_structure(&self, config: &ConsensusConfig) -> ValidationResult {
        if self.public_keys.len() > config.max_public_keys_in_create {
            return ConsensusError::MaxIdentityPublicKeyLimitReached {
                max_items: config.max_public_keys_in_create,
            }
            .into();
        }

        let mut result = self.asset_lock_proof.validate_structure();
        result.merge(validate_public_keys(&self.public_keys, config.max_identity_public_keys));
        if result.is_valid() {
            result.merge(validate_required_master_key(&self.public_keys));
        }
        result
    }

    pub async fn validate_state(&mut self, repository: &dyn StateRepository) -> Result<ValidationResult> {
        let identity_id = self.identity_id();
        let ctx = &mut self.execution_context;

        if repository.fetch_identity(&identity_id, ctx).await?.is_some() {
            return Ok(ConsensusError::IdentityAlreadyExists { identity_id }.into());
        }

        let result = self.asset_lock_proof.validate(repository, ctx).await?;
        if !result.is_valid() {
            return Ok(result);
        }

        validate_public_keys_unique(&self.public_keys, repository, ctx).await
    }

    /// Store the new identity, index its key hashes, then consume the out-point
    pub async fn apply(&mut self, repository: &dyn StateRepository, config: &ConsensusConfig) -> Result<Identity> {
        let identity_id = self.identity_id();
        let out_point = self.asset_lock_proof.out_point();
        let ctx = &mut self.execution_context;

        let output = self.asset_lock_proof.fetch_output(repository, config, ctx).await?;
        let balance = config.convert_satoshi_to_credits(output.value)?;

        let public_keys = self.public_keys.iter().map(IdentityPublicKey::without_signature).collect();
        let mut identity = Identity::new(identity_id, public_keys, balance);
        identity.protocol_version = self.protocol_version;

        repository.store_identity(&identity, ctx).await?;
        repository
            .store_identity_public_key_hashes(&identity_id, &identity.public_key_hashes()?, ctx)
            .await?;
        repository.mark_asset_lock_transaction_out_point_as_used(&out_point, ctx).await?;

        info!(
            identity_id = %identity_id,
            balance,
            keys = identity.public_keys.len(),
            dry_run = ctx.is_dry_run(),
            "identity created"
        );

        Ok(identity)
    }
}

impl StateTransitionLike for IdentityCreateTransition {
    fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    fn transition_type(&self) -> StateTransitionType {
        StateTransitionType::IdentityCreate
    }

    fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    fn set_signature(&mut self, signature: Option<ByteString>) {
        self.signature = signature;
    }

    fn owner_id(&self) -> Identifier {
        self.identity_id()
    }

    fn encode_body(&self, skip_signature: bool) -> Result<ByteString> {
        let body = (
            self.transition_type() as u8,
            self.asset_lock_proof.to_raw()?,
            public_keys_for_encoding(&self.public_keys, skip_signature),
        );
        encode_with_signature(&body, &self.signature, skip_signature)
    }

    fn to_json(&self, skip_signature: bool) -> Result<serde_json::Value> {
        to_json_value(&JsonView {
            protocol_version: self.protocol_version,
            transition_type: self.transition_type() as u8,
            asset_lock_proof: self.asset_lock_proof.to_raw()?,
            public_keys: public_keys_for_encoding(&self.public_keys, skip_signature),
            identity_id: self.identity_id().to_string(),
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
