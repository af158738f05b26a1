//! Key set update of an existing identity, signed by one of its master keys

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ConsensusConfig;
use crate::constants::PROTOCOL_VERSION;
use crate::error::{ConsensusError, ProtocolError, Result, ValidationResult};
use crate::execution_context::ExecutionContext;
use crate::hashing::{canonical_decode_from, split_protocol_version};
use crate::identity::{Identity, IdentityPublicKey, SecurityLevel};
use crate::public_keys::{
    validate_public_keys, validate_public_keys_state, validate_public_keys_unique, validate_required_master_key,
};
use crate::repository::StateRepository;
use crate::state_transition::{
    decode_signature_fields, encode_with_signature, public_keys_for_encoding, to_json_value,
    IdentitySignedStateTransition, StateTransitionLike, StateTransitionType,
};
use crate::types::*;

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityUpdateTransition {
    pub protocol_version: u32,
    pub identity_id: Identifier,
    /// Must be exactly one above the stored identity's revision
    pub revision: Revision,
    pub add_public_keys: Vec<IdentityPublicKey>,
    pub disable_public_keys: Vec<KeyId>,
    pub public_keys_disabled_at: Option<TimestampMillis>,
    pub signature: Option<ByteString>,
    pub signature_public_key_id: Option<KeyId>,
    execution_context: ExecutionContext,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SignatureFields {
    signature: Option<ByteString>,
    signature_public_key_id: Option<KeyId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonView<'a> {
    protocol_version: u32,
    #[serde(rename = "type")]
    transition_type: u8,
    identity_id: String,
    revision: Revision,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_public_keys: Vec<IdentityPublicKey>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    disable_public_keys: Vec<KeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_keys_disabled_at: Option<TimestampMillis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a ByteString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature_public_key_id: Option<KeyId>,
}

impl IdentityUpdateTransition {
    pub fn new(identity_id: Identifier, revision: Revision) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            identity_id,
            revision,
            add_public_keys: vec![],
            disable_public_keys: vec![],
            public_keys_disabled_at: None,
            signature: None,
            signature_public_key_id: None,
            execution_context: ExecutionContext::new(),
        }
    }

    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let (protocol_version, mut cursor) = split_protocol_version(buffer)?;
        let tag: u8 = canonical_decode_from(&mut cursor)?;
        if tag != StateTransitionType::IdentityUpdate as u8 {
            return Err(ProtocolError::InvalidStateTransitionType(tag));
        }
        Self::decode_body(protocol_version, &mut cursor)
    }

    pub(crate) fn decode_body(protocol_version: u32, cursor: &mut &[u8]) -> Result<Self> {
        let (identity_id, revision, add_public_keys, disable_public_keys, public_keys_disabled_at): (
            Identifier,
            Revision,
            Vec<IdentityPublicKey>,
            Vec<KeyId>,
            Option<TimestampMillis>,
        ) = canonical_decode_from(cursor)?;
        let SignatureFields { signature, signature_public_key_id } = decode_signature_fields(cursor)?;

        Ok(Self {
            protocol_version,
            identity_id,
            revision,
            add_public_keys,
            disable_public_keys,
            public_keys_disabled_at,
            signature,
            signature_public_key_id,
            execution_context: ExecutionContext::new(),
        })
    }

    pub fn validate_structure(&self, config: &ConsensusConfig) -> ValidationResult {
        if self.add_public_keys.is_empty() && self.disable_public_keys.is_empty() {
            return ConsensusError::InvalidIdentityUpdateTransitionEmpty.into();
        }

        if self.disable_public_keys.is_empty() != self.public_keys_disabled_at.is_none() {
            return ConsensusError::InvalidIdentityUpdateTransitionDisableKeys.into();
        }

        if self.add_public_keys.is_empty() {
            return ValidationResult::new();
        }
        validate_public_keys(&self.add_public_keys, config.max_identity_public_keys)
    }

    pub async fn validate_state(
        &mut self,
        repository: &dyn StateRepository,
        config: &ConsensusConfig,
    ) -> Result<ValidationResult> {
        let identity_id = self.identity_id;
        let ctx = &mut self.execution_context;

        let Some(identity) = repository.fetch_identity(&identity_id, ctx).await? else {
            return Ok(ConsensusError::IdentityNotFound { identity_id }.into());
        };

        if identity.revision.checked_add(1) != Some(self.revision) {
            return Ok(ConsensusError::InvalidIdentityRevision {
                identity_id,
                current_revision: identity.revision,
            }
            .into());
        }

        let mut result = ValidationResult::new();
        for &key_id in &self.disable_public_keys {
            match identity.get_public_key_by_id(key_id) {
                None => result.add_error(ConsensusError::InvalidIdentityPublicKeyId { id: key_id }),
                Some(key) if key.read_only => {
                    result.add_error(ConsensusError::IdentityPublicKeyIsReadOnly { public_key_id: key_id })
                }
                Some(key) if key.is_disabled() => {
                    result.add_error(ConsensusError::IdentityPublicKeyIsDisabled { public_key_id: key_id })
                }
                Some(_) => {}
            }
        }
        if !result.is_valid() {
            return Ok(result);
        }

        if let Some(disabled_at) = self.public_keys_disabled_at {
            let block_time = repository.fetch_latest_platform_block_time().await?;
            let window = config.public_keys_disabled_at_window_ms;
            let time_window_start = block_time.saturating_sub(window);
            let time_window_end = block_time.saturating_add(window);

            if disabled_at < time_window_start || disabled_at > time_window_end {
                return Ok(ConsensusError::IdentityPublicKeyDisabledAtWindowViolation {
                    disabled_at,
                    time_window_start,
                    time_window_end,
                }
                .into());
            }
        }

        let resulting_keys = resulting_public_keys(
            identity.public_keys,
            &self.add_public_keys,
            &self.disable_public_keys,
            self.public_keys_disabled_at,
        );
        let result = validate_public_keys_state(&resulting_keys, config.max_identity_public_keys);
        if !result.is_valid() {
            return Ok(result);
        }
        let result = validate_required_master_key(&resulting_keys);
        if !result.is_valid() {
            return Ok(result);
        }

        if self.add_public_keys.is_empty() {
            return Ok(ValidationResult::new());
        }
        validate_public_keys_unique(&self.add_public_keys, repository, ctx).await
    }

    /// Write the new key set and revision, then index the added key hashes
    pub async fn apply(&mut self, repository: &dyn StateRepository, config: &ConsensusConfig) -> Result<Identity> {
        let identity_id = self.identity_id;
        let ctx = &mut self.execution_context;

        let mut identity = match repository.fetch_identity(&identity_id, ctx).await? {
            Some(identity) => identity,
            None if ctx.is_dry_run() => Identity {
                id: identity_id,
                ..Identity::biggest_possible(config.dry_run_identity_key_count)
            },
            None => return Err(ProtocolError::IdentityNotFound { identity_id }),
        };

        identity.public_keys = resulting_public_keys(
            std::mem::take(&mut identity.public_keys),
            &self.add_public_keys,
            &self.disable_public_keys,
            self.public_keys_disabled_at,
        );
        identity.revision = self.revision;

        repository.update_identity(&identity, ctx).await?;

        if !self.add_public_keys.is_empty() {
            let hashes = self
                .add_public_keys
                .iter()
                .map(IdentityPublicKey::hash)
                .collect::<Result<Vec<_>>>()?;
            repository.store_identity_public_key_hashes(&identity_id, &hashes, ctx).await?;
        }

        info!(
            identity_id = %identity_id,
            revision = identity.revision,
            added = self.add_public_keys.len(),
            disabled = self.disable_public_keys.len(),
            dry_run = ctx.is_dry_run(),
            "identity updated"
        );

        Ok(identity)
    }
}

fn resulting_public_keys(
    mut public_keys: Vec<IdentityPublicKey>,
    add_public_keys: &[IdentityPublicKey],
    disable_public_keys: &[KeyId],
    disabled_at: Option<TimestampMillis>,
) -> Vec<IdentityPublicKey> {
    if let Some(disabled_at) = disabled_at {
        for key in public_keys.iter_mut().filter(|key| disable_public_keys.contains(&key.id)) {
            key.disabled_at = Some(disabled_at);
        }
    }

    public_keys.extend(add_public_keys.iter().map(IdentityPublicKey::without_signature));
    public_keys
}

impl StateTransitionLike for IdentityUpdateTransition {
    fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    fn transition_type(&self) -> StateTransitionType {
        StateTransitionType::IdentityUpdate
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
        let body = (
            self.transition_type() as u8,
            self.identity_id,
            self.revision,
            public_keys_for_encoding(&self.add_public_keys, skip_signature),
            &self.disable_public_keys,
            self.public_keys_disabled_at,
        );
        let signature_fields = SignatureFields {
            signature: self.signature.clone(),
            signature_public_key_id: self.signature_public_key_id,
        };
        encode_with_signature(&body, &signature_fields, skip_signature)
    }

    fn to_json(&self, skip_signature: bool) -> Result<serde_json::Value> {
        to_json_value(&JsonView {
            protocol_version: self.protocol_version,
            transition_type: self.transition_type() as u8,
            identity_id: self.identity_id.to_string(),
            revision: self.revision,
            add_public_keys: public_keys_for_encoding(&self.add_public_keys, skip_signature),
            disable_public_keys: self.disable_public_keys.clone(),
            public_keys_disabled_at: self.public_keys_disabled_at,
            signature: if skip_signature { None } else { self.signature.as_ref() },
            signature_public_key_id: if skip_signature { None } else { self.signature_public_key_id },
        })
    }

    fn execution_context(&self) -> &ExecutionContext {
        &self.execution_context
    }

    fn execution_context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.execution_context
    }
}

impl IdentitySignedStateTransition for IdentityUpdateTransition {
    fn signature_public_key_id(&self) -> Option<KeyId> {
        self.signature_public_key_id
    }

    fn set_signature_public_key_id(&mut self, key_id: Option<KeyId>) {
        self.signature_public_key_id = key_id;
    }

    /// Updates are always authorized by a master key
    fn security_level_requirement(&self) -> &'static [SecurityLevel] {
        &[SecurityLevel::Master]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{KeyType, Purpose};
    use crate::repository::InMemoryStateRepository;
    use crate::signature::scheme_for;

    const MASTER_PRIVATE_KEY: [u8; 32] = [0x71; 32];
    const BLOCK_TIME: TimestampMillis = 1_700_000_000_000;

    fn key(id: KeyId, seed: u8, security_level: SecurityLevel) -> IdentityPublicKey {
        let data = scheme_for(KeyType::EcdsaSecp256k1).unwrap().public_key_data(&[seed; 32]).unwrap();
        IdentityPublicKey::new(id, KeyType::EcdsaSecp256k1, Purpose::Authentication, security_level, data)
    }

    fn stored_identity(revision: Revision) -> Identity {
        let mut identity = Identity::new(
            Identifier::new([8; 32]),
            vec![key(0, 0x71, SecurityLevel::Master), key(1, 0x72, SecurityLevel::High)],
            1_000,
        );
        identity.revision = revision;
        identity
    }

    async fn repository(revision: Revision) -> InMemoryStateRepository {
        let repository = InMemoryStateRepository::new();
        repository.insert_identity(stored_identity(revision)).await;
        repository.set_block_time(BLOCK_TIME).await;
        repository
    }

    fn adding(revision: Revision) -> IdentityUpdateTransition {
        let mut transition = IdentityUpdateTransition::new(stored_identity(0).id, revision);
        transition.add_public_keys = vec![key(2, 0x73, SecurityLevel::Medium)];
        transition
    }

    #[test]
    fn test_round_trip_with_and_without_signature() {
        let mut transition = adding(1);
        transition.disable_public_keys = vec![1];
        transition.public_keys_disabled_at = Some(BLOCK_TIME);
        transition.sign(&stored_identity(0).public_keys[0], &MASTER_PRIVATE_KEY).unwrap();

        let decoded = IdentityUpdateTransition::from_buffer(&transition.to_buffer(false).unwrap()).unwrap();
        assert_eq!(decoded, transition);

        let unsigned = IdentityUpdateTransition::from_buffer(&transition.to_buffer(true).unwrap()).unwrap();
        assert_eq!(unsigned.signature, None);
        assert_eq!(unsigned.signature_public_key_id, None);
        assert_eq!(unsigned.add_public_keys, transition.add_public_keys);
    }

    #[test]
    fn test_json_skip_signature_drops_key_id() {
        let mut transition = adding(1);
        transition.sign(&stored_identity(0).public_keys[0], &MASTER_PRIVATE_KEY).unwrap();

        let json = transition.to_json(true).unwrap();
        assert!(json.get("signature").is_none());
        assert!(json.get("signaturePublicKeyId").is_none());
        assert_eq!(transition.to_json(false).unwrap()["signaturePublicKeyId"], 0);
    }

    #[test]
    fn test_structure() {
        let config = ConsensusConfig::default();
        let empty = IdentityUpdateTransition::new(Identifier::new([8; 32]), 1);
        assert_eq!(
            empty.validate_structure(&config).first_error(),
            Some(&ConsensusError::InvalidIdentityUpdateTransitionEmpty)
        );

        let mut without_time = empty.clone();
        without_time.disable_public_keys = vec![1];
        assert_eq!(
            without_time.validate_structure(&config).first_error(),
            Some(&ConsensusError::InvalidIdentityUpdateTransitionDisableKeys)
        );

        assert!(adding(1).validate_structure(&config).is_valid());
    }

    #[tokio::test]
    async fn test_revision_must_be_next() {
        let repository = repository(4).await;
        let config = ConsensusConfig::default();

        let result = adding(6).validate_state(&repository, &config).await.unwrap();
        assert_eq!(
            result.first_error(),
            Some(&ConsensusError::InvalidIdentityRevision {
                identity_id: stored_identity(4).id,
                current_revision: 4,
            })
        );

        let result = adding(4).validate_state(&repository, &config).await.unwrap();
        assert!(!result.is_valid());

        let mut transition = adding(5);
        assert!(transition.validate_state(&repository, &config).await.unwrap().is_valid());
        let identity = transition.apply(&repository, &config).await.unwrap();

        assert_eq!(identity.revision, 5);
        assert_eq!(identity.public_keys.len(), 3);
        assert_eq!(repository.identity(&identity.id).await.unwrap().revision, 5);
        assert_eq!(
            repository.identity_id_by_public_key_hash(&key(2, 0x73, SecurityLevel::Medium).hash().unwrap()).await,
            Some(identity.id)
        );
    }

    #[tokio::test]
    async fn test_added_key_id_collides() {
        let repository = repository(0).await;
        let mut transition = adding(1);
        transition.add_public_keys[0].id = 1;

        let result = transition.validate_state(&repository, &ConsensusConfig::default()).await.unwrap();

        assert_eq!(
            result.first_error(),
            Some(&ConsensusError::DuplicatedIdentityPublicKeyIdState { duplicated_ids: vec![1] })
        );
    }

    #[tokio::test]
    async fn test_disable_checks() {
        let mut identity = stored_identity(0);
        identity.public_keys[1].read_only = true;
        let repository = InMemoryStateRepository::new();
        repository.insert_identity(identity).await;
        repository.set_block_time(BLOCK_TIME).await;

        let mut transition = IdentityUpdateTransition::new(stored_identity(0).id, 1);
        transition.disable_public_keys = vec![1, 9];
        transition.public_keys_disabled_at = Some(BLOCK_TIME);

        let result = transition.validate_state(&repository, &ConsensusConfig::default()).await.unwrap();

        assert_eq!(
            result.errors(),
            &[
                ConsensusError::IdentityPublicKeyIsReadOnly { public_key_id: 1 },
                ConsensusError::InvalidIdentityPublicKeyId { id: 9 },
            ]
        );
    }

    #[tokio::test]
    async fn test_disabling_last_master_key() {
        let repository = repository(0).await;
        let mut transition = IdentityUpdateTransition::new(stored_identity(0).id, 1);
        transition.disable_public_keys = vec![0];
        transition.public_keys_disabled_at = Some(BLOCK_TIME);

        let result = transition.validate_state(&repository, &ConsensusConfig::default()).await.unwrap();

        assert_eq!(result.first_error(), Some(&ConsensusError::MissingMasterPublicKey));
    }

    #[tokio::test]
    async fn test_disabled_at_window() {
        let repository = repository(0).await;
        let config = ConsensusConfig::default();
        let mut transition = IdentityUpdateTransition::new(stored_identity(0).id, 1);
        transition.disable_public_keys = vec![1];
        transition.public_keys_disabled_at = Some(BLOCK_TIME + config.public_keys_disabled_at_window_ms + 1);

        let result = transition.validate_state(&repository, &config).await.unwrap();
        assert!(matches!(
            result.first_error(),
            Some(ConsensusError::IdentityPublicKeyDisabledAtWindowViolation { .. })
        ));

        transition.public_keys_disabled_at = Some(BLOCK_TIME - 1_000);
        assert!(transition.validate_state(&repository, &config).await.unwrap().is_valid());

        let identity = transition.apply(&repository, &config).await.unwrap();
        assert_eq!(identity.public_keys[1].disabled_at, Some(BLOCK_TIME - 1_000));
    }

    #[tokio::test]
    async fn test_missing_identity() {
        let repository = InMemoryStateRepository::new();
        let result = adding(1).validate_state(&repository, &ConsensusConfig::default()).await.unwrap();
        assert!(matches!(result.first_error(), Some(ConsensusError::IdentityNotFound { .. })));

        let apply = adding(1).apply(&repository, &ConsensusConfig::default()).await;
        assert!(matches!(apply, Err(ProtocolError::IdentityNotFound { .. })));
    }
}
