//! Error types for identity consensus
//!
//! `ConsensusError` values are expected validation failures and are collected into a
//! [`ValidationResult`]. `ProtocolError` values are fatal: they abort the pipeline and
//! indicate a broken caller, a broken collaborator or corrupted state.

use thiserror::Error;

use crate::identity::{KeyType, Purpose, SecurityLevel};
use crate::types::{ByteString, Credits, Hash, Hash160, Identifier, KeyId, TimestampMillis};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // Basic

    #[error("Can't parse serialized object: {message}")]
    SerializedObjectParsing { message: String },

    #[error("Protocol version {parsed_protocol_version} is not supported, latest is {latest_version}")]
    UnsupportedProtocolVersion { parsed_protocol_version: u32, latest_version: u32 },

    #[error("Protocol version {parsed_protocol_version} is below minimal {minimal_protocol_version}")]
    IncompatibleProtocolVersion { parsed_protocol_version: u32, minimal_protocol_version: u32 },

    #[error("Invalid state transition type {transition_type}")]
    InvalidStateTransitionType { transition_type: u8 },

    #[error("Asset lock transaction output {output_index} not found")]
    IdentityAssetLockTransactionOutputNotFound { output_index: u32 },

    #[error("Asset lock output {output_index} is not a valid OP_RETURN output")]
    InvalidIdentityAssetLockTransactionOutput { output_index: u32 },

    #[error("Asset lock output {output_index} must carry a 20-byte public key hash")]
    InvalidAssetLockTransactionOutputReturnSize { output_index: u32 },

    #[error("Asset lock transaction {} output {output_index} already used", hex::encode(.transaction_id))]
    IdentityAssetLockTransactionOutPointAlreadyExists { transaction_id: Hash, output_index: u32 },

    #[error("Instant lock transaction {} and asset lock transaction {} mismatch", hex::encode(.instant_lock_transaction_id), hex::encode(.asset_lock_transaction_id))]
    IdentityAssetLockProofLockedTransactionMismatch {
        instant_lock_transaction_id: Hash,
        asset_lock_transaction_id: Hash,
    },

    #[error("Instant lock proof signature is invalid")]
    InvalidInstantAssetLockProofSignature,

    #[error("Asset lock proof core chain height {proof_core_chain_locked_height} is higher than the current {current_core_chain_locked_height}")]
    InvalidAssetLockProofCoreChainHeight {
        proof_core_chain_locked_height: u32,
        current_core_chain_locked_height: u32,
    },

    #[error("Asset lock proof core chain height {proof_core_chain_locked_height} is lower than the transaction height {transaction_height:?}")]
    InvalidAssetLockProofTransactionHeight {
        proof_core_chain_locked_height: u32,
        transaction_height: Option<u32>,
    },

    #[error("Asset lock transaction {} is not found", hex::encode(.transaction_id))]
    AssetLockTransactionIsNotFound { transaction_id: Hash },

    #[error("Duplicated public keys {duplicated_public_key_ids:?} found")]
    DuplicatedIdentityPublicKey { duplicated_public_key_ids: Vec<KeyId> },

    #[error("Duplicated public key ids {duplicated_ids:?} found")]
    DuplicatedIdentityPublicKeyId { duplicated_ids: Vec<KeyId> },

    #[error("Invalid identity public key {public_key_id} data: {validation_error}")]
    InvalidIdentityPublicKeyData { public_key_id: KeyId, validation_error: String },

    #[error("Invalid identity public key {public_key_id} security level {security_level:?} for purpose {purpose:?}")]
    InvalidIdentityPublicKeySecurityLevel {
        public_key_id: KeyId,
        purpose: Purpose,
        security_level: SecurityLevel,
    },

    #[error("Identity doesn't contain any master key")]
    MissingMasterPublicKey,

    #[error("Identity cannot contain more than {max_items} public keys")]
    MaxIdentityPublicKeyLimitReached { max_items: usize },

    #[error("Identity update transition must add or disable at least one key")]
    InvalidIdentityUpdateTransitionEmpty,

    #[error("Disabled keys and their disabling time must be provided together")]
    InvalidIdentityUpdateTransitionDisableKeys,

    // Signature

    #[error("Identity {identity_id} not found")]
    IdentityNotFound { identity_id: Identifier },

    #[error("Invalid identity public key type {public_key_type:?}")]
    InvalidIdentityPublicKeyType { public_key_type: KeyType },

    #[error("Invalid state transition signature")]
    InvalidStateTransitionSignature,

    #[error("Public key {public_key_id} doesn't exist")]
    MissingPublicKey { public_key_id: KeyId },

    #[error("Invalid public key security level {public_key_security_level:?}, required one of {required_security_levels:?}")]
    InvalidSignaturePublicKeySecurityLevel {
        public_key_security_level: SecurityLevel,
        required_security_levels: Vec<SecurityLevel>,
    },

    #[error("Invalid public key purpose {public_key_purpose:?}, required {key_purpose_requirement:?}")]
    WrongPublicKeyPurpose { public_key_purpose: Purpose, key_purpose_requirement: Purpose },

    #[error("Public key {public_key_id} is disabled")]
    PublicKeyIsDisabled { public_key_id: KeyId },

    // Fee

    #[error("Current credits balance {balance} is not enough to pay {fee} fee")]
    BalanceIsNotEnough { balance: Credits, fee: i64 },

    // State

    #[error("Identity {identity_id} already exists")]
    IdentityAlreadyExists { identity_id: Identifier },

    #[error("Identity public key with hash {} already exists", hex::encode(.public_key_hash))]
    IdentityPublicKeyAlreadyExists { public_key_hash: Hash160 },

    #[error("Identity would contain duplicated public keys {duplicated_public_key_ids:?}")]
    DuplicatedIdentityPublicKeyState { duplicated_public_key_ids: Vec<KeyId> },

    #[error("Identity would contain duplicated public key ids {duplicated_ids:?}")]
    DuplicatedIdentityPublicKeyIdState { duplicated_ids: Vec<KeyId> },

    #[error("Identity public key with id {id} does not exist")]
    InvalidIdentityPublicKeyId { id: KeyId },

    #[error("Identity public key {public_key_id} is read only")]
    IdentityPublicKeyIsReadOnly { public_key_id: KeyId },

    #[error("Identity public key {public_key_id} is already disabled")]
    IdentityPublicKeyIsDisabled { public_key_id: KeyId },

    #[error("Keys disabled at {disabled_at} is outside of [{time_window_start}, {time_window_end}]")]
    IdentityPublicKeyDisabledAtWindowViolation {
        disabled_at: TimestampMillis,
        time_window_start: TimestampMillis,
        time_window_end: TimestampMillis,
    },

    #[error("Identity {identity_id} revision {current_revision} doesn't precede the transition revision")]
    InvalidIdentityRevision { identity_id: Identifier, current_revision: u64 },
}

impl ConsensusError {
    /// Stable numeric code: 1xxx basic, 2xxx signature, 3xxx fee, 4xxx state
    pub fn code(&self) -> u32 {
        use ConsensusError::*;
        match self {
            SerializedObjectParsing { .. } => 1001,
            UnsupportedProtocolVersion { .. } => 1002,
            IncompatibleProtocolVersion { .. } => 1003,
            InvalidStateTransitionType { .. } => 1004,
            IdentityAssetLockTransactionOutputNotFound { .. } => 1010,
            InvalidIdentityAssetLockTransactionOutput { .. } => 1011,
            InvalidAssetLockTransactionOutputReturnSize { .. } => 1012,
            IdentityAssetLockTransactionOutPointAlreadyExists { .. } => 1013,
            IdentityAssetLockProofLockedTransactionMismatch { .. } => 1014,
            InvalidInstantAssetLockProofSignature => 1015,
            InvalidAssetLockProofCoreChainHeight { .. } => 1016,
            InvalidAssetLockProofTransactionHeight { .. } => 1017,
            AssetLockTransactionIsNotFound { .. } => 1018,
            DuplicatedIdentityPublicKey { .. } => 1020,
            DuplicatedIdentityPublicKeyId { .. } => 1021,
            InvalidIdentityPublicKeyData { .. } => 1022,
            InvalidIdentityPublicKeySecurityLevel { .. } => 1023,
            MissingMasterPublicKey => 1024,
            MaxIdentityPublicKeyLimitReached { .. } => 1025,
            InvalidIdentityUpdateTransitionEmpty => 1026,
            InvalidIdentityUpdateTransitionDisableKeys => 1027,
            IdentityNotFound { .. } => 2000,
            InvalidIdentityPublicKeyType { .. } => 2001,
            InvalidStateTransitionSignature => 2002,
            MissingPublicKey { .. } => 2003,
            InvalidSignaturePublicKeySecurityLevel { .. } => 2004,
            WrongPublicKeyPurpose { .. } => 2005,
            PublicKeyIsDisabled { .. } => 2006,
            BalanceIsNotEnough { .. } => 3000,
            IdentityAlreadyExists { .. } => 4000,
            IdentityPublicKeyAlreadyExists { .. } => 4001,
            DuplicatedIdentityPublicKeyState { .. } => 4002,
            DuplicatedIdentityPublicKeyIdState { .. } => 4003,
            InvalidIdentityPublicKeyId { .. } => 4004,
            IdentityPublicKeyIsReadOnly { .. } => 4005,
            IdentityPublicKeyIsDisabled { .. } => 4006,
            IdentityPublicKeyDisabledAtWindowViolation { .. } => 4007,
            InvalidIdentityRevision { .. } => 4008,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown asset lock proof type: {0}")]
    UnknownAssetLockProofType(u8),

    #[error("Asset lock transaction {} not found", hex::encode(.transaction_id))]
    AssetLockTransactionNotFound { transaction_id: Hash },

    #[error("Asset lock transaction output {output_index} not found")]
    AssetLockOutputNotFound { output_index: u32 },

    #[error("Invalid state transition type: {0}")]
    InvalidStateTransitionType(u8),

    #[error("Invalid identity public key type {0:?}")]
    InvalidIdentityPublicKeyType(KeyType),

    #[error("State transition is not signed")]
    StateTransitionIsNotSigned,

    #[error("Private key does not match public key {}", hex::encode(.public_key))]
    InvalidSignaturePublicKey { public_key: ByteString },

    #[error("Signature public key id {signature_public_key_id:?} does not match key {public_key_id}")]
    PublicKeyMismatch { signature_public_key_id: Option<KeyId>, public_key_id: KeyId },

    #[error("Public key data is not set")]
    EmptyPublicKeyData,

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid BLS public key: {0}")]
    InvalidBlsPublicKey(String),

    #[error("Invalid BLS signature: {0}")]
    InvalidBlsSignature(String),

    #[error("Invalid public key security level {public_key_security_level:?}, required one of {required_security_levels:?}")]
    InvalidSignaturePublicKeySecurityLevel {
        public_key_security_level: SecurityLevel,
        required_security_levels: Vec<SecurityLevel>,
    },

    #[error("Invalid public key purpose {public_key_purpose:?}, required {key_purpose_requirement:?}")]
    WrongPublicKeyPurpose { public_key_purpose: Purpose, key_purpose_requirement: Purpose },

    #[error("Public key {public_key_id} is disabled")]
    PublicKeyIsDisabled { public_key_id: KeyId },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State transition removed bytes from {count} identities, which is not defined by the protocol")]
    MultipleFeeRefunds { count: usize },

    #[error("State transition owned by {owner_id} refunds credits to {refund_identifier}")]
    FeeRefundForAnotherIdentity { owner_id: Identifier, refund_identifier: Identifier },

    #[error("Identity {identity_id} not found")]
    IdentityNotFound { identity_id: Identifier },

    #[error("Overflow: {0}")]
    Overflow(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Ordered list of consensus errors produced by one validation stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    errors: Vec<ConsensusError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(error: ConsensusError) -> Self {
        Self { errors: vec![error] }
    }

    pub fn add_error(&mut self, error: ConsensusError) {
        self.errors.push(error);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ConsensusError] {
        &self.errors
    }

    pub fn first_error(&self) -> Option<&ConsensusError> {
        self.errors.first()
    }
}

impl From<ConsensusError> for ValidationResult {
    fn from(error: ConsensusError) -> Self {
        Self::with_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result_keeps_error_order() {
        let mut result = ValidationResult::new();
        assert!(result.is_valid());

        result.add_error(ConsensusError::MissingMasterPublicKey);
        result.add_error(ConsensusError::InvalidStateTransitionSignature);

        assert!(!result.is_valid());
        assert_eq!(result.errors().len(), 2);
        assert_eq!(result.first_error(), Some(&ConsensusError::MissingMasterPublicKey));
    }

    #[test]
    fn test_merge_appends_errors() {
        let mut first = ValidationResult::with_error(ConsensusError::MissingMasterPublicKey);
        let second = ValidationResult::with_error(ConsensusError::InvalidInstantAssetLockProofSignature);
        first.merge(second);
        assert_eq!(first.errors()[1], ConsensusError::InvalidInstantAssetLockProofSignature);
    }

    #[test]
    fn test_codes_are_grouped_by_stage() {
        assert_eq!(ConsensusError::MissingMasterPublicKey.code() / 1000, 1);
        assert_eq!(ConsensusError::InvalidStateTransitionSignature.code() / 1000, 2);
        assert_eq!(ConsensusError::BalanceIsNotEnough { balance: 0, fee: 1 }.code() / 1000, 3);
        assert_eq!(
            ConsensusError::IdentityAlreadyExists { identity_id: Identifier::default() }.code() / 1000,
            4
        );
    }

    #[test]
    fn test_repository_errors_convert_to_protocol_errors() {
        let error: ProtocolError = anyhow::anyhow!("connection reset").into();
        assert!(matches!(error, ProtocolError::Repository(_)));
        assert!(error.to_string().contains("connection reset"));
    }
}
