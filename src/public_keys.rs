//! Identity public key set validation
//!
//! Three layers: shape of each key and of the set, the master key requirement, and
//! uniqueness against the repository's global key hash index.

use std::collections::HashSet;

use crate::error::{ConsensusError, Result, ValidationResult};
use crate::execution_context::ExecutionContext;
use crate::identity::{IdentityPublicKey, KeyType, Purpose, SecurityLevel};
use crate::repository::StateRepository;
use crate::signature::{is_valid_bls_public_key, is_valid_ecdsa_public_key};
use crate::types::KeyId;

fn duplicated_ids(keys: &[IdentityPublicKey]) -> Vec<KeyId> {
    let mut seen = HashSet::new();
    keys.iter().filter(|key| !seen.insert(key.id)).map(|key| key.id).collect()
}

fn duplicated_data(keys: &[IdentityPublicKey]) -> Vec<KeyId> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| !seen.insert(key.data.as_slice()))
        .map(|key| key.id)
        .collect()
}

fn validate_key_data(key: &IdentityPublicKey) -> Option<String> {
    let expected = key.key_type.data_size();
    if key.data.len() != expected {
        return Some(format!(
            "{:?} key data must be {} bytes, got {}",
            key.key_type,
            expected,
            key.data.len()
        ));
    }

    match key.key_type {
        KeyType::EcdsaSecp256k1 if !is_valid_ecdsa_public_key(&key.data) => {
            Some("not a valid secp256k1 public key".to_string())
        }
        KeyType::Bls12_381 if !is_valid_bls_public_key(&key.data) => {
            Some("not a valid BLS12-381 public key".to_string())
        }
        _ => None,
    }
}

/// Shape checks for keys supplied by a transition
pub fn validate_public_keys(keys: &[IdentityPublicKey], max_keys: usize) -> ValidationResult {
    if keys.len() > max_keys {
        return ConsensusError::MaxIdentityPublicKeyLimitReached { max_items: max_keys }.into();
    }

    let duplicated_ids = duplicated_ids(keys);
    if !duplicated_ids.is_empty() {
        return ConsensusError::DuplicatedIdentityPublicKeyId { duplicated_ids }.into();
    }

    let duplicated_public_key_ids = duplicated_data(keys);
    if !duplicated_public_key_ids.is_empty() {
        return ConsensusError::DuplicatedIdentityPublicKey { duplicated_public_key_ids }.into();
    }

    let mut result = ValidationResult::new();
    for key in keys {
        if let Some(validation_error) = validate_key_data(key) {
            result.add_error(ConsensusError::InvalidIdentityPublicKeyData {
                public_key_id: key.id,
                validation_error,
            });
        }

        if !key.is_security_level_allowed() {
            result.add_error(ConsensusError::InvalidIdentityPublicKeySecurityLevel {
                public_key_id: key.id,
                purpose: key.purpose,
                security_level: key.security_level,
            });
        }
    }
    result
}

/// Checks on the key set an identity would hold after a transition
pub fn validate_public_keys_state(keys: &[IdentityPublicKey], max_keys: usize) -> ValidationResult {
    let duplicated_ids = duplicated_ids(keys);
    if !duplicated_ids.is_empty() {
        return ConsensusError::DuplicatedIdentityPublicKeyIdState { duplicated_ids }.into();
    }

    let duplicated_public_key_ids = duplicated_data(keys);
    if !duplicated_public_key_ids.is_empty() {
        return ConsensusError::DuplicatedIdentityPublicKeyState { duplicated_public_key_ids }.into();
    }

    if keys.len() > max_keys {
        return ConsensusError::MaxIdentityPublicKeyLimitReached { max_items: max_keys }.into();
    }

    ValidationResult::new()
}

/// An identity needs at least one enabled authentication master key
pub fn validate_required_master_key(keys: &[IdentityPublicKey]) -> ValidationResult {
    let has_master = keys.iter().any(|key| {
        key.purpose == Purpose::Authentication
            && key.security_level == SecurityLevel::Master
            && !key.is_disabled()
    });

    if has_master {
        ValidationResult::new()
    } else {
        ConsensusError::MissingMasterPublicKey.into()
    }
}

/// Reject keys whose hash is already indexed for any identity
pub async fn validate_public_keys_unique(
    keys: &[IdentityPublicKey],
    repository: &dyn StateRepository,
    ctx: &mut ExecutionContext,
) -> Result<ValidationResult> {
    let hashes = keys
        .iter()
        .map(IdentityPublicKey::hash)
        .collect::<Result<Vec<_>>>()?;

    let owners = repository.fetch_identity_ids_by_public_key_hashes(&hashes, ctx).await?;

    let mut result = ValidationResult::new();
    for (public_key_hash, owner) in hashes.into_iter().zip(owners) {
        if owner.is_some() {
            result.add_error(ConsensusError::IdentityPublicKeyAlreadyExists { public_key_hash });
        }
    }
    Ok(result)
}
