//! Validation pipeline: basic, signature, fee and state stages, then apply
//!
//! Stages run in that order and each one only runs when the previous stage produced no
//! consensus errors. Every repository call made along the way is recorded on the
//! transition's execution context.

use tracing::{debug, warn};

use crate::asset_lock::{credit_output_public_key_hash, AssetLockProof};
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, ProtocolError, Result, ValidationResult};
use crate::execution_context::Operation;
use crate::fee::calculate_state_transition_fee;
use crate::identity::{Identity, KeyType, Purpose};
use crate::repository::StateRepository;
use crate::state_transition::{IdentitySignedStateTransition, StateTransition, StateTransitionLike};
use crate::transaction::TransactionOutput;
use crate::types::Credits;

fn log_result(stage: &str, transition: &StateTransition, result: &ValidationResult) {
    if result.is_valid() {
        debug!(stage, transition_type = ?transition.transition_type(), "validation stage passed");
    } else {
        warn!(
            stage,
            transition_type = ?transition.transition_type(),
            errors = result.errors().len(),
            first_error = ?result.first_error(),
            "validation stage failed"
        );
    }
}

/// Checks that need neither chain state nor signatures
pub fn validate_basic(transition: &StateTransition, config: &ConsensusConfig) -> ValidationResult {
    let protocol_version = transition.as_transition().protocol_version();

    let result = if protocol_version > config.protocol_version {
        ConsensusError::UnsupportedProtocolVersion {
            parsed_protocol_version: protocol_version,
            latest_version: config.protocol_version,
        }
        .into()
    } else if protocol_version < config.min_protocol_version {
        ConsensusError::IncompatibleProtocolVersion {
            parsed_protocol_version: protocol_version,
            minimal_protocol_version: config.min_protocol_version,
        }
        .into()
    } else {
        match transition {
            StateTransition::IdentityCreate(transition) => transition.validate_structure(config),
            StateTransition::IdentityTopUp(transition) => transition.validate_structure(),
            StateTransition::IdentityUpdate(transition) => transition.validate_structure(config),
        }
    };

    log_result("basic", transition, &result);
    result
}

/// Funding output of an asset lock, with lookup misses reported as consensus errors
async fn fetch_funding_output<T: StateTransitionLike>(
    transition: &mut T,
    proof: &AssetLockProof,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<std::result::Result<TransactionOutput, ConsensusError>> {
    match proof.fetch_output(repository, config, transition.execution_context_mut()).await {
        Ok(output) => Ok(Ok(output)),
        Err(ProtocolError::AssetLockTransactionNotFound { transaction_id }) => {
            Ok(Err(ConsensusError::AssetLockTransactionIsNotFound { transaction_id }))
        }
        Err(ProtocolError::AssetLockOutputNotFound { output_index }) => {
            Ok(Err(ConsensusError::IdentityAssetLockTransactionOutputNotFound { output_index }))
        }
        Err(e) => Err(e),
    }
}

/// Asset-lock funded transitions are signed by the one-time key whose hash the credit
/// output commits to
async fn validate_asset_lock_signature<T: StateTransitionLike>(
    transition: &mut T,
    proof: &AssetLockProof,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<ValidationResult> {
    let output = match fetch_funding_output(transition, proof, repository, config).await? {
        Ok(output) => output,
        Err(error) => return Ok(error.into()),
    };

    transition
        .execution_context_mut()
        .add_operation(Operation::SignatureVerification { key_type: KeyType::EcdsaHash160 });

    if transition.execution_context().is_dry_run() {
        return Ok(ValidationResult::new());
    }

    let Some(public_key_hash) = credit_output_public_key_hash(&output) else {
        return Ok(ConsensusError::InvalidStateTransitionSignature.into());
    };

    if transition.signature().is_none()
        || !transition.verify_by_public_key(&public_key_hash, KeyType::EcdsaHash160)?
    {
        return Ok(ConsensusError::InvalidStateTransitionSignature.into());
    }

    Ok(ValidationResult::new())
}

/// Identity-signed transitions are checked against the owner's stored key
async fn validate_identity_signature<T: IdentitySignedStateTransition>(
    transition: &mut T,
    repository: &dyn StateRepository,
) -> Result<ValidationResult> {
    let owner_id = transition.owner_id();
    let identity = repository
        .fetch_identity(&owner_id, transition.execution_context_mut())
        .await?;

    let Some(identity) = identity else {
        if transition.execution_context().is_dry_run() {
            return Ok(ValidationResult::new());
        }
        return Ok(ConsensusError::IdentityNotFound { identity_id: owner_id }.into());
    };

    let (Some(_), Some(key_id)) = (transition.signature(), transition.signature_public_key_id()) else {
        return Ok(ConsensusError::InvalidStateTransitionSignature.into());
    };

    let Some(key) = identity.get_public_key_by_id(key_id) else {
        return Ok(ConsensusError::MissingPublicKey { public_key_id: key_id }.into());
    };

    if key.key_type == KeyType::Bip13ScriptHash {
        return Ok(ConsensusError::InvalidIdentityPublicKeyType { public_key_type: key.key_type }.into());
    }

    let required_security_levels = transition.security_level_requirement();
    if !required_security_levels.contains(&key.security_level) {
        return Ok(ConsensusError::InvalidSignaturePublicKeySecurityLevel {
            public_key_security_level: key.security_level,
            required_security_levels: required_security_levels.to_vec(),
        }
        .into());
    }

    if key.purpose != Purpose::Authentication {
        return Ok(ConsensusError::WrongPublicKeyPurpose {
            public_key_purpose: key.purpose,
            key_purpose_requirement: Purpose::Authentication,
        }
        .into());
    }

    if key.is_disabled() {
        return Ok(ConsensusError::PublicKeyIsDisabled { public_key_id: key.id }.into());
    }

    transition
        .execution_context_mut()
        .add_operation(Operation::SignatureVerification { key_type: key.key_type });

    if transition.execution_context().is_dry_run() {
        return Ok(ValidationResult::new());
    }

    match transition.verify_signature(key) {
        Ok(true) => Ok(ValidationResult::new()),
        Ok(false) | Err(ProtocolError::InvalidBlsPublicKey(_)) | Err(ProtocolError::InvalidBlsSignature(_)) => {
            Ok(ConsensusError::InvalidStateTransitionSignature.into())
        }
        Err(e) => Err(e),
    }
}

pub async fn validate_signature(
    transition: &mut StateTransition,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<ValidationResult> {
    let result = match transition {
        StateTransition::IdentityCreate(create) => {
            let proof = create.asset_lock_proof.clone();
            validate_asset_lock_signature(create, &proof, repository, config).await?
        }
        StateTransition::IdentityTopUp(top_up) => {
            let identity_id = top_up.identity_id;
            let exists = repository
                .fetch_identity(&identity_id, top_up.execution_context_mut())
                .await?
                .is_some();

            if !exists && !top_up.execution_context().is_dry_run() {
                ConsensusError::IdentityNotFound { identity_id }.into()
            } else {
                let proof = top_up.asset_lock_proof.clone();
                validate_asset_lock_signature(top_up, &proof, repository, config).await?
            }
        }
        StateTransition::IdentityUpdate(update) => validate_identity_signature(update, repository).await?,
    };

    log_result("signature", transition, &result);
    Ok(result)
}

/// Credits a transition can spend: funding output, stored balance, or both
async fn available_balance(
    transition: &mut StateTransition,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<std::result::Result<Credits, ConsensusError>> {
    async fn stored_balance<T: StateTransitionLike>(
        transition: &mut T,
        repository: &dyn StateRepository,
    ) -> Result<std::result::Result<Credits, ConsensusError>> {
        let identity_id = transition.owner_id();
        let identity = repository
            .fetch_identity(&identity_id, transition.execution_context_mut())
            .await?;
        match identity {
            Some(identity) => Ok(Ok(identity.balance)),
            None if transition.execution_context().is_dry_run() => Ok(Ok(0)),
            None => Ok(Err(ConsensusError::IdentityNotFound { identity_id })),
        }
    }

    match transition {
        StateTransition::IdentityCreate(create) => {
            let proof = create.asset_lock_proof.clone();
            Ok(match fetch_funding_output(create, &proof, repository, config).await? {
                Ok(output) => Ok(config.convert_satoshi_to_credits(output.value)?),
                Err(error) => Err(error),
            })
        }
        StateTransition::IdentityTopUp(top_up) => {
            let proof = top_up.asset_lock_proof.clone();
            let output = match fetch_funding_output(top_up, &proof, repository, config).await? {
                Ok(output) => output,
                Err(error) => return Ok(Err(error)),
            };
            let credits = config.convert_satoshi_to_credits(output.value)?;
            Ok(match stored_balance(top_up, repository).await? {
                Ok(balance) => Ok(balance.checked_add(credits).ok_or(ProtocolError::Overflow("balance"))?),
                Err(error) => Err(error),
            })
        }
        StateTransition::IdentityUpdate(update) => stored_balance(update, repository).await,
    }
}

/// The owner must be able to pay the desired fee of everything recorded so far
pub async fn validate_fee(
    transition: &mut StateTransition,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<ValidationResult> {
    let balance = match available_balance(transition, repository, config).await? {
        Ok(balance) => balance,
        Err(error) => {
            let result = error.into();
            log_result("fee", transition, &result);
            return Ok(result);
        }
    };

    let owner_id = transition.owner_id();
    let desired_amount = calculate_state_transition_fee(
        transition.execution_context_mut(),
        &owner_id,
        config.user_tip,
        &config.fee_costs,
        repository,
    )
    .await?;

    let result = if transition.execution_context().is_dry_run() || balance as i128 >= desired_amount as i128 {
        ValidationResult::new()
    } else {
        ConsensusError::BalanceIsNotEnough { balance, fee: desired_amount }.into()
    };

    log_result("fee", transition, &result);
    Ok(result)
}

pub async fn validate_state(
    transition: &mut StateTransition,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<ValidationResult> {
    let result = match transition {
        StateTransition::IdentityCreate(create) => create.validate_state(repository).await?,
        StateTransition::IdentityTopUp(top_up) => top_up.validate_state(repository).await?,
        StateTransition::IdentityUpdate(update) => update.validate_state(repository, config).await?,
    };

    log_result("state", transition, &result);
    Ok(result)
}

/// All stages in order, stopping at the first stage that reports errors
pub async fn validate(
    transition: &mut StateTransition,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<ValidationResult> {
    let result = validate_basic(transition, config);
    if !result.is_valid() {
        return Ok(result);
    }

    let result = validate_signature(transition, repository, config).await?;
    if !result.is_valid() {
        return Ok(result);
    }

    let result = validate_fee(transition, repository, config).await?;
    if !result.is_valid() {
        return Ok(result);
    }

    validate_state(transition, repository, config).await
}

pub async fn apply(
    transition: &mut StateTransition,
    repository: &dyn StateRepository,
    config: &ConsensusConfig,
) -> Result<Identity> {
    match transition {
        StateTransition::IdentityCreate(create) => create.apply(repository, config).await,
        StateTransition::IdentityTopUp(top_up) => top_up.apply(repository, config).await,
        StateTransition::IdentityUpdate(update) => update.apply(repository, config).await,
    }
}
