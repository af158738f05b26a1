//! # Identity-Consensus
//!
//! Identity state transitions for platform consensus: creating, funding and updating
//! identities, and pricing the work each transition performs.
//!
//! An identity is created from an asset lock, a base-chain output irreversibly committed
//! to the platform. Its balance is topped up the same way, and its key set is changed by
//! a transition signed with one of its master keys.
//!
//! ## Architecture
//!
//! The system follows a layered architecture:
//! - Encoding and hashing (canonical bytes, `H = sha256d`)
//! - Data model (identities, keys, asset lock proofs, funding transactions)
//! - State transition envelope (multi-algorithm signing and verification)
//! - Validation pipeline (basic, signature, fee and state stages, then apply)
//! - State repository (the only boundary to chain state)
//!
//! ## Design Principles
//!
//! 1. **Bit-exact encoding**: transition bytes and hashes must match across implementations
//! 2. **Two error tiers**: consensus errors reject a transition, protocol errors abort
//! 3. **Exact Version Pinning**: All consensus-critical dependencies pinned to exact versions
//! 4. **Explicit execution context**: every transition owns the record of the work it caused
//!
//! ## Usage
//!
//! ```rust
//! use identity_consensus::{IdentityConsensus, InMemoryStateRepository, StateTransition};
//! use identity_consensus::identity_update::IdentityUpdateTransition;
//! use identity_consensus::types::Identifier;
//!
//! let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
//! let transition: StateTransition = IdentityUpdateTransition::new(Identifier::new([1; 32]), 1).into();
//!
//! // An update that neither adds nor disables keys is rejected before any state is read
//! let result = consensus.validate_basic(&transition);
//! assert!(!result.is_valid());
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod config;
pub mod hashing;
pub mod transaction;
pub mod identity;
pub mod execution_context;
pub mod signature;
pub mod asset_lock;
pub mod repository;
pub mod public_keys;
pub mod state_transition;
pub mod identity_create;
pub mod identity_top_up;
pub mod identity_update;
pub mod fee;
pub mod validator;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use config::{ConsensusConfig, FeeCosts};
pub use error::{ConsensusError, ProtocolError, Result, ValidationResult};
pub use execution_context::ExecutionContext;
pub use identity::{Identity, IdentityPublicKey, KeyType, Purpose, SecurityLevel};
pub use repository::{InMemoryStateRepository, StateRepository};
pub use state_transition::{IdentitySignedStateTransition, StateTransition, StateTransitionLike, StateTransitionType};

/// Main identity consensus implementation
///
/// Owns the state repository and the configuration, and runs transitions through the
/// validation pipeline.
///
/// # Examples
///
/// ```
/// use identity_consensus::{ConsensusConfig, IdentityConsensus, InMemoryStateRepository};
///
/// let config = ConsensusConfig::from_json_str(r#"{ "user_tip": 10 }"#).unwrap();
/// let consensus = IdentityConsensus::with_config(InMemoryStateRepository::new(), config).unwrap();
/// assert_eq!(consensus.config().user_tip, 10);
/// ```
pub struct IdentityConsensus<SR: StateRepository> {
    repository: SR,
    config: ConsensusConfig,
}

impl<SR: StateRepository> IdentityConsensus<SR> {
    /// Create a new instance with the default configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use identity_consensus::{IdentityConsensus, InMemoryStateRepository};
    ///
    /// let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    /// ```
    pub fn new(repository: SR) -> Self {
        Self { repository, config: ConsensusConfig::default() }
    }

    pub fn with_config(repository: SR, config: ConsensusConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { repository, config })
    }

    pub fn repository(&self) -> &SR {
        &self.repository
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Decode a transition and run basic validation on it
    ///
    /// Undecodable buffers are reported as consensus errors, never as protocol errors.
    ///
    /// # Examples
    ///
    /// ```
    /// use identity_consensus::{ConsensusError, IdentityConsensus, InMemoryStateRepository};
    ///
    /// let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    ///
    /// // Protocol version 1, type tag 9
    /// let result = consensus.create_from_buffer(&[0x01, 0x09]).unwrap_err();
    /// assert_eq!(
    ///     result.first_error(),
    ///     Some(&ConsensusError::InvalidStateTransitionType { transition_type: 9 })
    /// );
    /// ```
    pub fn create_from_buffer(&self, buffer: &[u8]) -> std::result::Result<StateTransition, ValidationResult> {
        let transition = StateTransition::from_buffer(buffer).map_err(|error| match error {
            ProtocolError::InvalidStateTransitionType(transition_type) => {
                ValidationResult::from(ConsensusError::InvalidStateTransitionType { transition_type })
            }
            other => ValidationResult::from(ConsensusError::SerializedObjectParsing { message: other.to_string() }),
        })?;

        let result = self.validate_basic(&transition);
        if !result.is_valid() {
            return Err(result);
        }
        Ok(transition)
    }

    /// Protocol version and structure checks
    pub fn validate_basic(&self, transition: &StateTransition) -> ValidationResult {
        validator::validate_basic(transition, &self.config)
    }

    pub async fn validate_signature(&self, transition: &mut StateTransition) -> Result<ValidationResult> {
        validator::validate_signature(transition, &self.repository, &self.config).await
    }

    pub async fn validate_fee(&self, transition: &mut StateTransition) -> Result<ValidationResult> {
        validator::validate_fee(transition, &self.repository, &self.config).await
    }

    pub async fn validate_state(&self, transition: &mut StateTransition) -> Result<ValidationResult> {
        validator::validate_state(transition, &self.repository, &self.config).await
    }

    /// Run basic, signature, fee and state validation, stopping at the first failing stage
    ///
    /// # Examples
    ///
    /// ```
    /// use identity_consensus::{ConsensusError, IdentityConsensus, InMemoryStateRepository, StateTransition};
    /// use identity_consensus::identity_update::IdentityUpdateTransition;
    /// use identity_consensus::types::Identifier;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> identity_consensus::Result<()> {
    /// let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    ///
    /// let mut update = IdentityUpdateTransition::new(Identifier::new([1; 32]), 1);
    /// update.disable_public_keys = vec![1];
    /// update.public_keys_disabled_at = Some(0);
    /// let mut transition: StateTransition = update.into();
    ///
    /// let result = consensus.validate(&mut transition).await?;
    /// assert!(matches!(result.first_error(), Some(ConsensusError::IdentityNotFound { .. })));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn validate(&self, transition: &mut StateTransition) -> Result<ValidationResult> {
        validator::validate(transition, &self.repository, &self.config).await
    }

    /// Apply a validated transition and return the resulting identity
    pub async fn apply(&self, transition: &mut StateTransition) -> Result<Identity> {
        validator::apply(transition, &self.repository, &self.config).await
    }

    /// Price the operations recorded on the transition's execution context so far
    pub async fn calculate_fee(&self, transition: &mut StateTransition) -> Result<i64> {
        let owner_id = transition.owner_id();
        fee::calculate_state_transition_fee(
            transition.execution_context_mut(),
            &owner_id,
            self.config.user_tip,
            &self.config.fee_costs,
            &self.repository,
        )
        .await
    }

    /// Estimate the fee of validating and applying a transition without touching state
    ///
    /// Runs every stage and apply under a dry-run context; the transition's own execution
    /// context is restored afterwards.
    pub async fn estimate_fee(&self, transition: &mut StateTransition) -> Result<i64> {
        let original = std::mem::replace(transition.execution_context_mut(), ExecutionContext::dry_run());
        let estimate = self.dry_run_fee(transition).await;
        *transition.execution_context_mut() = original;
        estimate
    }

    async fn dry_run_fee(&self, transition: &mut StateTransition) -> Result<i64> {
        validator::validate_signature(transition, &self.repository, &self.config).await?;
        validator::validate_state(transition, &self.repository, &self.config).await?;
        validator::apply(transition, &self.repository, &self.config).await?;
        self.calculate_fee(transition).await
    }
}
