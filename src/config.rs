//! Consensus configuration

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ProtocolError, Result};
use crate::identity::KeyType;
use crate::types::{Credits, Satoshis};

/// Prices used by the default operation fee reducer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeCosts {
    pub storage_credit_per_byte: Credits,
    pub read_base_processing_cost: Credits,
    pub read_credit_per_byte: Credits,
    pub write_base_processing_cost: Credits,
    pub write_credit_per_byte: Credits,
    pub ecdsa_secp256k1_verification_cost: Credits,
    pub bls12_381_verification_cost: Credits,
    pub ecdsa_hash160_verification_cost: Credits,
    pub bip13_script_hash_verification_cost: Credits,
}

impl Default for FeeCosts {
    fn default() -> Self {
        Self {
            storage_credit_per_byte: 5000,
            read_base_processing_cost: 8400,
            read_credit_per_byte: 12,
            write_base_processing_cost: 6000,
            write_credit_per_byte: 12,
            ecdsa_secp256k1_verification_cost: 3000,
            bls12_381_verification_cost: 6000,
            ecdsa_hash160_verification_cost: 4000,
            bip13_script_hash_verification_cost: 6000,
        }
    }
}

impl FeeCosts {
    pub fn signature_verification_cost(&self, key_type: KeyType) -> Credits {
        match key_type {
            KeyType::EcdsaSecp256k1 => self.ecdsa_secp256k1_verification_cost,
            KeyType::Bls12_381 => self.bls12_381_verification_cost,
            KeyType::EcdsaHash160 => self.ecdsa_hash160_verification_cost,
            KeyType::Bip13ScriptHash => self.bip13_script_hash_verification_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub protocol_version: u32,
    pub min_protocol_version: u32,
    pub credits_per_satoshi: Credits,
    pub max_identity_public_keys: usize,
    pub max_public_keys_in_create: usize,
    pub public_keys_disabled_at_window_ms: u64,
    /// Value of the stand-in output returned by dry-run chain asset lock lookups
    pub dry_run_chain_output_satoshis: Satoshis,
    /// Key count of the stand-in identity used by dry-run top-ups
    pub dry_run_identity_key_count: usize,
    pub user_tip: i64,
    pub fee_costs: FeeCosts,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            min_protocol_version: PROTOCOL_VERSION,
            credits_per_satoshi: CREDITS_PER_SATOSHI,
            max_identity_public_keys: MAX_IDENTITY_PUBLIC_KEYS,
            max_public_keys_in_create: MAX_PUBLIC_KEYS_IN_CREATE,
            public_keys_disabled_at_window_ms: PUBLIC_KEYS_DISABLED_AT_WINDOW_MS,
            dry_run_chain_output_satoshis: DRY_RUN_CHAIN_OUTPUT_SATOSHIS,
            dry_run_identity_key_count: MAX_IDENTITY_PUBLIC_KEYS,
            user_tip: 0,
            fee_costs: FeeCosts::default(),
        }
    }
}

impl ConsensusConfig {
    /// Parse a JSON document; omitted fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_protocol_version > self.protocol_version {
            return Err(ProtocolError::InvalidConfig(format!(
                "min_protocol_version {} is above protocol_version {}",
                self.min_protocol_version, self.protocol_version
            )));
        }
        if self.credits_per_satoshi == 0 {
            return Err(ProtocolError::InvalidConfig("credits_per_satoshi must be positive".to_string()));
        }
        if self.max_public_keys_in_create > self.max_identity_public_keys {
            return Err(ProtocolError::InvalidConfig(
                "max_public_keys_in_create exceeds max_identity_public_keys".to_string(),
            ));
        }
        Ok(())
    }

    /// Satoshis locked on the base chain to platform credits
    pub fn convert_satoshi_to_credits(&self, satoshis: Satoshis) -> Result<Credits> {
        satoshis
            .checked_mul(self.credits_per_satoshi)
            .ok_or(ProtocolError::Overflow("satoshi to credits conversion"))
    }
}
