//! Identity and identity public key model

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ProtocolError, Result};
use crate::hashing::{
    canonical_decode_from, canonical_encode, prefix_with_protocol_version, ripemd160_sha256,
    split_protocol_version,
};
use crate::types::*;

/// Cryptographic scheme of an identity public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyType {
    EcdsaSecp256k1 = 0,
    Bls12_381 = 1,
    EcdsaHash160 = 2,
    Bip13ScriptHash = 3,
}

impl KeyType {
    /// Exact length of the key data for this type
    pub fn data_size(&self) -> usize {
        match self {
            KeyType::EcdsaSecp256k1 => ECDSA_PUBLIC_KEY_SIZE,
            KeyType::Bls12_381 => BLS_PUBLIC_KEY_SIZE,
            KeyType::EcdsaHash160 | KeyType::Bip13ScriptHash => HASH160_SIZE,
        }
    }

    /// Types whose key data is already a hash
    pub fn is_hash_type(&self) -> bool {
        matches!(self, KeyType::EcdsaHash160 | KeyType::Bip13ScriptHash)
    }
}

impl TryFrom<u8> for KeyType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(KeyType::EcdsaSecp256k1),
            1 => Ok(KeyType::Bls12_381),
            2 => Ok(KeyType::EcdsaHash160),
            3 => Ok(KeyType::Bip13ScriptHash),
            other => Err(ProtocolError::Serialization(format!("unknown key type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Purpose {
    Authentication = 0,
    Encryption = 1,
    Decryption = 2,
    Withdraw = 3,
}

impl Purpose {
    /// Security levels a key with this purpose may carry
    pub fn allowed_security_levels(&self) -> &'static [SecurityLevel] {
        match self {
            Purpose::Authentication => &[
                SecurityLevel::Master,
                SecurityLevel::Critical,
                SecurityLevel::High,
                SecurityLevel::Medium,
            ],
            Purpose::Encryption => &[SecurityLevel::Medium],
            Purpose::Decryption => &[SecurityLevel::Medium],
            Purpose::Withdraw => &[SecurityLevel::Critical],
        }
    }
}

/// Security level, ordered from most (`Master`) to least (`Medium`) privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityLevel {
    Master = 0,
    Critical = 1,
    High = 2,
    Medium = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPublicKey {
    pub id: KeyId,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub purpose: Purpose,
    pub security_level: SecurityLevel,
    pub data: ByteString,
    pub read_only: bool,
    pub disabled_at: Option<TimestampMillis>,
    pub signature: Option<ByteString>,
}

impl IdentityPublicKey {
    pub fn new(
        id: KeyId,
        key_type: KeyType,
        purpose: Purpose,
        security_level: SecurityLevel,
        data: ByteString,
    ) -> Self {
        Self {
            id,
            key_type,
            purpose,
            security_level,
            data,
            read_only: false,
            disabled_at: None,
            signature: None,
        }
    }

    /// Key hash used by the global key index.
    ///
    /// ECDSA and BLS keys hash to RIPEMD160(SHA256(data)); hash-typed keys already carry it
    /// and return it unchanged. Hash-typed data that is not a 20 byte HASH160 is a
    /// `Serialization` error; basic validation reports it as `InvalidIdentityPublicKeyData`
    /// before any key hash is computed.
    pub fn hash(&self) -> Result<Hash160> {
        if self.data.is_empty() {
            return Err(ProtocolError::EmptyPublicKeyData);
        }

        match self.key_type {
            KeyType::EcdsaSecp256k1 | KeyType::Bls12_381 => Ok(ripemd160_sha256(&self.data)),
            KeyType::EcdsaHash160 | KeyType::Bip13ScriptHash => {
                self.data.as_slice().try_into().map_err(|_| {
                    ProtocolError::Serialization(format!(
                        "key {} hash must be {} bytes, got {}",
                        self.id,
                        HASH160_SIZE,
                        self.data.len()
                    ))
                })
            }
        }
    }

    pub fn is_master(&self) -> bool {
        self.security_level == SecurityLevel::Master
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    pub fn is_security_level_allowed(&self) -> bool {
        self.purpose.allowed_security_levels().contains(&self.security_level)
    }

    /// Copy without the proof-of-possession signature, as covered by transition hashes
    pub fn without_signature(&self) -> Self {
        Self { signature: None, ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub protocol_version: u32,
    pub id: Identifier,
    pub public_keys: Vec<IdentityPublicKey>,
    pub balance: Credits,
    pub revision: Revision,
}

impl Identity {
    pub fn new(id: Identifier, public_keys: Vec<IdentityPublicKey>, balance: Credits) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            id,
            public_keys,
            balance,
            revision: 0,
        }
    }

    pub fn get_public_key_by_id(&self, id: KeyId) -> Option<&IdentityPublicKey> {
        self.public_keys.iter().find(|key| key.id == id)
    }

    pub fn increase_balance(&mut self, amount: Credits) -> Result<Credits> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow("identity balance"))?;
        Ok(self.balance)
    }

    pub fn add_public_keys(&mut self, keys: impl IntoIterator<Item = IdentityPublicKey>) {
        self.public_keys.extend(keys);
    }

    pub fn public_key_hashes(&self) -> Result<Vec<Hash160>> {
        self.public_keys.iter().map(IdentityPublicKey::hash).collect()
    }

    /// `varint(protocolVersion) || canonicalEncode(id, publicKeys, balance, revision)`
    pub fn to_buffer(&self) -> Result<ByteString> {
        let body = canonical_encode(&(&self.id, &self.public_keys, self.balance, self.revision))?;
        Ok(prefix_with_protocol_version(self.protocol_version, &body))
    }

    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let (protocol_version, mut cursor) = split_protocol_version(buffer)?;
        let (id, public_keys, balance, revision): (Identifier, Vec<IdentityPublicKey>, Credits, Revision) =
            canonical_decode_from(&mut cursor)?;
        Ok(Self { protocol_version, id, public_keys, balance, revision })
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Largest identity the protocol admits, used in place of a stored identity when
    /// estimating fees without chain state
    pub fn biggest_possible(key_count: usize) -> Self {
        let public_keys = (0..key_count)
            .map(|i| {
                let security_level = if i == 0 { SecurityLevel::Master } else { SecurityLevel::High };
                IdentityPublicKey {
                    id: i as KeyId,
                    key_type: KeyType::Bls12_381,
                    purpose: Purpose::Authentication,
                    security_level,
                    data: vec![0xff; BLS_PUBLIC_KEY_SIZE],
                    read_only: false,
                    disabled_at: Some(TimestampMillis::MAX),
                    signature: None,
                }
            })
            .collect();

        Self {
            protocol_version: PROTOCOL_VERSION,
            id: Identifier::new([0xff; 32]),
            public_keys,
            balance: 0,
            revision: Revision::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ecdsa_key(id: KeyId) -> IdentityPublicKey {
        let mut data = vec![0x02];
        data.extend_from_slice(&[id as u8 + 1; 32]);
        IdentityPublicKey::new(id, KeyType::EcdsaSecp256k1, Purpose::Authentication, SecurityLevel::Master, data)
    }

    #[test]
    fn test_allowed_security_levels() {
        assert_eq!(Purpose::Authentication.allowed_security_levels().len(), 4);
        assert_eq!(Purpose::Encryption.allowed_security_levels(), &[SecurityLevel::Medium]);
        assert_eq!(Purpose::Decryption.allowed_security_levels(), &[SecurityLevel::Medium]);
        assert_eq!(Purpose::Withdraw.allowed_security_levels(), &[SecurityLevel::Critical]);
    }

    #[test]
    fn test_security_level_policy_rejects_mismatch() {
        let mut key = ecdsa_key(0);
        key.purpose = Purpose::Withdraw;
        key.security_level = SecurityLevel::Master;
        assert!(!key.is_security_level_allowed());

        key.security_level = SecurityLevel::Critical;
        assert!(key.is_security_level_allowed());
    }

    #[test]
    fn test_hash_of_ecdsa_key() {
        let key = ecdsa_key(0);
        assert_eq!(key.hash().unwrap(), ripemd160_sha256(&key.data));
    }

    #[test]
    fn test_hash_of_hash160_key_is_data() {
        let key = IdentityPublicKey::new(
            1,
            KeyType::EcdsaHash160,
            Purpose::Authentication,
            SecurityLevel::High,
            vec![0x42; 20],
        );
        assert_eq!(key.hash().unwrap().to_vec(), key.data);
    }

    #[test]
    fn test_hash_of_wrong_size_hash160_key() {
        let key = IdentityPublicKey::new(
            1,
            KeyType::Bip13ScriptHash,
            Purpose::Authentication,
            SecurityLevel::High,
            vec![0x42; 21],
        );
        assert!(matches!(key.hash(), Err(ProtocolError::Serialization(_))));
    }

    #[test]
    fn test_hash_of_empty_data() {
        let mut key = ecdsa_key(0);
        key.data.clear();
        assert!(matches!(key.hash(), Err(ProtocolError::EmptyPublicKeyData)));
    }

    #[test]
    fn test_increase_balance_overflow() {
        let mut identity = Identity::new(Identifier::default(), vec![], u64::MAX);
        assert!(matches!(identity.increase_balance(1), Err(ProtocolError::Overflow(_))));
        assert_eq!(identity.balance, u64::MAX);
    }

    #[test]
    fn test_identity_buffer_round_trip() {
        let mut identity = Identity::new(Identifier::new([3; 32]), vec![ecdsa_key(0), ecdsa_key(1)], 5000);
        identity.revision = 2;
        identity.public_keys[1].disabled_at = Some(1_700_000_000_000);

        let buffer = identity.to_buffer().unwrap();
        assert_eq!(buffer[0], PROTOCOL_VERSION as u8);
        assert_eq!(Identity::from_buffer(&buffer).unwrap(), identity);
    }

    #[test]
    fn test_identity_json_uses_camel_case() {
        let identity = Identity::new(Identifier::new([3; 32]), vec![ecdsa_key(0)], 1);
        let json = identity.to_json().unwrap();
        assert!(json.get("protocolVersion").is_some());
        assert!(json["publicKeys"][0].get("securityLevel").is_some());
        assert!(json["publicKeys"][0].get("type").is_some());
    }

    #[test]
    fn test_biggest_possible_identity() {
        let identity = Identity::biggest_possible(MAX_IDENTITY_PUBLIC_KEYS);
        assert_eq!(identity.public_keys.len(), MAX_IDENTITY_PUBLIC_KEYS);
        assert!(identity.public_keys[0].is_master());
        assert!(identity
            .to_buffer()
            .unwrap()
            .len() > Identity::new(identity.id, vec![], 0).to_buffer().unwrap().len());
    }
}
