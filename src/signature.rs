//! Signature schemes selected by identity key type
//!
//! ECDSA schemes sign `H(payload)` with 65-byte compact recoverable signatures.
//! BLS12-381 uses the `min_pk` variant: 48-byte public keys, 96-byte signatures.
//! Native key and signature objects are plain owned values, released on every return path.

use blst::min_pk::{PublicKey as BlsPublicKey, SecretKey as BlsSecretKey, Signature as BlsSignature};
use blst::BLST_ERROR;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::constants::*;
use crate::error::{ProtocolError, Result};
use crate::hashing::{hash, ripemd160_sha256};
use crate::identity::KeyType;
use crate::types::ByteString;

/// One signing algorithm
pub trait SignatureScheme: Sync {
    fn key_type(&self) -> KeyType;

    fn sign(&self, payload: &[u8], private_key: &[u8]) -> Result<ByteString>;

    /// `public_key` is the identity key data for this scheme (raw key or key hash)
    fn verify(&self, payload: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool>;

    /// Identity key data corresponding to `private_key`
    fn public_key_data(&self, private_key: &[u8]) -> Result<ByteString>;
}

pub struct EcdsaSecp256k1Scheme;
pub struct EcdsaHash160Scheme;
pub struct Bls12_381Scheme;

static ECDSA_SECP256K1: EcdsaSecp256k1Scheme = EcdsaSecp256k1Scheme;
static ECDSA_HASH160: EcdsaHash160Scheme = EcdsaHash160Scheme;
static BLS12_381: Bls12_381Scheme = Bls12_381Scheme;

/// Scheme implementing `key_type`; script-hash keys cannot sign
pub fn scheme_for(key_type: KeyType) -> Result<&'static dyn SignatureScheme> {
    match key_type {
        KeyType::EcdsaSecp256k1 => Ok(&ECDSA_SECP256K1),
        KeyType::EcdsaHash160 => Ok(&ECDSA_HASH160),
        KeyType::Bls12_381 => Ok(&BLS12_381),
        KeyType::Bip13ScriptHash => Err(ProtocolError::InvalidIdentityPublicKeyType(key_type)),
    }
}

fn ecdsa_message(payload: &[u8]) -> Result<Message> {
    Message::from_digest_slice(&hash(payload)).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn ecdsa_secret_key(private_key: &[u8]) -> Result<SecretKey> {
    SecretKey::from_slice(private_key).map_err(|e| ProtocolError::InvalidPrivateKey(e.to_string()))
}

fn sign_compact(payload: &[u8], private_key: &[u8]) -> Result<ByteString> {
    let secp = Secp256k1::new();
    let secret_key = ecdsa_secret_key(private_key)?;
    let message = ecdsa_message(payload)?;

    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&message, &secret_key)
        .serialize_compact();

    let mut signature = Vec::with_capacity(ECDSA_SIGNATURE_SIZE);
    signature.push(COMPACT_SIGNATURE_HEADER + recovery_id.to_i32() as u8);
    signature.extend_from_slice(&compact);
    Ok(signature)
}

/// Parse a compact signature; returns `None` for anything malformed
fn parse_compact(signature: &[u8]) -> Option<(RecoverableSignature, bool)> {
    if signature.len() != ECDSA_SIGNATURE_SIZE {
        return None;
    }
    let header = signature[0].checked_sub(27)?;
    if header > 7 {
        return None;
    }
    let compressed = header >= 4;
    let recovery_id = RecoveryId::from_i32((header & 3) as i32).ok()?;
    let signature = RecoverableSignature::from_compact(&signature[1..], recovery_id).ok()?;
    Some((signature, compressed))
}

fn compressed_public_key(private_key: &[u8]) -> Result<[u8; ECDSA_PUBLIC_KEY_SIZE]> {
    let secp = Secp256k1::new();
    let secret_key = ecdsa_secret_key(private_key)?;
    Ok(PublicKey::from_secret_key(&secp, &secret_key).serialize())
}

impl SignatureScheme for EcdsaSecp256k1Scheme {
    fn key_type(&self) -> KeyType {
        KeyType::EcdsaSecp256k1
    }

    fn sign(&self, payload: &[u8], private_key: &[u8]) -> Result<ByteString> {
        sign_compact(payload, private_key)
    }

    fn verify(&self, payload: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
        let secp = Secp256k1::new();

        let Ok(public_key) = PublicKey::from_slice(public_key) else {
            return Ok(false);
        };
        let Some((signature, _)) = parse_compact(signature) else {
            return Ok(false);
        };
        let Ok(message) = ecdsa_message(payload) else {
            return Ok(false);
        };

        Ok(secp.verify_ecdsa(&message, &signature.to_standard(), &public_key).is_ok())
    }

    fn public_key_data(&self, private_key: &[u8]) -> Result<ByteString> {
        Ok(compressed_public_key(private_key)?.to_vec())
    }
}

impl SignatureScheme for EcdsaHash160Scheme {
    fn key_type(&self) -> KeyType {
        KeyType::EcdsaHash160
    }

    fn sign(&self, payload: &[u8], private_key: &[u8]) -> Result<ByteString> {
        sign_compact(payload, private_key)
    }

    /// Recovers the signer and compares its HASH160; every failure is a plain `false`
    fn verify(&self, payload: &[u8], signature: &[u8], public_key_hash: &[u8]) -> Result<bool> {
        let secp = Secp256k1::new();

        let Some((signature, compressed)) = parse_compact(signature) else {
            return Ok(false);
        };
        let Ok(message) = ecdsa_message(payload) else {
            return Ok(false);
        };
        let Ok(recovered) = secp.recover_ecdsa(&message, &signature) else {
            return Ok(false);
        };

        let recovered_hash = if compressed {
            ripemd160_sha256(&recovered.serialize())
        } else {
            ripemd160_sha256(&recovered.serialize_uncompressed())
        };

        Ok(recovered_hash.as_slice() == public_key_hash)
    }

    fn public_key_data(&self, private_key: &[u8]) -> Result<ByteString> {
        Ok(ripemd160_sha256(&compressed_public_key(private_key)?).to_vec())
    }
}

fn bls_secret_key(private_key: &[u8]) -> Result<BlsSecretKey> {
    BlsSecretKey::from_bytes(private_key)
        .map_err(|e| ProtocolError::InvalidPrivateKey(format!("{:?}", e)))
}

impl SignatureScheme for Bls12_381Scheme {
    fn key_type(&self) -> KeyType {
        KeyType::Bls12_381
    }

    fn sign(&self, payload: &[u8], private_key: &[u8]) -> Result<ByteString> {
        let secret_key = bls_secret_key(private_key)?;
        Ok(secret_key.sign(payload, BLS_DST, &[]).to_bytes().to_vec())
    }

    /// Deserialization failures are errors, not a `false` verdict
    fn verify(&self, payload: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
        let public_key = BlsPublicKey::from_bytes(public_key)
            .map_err(|e| ProtocolError::InvalidBlsPublicKey(format!("{:?}", e)))?;
        let signature = BlsSignature::from_bytes(signature)
            .map_err(|e| ProtocolError::InvalidBlsSignature(format!("{:?}", e)))?;

        let result = signature.verify(true, payload, BLS_DST, &[], &public_key, true);
        Ok(result == BLST_ERROR::BLST_SUCCESS)
    }

    fn public_key_data(&self, private_key: &[u8]) -> Result<ByteString> {
        let secret_key = bls_secret_key(private_key)?;
        Ok(secret_key.sk_to_pk().to_bytes().to_vec())
    }
}

/// Whether `data` deserializes as a valid BLS12-381 public key
pub fn is_valid_bls_public_key(data: &[u8]) -> bool {
    BlsPublicKey::key_validate(data).is_ok()
}

/// Whether `data` parses as a secp256k1 public key
pub fn is_valid_ecdsa_public_key(data: &[u8]) -> bool {
    PublicKey::from_slice(data).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECDSA_PRIVATE_KEY: [u8; 32] = [0x11; 32];
    const OTHER_PRIVATE_KEY: [u8; 32] = [0x22; 32];

    fn bls_private_key(seed: u8) -> Vec<u8> {
        BlsSecretKey::key_gen(&[seed; 32], &[]).unwrap().to_bytes().to_vec()
    }

    #[test]
    fn test_ecdsa_sign_verify() {
        let scheme = scheme_for(KeyType::EcdsaSecp256k1).unwrap();
        let public_key = scheme.public_key_data(&ECDSA_PRIVATE_KEY).unwrap();
        let signature = scheme.sign(b"payload", &ECDSA_PRIVATE_KEY).unwrap();

        assert_eq!(public_key.len(), ECDSA_PUBLIC_KEY_SIZE);
        assert_eq!(signature.len(), ECDSA_SIGNATURE_SIZE);
        assert!(scheme.verify(b"payload", &signature, &public_key).unwrap());
    }

    #[test]
    fn test_ecdsa_wrong_key_is_false() {
        let scheme = scheme_for(KeyType::EcdsaSecp256k1).unwrap();
        let other_public_key = scheme.public_key_data(&OTHER_PRIVATE_KEY).unwrap();
        let signature = scheme.sign(b"payload", &ECDSA_PRIVATE_KEY).unwrap();

        assert!(!scheme.verify(b"payload", &signature, &other_public_key).unwrap());
        assert!(!scheme.verify(b"other payload", &signature, &scheme.public_key_data(&ECDSA_PRIVATE_KEY).unwrap()).unwrap());
    }

    #[test]
    fn test_ecdsa_garbage_is_false() {
        let scheme = scheme_for(KeyType::EcdsaSecp256k1).unwrap();
        assert!(!scheme.verify(b"payload", &[0u8; 10], &[0u8; 33]).unwrap());
    }

    #[test]
    fn test_hash160_sign_verify() {
        let scheme = scheme_for(KeyType::EcdsaHash160).unwrap();
        let public_key_hash = scheme.public_key_data(&ECDSA_PRIVATE_KEY).unwrap();
        let signature = scheme.sign(b"payload", &ECDSA_PRIVATE_KEY).unwrap();

        assert_eq!(public_key_hash.len(), HASH160_SIZE);
        assert!(scheme.verify(b"payload", &signature, &public_key_hash).unwrap());
    }

    #[test]
    fn test_hash160_never_errors() {
        let scheme = scheme_for(KeyType::EcdsaHash160).unwrap();
        let other_hash = scheme.public_key_data(&OTHER_PRIVATE_KEY).unwrap();
        let signature = scheme.sign(b"payload", &ECDSA_PRIVATE_KEY).unwrap();

        assert!(!scheme.verify(b"payload", &signature, &other_hash).unwrap());
        assert!(!scheme.verify(b"payload", &[0xff; 65], &other_hash).unwrap());
        assert!(!scheme.verify(b"payload", &[], &other_hash).unwrap());
    }

    #[test]
    fn test_bls_sign_verify() {
        let scheme = scheme_for(KeyType::Bls12_381).unwrap();
        let private_key = bls_private_key(1);
        let public_key = scheme.public_key_data(&private_key).unwrap();
        let signature = scheme.sign(b"payload", &private_key).unwrap();

        assert_eq!(public_key.len(), BLS_PUBLIC_KEY_SIZE);
        assert_eq!(signature.len(), BLS_SIGNATURE_SIZE);
        assert!(is_valid_bls_public_key(&public_key));
        assert!(scheme.verify(b"payload", &signature, &public_key).unwrap());

        let other_public_key = scheme.public_key_data(&bls_private_key(2)).unwrap();
        assert!(!scheme.verify(b"payload", &signature, &other_public_key).unwrap());
    }

    #[test]
    fn test_bls_deserialization_errors_propagate() {
        let scheme = scheme_for(KeyType::Bls12_381).unwrap();
        let private_key = bls_private_key(1);
        let public_key = scheme.public_key_data(&private_key).unwrap();

        assert!(matches!(
            scheme.verify(b"payload", &[0u8; 96], &public_key),
            Err(ProtocolError::InvalidBlsSignature(_))
        ));
        assert!(matches!(
            scheme.verify(b"payload", &[0u8; 96], &[1u8; 10]),
            Err(ProtocolError::InvalidBlsPublicKey(_))
        ));
    }

    #[test]
    fn test_script_hash_cannot_sign() {
        assert!(matches!(
            scheme_for(KeyType::Bip13ScriptHash),
            Err(ProtocolError::InvalidIdentityPublicKeyType(KeyType::Bip13ScriptHash))
        ));
    }

    #[test]
    fn test_invalid_private_key() {
        let scheme = scheme_for(KeyType::EcdsaSecp256k1).unwrap();
        assert!(matches!(scheme.sign(b"payload", &[0u8; 32]), Err(ProtocolError::InvalidPrivateKey(_))));
    }

    #[test]
    fn test_ecdsa_public_key_validity() {
        let scheme = scheme_for(KeyType::EcdsaSecp256k1).unwrap();
        assert!(is_valid_ecdsa_public_key(&scheme.public_key_data(&ECDSA_PRIVATE_KEY).unwrap()));
        assert!(!is_valid_ecdsa_public_key(&[0x05; 33]));
    }
}
