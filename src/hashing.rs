//! Hashing and canonical encoding primitives
//!
//! `H(x) = SHA256(SHA256(x))` is the protocol hash. Structured records are encoded with
//! bincode's fixed field order; protocol versions are prefixed as unsigned LEB128 varints.

use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use ripemd::Ripemd160;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};
use crate::types::{Hash, Hash160};

/// H(x) = SHA256(SHA256(x))
pub fn hash(data: &[u8]) -> Hash {
    let mut hasher = sha256d::Hash::engine();
    hasher.input(data);
    let result = sha256d::Hash::from_engine(hasher);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// RIPEMD160(SHA256(x))
pub fn ripemd160_sha256(data: &[u8]) -> Hash160 {
    let sha256_hash = Sha256::digest(data);
    let ripemd160_hash = Ripemd160::digest(sha256_hash);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&ripemd160_hash);
    hash
}

/// Encode a number as an unsigned LEB128 varint
pub fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut result = Vec::with_capacity(10);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            result.push(byte);
            return result;
        }
        result.push(byte | 0x80);
    }
}

/// Decode an unsigned LEB128 varint, returning the value and the number of bytes read
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate() {
        if i >= 10 {
            break;
        }
        let bits = (byte & 0x7f) as u64;
        if i == 9 && bits > 1 {
            return Err(ProtocolError::Serialization("varint overflows u64".to_string()));
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ProtocolError::Serialization("truncated varint".to_string()))
}

/// canonicalEncode: fixed-order binary encoding of a structured record
pub fn canonical_encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Decode one canonically encoded record from the front of `cursor`, advancing it
pub fn canonical_decode_from<T: DeserializeOwned>(cursor: &mut &[u8]) -> Result<T> {
    bincode::deserialize_from(cursor).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// `varint(protocol_version) || body`
pub fn prefix_with_protocol_version(protocol_version: u32, body: &[u8]) -> Vec<u8> {
    let mut buffer = encode_varint(protocol_version as u64);
    buffer.extend_from_slice(body);
    buffer
}

/// Split a buffer produced by [`prefix_with_protocol_version`]
pub fn split_protocol_version(buffer: &[u8]) -> Result<(u32, &[u8])> {
    let (version, read) = decode_varint(buffer)?;
    let version = u32::try_from(version)
        .map_err(|_| ProtocolError::Serialization(format!("protocol version {} overflows u32", version)))?;
    Ok((version, &buffer[read..]))
}
