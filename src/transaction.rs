//! Base-chain funding transactions referenced by asset lock proofs

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ProtocolError, Result};
use crate::hashing::hash;
use crate::types::*;

/// OutPoint: 32-byte transaction hash × 4-byte output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// 36 bytes: transaction hash in internal byte order, then the little-endian index
    pub fn to_bytes(&self) -> [u8; OUT_POINT_SIZE] {
        let mut bytes = [0u8; OUT_POINT_SIZE];
        bytes[..32].copy_from_slice(&self.hash);
        bytes[32..].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != OUT_POINT_SIZE {
            return Err(ProtocolError::Serialization(format!(
                "out point must be {} bytes, got {}",
                OUT_POINT_SIZE,
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&bytes[32..]);
        Ok(Self { hash, index: u32::from_le_bytes(index) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Satoshis,
    pub script_pubkey: ByteString,
}

impl TransactionOutput {
    /// Credit output script: `OP_RETURN <20-byte public key hash>`
    pub fn credit_output(public_key_hash: &Hash160, value: Satoshis) -> Self {
        let mut script_pubkey = vec![OP_RETURN, OP_PUSH_20];
        script_pubkey.extend_from_slice(public_key_hash);
        Self { value, script_pubkey }
    }

    pub fn is_data_out(&self) -> bool {
        self.script_pubkey.first() == Some(&OP_RETURN)
    }

    /// Data pushed after OP_RETURN, if the script is a single direct push
    pub fn data(&self) -> Option<&[u8]> {
        if !self.is_data_out() {
            return None;
        }
        let push_len = *self.script_pubkey.get(1)? as usize;
        if push_len == 0 || push_len > 75 || self.script_pubkey.len() != 2 + push_len {
            return None;
        }
        Some(&self.script_pubkey[2..])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Base-chain wire serialization
    pub fn serialize(&self) -> ByteString {
        let mut data = Vec::new();

        data.extend_from_slice(&self.version.to_le_bytes());

        data.extend_from_slice(&encode_compact_size(self.inputs.len() as u64));
        for input in &self.inputs {
            data.extend_from_slice(&input.prevout.hash);
            data.extend_from_slice(&input.prevout.index.to_le_bytes());
            data.extend_from_slice(&encode_compact_size(input.script_sig.len() as u64));
            data.extend_from_slice(&input.script_sig);
            data.extend_from_slice(&input.sequence.to_le_bytes());
        }

        data.extend_from_slice(&encode_compact_size(self.outputs.len() as u64));
        for output in &self.outputs {
            data.extend_from_slice(&output.value.to_le_bytes());
            data.extend_from_slice(&encode_compact_size(output.script_pubkey.len() as u64));
            data.extend_from_slice(&output.script_pubkey);
        }

        data.extend_from_slice(&self.lock_time.to_le_bytes());
        data
    }

    /// Transaction id in internal byte order
    pub fn txid(&self) -> Hash {
        hash(&self.serialize())
    }

    pub fn output(&self, index: u32) -> Option<&TransactionOutput> {
        self.outputs.get(index as usize)
    }
}

/// Encode a number as a base-chain compact size
fn encode_compact_size(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}
