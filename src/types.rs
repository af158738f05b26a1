//! Core platform types shared by identities and state transitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// RIPEMD160(SHA256(x)) digest
pub type Hash160 = [u8; 20];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Platform credits
pub type Credits = u64;

/// Base-chain satoshis
pub type Satoshis = u64;

/// Identity public key id, unique within an identity
pub type KeyId = u32;

/// Identity revision
pub type Revision = u64;

/// Milliseconds since the unix epoch
pub type TimestampMillis = u64;

/// Fee epoch index
pub type EpochIndex = u16;

/// 32-byte identifier of an identity
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(pub Hash);

impl Identifier {
    pub fn new(bytes: Hash) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn to_vec(&self) -> ByteString {
        self.0.to_vec()
    }
}

impl From<Hash> for Identifier {
    fn from(bytes: Hash) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", hex::encode(self.0))
    }
}

/// Transaction fetched from the base chain together with its confirmation height
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTransaction {
    pub data: crate::transaction::Transaction,
    /// `None` while the transaction is unconfirmed
    pub height: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_displays_as_hex() {
        let id = Identifier::new([0xab; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
        assert_eq!(format!("{:?}", id), format!("Identifier({})", "ab".repeat(32)));
    }
}
