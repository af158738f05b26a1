//! Protocol constants for identity consensus

/// Latest protocol version understood by this crate
pub const PROTOCOL_VERSION: u32 = 1;

/// Credits granted for each satoshi locked by an asset lock transaction
pub const CREDITS_PER_SATOSHI: u64 = 1000;

/// Serialized out-point size: 32-byte transaction hash + 4-byte output index
pub const OUT_POINT_SIZE: usize = 36;

/// Maximum number of keys an identity may hold
pub const MAX_IDENTITY_PUBLIC_KEYS: usize = 32;

/// Maximum number of keys accepted by a single create transition
pub const MAX_PUBLIC_KEYS_IN_CREATE: usize = 10;

/// Allowed distance between `publicKeysDisabledAt` and the last block time: 5 minutes
pub const PUBLIC_KEYS_DISABLED_AT_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Value of the synthetic output returned for dry-run chain asset lock lookups
pub const DRY_RUN_CHAIN_OUTPUT_SATOSHIS: u64 = 1000;

/// Compressed secp256k1 public key length
pub const ECDSA_PUBLIC_KEY_SIZE: usize = 33;

/// Compressed BLS12-381 G1 public key length
pub const BLS_PUBLIC_KEY_SIZE: usize = 48;

/// RIPEMD160(SHA256(x)) length
pub const HASH160_SIZE: usize = 20;

/// Compact recoverable ECDSA signature length: header byte + r + s
pub const ECDSA_SIGNATURE_SIZE: usize = 65;

/// Compressed BLS12-381 G2 signature length
pub const BLS_SIGNATURE_SIZE: usize = 96;

/// Domain separation tag for BLS signatures (basic scheme, G2 signatures)
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

/// OP_RETURN opcode
pub const OP_RETURN: u8 = 0x6a;

/// Push of exactly 20 bytes
pub const OP_PUSH_20: u8 = 0x14;

/// Header offset for compressed-key compact signatures
pub const COMPACT_SIGNATURE_HEADER: u8 = 27 + 4;
