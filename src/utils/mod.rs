//! Utility functions and helpers
//!
//! Hashing, signatures, address encoding primitives, byte helpers and the
//! record codec used for everything the ledger persists.

pub mod bytes;
pub mod crypto;
pub mod serialization;

pub use bytes::merge_bytes;
pub use crypto::{
    base58_decode, base58_encode, current_timestamp, double_sha256_digest, ecdsa_secp256k1_sign,
    ecdsa_secp256k1_verify, hash_pub_key, new_key_pair, public_key_from_secret, ripemd160_digest,
    sha256_digest,
};

pub use serialization::{deserialize, serialize, FORMAT_VERSION};
