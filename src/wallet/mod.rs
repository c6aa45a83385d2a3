//! Wallet management
//!
//! Key pairs, Base58Check addresses and the wallet file.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use crate::utils::hash_pub_key;
pub use wallet::{
    address_to_pub_key_hash, convert_address, validate_address, Wallet, ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::Wallets;
