use crate::error::{BlockchainError, Result};
use crate::utils::{
    base58_decode, base58_encode, double_sha256_digest, hash_pub_key, new_key_pair,
    public_key_from_secret,
};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
const PUB_KEY_HASH_LEN: usize = 20;

/// A secp256k1 key pair: the raw 32-byte secret and its compressed public key.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    secret_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let secret_key = new_key_pair()?;
        Wallet::from_secret_key(&secret_key)
    }

    pub fn from_secret_key(secret_key: &[u8]) -> Result<Wallet> {
        let public_key = public_key_from_secret(secret_key)?;
        Ok(Wallet {
            secret_key: secret_key.to_vec(),
            public_key,
        })
    }

    // version + pub_key_hash + checksum, Base58 encoded
    pub fn get_address(&self) -> String {
        let pub_key_hash = hash_pub_key(self.public_key.as_slice());
        convert_address(pub_key_hash.as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_secret_key(&self) -> &[u8] {
        self.secret_key.as_slice()
    }
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256_digest(payload)[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

/// Decodes a Base58Check address and returns the 20-byte owner hash it pays.
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    let invalid = || BlockchainError::InvalidAddress(address.to_string());
    let payload = base58_decode(address).map_err(|_| invalid())?;
    if payload.len() != 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return Err(invalid());
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    if body[0] != VERSION || checksum(body) != actual_checksum {
        return Err(invalid());
    }
    Ok(body[1..].to_vec())
}

pub fn convert_address(pub_hash_key: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![];
    payload.push(VERSION);
    payload.extend(pub_hash_key);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}
