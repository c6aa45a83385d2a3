use ring::digest::{Context, SHA256};
use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, used to stamp blocks.
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    i64::try_from(duration).map_err(|_| BlockchainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn double_sha256_digest(data: &[u8]) -> Vec<u8> {
    sha256_digest(sha256_digest(data).as_slice())
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// RIPEMD160(SHA256(pub_key)): the 20-byte owner hash outputs are locked to.
pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let pub_key_sha256 = sha256_digest(pub_key);
    ripemd160_digest(pub_key_sha256.as_slice())
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

/// Generates a fresh secp256k1 secret key and returns its 32 raw bytes.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let context = Secp256k1::new();
    let (secret_key, _) = context.generate_keypair(&mut secp256k1::rand::thread_rng());
    Ok(secret_key.secret_bytes().to_vec())
}

fn parse_secret_key(secret_key: &[u8]) -> Result<SecretKey> {
    SecretKey::from_slice(secret_key)
        .map_err(|e| BlockchainError::Crypto(format!("Invalid secret key: {e}")))
}

/// Compressed (33-byte) public key of a secret key.
pub fn public_key_from_secret(secret_key: &[u8]) -> Result<Vec<u8>> {
    let context = Secp256k1::new();
    let secret_key = parse_secret_key(secret_key)?;
    Ok(PublicKey::from_secret_key(&context, &secret_key)
        .serialize()
        .to_vec())
}

// ECDSA signs a 32-byte digest, so every message is hashed with SHA-256 first.
fn message_digest(message: &[u8]) -> Result<Message> {
    Message::from_digest_slice(sha256_digest(message).as_slice())
        .map_err(|e| BlockchainError::Crypto(format!("Invalid message digest: {e}")))
}

/// Compact 64-byte ECDSA signature over SHA-256(`message`).
pub fn ecdsa_secp256k1_sign(secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let context = Secp256k1::new();
    let secret_key = parse_secret_key(secret_key)?;
    let signature = context.sign_ecdsa(&message_digest(message)?, &secret_key);
    Ok(signature.serialize_compact().to_vec())
}

pub fn ecdsa_secp256k1_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let Ok(public_key) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_compact(signature) else {
        return false;
    };
    let Ok(message) = message_digest(message) else {
        return false;
    };
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &public_key)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_encoding::HEXLOWER;

    #[test]
    fn test_sha256_known_vector() {
        let digest = sha256_digest(b"abc");
        assert_eq!(
            HEXLOWER.encode(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_double_sha256_is_sha256_twice() {
        let once = sha256_digest(b"ledger");
        assert_eq!(double_sha256_digest(b"ledger"), sha256_digest(&once));
    }

    #[test]
    fn test_hash_pub_key_is_twenty_bytes() {
        let secret_key = new_key_pair().unwrap();
        let public_key = public_key_from_secret(&secret_key).unwrap();
        assert_eq!(public_key.len(), 33);
        let pub_key_hash = hash_pub_key(&public_key);
        assert_eq!(pub_key_hash.len(), 20);
        assert_eq!(pub_key_hash, ripemd160_digest(&sha256_digest(&public_key)));
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = new_key_pair().unwrap();
        let public_key = public_key_from_secret(&secret_key).unwrap();
        let signature = ecdsa_secp256k1_sign(&secret_key, b"digest").unwrap();
        assert_eq!(signature.len(), 64);

        assert!(ecdsa_secp256k1_verify(&public_key, &signature, b"digest"));
        assert!(!ecdsa_secp256k1_verify(&public_key, &signature, b"other"));

        let other_key = public_key_from_secret(&new_key_pair().unwrap()).unwrap();
        assert!(!ecdsa_secp256k1_verify(&other_key, &signature, b"digest"));
        assert!(!ecdsa_secp256k1_verify(b"not a key", &signature, b"digest"));
        assert!(!ecdsa_secp256k1_verify(&public_key, &signature[..63], b"digest"));
    }

    #[test]
    fn test_invalid_secret_key_rejected() {
        // zero is outside the curve order
        assert!(matches!(
            public_key_from_secret(&[0; 32]),
            Err(BlockchainError::Crypto(_))
        ));
        assert!(ecdsa_secp256k1_sign(b"short", b"digest").is_err());
    }

    #[test]
    fn test_base58_round_trip_rejects_garbage() {
        let encoded = base58_encode(&[0, 1, 2, 3]);
        assert_eq!(base58_decode(&encoded).unwrap(), vec![0, 1, 2, 3]);
        assert!(base58_decode("0OIl").is_err());
    }
}
