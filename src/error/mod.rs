//! Error handling for the ledger
//!
//! Every fallible operation in the crate returns [`Result`]. Failures are
//! surfaced to the immediate caller as typed outcomes; nothing is retried.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Spend amount exceeds the discoverable unspent value
    InsufficientFunds { required: u64, available: u64 },
    /// Signature check failed or a transaction is malformed
    InvalidTransaction(String),
    /// No tip recorded in the store
    UninitializedChain,
    /// Lookup miss while scanning the chain
    TransactionNotFound(String),
    /// A referenced prior transaction is absent from the lookup given to sign/verify
    MissingPriorTransaction(String),
    /// Underlying key/value operation failed
    StoreFailure(String),
    /// Merkle tree requested over zero leaves
    EmptyInput,
    /// An interior previous-block link points at a block that is not stored
    BrokenChain(String),
    /// The proof-of-work search was aborted by its caller
    MiningCancelled,
    /// Coin amounts overflowed while summing
    ValueOverflow,
    Crypto(String),
    Serialization(String),
    InvalidAddress(String),
    InvalidBlock(String),
    Wallet(String),
    Config(String),
    Io(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::UninitializedChain => {
                write!(f, "No existing blockchain found. Create one first.")
            }
            BlockchainError::TransactionNotFound(id) => write!(f, "Transaction not found: {id}"),
            BlockchainError::MissingPriorTransaction(id) => {
                write!(f, "Previous transaction is not correct: {id}")
            }
            BlockchainError::StoreFailure(msg) => write!(f, "Store failure: {msg}"),
            BlockchainError::EmptyInput => write!(f, "Cannot build a Merkle tree from zero leaves"),
            BlockchainError::BrokenChain(hash) => {
                write!(f, "Chain link broken: block {hash} is missing from the store")
            }
            BlockchainError::MiningCancelled => write!(f, "Mining was cancelled"),
            BlockchainError::ValueOverflow => write!(f, "Coin value overflow"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::StoreFailure(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = BlockchainError::InsufficientFunds {
            required: 12,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 12, available 10"
        );
    }

    #[test]
    fn test_sled_error_maps_to_store_failure() {
        let err: BlockchainError = sled::Error::Unsupported("nope".to_string()).into();
        assert!(matches!(err, BlockchainError::StoreFailure(_)));
    }
}
