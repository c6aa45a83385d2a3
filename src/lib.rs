//! # powledger - a single-node proof-of-work ledger
//!
//! Transactions are assembled into hash-linked blocks, each block is sealed
//! with a proof-of-work, and spendable coins are tracked by an index of
//! unspent transaction outputs.
//!
//! ## Layout
//! - `core/`: transactions, blocks, the persisted chain, mining, Merkle trees
//! - `storage/`: the key/value store abstraction and the UTXO index
//! - `wallet/`: key pairs, addresses and the wallet file
//! - `config/`: settings from defaults, `ledger.toml` and the environment
//! - `utils/`: hashing, signatures, Base58 and the record codec
//! - `cli/`: command-line parsing for the `powledger` binary
//!
//! ## Typical flow
//! 1. Open a [`Database`] and call [`Blockchain::new_chain`] for the genesis block
//! 2. Build a transfer with [`Transaction::new_transfer`] and sign it through the chain
//! 3. [`Blockchain::mine_block`] appends it, [`UTXOSet::update`] applies it to the index

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, IterationEnd, MerkleProof, MerkleTree, ProofOfWork,
    TXInput, TXOutput, Transaction, TransactionLookup, UnspentOutput, DIFFICULTY_BITS, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use storage::{Database, KeyValueStore, MemoryStore, SledStore, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_secp256k1_sign, ecdsa_secp256k1_verify,
    new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
