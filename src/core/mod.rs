//! Core ledger functionality
//!
//! This module contains the fundamental components: transactions, blocks,
//! the persisted chain, the Merkle commitment and proof-of-work mining.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, IterationEnd};
pub use merkle::{MerkleNode, MerkleProof, MerkleTree, ProofElement};
pub use proof_of_work::{target_for, ProofOfWork, DIFFICULTY_BITS};
pub use transaction::{
    TXInput, TXOutput, Transaction, TransactionLookup, UnspentOutput, COINBASE_VOUT, SUBSIDY,
};
