use crate::core::{MerkleProof, MerkleTree, ProofOfWork, Transaction, DIFFICULTY_BITS};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

// Fields are private and there are no setters: a block is frozen once mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: u64,
    difficulty_bits: u32,
}

impl Block {
    /// Mines a block on top of `pre_block_hash` at the default difficulty.
    pub fn new(pre_block_hash: String, transactions: &[Transaction]) -> Result<Block> {
        Self::new_with_difficulty(pre_block_hash, transactions, DIFFICULTY_BITS)
    }

    pub fn new_with_difficulty(
        pre_block_hash: String,
        transactions: &[Transaction],
        difficulty_bits: u32,
    ) -> Result<Block> {
        Self::mine(pre_block_hash, transactions, difficulty_bits, None)
    }

    /// Fails with `MiningCancelled` if `cancel` is raised before a nonce is found.
    pub fn new_cancellable(
        pre_block_hash: String,
        transactions: &[Transaction],
        difficulty_bits: u32,
        cancel: &AtomicBool,
    ) -> Result<Block> {
        Self::mine(pre_block_hash, transactions, difficulty_bits, Some(cancel))
    }

    pub fn new_genesis(coinbase: &Transaction) -> Result<Block> {
        Self::new(String::new(), std::slice::from_ref(coinbase))
    }

    pub fn new_genesis_with_difficulty(coinbase: &Transaction, difficulty_bits: u32) -> Result<Block> {
        Self::new_with_difficulty(String::new(), std::slice::from_ref(coinbase), difficulty_bits)
    }

    fn mine(
        pre_block_hash: String,
        transactions: &[Transaction],
        difficulty_bits: u32,
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }
        if !(1..=255).contains(&difficulty_bits) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Difficulty bits must be within 1..=255, got {difficulty_bits}"
            )));
        }
        if !is_valid_link(&pre_block_hash) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Previous hash is not a 32-byte hex digest: {pre_block_hash}"
            )));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            nonce: 0,
            difficulty_bits,
        };

        info!("Starting proof-of-work with difficulty {difficulty_bits}");
        let pow = ProofOfWork::new_proof_of_work(&block);
        let (nonce, hash) = match cancel {
            Some(flag) => pow
                .run_cancellable(flag)
                .ok_or(BlockchainError::MiningCancelled)?,
            None => pow.run(),
        };
        block.nonce = nonce;
        block.hash = hash;
        info!("Proof-of-work completed for block: {}", block.hash);

        Ok(block)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &str {
        self.pre_block_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Flat commitment used in the proof-of-work header:
    /// SHA256 over every transaction id concatenated in block order.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let mut txhashs = vec![];
        for transaction in &self.transactions {
            txhashs.extend(transaction.get_id());
        }
        sha256_digest(txhashs.as_slice())
    }

    /// Merkle root over the transaction ids. Not part of the mined header.
    pub fn merkle_root(&self) -> Result<Vec<u8>> {
        Ok(MerkleTree::from_transactions(&self.transactions)?
            .root_hash()
            .to_vec())
    }

    pub fn merkle_proof(&self, transaction_index: usize) -> Result<MerkleProof> {
        MerkleTree::from_transactions(&self.transactions)?.proof(transaction_index)
    }

    pub fn validate_pow(&self) -> bool {
        ProofOfWork::new_proof_of_work(self).validate()
    }
}

fn is_valid_link(pre_block_hash: &str) -> bool {
    pre_block_hash.is_empty()
        || (pre_block_hash.len() == 64
            && pre_block_hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
}
