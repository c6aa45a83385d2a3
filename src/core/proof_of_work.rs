use crate::core::Block;
use crate::utils::{merge_bytes, sha256_digest};
use data_encoding::HEXLOWER;
use log::{error, info};
use num_bigint::{BigInt, Sign};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Leading zero bits required of a block hash unless configured otherwise.
pub const DIFFICULTY_BITS: u32 = 20;

const MAX_NONCE: u64 = u64::MAX;

// How many nonces are tried between checks of the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
    pre_block_hash_bytes: Vec<u8>,
    transactions_hash: Vec<u8>,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> ProofOfWork<'a> {
        let pre_block_hash = block.get_pre_block_hash();
        let pre_block_hash_bytes = HEXLOWER
            .decode(pre_block_hash.as_bytes())
            .unwrap_or_else(|_| pre_block_hash.as_bytes().to_vec());
        ProofOfWork {
            block,
            target: target_for(block.get_difficulty_bits()),
            pre_block_hash_bytes,
            transactions_hash: block.hash_transactions(),
        }
    }

    pub fn get_target(&self) -> &BigInt {
        &self.target
    }

    // previous hash ++ transaction commitment ++ timestamp ++ difficulty ++ nonce
    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        merge_bytes(&[
            &self.pre_block_hash_bytes,
            &self.transactions_hash,
            &self.block.get_timestamp().to_be_bytes(),
            &self.block.get_difficulty_bits().to_be_bytes(),
            &nonce.to_be_bytes(),
        ])
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Searches nonces from zero upward and returns the first one whose
    /// header hash is below the target, with that hash in hex.
    pub fn run(&self) -> (u64, String) {
        // without a cancel flag the search always yields a nonce
        self.search(None).unwrap_or_default()
    }

    /// Like [`run`](Self::run) but gives up with `None` once `cancel` is set.
    pub fn run_cancellable(&self, cancel: &AtomicBool) -> Option<(u64, String)> {
        self.search(Some(cancel))
    }

    fn search(&self, cancel: Option<&AtomicBool>) -> Option<(u64, String)> {
        let started = Instant::now();
        let mut nonce = 0u64;
        info!(
            "Mining the block containing {} transactions",
            self.block.get_transactions().len()
        );
        let hash = loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0
                && cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                info!("Mining cancelled after {nonce} attempts");
                return None;
            }
            let data = self.prepare_data(nonce);
            let hash = sha256_digest(data.as_slice());
            if self.meets_target(&hash) {
                break hash;
            }
            if nonce == MAX_NONCE {
                error!("Nonce range exhausted without meeting the target");
                break hash;
            }
            nonce += 1;
        };
        let hash_hex = HEXLOWER.encode(hash.as_slice());
        info!(
            "Elapsed time: {:.3} seconds, correct hash: {hash_hex}",
            started.elapsed().as_secs_f64()
        );
        Some((nonce, hash_hex))
    }

    /// Recomputes the header hash with the block's stored nonce and checks it
    /// against the target and against the stored hash.
    pub fn validate(&self) -> bool {
        let data = self.prepare_data(self.block.get_nonce());
        let hash = sha256_digest(data.as_slice());
        self.meets_target(&hash) && HEXLOWER.encode(&hash) == self.block.get_hash()
    }
}

/// `1 << (256 - difficulty_bits)`
pub fn target_for(difficulty_bits: u32) -> BigInt {
    BigInt::from(1) << (256 - difficulty_bits.min(256)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn create_test_block(difficulty: u32) -> Block {
        let address = Wallet::new().unwrap().get_address();
        let coinbase_tx = Transaction::new_coinbase(&address, "pow test").unwrap();
        Block::new_with_difficulty(String::new(), &[coinbase_tx], difficulty).unwrap()
    }

    #[test]
    fn test_target_is_power_of_two() {
        assert_eq!(target_for(20), BigInt::from(1) << 236usize);
        assert!(target_for(2) < target_for(1));
    }

    #[test]
    fn test_validate_after_run() {
        let block = create_test_block(8);
        let pow = ProofOfWork::new_proof_of_work(&block);
        assert!(pow.validate());

        let (nonce, hash) = pow.run();
        assert_eq!(nonce, block.get_nonce());
        assert_eq!(hash, block.get_hash());
    }

    #[test]
    fn test_default_difficulty_hash_has_leading_zero_bits() {
        let address = Wallet::new().unwrap().get_address();
        let coinbase_tx = Transaction::new_coinbase(&address, "").unwrap();
        let block = Block::new(String::new(), &[coinbase_tx]).unwrap();

        assert_eq!(block.get_difficulty_bits(), DIFFICULTY_BITS);
        assert!(ProofOfWork::new_proof_of_work(&block).validate());
        // 20 leading zero bits means at least five leading zero hex digits
        assert!(block.get_hash().starts_with("00000"));
    }

    #[test]
    fn test_prepare_data_consistency() {
        let block = create_test_block(2);
        let pow = ProofOfWork::new_proof_of_work(&block);

        let data1 = pow.prepare_data(12345);
        let data2 = pow.prepare_data(12345);
        assert_eq!(data1, data2);
        assert_ne!(data1, pow.prepare_data(54321));

        // genesis: empty previous hash, 32-byte commitment, 8 + 4 + 8 bytes of numbers
        assert_eq!(data1.len(), 32 + 8 + 4 + 8);
    }

    #[test]
    fn test_cancelled_search_returns_none() {
        let block = create_test_block(1);
        let pow = ProofOfWork::new_proof_of_work(&block);
        let cancel = AtomicBool::new(true);
        assert_eq!(pow.run_cancellable(&cancel), None);
    }
}
