// The chain of mined blocks, persisted in the blocks bucket of the store.
// Every block is keyed by its hex hash and the newest one is recorded under
// a fixed tip key. Walking `pre_block_hash` links from the tip reaches genesis.

use crate::config::Config;
use crate::core::{Block, TXOutput, Transaction, TransactionLookup, UnspentOutput};
use crate::error::{BlockchainError, Result};
use crate::storage::{select_outputs, Database, KeyValueStore};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<String>>,
    blocks: Arc<dyn KeyValueStore>,
    difficulty_bits: u32,
    // Held for the whole verify, mine and append sequence, shared by clones.
    mining: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Opens the chain recorded in `db`, or mines a genesis block paying the
    /// subsidy to `genesis_address` when the store holds no chain yet.
    pub fn new_chain(db: &Database, genesis_address: &str, config: &Config) -> Result<Blockchain> {
        let blocks = db.blocks();
        let difficulty_bits = config.get_difficulty_bits();

        let tip_hash = match read_tip(blocks.as_ref())? {
            Some(tip_hash) => {
                info!("Found existing blockchain with tip {tip_hash}");
                tip_hash
            }
            None => {
                info!("Creating genesis block for address: {genesis_address}");
                let coinbase_tx = Transaction::new_coinbase(genesis_address, "")?;
                let block = Block::new_genesis_with_difficulty(&coinbase_tx, difficulty_bits)?;
                persist_block(blocks.as_ref(), &block)?;
                block.get_hash().to_string()
            }
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            blocks,
            difficulty_bits,
            mining: Arc::new(Mutex::new(())),
        })
    }

    /// Opens an existing chain. Fails with `UninitializedChain` when no tip
    /// has been recorded.
    pub fn init_from_store(db: &Database, config: &Config) -> Result<Blockchain> {
        let blocks = db.blocks();
        let tip_hash = read_tip(blocks.as_ref())?.ok_or(BlockchainError::UninitializedChain)?;
        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            blocks,
            difficulty_bits: config.get_difficulty_bits(),
            mining: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip_hash - this should never happen")
            .clone()
    }

    pub fn get_difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    /// Verifies `transactions` against chain history, mines them into a block
    /// on top of the tip and appends it.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.mine_block_internal(transactions, None)
    }

    /// Like [`mine_block`](Self::mine_block) but gives up with
    /// `MiningCancelled` once `cancel` is raised. Nothing is appended then.
    pub fn mine_block_cancellable(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Block> {
        self.mine_block_internal(transactions, Some(cancel))
    }

    fn mine_block_internal(
        &self,
        transactions: &[Transaction],
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        let _mining = self
            .mining
            .lock()
            .map_err(|_| BlockchainError::StoreFailure("Mining lock poisoned".to_string()))?;

        for (i, transaction) in transactions.iter().enumerate() {
            match self.verify_transaction(transaction) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Invalid transaction at index {i}"
                    )))
                }
                Err(BlockchainError::MissingPriorTransaction(txid)) => {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Transaction at index {i} spends unknown transaction {txid}"
                    )))
                }
                Err(e) => return Err(e),
            }
        }

        self.check_for_double_spending(transactions)?;

        let tip_hash = self.get_tip_hash();
        info!(
            "Mining block with {} transactions (difficulty: {})",
            transactions.len(),
            self.difficulty_bits
        );
        let block = match cancel {
            Some(flag) => {
                Block::new_cancellable(tip_hash, transactions, self.difficulty_bits, flag)?
            }
            None => Block::new_with_difficulty(tip_hash, transactions, self.difficulty_bits)?,
        };
        self.add_block(&block)?;
        info!("Successfully mined block: {}", block.get_hash());

        Ok(block)
    }

    /// Appends a mined block on top of the current tip: the block record is
    /// written first, the tip pointer second. The tip stays write-locked from
    /// the comparison until it has been advanced.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let mut tip_hash = self
            .tip_hash
            .write()
            .expect("Failed to acquire write lock on tip_hash - this should never happen");

        if self.blocks.get(block.get_hash().as_bytes())?.is_some() {
            return Ok(());
        }
        if block.get_pre_block_hash() != tip_hash.as_str() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} does not extend the tip {}",
                block.get_hash(),
                tip_hash.as_str()
            )));
        }
        if !block.validate_pow() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} fails proof-of-work",
                block.get_hash()
            )));
        }

        persist_block(self.blocks.as_ref(), block)?;
        *tip_hash = block.get_hash().to_string();
        Ok(())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Option<Block>> {
        match self.blocks.get(block_hash.as_bytes())? {
            Some(block_bytes) => Ok(Some(Block::deserialize(&block_bytes)?)),
            None => Ok(None),
        }
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), Arc::clone(&self.blocks))
    }

    /// Walks the whole chain checking every block's proof-of-work and returns
    /// the number of blocks. A walk that stops short of genesis is `BrokenChain`.
    pub fn check_integrity(&self) -> Result<usize> {
        let mut count = 0;
        let mut iterator = self.iterator();
        for block in iterator.by_ref() {
            if !block.validate_pow() {
                return Err(BlockchainError::InvalidBlock(format!(
                    "Block {} fails proof-of-work",
                    block.get_hash()
                )));
            }
            count += 1;
        }
        iterator.finish()?;
        Ok(count)
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        let mut iterator = self.iterator();
        for block in iterator.by_ref() {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Ok(transaction.clone());
                }
            }
        }
        iterator.finish()?;
        Err(BlockchainError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    // ( K -> txid_hex, V -> Vec<UnspentOutput> )
    pub fn find_all_utxos(&self) -> Result<HashMap<String, Vec<UnspentOutput>>> {
        self.find_all_utxos_from(&self.get_tip_hash())
    }

    /// Same as [`find_all_utxos`](Self::find_all_utxos) for the chain ending
    /// at `tip_hash`.
    pub fn find_all_utxos_from(
        &self,
        tip_hash: &str,
    ) -> Result<HashMap<String, Vec<UnspentOutput>>> {
        let mut utxo: HashMap<String, Vec<UnspentOutput>> = HashMap::new();
        let mut spent_txos: HashMap<String, HashSet<usize>> = HashMap::new();

        let mut iterator = BlockchainIterator::new(tip_hash.to_string(), Arc::clone(&self.blocks));
        for block in iterator.by_ref() {
            // newest first, so spends are always seen before the outputs they consume
            for tx in block.get_transactions().iter().rev() {
                let txid_hex = tx.get_id_hex();
                let spent = spent_txos.get(txid_hex.as_str());
                let mut unspent = vec![];
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if spent.is_some_and(|outs| outs.contains(&idx)) {
                        continue;
                    }
                    unspent.push(UnspentOutput {
                        index: idx,
                        output: out.clone(),
                    });
                }
                if !unspent.is_empty() {
                    utxo.insert(txid_hex, unspent);
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    if let Some(idx) = txin.output_index() {
                        spent_txos
                            .entry(HEXLOWER.encode(txin.get_txid()))
                            .or_default()
                            .insert(idx);
                    }
                }
            }
        }
        iterator.finish()?;
        Ok(utxo)
    }

    /// Transactions that still hold at least one unspent output owned by
    /// `pub_key_hash`, newest first.
    pub fn find_unspent_transactions(&self, pub_key_hash: &[u8]) -> Result<Vec<Transaction>> {
        let owned: HashSet<String> = self
            .find_all_utxos()?
            .into_iter()
            .filter(|(_, outs)| outs.iter().any(|u| u.output.is_locked_with_key(pub_key_hash)))
            .map(|(txid_hex, _)| txid_hex)
            .collect();

        let mut transactions = vec![];
        let mut iterator = self.iterator();
        for block in iterator.by_ref() {
            for tx in block.get_transactions() {
                if owned.contains(&tx.get_id_hex()) {
                    transactions.push(tx.clone());
                }
            }
        }
        iterator.finish()?;
        Ok(transactions)
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        Ok(self
            .find_all_utxos()?
            .into_values()
            .flatten()
            .map(|unspent| unspent.output)
            .filter(|out| out.is_locked_with_key(pub_key_hash))
            .collect())
    }

    /// Chain-scanning counterpart of `UTXOSet::find_spendable_outputs`, with
    /// the same selection.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let ordered: BTreeMap<String, Vec<UnspentOutput>> =
            self.find_all_utxos()?.into_iter().collect();
        select_outputs(ordered, pub_key_hash, amount)
    }

    pub fn is_output_spent(&self, txid: &[u8], index: usize) -> Result<bool> {
        let mut iterator = self.iterator();
        for block in iterator.by_ref() {
            for transaction in block.get_transactions() {
                if transaction.is_coinbase() {
                    continue;
                }
                for input in transaction.get_vin() {
                    if input.get_txid() == txid && input.output_index() == Some(index) {
                        return Ok(true);
                    }
                }
            }
        }
        iterator.finish()?;
        Ok(false)
    }

    /// The transactions whose outputs `transaction` spends, keyed by hex id.
    pub fn prior_transactions(&self, transaction: &Transaction) -> Result<TransactionLookup> {
        let mut prev_txs = TransactionLookup::new();
        if transaction.is_coinbase() {
            return Ok(prev_txs);
        }
        for vin in transaction.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            if prev_txs.contains_key(&txid_hex) {
                continue;
            }
            let prev_tx = match self.find_transaction(vin.get_txid()) {
                Ok(tx) => tx,
                Err(BlockchainError::TransactionNotFound(id)) => {
                    return Err(BlockchainError::MissingPriorTransaction(id))
                }
                Err(e) => return Err(e),
            };
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, transaction: &mut Transaction, wallet: &Wallet) -> Result<()> {
        let prev_txs = self.prior_transactions(transaction)?;
        transaction.sign(wallet.get_secret_key(), &prev_txs)
    }

    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        if transaction.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prior_transactions(transaction)?;
        transaction.verify(&prev_txs)
    }

    // Rejects outputs spent twice inside `transactions` or already spent on
    // chain, and ids that repeat inside `transactions` or are already on chain.
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let (spent_on_chain, ids_on_chain) = self.chain_history()?;
        let mut spent_in_block: HashSet<(Vec<u8>, i32)> = HashSet::new();
        let mut ids_in_block: HashSet<&[u8]> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if ids_on_chain.contains(transaction.get_id()) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {tx_index} repeats id {} which is already on chain",
                    transaction.get_id_hex()
                )));
            }
            if !ids_in_block.insert(transaction.get_id()) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {tx_index} repeats id {} within this block",
                    transaction.get_id_hex()
                )));
            }
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let output_reference = (input.get_txid().to_vec(), input.get_vout());
                if spent_on_chain.contains(&output_reference) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Transaction {tx_index} spends output {}:{} which is already spent",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
                if !spent_in_block.insert(output_reference) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Double-spending detected in transaction {tx_index}: output {}:{} already spent in this block",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    // Every output reference spent on chain, and every transaction id.
    fn chain_history(&self) -> Result<(HashSet<(Vec<u8>, i32)>, HashSet<Vec<u8>>)> {
        let mut spent = HashSet::new();
        let mut ids = HashSet::new();
        let mut iterator = self.iterator();
        for block in iterator.by_ref() {
            for transaction in block.get_transactions() {
                ids.insert(transaction.get_id().to_vec());
                if transaction.is_coinbase() {
                    continue;
                }
                for input in transaction.get_vin() {
                    spent.insert((input.get_txid().to_vec(), input.get_vout()));
                }
            }
        }
        iterator.finish()?;
        Ok((spent, ids))
    }
}

fn read_tip(blocks: &dyn KeyValueStore) -> Result<Option<String>> {
    match blocks.get(TIP_BLOCK_HASH_KEY.as_bytes())? {
        Some(bytes) => {
            let tip_hash = String::from_utf8(bytes).map_err(|e| {
                BlockchainError::StoreFailure(format!("Invalid tip hash format: {e}"))
            })?;
            Ok(Some(tip_hash).filter(|hash| !hash.trim().is_empty()))
        }
        None => Ok(None),
    }
}

fn persist_block(blocks: &dyn KeyValueStore, block: &Block) -> Result<()> {
    let block_hash = block.get_hash();
    blocks.put(block_hash.as_bytes(), &block.serialize()?)?;
    blocks.put(TIP_BLOCK_HASH_KEY.as_bytes(), block_hash.as_bytes())?;
    Ok(())
}

/// Why a [`BlockchainIterator`] stopped producing blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationEnd {
    /// The genesis block was yielded.
    Genesis,
    /// A link pointed at a hash that is not stored.
    BrokenLink(String),
    /// A stored record could not be read or decoded.
    Corrupted(String),
}

/// Walks blocks from the tip back to genesis, yielding each one once.
pub struct BlockchainIterator {
    blocks: Arc<dyn KeyValueStore>,
    current_hash: String,
    end: Option<IterationEnd>,
}

impl BlockchainIterator {
    fn new(tip_hash: String, blocks: Arc<dyn KeyValueStore>) -> BlockchainIterator {
        BlockchainIterator {
            blocks,
            current_hash: tip_hash,
            end: None,
        }
    }

    /// `None` while blocks remain, then the reason iteration ended.
    pub fn end_state(&self) -> Option<&IterationEnd> {
        self.end.as_ref()
    }

    // Turns an early stop into an error once the caller has drained the walk.
    fn finish(&self) -> Result<()> {
        match &self.end {
            Some(IterationEnd::BrokenLink(hash)) => Err(BlockchainError::BrokenChain(hash.clone())),
            Some(IterationEnd::Corrupted(reason)) => {
                Err(BlockchainError::StoreFailure(reason.clone()))
            }
            Some(IterationEnd::Genesis) | None => Ok(()),
        }
    }

    fn stop(&mut self, end: IterationEnd) -> Option<Block> {
        warn!("Chain walk stopped early: {end:?}");
        self.end = Some(end);
        None
    }
}

impl Iterator for BlockchainIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        let data = match self.blocks.get(self.current_hash.as_bytes()) {
            Ok(Some(data)) => data,
            Ok(None) => return self.stop(IterationEnd::BrokenLink(self.current_hash.clone())),
            Err(e) => return self.stop(IterationEnd::Corrupted(e.to_string())),
        };
        let block = match Block::deserialize(data.as_slice()) {
            Ok(block) => block,
            Err(e) => return self.stop(IterationEnd::Corrupted(e.to_string())),
        };

        if block.is_genesis() {
            self.end = Some(IterationEnd::Genesis);
        } else {
            self.current_hash = block.get_pre_block_hash().to_string();
        }
        Some(block)
    }
}
