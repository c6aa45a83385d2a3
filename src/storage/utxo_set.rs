use crate::core::{Block, Blockchain, TXOutput, UnspentOutput};
use crate::error::{BlockchainError, Result};
use crate::storage::{Database, KeyValueStore};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Present in the chainstate bucket only while `update` is running. Never a
// valid txid since ids are 32 bytes.
const DIRTY_MARKER_KEY: &[u8] = b"utxo_dirty";
// Hash of the last block the index reflects.
const APPLIED_TIP_KEY: &[u8] = b"utxo_applied_tip";

fn is_metadata_key(key: &[u8]) -> bool {
    key == DIRTY_MARKER_KEY || key == APPLIED_TIP_KEY
}

/// Index of unspent outputs keyed by raw transaction id, kept in the
/// chainstate bucket. Writers (`reindex`, `update`) are exclusive; queries share.
pub struct UTXOSet {
    blockchain: Blockchain,
    chainstate: Arc<dyn KeyValueStore>,
    lock: RwLock<()>,
}

impl UTXOSet {
    /// Attaches to the chainstate bucket of `db`, rebuilding the index first
    /// if a previous `update` never completed or the chain has moved past the
    /// last block the index saw.
    pub fn new(blockchain: Blockchain, db: &Database) -> Result<UTXOSet> {
        let utxo_set = UTXOSet {
            blockchain,
            chainstate: db.chainstate(),
            lock: RwLock::new(()),
        };
        if utxo_set.chainstate.get(DIRTY_MARKER_KEY)?.is_some() {
            warn!("UTXO index was left mid-update, rebuilding it from the chain");
            utxo_set.reindex()?;
        } else if !utxo_set.is_at_tip()? {
            warn!("UTXO index is behind the chain tip, rebuilding it from the chain");
            utxo_set.reindex()?;
        }
        Ok(utxo_set)
    }

    fn is_at_tip(&self) -> Result<bool> {
        let applied = self.chainstate.get(APPLIED_TIP_KEY)?;
        Ok(applied.as_deref() == Some(self.blockchain.get_tip_hash().as_bytes()))
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.lock
            .read()
            .map_err(|_| BlockchainError::StoreFailure("UTXO index lock poisoned".to_string()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        self.lock
            .write()
            .map_err(|_| BlockchainError::StoreFailure("UTXO index lock poisoned".to_string()))
    }

    // Every indexed entry as (hex txid, outputs), ordered by txid.
    fn entries(&self) -> Result<Vec<(String, Vec<UnspentOutput>)>> {
        let mut entries = vec![];
        for (k, v) in self.chainstate.scan()? {
            if is_metadata_key(k.as_slice()) {
                continue;
            }
            let outs: Vec<UnspentOutput> = deserialize(v.as_slice())?;
            entries.push((HEXLOWER.encode(k.as_slice()), outs));
        }
        Ok(entries)
    }

    /// Picks outputs owned by `pub_key_hash` until their total reaches
    /// `amount`. Returns the total and the chosen output indices per txid.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let _guard = self.read_lock()?;
        select_outputs(self.entries()?, pub_key_hash, amount)
    }

    pub fn find_utxos(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let _guard = self.read_lock()?;
        let mut utxos = vec![];
        for (_, outs) in self.entries()? {
            for unspent in outs {
                if unspent.output.is_locked_with_key(pub_key_hash) {
                    utxos.push(unspent.output)
                }
            }
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        let mut balance = 0u64;
        for utxo in self.find_utxos(pub_key_hash)? {
            balance = balance
                .checked_add(utxo.get_value())
                .ok_or(BlockchainError::ValueOverflow)?;
        }
        Ok(balance)
    }

    /// Number of transactions that still have unspent outputs.
    pub fn count_transactions(&self) -> Result<usize> {
        let _guard = self.read_lock()?;
        Ok(self.entries()?.len())
    }

    /// Rebuilds the index from a full scan of the chain.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.write_lock()?;
        let tip_hash = self.blockchain.get_tip_hash();
        let utxo_map = self.blockchain.find_all_utxos_from(&tip_hash)?;

        self.chainstate.clear()?;
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            self.chainstate.put(txid.as_slice(), &serialize(outs)?)?;
        }
        self.chainstate.put(APPLIED_TIP_KEY, tip_hash.as_bytes())?;
        self.chainstate.flush()?;
        info!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(())
    }

    /// Applies a newly appended block: drops the outputs its inputs spend and
    /// adds every output it creates.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.write_lock()?;
        self.chainstate.put(DIRTY_MARKER_KEY, &[1])?;

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    self.remove_spent(vin.get_txid(), vin.output_index())?;
                }
            }

            let new_outputs: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(index, out)| UnspentOutput {
                    index,
                    output: out.clone(),
                })
                .collect();
            if !new_outputs.is_empty() {
                self.chainstate.put(tx.get_id(), &serialize(&new_outputs)?)?;
            }
        }

        self.chainstate
            .put(APPLIED_TIP_KEY, block.get_hash().as_bytes())?;
        self.chainstate.delete(DIRTY_MARKER_KEY)?;
        Ok(())
    }

    fn remove_spent(&self, txid: &[u8], index: Option<usize>) -> Result<()> {
        let txid_hex = HEXLOWER.encode(txid);
        let Some(index) = index else {
            warn!("Input of {txid_hex} carries no output index, skipping");
            return Ok(());
        };
        let Some(outs_bytes) = self.chainstate.get(txid)? else {
            warn!("Output {txid_hex}:{index} is not in the UTXO index, skipping");
            return Ok(());
        };

        let mut outs: Vec<UnspentOutput> = deserialize(outs_bytes.as_slice())?;
        let before = outs.len();
        outs.retain(|unspent| unspent.index != index);
        if outs.len() == before {
            warn!("Output {txid_hex}:{index} is already spent, skipping");
            return Ok(());
        }

        if outs.is_empty() {
            self.chainstate.delete(txid)
        } else {
            self.chainstate.put(txid, &serialize(&outs)?)
        }
    }
}

/// Walks `entries` in order and takes outputs owned by `pub_key_hash` until
/// the running total reaches `amount`. Outputs of other owners are never taken.
pub fn select_outputs(
    entries: impl IntoIterator<Item = (String, Vec<UnspentOutput>)>,
    pub_key_hash: &[u8],
    amount: u64,
) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
    let mut unspent_outputs: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut accumulated = 0u64;

    'select: for (txid_hex, outs) in entries {
        for unspent in outs {
            if accumulated >= amount {
                break 'select;
            }
            if unspent.output.is_locked_with_key(pub_key_hash) {
                accumulated = accumulated
                    .checked_add(unspent.output.get_value())
                    .ok_or(BlockchainError::ValueOverflow)?;
                unspent_outputs
                    .entry(txid_hex.clone())
                    .or_default()
                    .push(unspent.index);
            }
        }
    }
    Ok((accumulated, unspent_outputs))
}
