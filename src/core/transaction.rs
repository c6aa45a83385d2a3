// Transactions move value by consuming earlier outputs and creating new ones.
// An output is locked to a 20-byte public-key hash; spending it needs a
// signature from the matching key over a per-input digest of the spending
// transaction.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_secp256k1_sign, ecdsa_secp256k1_verify, hash_pub_key, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Coins minted by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index carried by the single input of a coinbase transaction.
pub const COINBASE_VOUT: i32 = -1;

/// Prior transactions keyed by lowercase hex id, as consumed by
/// [`Transaction::sign`] and [`Transaction::verify`].
pub type TransactionLookup = HashMap<String, Transaction>;

// A reference to output `vout` of transaction `txid`, plus the proof that the
// spender owns it. For a coinbase input `pub_key` holds the memo instead.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i32,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i32) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    fn coinbase(memo: &[u8]) -> TXInput {
        TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: memo.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i32 {
        self.vout
    }

    /// The referenced output index, or `None` for the coinbase sentinel.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn is_coinbase_marker(&self) -> bool {
        self.txid.is_empty() && self.vout == COINBASE_VOUT
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        let locking_hash = hash_pub_key(self.pub_key.as_slice());
        locking_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Pays `value` to a Base58Check address.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        TXOutput::new_locked(value, &pub_key_hash)
    }

    /// Pays `value` to an owner hash directly.
    pub fn new_locked(value: u64, pub_key_hash: &[u8]) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Output value must be positive".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// An unspent output together with its position in the creating
/// transaction. The index never changes when sibling outputs are spent.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutput {
    pub index: usize,
    pub output: TXOutput,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Mints [`SUBSIDY`] coins to `to`. A blank memo becomes
    /// `Reward to '<to>'` plus a random suffix, keeping reward ids unique.
    pub fn new_coinbase(to: &str, memo: &str) -> Result<Transaction> {
        let memo = if memo.trim().is_empty() {
            format!("Reward to '{to}' {}", Uuid::new_v4().simple())
        } else {
            memo.to_string()
        };

        let txout = TXOutput::new(SUBSIDY, to)?;
        let mut tx = Transaction {
            id: vec![],
            vin: vec![TXInput::coinbase(memo.as_bytes())],
            vout: vec![txout],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds an unsigned transfer of `amount` from `from` to `to`, spending
    /// outputs picked by the UTXO set and returning change to the sender.
    pub fn new_transfer(
        from: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        let to_pub_key_hash = address_to_pub_key_hash(to)?;
        let public_key_hash = hash_pub_key(from.get_public_key());

        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::InvalidTransaction(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                let vout = i32::try_from(out).map_err(|_| {
                    BlockchainError::InvalidTransaction(format!("Output index {out} too large"))
                })?;
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout,
                    signature: vec![],
                    pub_key: from.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new_locked(amount, &to_pub_key_hash)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new_locked(change, &public_key_hash)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase_marker()
    }

    // Inputs stripped of signature and key, outputs unchanged, id elided.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: vec![],
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// The digest signed for input `input_index`: the id of a trimmed copy in
    /// which only that input's key slot holds the spent output's owner hash.
    pub fn per_input_digest(&self, input_index: usize, prior_output: &TXOutput) -> Result<Vec<u8>> {
        let mut tx_copy = self.trimmed_copy();
        let input = tx_copy.vin.get_mut(input_index).ok_or_else(|| {
            BlockchainError::InvalidTransaction(format!("Input index {input_index} out of range"))
        })?;
        input.pub_key = prior_output.pub_key_hash.clone();
        tx_copy.hash()
    }

    // Resolves the output spent by each input through `prev_txs`.
    fn prior_outputs<'a>(&self, prev_txs: &'a TransactionLookup) -> Result<Vec<&'a TXOutput>> {
        let mut outputs = Vec::with_capacity(self.vin.len());
        for vin in &self.vin {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            let prev_tx = prev_txs
                .get(&txid_hex)
                .ok_or(BlockchainError::MissingPriorTransaction(txid_hex.clone()))?;
            let output = vin
                .output_index()
                .and_then(|idx| prev_tx.vout.get(idx))
                .ok_or_else(|| {
                    BlockchainError::MissingPriorTransaction(format!(
                        "{txid_hex} has no output {}",
                        vin.get_vout()
                    ))
                })?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Signs every input with `secret_key`. Coinbase transactions are left alone.
    /// The id is recomputed afterwards so it commits to the signatures.
    pub fn sign(&mut self, secret_key: &[u8], prev_txs: &TransactionLookup) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let prior_outputs = self.prior_outputs(prev_txs)?;
        let mut signatures = Vec::with_capacity(self.vin.len());
        for (idx, prior_output) in prior_outputs.into_iter().enumerate() {
            let digest = self.per_input_digest(idx, prior_output)?;
            signatures.push(ecdsa_secp256k1_sign(secret_key, &digest)?);
        }
        for (vin, signature) in self.vin.iter_mut().zip(signatures) {
            vin.signature = signature;
        }
        self.id = self.hash()?;
        Ok(())
    }

    /// `Ok(false)` when any input fails its ownership or signature check, or
    /// when value is not conserved. Missing prior transactions are errors.
    pub fn verify(&self, prev_txs: &TransactionLookup) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.vin.is_empty() || self.vout.is_empty() {
            log::warn!("Transaction must have at least one input and one output");
            return Ok(false);
        }

        let prior_outputs = self.prior_outputs(prev_txs)?;

        let mut input_value = 0u64;
        for (idx, (vin, prior_output)) in self.vin.iter().zip(prior_outputs).enumerate() {
            if !vin.uses_key(prior_output.get_pub_key_hash()) {
                log::warn!("Input {idx} is not signed by the owner of the output it spends");
                return Ok(false);
            }

            let digest = self.per_input_digest(idx, prior_output)?;
            if !ecdsa_secp256k1_verify(vin.get_pub_key(), vin.get_signature(), &digest) {
                log::warn!("Signature check failed for input {idx}");
                return Ok(false);
            }

            input_value = input_value
                .checked_add(prior_output.get_value())
                .ok_or(BlockchainError::ValueOverflow)?;
        }

        let output_value = self.get_output_value()?;
        if input_value != output_value {
            log::warn!("Transaction balance violation: inputs={input_value}, outputs={output_value}");
            return Ok(false);
        }
        Ok(true)
    }

    /// SHA256 of the canonical encoding with the id held empty.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(&self.id)
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_output_value(&self) -> Result<u64> {
        let mut total = 0u64;
        for vout in &self.vout {
            total = total
                .checked_add(vout.get_value())
                .ok_or(BlockchainError::ValueOverflow)?;
        }
        Ok(total)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A coinbase to `owner` plus a matching lookup, without touching a chain.
    fn funded(owner: &Wallet) -> (Transaction, TransactionLookup) {
        let coinbase = Transaction::new_coinbase(&owner.get_address(), "").unwrap();
        let mut lookup = TransactionLookup::new();
        lookup.insert(coinbase.get_id_hex(), coinbase.clone());
        (coinbase, lookup)
    }

    fn spend(prev: &Transaction, vouts: &[i32], from: &Wallet, to: &Wallet, amount: u64) -> Transaction {
        let vin = vouts
            .iter()
            .map(|vout| TXInput {
                txid: prev.get_id().to_vec(),
                vout: *vout,
                signature: vec![],
                pub_key: from.get_public_key().to_vec(),
            })
            .collect();
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout: vec![TXOutput::new(amount, &to.get_address()).unwrap()],
        };
        tx.id = tx.hash().unwrap();
        tx
    }

    #[test]
    fn test_coinbase_shape() {
        let wallet = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase(&wallet.get_address(), "genesis memo").unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin()[0].get_vout(), COINBASE_VOUT);
        assert_eq!(tx.get_vin()[0].get_pub_key(), b"genesis memo");
        assert_eq!(tx.get_vout().len(), 1);
        assert_eq!(tx.get_vout()[0].get_value(), SUBSIDY);
        assert_eq!(tx.get_id().len(), 32);
        assert!(tx.verify(&TransactionLookup::new()).unwrap());
    }

    #[test]
    fn test_blank_memo_coinbases_get_distinct_ids() {
        let address = Wallet::new().unwrap().get_address();
        let first = Transaction::new_coinbase(&address, "").unwrap();
        let second = Transaction::new_coinbase(&address, "").unwrap();
        assert_ne!(first.get_id(), second.get_id());
    }

    #[test]
    fn test_id_is_deterministic_and_sensitive() {
        let wallet = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase(&wallet.get_address(), "memo").unwrap();
        assert_eq!(tx.hash().unwrap(), tx.get_id());
        assert_eq!(tx.hash().unwrap(), tx.clone().hash().unwrap());

        let mut changed = tx.clone();
        changed.vout[0].value += 1;
        assert_ne!(changed.hash().unwrap(), tx.get_id());

        let mut changed = tx.clone();
        changed.vin[0].pub_key = b"other memo".to_vec();
        assert_ne!(changed.hash().unwrap(), tx.get_id());
    }

    #[test]
    fn test_sign_then_verify_multiple_inputs() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (coinbase, mut lookup) = funded(&alice);

        // a prior transaction with two outputs both owned by alice
        let mut split = Transaction {
            id: vec![],
            vin: vec![TXInput {
                txid: coinbase.get_id().to_vec(),
                vout: 0,
                signature: vec![],
                pub_key: alice.get_public_key().to_vec(),
            }],
            vout: vec![
                TXOutput::new(4, &alice.get_address()).unwrap(),
                TXOutput::new(6, &alice.get_address()).unwrap(),
            ],
        };
        split.id = split.hash().unwrap();
        split.sign(alice.get_secret_key(), &lookup).unwrap();
        assert!(split.verify(&lookup).unwrap());
        lookup.insert(split.get_id_hex(), split.clone());

        let mut tx = spend(&split, &[0, 1], &alice, &bob, 10);
        tx.sign(alice.get_secret_key(), &lookup).unwrap();
        assert!(tx.verify(&lookup).unwrap());
        assert_eq!(tx.hash().unwrap(), tx.get_id());
    }

    #[test]
    fn test_tampered_output_fails_verification() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (coinbase, lookup) = funded(&alice);

        let mut tx = spend(&coinbase, &[0], &alice, &bob, SUBSIDY);
        tx.sign(alice.get_secret_key(), &lookup).unwrap();

        let mut redirected = tx.clone();
        redirected.vout[0].pub_key_hash = hash_pub_key(alice.get_public_key());
        assert!(!redirected.verify(&lookup).unwrap());

        let mut inflated = tx.clone();
        inflated.vout[0].value = SUBSIDY - 1;
        assert!(!inflated.verify(&lookup).unwrap());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let alice = Wallet::new().unwrap();
        let mallory = Wallet::new().unwrap();
        let (coinbase, lookup) = funded(&alice);

        // mallory signs with their own key while claiming alice's output
        let mut tx = spend(&coinbase, &[0], &mallory, &mallory, SUBSIDY);
        tx.sign(mallory.get_secret_key(), &lookup).unwrap();
        assert!(!tx.verify(&lookup).unwrap());

        // right public key, wrong private key
        let mut forged = spend(&coinbase, &[0], &alice, &mallory, SUBSIDY);
        forged.sign(mallory.get_secret_key(), &lookup).unwrap();
        assert!(!forged.verify(&lookup).unwrap());
    }

    #[test]
    fn test_missing_prior_transaction() {
        let alice = Wallet::new().unwrap();
        let (coinbase, _) = funded(&alice);
        let mut tx = spend(&coinbase, &[0], &alice, &alice, SUBSIDY);

        let empty = TransactionLookup::new();
        assert!(matches!(
            tx.sign(alice.get_secret_key(), &empty),
            Err(BlockchainError::MissingPriorTransaction(_))
        ));
        assert!(matches!(
            tx.verify(&empty),
            Err(BlockchainError::MissingPriorTransaction(_))
        ));
    }

    #[test]
    fn test_out_of_range_output_is_missing() {
        let alice = Wallet::new().unwrap();
        let (coinbase, lookup) = funded(&alice);
        let mut tx = spend(&coinbase, &[3], &alice, &alice, SUBSIDY);
        assert!(matches!(
            tx.sign(alice.get_secret_key(), &lookup),
            Err(BlockchainError::MissingPriorTransaction(_))
        ));
    }

    #[test]
    fn test_per_input_digest_isolates_inputs() {
        let alice = Wallet::new().unwrap();
        let (coinbase, _) = funded(&alice);
        let tx = spend(&coinbase, &[0, 0], &alice, &alice, SUBSIDY);
        let prior = &coinbase.get_vout()[0];

        let first = tx.per_input_digest(0, prior).unwrap();
        let second = tx.per_input_digest(1, prior).unwrap();
        assert_ne!(first, second);
        // signatures on the original never leak into the digest
        let mut signed = tx.clone();
        signed.vin[1].signature = vec![1, 2, 3];
        assert_eq!(signed.per_input_digest(0, prior).unwrap(), first);
        assert!(tx.per_input_digest(2, prior).is_err());
    }

    #[test]
    fn test_sentinel_only_marks_coinbase_when_alone() {
        let alice = Wallet::new().unwrap();
        let mut tx = Transaction::new_coinbase(&alice.get_address(), "memo").unwrap();
        tx.vin.push(TXInput::new(&[1; 32], 0));
        assert!(!tx.is_coinbase());

        let not_coinbase = Transaction {
            id: vec![],
            vin: vec![TXInput::new(&[1; 32], COINBASE_VOUT)],
            vout: vec![],
        };
        assert!(!not_coinbase.is_coinbase());
        assert_eq!(not_coinbase.get_vin()[0].output_index(), None);
    }

    #[test]
    fn test_zero_value_output_rejected() {
        let alice = Wallet::new().unwrap();
        assert!(TXOutput::new(0, &alice.get_address()).is_err());
        assert!(TXOutput::new(1, "not-an-address").is_err());
    }

    #[test]
    fn test_output_value_overflow() {
        let tx = Transaction {
            id: vec![],
            vin: vec![],
            vout: vec![
                TXOutput::new_locked(u64::MAX, &[0; 20]).unwrap(),
                TXOutput::new_locked(1, &[0; 20]).unwrap(),
            ],
        };
        assert_eq!(tx.get_output_value(), Err(BlockchainError::ValueOverflow));
    }

    #[test]
    fn test_transaction_encoding_round_trip() {
        let alice = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase(&alice.get_address(), "").unwrap();
        let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(decoded, tx);
    }
}
