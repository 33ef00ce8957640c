use std::collections::HashMap;

use bitcoin::blockdata::transaction::{OutPoint, Transaction};
use bitcoin::hash_types::Txid;

/// Index of which mempool transaction spends which outpoint.
///
/// A single worker thread owns all mutation; readers take a short-lived
/// shared view through the lock wrapping this structure.
pub struct MempoolIndex {
    spends: HashMap<OutPoint, Txid>,
    txs: HashMap<Txid, Transaction>,
}

impl MempoolIndex {
    pub fn new() -> MempoolIndex {
        MempoolIndex {
            spends: HashMap::new(),
            txs: HashMap::new(),
        }
    }

    /// Record every input of `tx`. The first recorded spender of an
    /// outpoint wins; a conflicting later arrival does not displace it.
    pub fn insert(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        for input in &tx.input {
            self.spends.entry(input.previous_output).or_insert(txid);
        }
        self.txs.insert(txid, tx.clone());
    }

    /// Forget a transaction that left the mempool without confirming.
    pub fn remove_tx(&mut self, txid: &Txid) {
        if let Some(tx) = self.txs.remove(txid) {
            for input in &tx.input {
                if self.spends.get(&input.previous_output) == Some(txid) {
                    self.spends.remove(&input.previous_output);
                }
            }
        }
    }

    /// Drop every entry for an outpoint that `tx` spends. Called when `tx`
    /// confirms: those outpoints are chain spends now, not mempool spends.
    pub fn remove_spends_of(&mut self, tx: &Transaction) {
        for input in &tx.input {
            self.spends.remove(&input.previous_output);
        }
        self.txs.remove(&tx.txid());
    }

    pub fn lookup(&self, outpoint: &OutPoint) -> Option<Txid> {
        self.spends.get(outpoint).copied()
    }

    pub fn contains_tx(&self, txid: &Txid) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn txids(&self) -> Vec<Txid> {
        self.txs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn clear(&mut self) {
        self.spends.clear();
        self.txs.clear();
    }
}

impl Default for MempoolIndex {
    fn default() -> MempoolIndex {
        MempoolIndex::new()
    }
}
