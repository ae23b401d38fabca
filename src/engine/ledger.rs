use std::collections::HashMap;

use crate::model::{TxId, TxRecord};

/// Recorded deposits and withdrawals, keyed by transaction id.
#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<TxId, TxRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` under `tx`. A record already stored under the same id is replaced.
    pub fn record(&mut self, tx: TxId, record: TxRecord) {
        self.records.insert(tx, record);
    }

    pub fn get(&self, tx: TxId) -> Option<&TxRecord> {
        self.records.get(&tx)
    }

    pub fn get_mut(&mut self, tx: TxId) -> Option<&mut TxRecord> {
        self.records.get_mut(&tx)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
