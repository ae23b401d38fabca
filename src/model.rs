//! Core domain types for the transaction engine.

use std::fmt;

use crate::Amount;

/// Client identifier.
pub type ClientId = u16;

/// Transaction identifier.
pub type TxId = u32;

/// A transaction representing the possible inputs of the engine.
///
/// For the dispute family, `tx` refers to a previously recorded deposit or
/// withdrawal rather than identifying the transaction itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Credit funds to a client's available balance.
    Deposit {
        client: ClientId,
        tx: TxId,
        amount: Amount,
    },
    /// Debit funds from a client's available balance.
    Withdrawal {
        client: ClientId,
        tx: TxId,
        amount: Amount,
    },
    /// Hold the funds of a recorded transaction; moves them from available to held.
    Dispute { client: ClientId, tx: TxId },
    /// Release disputed funds back to available.
    Resolve { client: ClientId, tx: TxId },
    /// Remove disputed funds from held and lock the account.
    Chargeback { client: ClientId, tx: TxId },
}

impl Transaction {
    pub fn client(&self) -> ClientId {
        match self {
            Transaction::Deposit { client, .. }
            | Transaction::Withdrawal { client, .. }
            | Transaction::Dispute { client, .. }
            | Transaction::Resolve { client, .. }
            | Transaction::Chargeback { client, .. } => *client,
        }
    }

    pub fn tx(&self) -> TxId {
        match self {
            Transaction::Deposit { tx, .. }
            | Transaction::Withdrawal { tx, .. }
            | Transaction::Dispute { tx, .. }
            | Transaction::Resolve { tx, .. }
            | Transaction::Chargeback { tx, .. } => *tx,
        }
    }
}

/// Kind of a transaction that gets recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Deposit => f.write_str("deposit"),
            RecordKind::Withdrawal => f.write_str("withdrawal"),
        }
    }
}

/// A recorded deposit or withdrawal, kept so later disputes can reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub kind: RecordKind,
    /// The client the funds moved for. Authoritative for disputes.
    pub client: ClientId,
    pub amount: Amount,
    /// Set by a dispute, cleared by a resolve. A chargeback leaves it set.
    pub disputed: bool,
}

impl TxRecord {
    /// Create a new, undisputed record.
    pub fn new(kind: RecordKind, client: ClientId, amount: Amount) -> Self {
        Self {
            kind,
            client,
            amount,
            disputed: false,
        }
    }
}
