//! Reasons a transaction leaves the engine state untouched.

use thiserror::Error;

use crate::Amount;
use crate::model::{ClientId, TxId};

/// The dispute-family operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeOp {
    Dispute,
    Resolve,
    Chargeback,
}

/// Returned by [`Engine::process`](super::Engine::process) when a transaction is a no-op.
///
/// These are expected outcomes of a well-formed log, not failures: the engine
/// logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("account {0} is locked")]
    AccountLocked(ClientId),

    #[error("insufficient available funds for client {client}: available {available}, requested {requested}")]
    InsufficientFunds {
        client: ClientId,
        available: Amount,
        requested: Amount,
    },

    #[error("balance of client {0} would overflow")]
    Overflow(ClientId),

    #[error("{0:?}: transaction {1} not found")]
    TxNotFound(DisputeOp, TxId),

    #[error("{0:?}: transaction {1} is not disputed")]
    NotDisputed(DisputeOp, TxId),
}
