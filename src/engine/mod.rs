//! Transaction processing engine.
//!
//! The engine applies transactions in arrival order and maintains client
//! account state. It supports deposits, withdrawals, disputes, resolutions,
//! and chargebacks, either one at a time or from an async stream.
//!
//! Semantically invalid transactions (insufficient funds, unknown or
//! undisputed references, locked accounts, balances that would overflow)
//! never abort processing: they leave the state untouched and come back as
//! a [`Rejection`].

use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::model::{ClientId, RecordKind, Transaction, TxId, TxRecord};

mod accounts;
pub use accounts::{Account, AccountStore};

mod ledger;
pub use ledger::Ledger;

mod error;
pub use error::{DisputeOp, Rejection};

/// The transaction processing engine.
///
/// Owns the ledger of disputable transactions and the client accounts.
#[derive(Debug, Default)]
pub struct Engine {
    accounts: AccountStore,
    ledger: Ledger,
}

/// Public API
impl Engine {
    pub fn new() -> Self {
        Self {
            accounts: AccountStore::new(),
            ledger: Ledger::new(),
        }
    }

    /// Run the engine with the given transaction stream
    pub async fn run(&mut self, mut stream: impl Stream<Item = Transaction> + Unpin) {
        while let Some(tx) = stream.next().await {
            // rejections are logged by `process` and must not stop the engine
            let _ = self.process(tx);
        }
        info!(
            accounts = self.accounts.len(),
            recorded = self.ledger.len(),
            "transaction stream exhausted"
        );
    }

    /// Return the state of all client accounts, ordered by client id.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> + '_ {
        self.accounts.iter()
    }

    /// Return the state of one client account
    pub fn account(&self, client: ClientId) -> Option<&Account> {
        self.accounts.get(client)
    }

    /// Recorded deposits and withdrawals.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply a single transaction on top of the current engine state.
    ///
    /// Deposits and withdrawals are recorded in the ledger before their effect
    /// is applied, whether or not that effect ends up being a no-op.
    pub fn process(&mut self, tx: Transaction) -> Result<(), Rejection> {
        match tx {
            Transaction::Deposit { client, tx, amount } => {
                self.ledger
                    .record(tx, TxRecord::new(RecordKind::Deposit, client, amount));
                let result = self.apply_deposit(client, amount);
                Self::log_result("deposit", client, tx, Some(amount), &result);
                result
            }
            Transaction::Withdrawal { client, tx, amount } => {
                self.ledger
                    .record(tx, TxRecord::new(RecordKind::Withdrawal, client, amount));
                let result = self.apply_withdrawal(client, amount);
                Self::log_result("withdrawal", client, tx, Some(amount), &result);
                result
            }
            Transaction::Dispute { client, tx } => {
                let result = self.apply_dispute(client, tx);
                Self::log_result("dispute", client, tx, None, &result);
                result
            }
            Transaction::Resolve { client, tx } => {
                let result = self.apply_resolve(client, tx);
                Self::log_result("resolve", client, tx, None, &result);
                result
            }
            Transaction::Chargeback { client, tx } => {
                let result = self.apply_chargeback(client, tx);
                Self::log_result("chargeback", client, tx, None, &result);
                result
            }
        }
    }
}

/// Private API
impl Engine {
    /// Small helper to log `process` results
    fn log_result(
        tx_type: &str,
        client: ClientId,
        tx: TxId,
        amount: Option<Amount>,
        result: &Result<(), Rejection>,
    ) {
        match (result, amount) {
            (Ok(()), Some(amt)) => {
                info!(client, tx, amount = %amt, "{tx_type} applied");
            }
            (Ok(()), None) => {
                info!(client, tx, "{tx_type} applied");
            }
            (Err(e), Some(amt)) => {
                info!(client, tx, amount = %amt, reason = %e, "{tx_type} skipped");
            }
            (Err(e), None) => {
                info!(client, tx, reason = %e, "{tx_type} skipped");
            }
        }
    }

    /// The dispute family trusts the client of the recorded transaction,
    /// not the one carried by the request.
    fn note_client_mismatch(op: DisputeOp, requested: ClientId, tx: TxId, record: &TxRecord) {
        if record.client != requested {
            info!(
                tx,
                requested,
                owner = record.client,
                "{op:?} names another client, using the recorded owner"
            );
        }
    }

    /// Apply a `Transaction::Deposit`:
    /// - Ensure account is unlocked
    /// - Increment account available balance by the deposit amount
    fn apply_deposit(&mut self, client: ClientId, amount: Amount) -> Result<(), Rejection> {
        let account = self.accounts.get_or_create(client);

        if account.locked {
            return Err(Rejection::AccountLocked(client));
        }

        account.credit(amount)
    }

    /// Apply a `Transaction::Withdrawal`:
    /// - Ensure account is unlocked and has enough available balance
    /// - Decrement account available balance by the withdrawal amount
    fn apply_withdrawal(&mut self, client: ClientId, amount: Amount) -> Result<(), Rejection> {
        let account = self.accounts.get_or_create(client);

        if account.locked {
            return Err(Rejection::AccountLocked(client));
        }

        if account.available < amount {
            return Err(Rejection::InsufficientFunds {
                client,
                available: account.available,
                requested: amount,
            });
        }

        account.debit(amount)
    }

    /// Apply a `Transaction::Dispute`:
    /// - Find the referenced transaction
    /// - Ensure the owner's account is unlocked
    /// - Move funds from available to held and flag the transaction
    ///
    /// Disputing an already disputed transaction holds its funds a second time.
    /// Disputes may also result in a negative available balance if the funds
    /// were already withdrawn.
    fn apply_dispute(&mut self, client: ClientId, tx: TxId) -> Result<(), Rejection> {
        use DisputeOp::Dispute;

        let record = self
            .ledger
            .get_mut(tx)
            .ok_or(Rejection::TxNotFound(Dispute, tx))?;
        Self::note_client_mismatch(Dispute, client, tx, record);

        let account = self.accounts.get_or_create(record.client);
        if account.locked {
            return Err(Rejection::AccountLocked(record.client));
        }

        if record.disputed {
            warn!(
                client = record.client,
                tx,
                amount = %record.amount,
                "transaction is already disputed, holding its funds again"
            );
        }

        account.hold(record.amount)?;
        record.disputed = true;

        if account.available.is_negative() {
            warn!(
                client = record.client,
                tx,
                available = %account.available,
                "dispute left a negative available balance"
            );
        }

        Ok(())
    }

    /// Apply a `Transaction::Resolve`:
    /// - Find the referenced transaction and check it is disputed
    /// - Ensure the owner's account is unlocked
    /// - Move funds from held back to available and clear the flag
    fn apply_resolve(&mut self, client: ClientId, tx: TxId) -> Result<(), Rejection> {
        use DisputeOp::Resolve;

        let record = self
            .ledger
            .get_mut(tx)
            .ok_or(Rejection::TxNotFound(Resolve, tx))?;
        if !record.disputed {
            return Err(Rejection::NotDisputed(Resolve, tx));
        }
        Self::note_client_mismatch(Resolve, client, tx, record);

        let account = self.accounts.get_or_create(record.client);
        if account.locked {
            return Err(Rejection::AccountLocked(record.client));
        }

        account.release(record.amount)?;
        record.disputed = false;

        Ok(())
    }

    /// Apply a `Transaction::Chargeback`:
    /// - Find the referenced transaction and check it is disputed
    /// - Ensure the owner's account is unlocked
    /// - Remove held funds (total decreases) and lock the account
    ///
    /// The transaction stays flagged as disputed; with the account locked
    /// nothing can touch it again.
    fn apply_chargeback(&mut self, client: ClientId, tx: TxId) -> Result<(), Rejection> {
        use DisputeOp::Chargeback;

        let record = self
            .ledger
            .get(tx)
            .ok_or(Rejection::TxNotFound(Chargeback, tx))?;
        if !record.disputed {
            return Err(Rejection::NotDisputed(Chargeback, tx));
        }
        Self::note_client_mismatch(Chargeback, client, tx, record);

        let account = self.accounts.get_or_create(record.client);
        if account.locked {
            return Err(Rejection::AccountLocked(record.client));
        }

        account.remove_held(record.amount)?;
        account.lock();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // test utils

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn amount_neg(s: &str) -> Amount {
        Amount::ZERO.checked_sub(amount(s)).unwrap()
    }

    fn deposit(client: ClientId, tx: TxId, value: &str) -> Transaction {
        Transaction::Deposit {
            client,
            tx,
            amount: amount(value),
        }
    }

    fn withdrawal(client: ClientId, tx: TxId, value: &str) -> Transaction {
        Transaction::Withdrawal {
            client,
            tx,
            amount: amount(value),
        }
    }

    fn dispute(client: ClientId, tx: TxId) -> Transaction {
        Transaction::Dispute { client, tx }
    }

    fn resolve(client: ClientId, tx: TxId) -> Transaction {
        Transaction::Resolve { client, tx }
    }

    fn chargeback(client: ClientId, tx: TxId) -> Transaction {
        Transaction::Chargeback { client, tx }
    }

    /// (available, held, total, locked)
    fn snapshot(engine: &Engine, client: ClientId) -> (Amount, Amount, Amount, bool) {
        let account = engine.account(client).unwrap();
        (
            account.available,
            account.held,
            account.total(),
            account.locked,
        )
    }

    fn assert_total_invariant(engine: &Engine) {
        for account in engine.accounts() {
            assert_eq!(account.available.checked_add(account.held), Some(account.total()));
        }
    }

    #[test]
    fn new_engine() {
        let engine = Engine::new();
        assert_eq!(engine.accounts().count(), 0);
        assert!(engine.ledger().is_empty());
    }

    // Scenarios

    #[test]
    fn deposit_withdraw_dispute_chargeback_sequence() {
        let mut engine = Engine::new();

        engine.process(deposit(1, 1, "1.0")).unwrap();
        assert_eq!(
            snapshot(&engine, 1),
            (amount("1.0"), Amount::ZERO, amount("1.0"), false)
        );

        engine.process(withdrawal(1, 2, "0.5")).unwrap();
        assert_eq!(
            snapshot(&engine, 1),
            (amount("0.5"), Amount::ZERO, amount("0.5"), false)
        );

        engine.process(dispute(1, 1)).unwrap();
        assert_eq!(
            snapshot(&engine, 1),
            (amount_neg("0.5"), amount("1.0"), amount("0.5"), false)
        );

        engine.process(chargeback(1, 1)).unwrap();
        let negative_half = amount_neg("0.5");
        assert_eq!(
            snapshot(&engine, 1),
            (negative_half, Amount::ZERO, negative_half, true)
        );

        let result = engine.process(deposit(1, 3, "5.0"));
        assert_eq!(result, Err(Rejection::AccountLocked(1)));
        assert_eq!(
            snapshot(&engine, 1),
            (negative_half, Amount::ZERO, negative_half, true)
        );

        assert_total_invariant(&engine);
    }

    #[test]
    fn dispute_of_unknown_tx_creates_no_account() {
        let mut engine = Engine::new();

        let result = engine.process(dispute(1, 99));

        assert_eq!(result, Err(Rejection::TxNotFound(DisputeOp::Dispute, 99)));
        assert_eq!(engine.accounts().count(), 0);
    }

    #[test]
    fn withdrawal_on_fresh_account_is_rejected() {
        let mut engine = Engine::new();

        let result = engine.process(withdrawal(2, 4, "10.0"));

        assert!(matches!(
            result,
            Err(Rejection::InsufficientFunds { client: 2, .. })
        ));
        assert_eq!(
            snapshot(&engine, 2),
            (Amount::ZERO, Amount::ZERO, Amount::ZERO, false)
        );
    }

    // Deposit

    #[test]
    fn deposit_accumulates_balance() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(deposit(1, 2, "50.1234")).unwrap();

        assert_eq!(engine.account(1).unwrap().available, amount("150.1234"));
    }

    // Withdrawal

    #[test]
    fn withdrawal_exact_amount_succeeds() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(withdrawal(1, 2, "100")).unwrap();

        assert_eq!(engine.account(1).unwrap().available, Amount::ZERO);
    }

    #[test]
    fn withdrawal_insufficient_funds_is_recorded_anyway() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();

        let result = engine.process(withdrawal(1, 2, "100.0001"));
        assert_eq!(
            result,
            Err(Rejection::InsufficientFunds {
                client: 1,
                available: amount("100"),
                requested: amount("100.0001"),
            })
        );

        assert_eq!(engine.account(1).unwrap().available, amount("100"));
        assert_eq!(
            engine.ledger().get(2).map(|r| r.kind),
            Some(RecordKind::Withdrawal)
        );
    }

    #[test]
    fn multiple_clients_are_independent() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(deposit(2, 2, "200")).unwrap();
        engine.process(withdrawal(1, 3, "30")).unwrap();

        assert_eq!(engine.account(1).unwrap().available, amount("70"));
        assert_eq!(engine.account(2).unwrap().available, amount("200"));
    }

    #[test]
    fn accounts_iterator_is_ordered() {
        let mut engine = Engine::new();
        engine.process(deposit(3, 1, "1")).unwrap();
        engine.process(deposit(1, 2, "1")).unwrap();
        engine.process(deposit(2, 3, "1")).unwrap();

        let clients: Vec<_> = engine.accounts().map(Account::client).collect();
        assert_eq!(clients, vec![1, 2, 3]);
    }

    // Dispute

    #[test]
    fn dispute_deposit_moves_funds_to_held() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(dispute(1, 1)).unwrap();

        assert_eq!(
            snapshot(&engine, 1),
            (Amount::ZERO, amount("100"), amount("100"), false)
        );
        assert!(engine.ledger().get(1).unwrap().disputed);
    }

    #[test]
    fn dispute_withdrawal_holds_its_amount() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(withdrawal(1, 2, "40")).unwrap();
        engine.process(dispute(1, 2)).unwrap();

        assert_eq!(
            snapshot(&engine, 1),
            (amount("20"), amount("40"), amount("60"), false)
        );
    }

    #[test]
    fn dispute_uses_recorded_client() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(deposit(2, 2, "50")).unwrap();

        // tx 1 belongs to client 1, the dispute's own client is ignored
        engine.process(dispute(2, 1)).unwrap();

        assert_eq!(engine.account(1).unwrap().held, amount("100"));
        assert_eq!(engine.account(2).unwrap().held, Amount::ZERO);
        assert_eq!(engine.account(2).unwrap().available, amount("50"));
    }

    #[test]
    fn dispute_with_unknown_client_does_not_open_it() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(dispute(9, 1)).unwrap();

        assert!(engine.account(9).is_none());
    }

    #[test]
    fn redispute_holds_funds_again() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(dispute(1, 1)).unwrap();
        engine.process(dispute(1, 1)).unwrap();

        assert_eq!(
            snapshot(&engine, 1),
            (amount_neg("100"), amount("200"), amount("100"), false)
        );
    }

    #[test]
    fn dispute_after_withdrawal_causes_negative_balance() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(withdrawal(1, 2, "60")).unwrap();
        engine.process(dispute(1, 1)).unwrap();

        let account = engine.account(1).unwrap();
        assert_eq!(account.available, Amount::from_scaled(-600_000));
        assert_eq!(account.held, amount("100"));
        assert_eq!(account.total(), amount("40"));
    }

    // Resolve

    #[test]
    fn resolve_restores_pre_dispute_split() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(deposit(1, 2, "12.5")).unwrap();
        let before = snapshot(&engine, 1);

        engine.process(dispute(1, 2)).unwrap();
        engine.process(resolve(1, 2)).unwrap();

        assert_eq!(snapshot(&engine, 1), before);
        assert!(!engine.ledger().get(2).unwrap().disputed);
    }

    #[test]
    fn resolve_not_disputed_is_rejected() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();

        let result = engine.process(resolve(1, 1));
        assert_eq!(result, Err(Rejection::NotDisputed(DisputeOp::Resolve, 1)));
        assert_eq!(engine.account(1).unwrap().available, amount("100"));
    }

    #[test]
    fn resolve_unknown_tx_is_rejected() {
        let mut engine = Engine::new();

        let result = engine.process(resolve(1, 1));
        assert_eq!(result, Err(Rejection::TxNotFound(DisputeOp::Resolve, 1)));
        assert!(engine.account(1).is_none());
    }

    #[test]
    fn resolved_tx_can_be_disputed_again() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(dispute(1, 1)).unwrap();
        engine.process(resolve(1, 1)).unwrap();
        engine.process(dispute(1, 1)).unwrap();

        let account = engine.account(1).unwrap();
        assert_eq!(account.available, Amount::ZERO);
        assert_eq!(account.held, amount("100"));
    }

    // Chargeback

    #[test]
    fn chargeback_removes_held_and_locks() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(dispute(1, 1)).unwrap();
        engine.process(chargeback(1, 1)).unwrap();

        assert_eq!(
            snapshot(&engine, 1),
            (Amount::ZERO, Amount::ZERO, Amount::ZERO, true)
        );
        assert!(engine.ledger().get(1).unwrap().disputed);
    }

    #[test]
    fn chargeback_not_disputed_is_rejected() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();

        let result = engine.process(chargeback(1, 1));
        assert_eq!(
            result,
            Err(Rejection::NotDisputed(DisputeOp::Chargeback, 1))
        );
        assert!(!engine.account(1).unwrap().locked);
    }

    #[test]
    fn locked_account_rejects_everything() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(deposit(1, 2, "50")).unwrap();
        engine.process(dispute(1, 1)).unwrap();
        engine.process(dispute(1, 2)).unwrap();
        engine.process(chargeback(1, 1)).unwrap();
        let frozen = snapshot(&engine, 1);

        for tx in [
            deposit(1, 3, "10"),
            withdrawal(1, 4, "1"),
            dispute(1, 2),
            resolve(1, 2),
            chargeback(1, 2),
        ] {
            assert_eq!(engine.process(tx), Err(Rejection::AccountLocked(1)));
            assert_eq!(snapshot(&engine, 1), frozen);
        }

        // records are still written for a locked account
        assert!(engine.ledger().get(3).is_some());
        assert!(engine.ledger().get(4).is_some());
    }

    // Duplicate transaction ids

    #[test]
    fn duplicate_tx_id_replaces_record() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "100")).unwrap();
        engine.process(deposit(2, 1, "5")).unwrap();

        // both deposits apply, the later one is what a dispute sees
        engine.process(dispute(1, 1)).unwrap();

        assert_eq!(engine.account(1).unwrap().available, amount("100"));
        assert_eq!(engine.account(2).unwrap().held, amount("5"));
        assert_eq!(engine.ledger().len(), 1);
    }

    // Amount limits

    #[test]
    fn deposit_overflow_is_rejected_without_state_change() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "900000000000000")).unwrap();

        let result = engine.process(deposit(1, 2, "900000000000000"));

        assert_eq!(result, Err(Rejection::Overflow(1)));
        assert_eq!(
            snapshot(&engine, 1),
            (
                amount("900000000000000"),
                Amount::ZERO,
                amount("900000000000000"),
                false
            )
        );

        // the largest representable balance is still reachable
        engine.process(deposit(1, 3, "22337203685477.5807")).unwrap();
        assert_eq!(
            engine.account(1).unwrap().available,
            Amount::from_scaled(i64::MAX)
        );
        assert_eq!(
            engine.process(deposit(1, 4, "0.0001")),
            Err(Rejection::Overflow(1))
        );
        assert_eq!(
            engine.account(1).unwrap().available,
            Amount::from_scaled(i64::MAX)
        );
    }

    #[test]
    fn deposit_that_would_overflow_total_is_rejected() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "900000000000000")).unwrap();
        engine.process(dispute(1, 1)).unwrap();

        // available alone fits, available + held does not
        let result = engine.process(deposit(1, 2, "900000000000000"));

        assert_eq!(result, Err(Rejection::Overflow(1)));
        assert_eq!(
            snapshot(&engine, 1),
            (
                Amount::ZERO,
                amount("900000000000000"),
                amount("900000000000000"),
                false
            )
        );
        assert_total_invariant(&engine);
    }

    #[test]
    fn redispute_overflow_keeps_state() {
        let mut engine = Engine::new();
        engine.process(deposit(1, 1, "900000000000000")).unwrap();
        engine.process(dispute(1, 1)).unwrap();

        let result = engine.process(dispute(1, 1));

        assert_eq!(result, Err(Rejection::Overflow(1)));
        assert_eq!(
            snapshot(&engine, 1),
            (
                Amount::ZERO,
                amount("900000000000000"),
                amount("900000000000000"),
                false
            )
        );
        assert!(engine.ledger().get(1).unwrap().disputed);

        // the first dispute can still be resolved normally
        engine.process(resolve(1, 1)).unwrap();
        assert_eq!(
            engine.account(1).unwrap().available,
            amount("900000000000000")
        );
    }

    //  Async run()

    #[tokio::test]
    async fn run_processes_all_transactions() {
        let mut engine = Engine::new();
        let transactions = vec![
            deposit(1, 1, "100"),
            deposit(2, 2, "200"),
            withdrawal(1, 3, "25"),
        ];

        engine.run(tokio_stream::iter(transactions)).await;

        assert_eq!(engine.account(1).unwrap().available, amount("75"));
        assert_eq!(engine.account(2).unwrap().available, amount("200"));
    }

    #[tokio::test]
    async fn run_skips_rejected_transactions_and_continues() {
        let mut engine = Engine::new();
        let transactions = vec![
            deposit(1, 1, "100"),
            withdrawal(1, 2, "200"), // insufficient funds
            dispute(1, 42),          // unknown tx
            deposit(1, 3, "50"),
        ];

        engine.run(tokio_stream::iter(transactions)).await;

        assert_eq!(engine.account(1).unwrap().available, amount("150"));
        assert_total_invariant(&engine);
    }
}
