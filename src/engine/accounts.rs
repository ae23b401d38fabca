use std::collections::BTreeMap;

use super::Rejection;
use crate::Amount;
use crate::model::ClientId;

/// A client account with its available and held balance.
/// An account can also be locked, after which it rejects every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    client: ClientId,
    pub available: Amount,
    pub held: Amount,
    pub locked: bool,
}

impl Account {
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            available: Amount::ZERO,
            held: Amount::ZERO,
            locked: false,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn total(&self) -> Amount {
        // `commit` keeps the sum representable
        self.available.saturating_add(self.held)
    }

    pub fn credit(&mut self, amount: Amount) -> Result<(), Rejection> {
        self.commit(self.available.checked_add(amount), Some(self.held))
    }

    pub fn debit(&mut self, amount: Amount) -> Result<(), Rejection> {
        self.commit(self.available.checked_sub(amount), Some(self.held))
    }

    /// Move `amount` from available to held.
    pub fn hold(&mut self, amount: Amount) -> Result<(), Rejection> {
        self.commit(
            self.available.checked_sub(amount),
            self.held.checked_add(amount),
        )
    }

    /// Move `amount` from held back to available.
    pub fn release(&mut self, amount: Amount) -> Result<(), Rejection> {
        self.commit(
            self.available.checked_add(amount),
            self.held.checked_sub(amount),
        )
    }

    /// Drop `amount` from held; total decreases.
    pub fn remove_held(&mut self, amount: Amount) -> Result<(), Rejection> {
        self.commit(Some(self.available), self.held.checked_sub(amount))
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Store the new balances only if both they and their total fit.
    fn commit(&mut self, available: Option<Amount>, held: Option<Amount>) -> Result<(), Rejection> {
        match (available, held) {
            (Some(available), Some(held)) if available.checked_add(held).is_some() => {
                self.available = available;
                self.held = held;
                Ok(())
            }
            _ => Err(Rejection::Overflow(self.client)),
        }
    }
}

/// Client accounts, ordered by client id.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: BTreeMap<ClientId, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the account of `client`, opening an empty one on first reference.
    pub fn get_or_create(&mut self, client: ClientId) -> &mut Account {
        self.accounts
            .entry(client)
            .or_insert_with(|| Account::new(client))
    }

    pub fn get(&self, client: ClientId) -> Option<&Account> {
        self.accounts.get(&client)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> + '_ {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
