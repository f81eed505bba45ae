//! Double-entry ledger primitives.
//!
//! Every balance in the marketplace is the sum of the postings to one ledger
//! account. Asset and expense accounts grow with debits; liability, equity
//! and income accounts grow with credits.

use std::{fmt::Display, str::FromStr, sync::Arc};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::write::{CreateJournalCommand, LedgerEntryCommand},
    storage::StorageError,
};

pub const CASH: &str = "platform:cash";
pub const ESCROW: &str = "platform:escrow";
pub const REVENUE: &str = "platform:revenue";
pub const PAYOUTS_PAYABLE: &str = "platform:payouts_payable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountType::Asset | AccountType::Expense)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "INCOME" => Ok(AccountType::Income),
            "EXPENSE" => Ok(AccountType::Expense),
            other => Err(format!("unknown account type: {other}")),
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Arc<str>,
    pub account_type: AccountType,
}

impl Account {
    pub fn new(id: impl Into<Arc<str>>, account_type: AccountType) -> Self {
        Self {
            id: id.into(),
            account_type,
        }
    }
}

/// Accounts that exist for the platform as a whole.
pub fn platform_accounts() -> Vec<Account> {
    vec![
        Account::new(CASH, AccountType::Asset),
        Account::new(ESCROW, AccountType::Liability),
        Account::new(REVENUE, AccountType::Income),
        Account::new(PAYOUTS_PAYABLE, AccountType::Liability),
    ]
}

pub fn user_wallet(user_id: Uuid) -> Account {
    Account::new(format!("user:{user_id}:wallet"), AccountType::Liability)
}

pub fn vendor_pending(vendor_id: Uuid) -> Account {
    Account::new(format!("vendor:{vendor_id}:pending"), AccountType::Liability)
}

pub fn vendor_available(vendor_id: Uuid) -> Account {
    Account::new(format!("vendor:{vendor_id}:available"), AccountType::Liability)
}

/// Checks that a journal has at least two postings, no zero postings, and
/// equal debit and credit totals.
pub fn validate_journal(command: &CreateJournalCommand) -> Result<(), StorageError> {
    if command.ledger_entries.len() < 2 {
        return Err(StorageError::Unbalanced(format!(
            "journal '{}' needs at least two postings",
            command.description
        )));
    }
    if let Some(entry) = command.ledger_entries.iter().find(|e| e.amount().is_zero()) {
        return Err(StorageError::Unbalanced(format!(
            "journal '{}' has a zero posting to {}",
            command.description,
            entry.account_id()
        )));
    }
    let debits = command.total_debits();
    let credits = command.total_credits();
    if debits != credits {
        return Err(StorageError::Unbalanced(format!(
            "journal '{}' debits {} != credits {}",
            command.description, debits, credits
        )));
    }
    Ok(())
}

/// Amount by which a posting changes the balance of an account of `account_type`.
pub fn signed_amount(account_type: AccountType, entry: &LedgerEntryCommand) -> Decimal {
    let raw = match entry {
        LedgerEntryCommand::Debit { amount, .. } => amount.amount(),
        LedgerEntryCommand::Credit { amount, .. } => -amount.amount(),
    };
    if account_type.is_debit_normal() {
        raw
    } else {
        -raw
    }
}
