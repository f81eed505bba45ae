use std::{fmt::Display, sync::Arc};

use prettytable::{row, Table};
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{ledger::AccountType, money::Money};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub description: Arc<str>,
    pub reference: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One posting to an account, with the running balance after it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub journal_id: Uuid,
    pub sequence: u64,
    pub description: Arc<str>,
    /// Signed in the account's normal direction: positive grows the balance.
    pub amount: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBalanceItem {
    pub account_id: Arc<str>,
    pub account_type: AccountType,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialBalance {
    pub items: Vec<TrialBalanceItem>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn from_items(items: Vec<TrialBalanceItem>) -> Self {
        let mut total_debit = Decimal::ZERO;
        let mut total_credit = Decimal::ZERO;
        for item in &items {
            if item.account_type.is_debit_normal() {
                total_debit += item.balance;
            } else {
                total_credit += item.balance;
            }
        }
        Self {
            items,
            total_debit,
            total_credit,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }

    pub fn balance_of(&self, account_id: &str) -> Decimal {
        self.items
            .iter()
            .find(|i| i.account_id.as_ref() == account_id)
            .map(|i| i.balance)
            .unwrap_or(Decimal::ZERO)
    }
}

impl Display for TrialBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Account", "Debit", "Credit"]);
        table.add_empty_row();

        for item in &self.items {
            if item.account_type.is_debit_normal() {
                table.add_row(row![item.account_id, item.balance, ""]);
            } else {
                table.add_row(row![item.account_id, "", item.balance]);
            }
        }
        table.add_empty_row();
        table.add_row(row!["Total", self.total_debit, self.total_credit]);

        write!(f, "\n{}\n", table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorWallet {
    pub available_balance: Money,
    pub pending_balance: Money,
    pub total_earned: Money,
    pub total_withdrawn: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminStats {
    pub users: usize,
    pub vendors: usize,
    pub admins: usize,
    pub pending_vendors: usize,
    pub bookings: usize,
    pub listings: usize,
    pub platform_revenue: Decimal,
    pub escrow_balance: Decimal,
}
