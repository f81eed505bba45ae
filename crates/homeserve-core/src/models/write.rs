use std::sync::Arc;

use uuid::Uuid;

use crate::money::Money;

/// A balanced set of postings applied to the ledger as one journal.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateJournalCommand {
    pub description: Arc<str>,
    /// Business record the journal belongs to (booking, payout, wallet transaction).
    pub reference: Option<Uuid>,
    pub ledger_entries: Vec<LedgerEntryCommand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntryCommand {
    Debit { account_id: Arc<str>, amount: Money },
    Credit { account_id: Arc<str>, amount: Money },
}

impl LedgerEntryCommand {
    pub fn account_id(&self) -> &Arc<str> {
        match self {
            LedgerEntryCommand::Debit { account_id, .. } | LedgerEntryCommand::Credit { account_id, .. } => account_id,
        }
    }

    pub fn amount(&self) -> Money {
        match self {
            LedgerEntryCommand::Debit { amount, .. } | LedgerEntryCommand::Credit { amount, .. } => *amount,
        }
    }
}

impl CreateJournalCommand {
    pub fn new(description: impl Into<Arc<str>>, reference: Option<Uuid>) -> Self {
        Self {
            description: description.into(),
            reference,
            ledger_entries: Vec::new(),
        }
    }

    /// Adds a debit posting. Zero amounts are skipped.
    pub fn debit(mut self, account_id: impl Into<Arc<str>>, amount: Money) -> Self {
        if !amount.is_zero() {
            self.ledger_entries.push(LedgerEntryCommand::Debit {
                account_id: account_id.into(),
                amount,
            });
        }
        self
    }

    /// Adds a credit posting. Zero amounts are skipped.
    pub fn credit(mut self, account_id: impl Into<Arc<str>>, amount: Money) -> Self {
        if !amount.is_zero() {
            self.ledger_entries.push(LedgerEntryCommand::Credit {
                account_id: account_id.into(),
                amount,
            });
        }
        self
    }

    pub fn total_debits(&self) -> Money {
        self.ledger_entries
            .iter()
            .filter(|e| matches!(e, LedgerEntryCommand::Debit { .. }))
            .map(LedgerEntryCommand::amount)
            .sum()
    }

    pub fn total_credits(&self) -> Money {
        self.ledger_entries
            .iter()
            .filter(|e| matches!(e, LedgerEntryCommand::Credit { .. }))
            .map(LedgerEntryCommand::amount)
            .sum()
    }
}
