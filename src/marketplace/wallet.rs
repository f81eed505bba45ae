use homeserve_core::{
    ledger, CreateJournalCommand, EarningStatus, Money, PayoutStatus, StorageBackend, TransactionStatus,
    TransactionType, UserId, VendorId, VendorWallet, WalletTransaction,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{check_idempotency, optional, remember_idempotency, MarketResult, Marketplace, Replay};
use crate::error::MarketError;

const DEFAULT_PAYMENT_METHOD: &str = "dummy_gateway";

#[derive(Debug, Clone, Deserialize)]
pub struct TopUp {
    pub amount: Money,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletView {
    pub balance: Money,
    pub transactions: Vec<WalletTransaction>,
}

/// Fields of a wallet transaction that vary between events.
pub(super) struct WalletEntry<'a> {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub balance_before: Money,
    pub description: String,
    pub payment_method: Option<String>,
    pub reference_id: String,
    pub journal_id: Uuid,
    pub storage: &'a dyn StorageBackend,
}

impl WalletEntry<'_> {
    /// Reads the post-event balance from the ledger and stores the transaction.
    pub fn record(self) -> MarketResult<WalletTransaction> {
        let txn = WalletTransaction {
            id: self.id,
            user_id: self.user_id,
            transaction_type: self.transaction_type,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: Marketplace::user_balance(self.storage, self.user_id)?,
            description: self.description,
            payment_method: self.payment_method,
            reference_id: self.reference_id,
            status: TransactionStatus::Completed,
            journal_id: self.journal_id,
            created_at: OffsetDateTime::now_utc(),
        };
        self.storage.insert_wallet_transaction(&txn)?;
        Ok(txn)
    }
}

impl Marketplace {
    /// Credits a user's wallet through the demo payment gateway. A replayed
    /// key returns the original transaction without re-checking the limits.
    pub fn top_up(&self, user_id: UserId, input: TopUp, idempotency_key: Option<&str>) -> MarketResult<WalletTransaction> {
        let operation = format!("top_up:{user_id}");

        let (txn, fresh) = self.atomically_keyed("top_up", |storage| {
            if let Replay::Seen(id) = check_idempotency(storage, idempotency_key, &operation)? {
                let txn = storage
                    .list_wallet_transactions(Some(user_id))?
                    .into_iter()
                    .find(|t| t.id == id)
                    .ok_or_else(|| MarketError::Internal(format!("idempotent top-up {id} has no transaction")))?;
                return Ok((txn, false));
            }

            let amount = input.amount;
            if amount < self.policy.min_top_up {
                return Err(MarketError::validation(format!(
                    "minimum top-up amount is {}",
                    self.policy.min_top_up
                )));
            }
            if amount > self.policy.max_top_up {
                return Err(MarketError::validation(format!(
                    "maximum top-up amount is {} per transaction",
                    self.policy.max_top_up
                )));
            }
            let payment_method = optional(input.payment_method).unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());

            storage.get_user(user_id)?;
            let txn_id = Uuid::new_v4();
            let balance_before = Self::user_balance(storage, user_id)?;
            let journal = storage.post_journal(
                &CreateJournalCommand::new(format!("Wallet recharge for user {user_id}"), Some(txn_id))
                    .debit(ledger::CASH, amount)
                    .credit(ledger::user_wallet(user_id).id, amount),
            )?;
            let txn = WalletEntry {
                id: txn_id,
                user_id,
                transaction_type: TransactionType::Recharge,
                amount,
                balance_before,
                description: format!("Added money via {payment_method}"),
                reference_id: format!("DUMMY_{}", journal.id.simple()),
                payment_method: Some(payment_method),
                journal_id: journal.id,
                storage,
            }
            .record()?;
            remember_idempotency(storage, idempotency_key, &operation, txn.id)?;
            Ok((txn, true))
        })?;

        if fresh {
            Self::record_amount("homeserve_top_up_paise_total", txn.amount);
            tracing::info!(
                user_id = %user_id,
                amount = %txn.amount,
                balance = %txn.balance_after,
                "Wallet topped up"
            );
        }
        Ok(txn)
    }

    pub fn wallet(&self, user_id: UserId) -> MarketResult<WalletView> {
        self.read(|storage| {
            storage.get_user(user_id)?;
            Ok(WalletView {
                balance: Self::user_balance(storage, user_id)?,
                transactions: storage.list_wallet_transactions(Some(user_id))?,
            })
        })
    }

    pub fn vendor_wallet(&self, vendor_id: VendorId) -> MarketResult<VendorWallet> {
        self.read(|storage| {
            storage.get_vendor(vendor_id)?;
            let total_earned = storage
                .list_earnings(vendor_id)?
                .into_iter()
                .filter(|e| e.status == EarningStatus::Available)
                .map(|e| e.vendor_amount)
                .sum();
            let total_withdrawn = storage
                .list_payouts(Some(vendor_id))?
                .into_iter()
                .filter(|p| p.status == PayoutStatus::Completed)
                .map(|p| p.amount)
                .sum();
            Ok(VendorWallet {
                available_balance: Self::vendor_available(storage, vendor_id)?,
                pending_balance: Self::vendor_pending(storage, vendor_id)?,
                total_earned,
                total_withdrawn,
            })
        })
    }
}
