use homeserve_core::{
    ledger, CreateJournalCommand, Money, PayoutId, PayoutRequest, PayoutStatus, StorageBackend, StorageError, VendorId,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{check_idempotency, remember_idempotency, MarketResult, Marketplace, Replay};
use crate::error::MarketError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayout {
    pub amount: Money,
}

fn settle(
    storage: &dyn StorageBackend,
    payout: &mut PayoutRequest,
    status: PayoutStatus,
    action: &'static str,
) -> MarketResult<()> {
    let expected = payout.status;
    if !matches!(expected, PayoutStatus::Pending | PayoutStatus::Processing) {
        return Err(MarketError::transition("payout", expected, action));
    }
    payout.status = status;
    payout.processed_at = Some(OffsetDateTime::now_utc());
    storage.update_payout(payout, expected).map_err(|e| match e {
        StorageError::Conflict { .. } => {
            MarketError::Conflict(format!("payout {} was changed by another request", payout.id))
        }
        other => other.into(),
    })
}

impl Marketplace {
    /// Moves the requested amount out of the vendor's available balance into
    /// payouts payable. No bank transfer happens here.
    pub fn request_payout(
        &self,
        vendor_id: VendorId,
        input: NewPayout,
        idempotency_key: Option<&str>,
    ) -> MarketResult<PayoutRequest> {
        let operation = format!("request_payout:{vendor_id}");

        let (payout, fresh) = self.atomically_keyed("request_payout", |storage| {
            if let Replay::Seen(id) = check_idempotency(storage, idempotency_key, &operation)? {
                return Ok((storage.get_payout(id)?, false));
            }

            let amount = input.amount;
            if amount < self.policy.min_payout {
                return Err(MarketError::validation(format!(
                    "minimum withdrawal amount is {}",
                    self.policy.min_payout
                )));
            }

            let vendor = storage.get_vendor(vendor_id)?;
            if !vendor.is_approved() {
                return Err(MarketError::forbidden("only approved vendors can request payouts"));
            }
            let bank = match vendor.bank {
                Some(bank) if bank.is_complete() => bank,
                _ => {
                    return Err(MarketError::validation(
                        "bank details are incomplete; update them in profile settings",
                    ))
                }
            };
            let available = Self::vendor_available(storage, vendor_id)?;
            if amount > available {
                return Err(MarketError::InsufficientBalance {
                    available,
                    required: amount,
                });
            }

            let payout = PayoutRequest {
                id: Uuid::new_v4(),
                vendor_id,
                amount,
                status: PayoutStatus::Pending,
                bank,
                requested_at: OffsetDateTime::now_utc(),
                processed_at: None,
            };
            storage.insert_payout(&payout)?;
            storage.post_journal(
                &CreateJournalCommand::new(format!("Payout request {}", payout.id), Some(payout.id))
                    .debit(ledger::vendor_available(vendor_id).id, amount)
                    .credit(ledger::PAYOUTS_PAYABLE, amount),
            )?;
            remember_idempotency(storage, idempotency_key, &operation, payout.id)?;
            Ok((payout, true))
        })?;

        if fresh {
            Self::record_amount("homeserve_payout_requested_paise_total", payout.amount);
            tracing::info!(payout_id = %payout.id, vendor_id = %vendor_id, amount = %payout.amount, "Payout requested");
        }
        Ok(payout)
    }

    pub fn mark_payout_processing(&self, payout_id: PayoutId) -> MarketResult<PayoutRequest> {
        let payout = self.atomically("payout_processing", |storage| {
            let mut payout = storage.get_payout(payout_id)?;
            if payout.status != PayoutStatus::Pending {
                return Err(MarketError::transition("payout", payout.status, "start processing"));
            }
            payout.status = PayoutStatus::Processing;
            storage.update_payout(&payout, PayoutStatus::Pending)?;
            Ok(payout)
        })?;
        tracing::info!(payout_id = %payout.id, "Payout processing");
        Ok(payout)
    }

    /// The transfer went out: payouts payable is cleared against cash.
    pub fn complete_payout(&self, payout_id: PayoutId) -> MarketResult<PayoutRequest> {
        let payout = self.atomically("complete_payout", |storage| {
            let mut payout = storage.get_payout(payout_id)?;
            settle(storage, &mut payout, PayoutStatus::Completed, "complete")?;
            storage.post_journal(
                &CreateJournalCommand::new(format!("Payout {} transferred", payout.id), Some(payout.id))
                    .debit(ledger::PAYOUTS_PAYABLE, payout.amount)
                    .credit(ledger::CASH, payout.amount),
            )?;
            Ok(payout)
        })?;
        Self::record_amount("homeserve_payout_completed_paise_total", payout.amount);
        tracing::info!(payout_id = %payout.id, vendor_id = %payout.vendor_id, amount = %payout.amount, "Payout completed");
        Ok(payout)
    }

    /// The payout is declined and the amount returns to the vendor's available balance.
    pub fn reject_payout(&self, payout_id: PayoutId) -> MarketResult<PayoutRequest> {
        let payout = self.atomically("reject_payout", |storage| {
            let mut payout = storage.get_payout(payout_id)?;
            settle(storage, &mut payout, PayoutStatus::Rejected, "reject")?;
            storage.post_journal(
                &CreateJournalCommand::new(format!("Payout {} rejected", payout.id), Some(payout.id))
                    .debit(ledger::PAYOUTS_PAYABLE, payout.amount)
                    .credit(ledger::vendor_available(payout.vendor_id).id, payout.amount),
            )?;
            Ok(payout)
        })?;
        tracing::info!(payout_id = %payout.id, vendor_id = %payout.vendor_id, "Payout rejected");
        Ok(payout)
    }

    pub fn vendor_payouts(&self, vendor_id: VendorId) -> MarketResult<Vec<PayoutRequest>> {
        self.read(|storage| {
            storage.get_vendor(vendor_id)?;
            Ok(storage.list_payouts(Some(vendor_id))?)
        })
    }
}
