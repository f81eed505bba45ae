//! The marketplace service layer.
//!
//! Every operation that moves money or changes a status runs through
//! [`Marketplace::atomically`]: it holds the write side of the gate and wraps
//! the event in one storage transaction. Reads go through
//! [`Marketplace::read`], which holds the read side, so they only ever see
//! committed events. Balances are never stored on profiles; they are read
//! from the ledger.

use std::sync::{Arc, RwLock};

use homeserve_core::{
    ledger::{self, Account},
    IdempotencyRecord, Money, Policy, StorageBackend, UserId, VendorId,
};
use metrics::{counter, increment_counter};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::MarketError;

mod admin;
mod bookings;
mod catalog;
mod payment_methods;
mod payouts;
mod users;
mod vendors;
mod wallet;

pub use bookings::{BookingScope, CancelBooking, CancelledBooking, NewBooking, NewReview};
pub use catalog::{ListingInput, SearchQuery, SearchResult, SearchSort};
pub use payment_methods::{NewPaymentMethod, OwnedPaymentMethod};
pub use payouts::NewPayout;
pub use users::{NewUser, UserAddress, UserBank, UserUpdate};
pub use vendors::{NewAdmin, NewVendor, VendorDetails, VendorDocumentsInput, VendorUpdate};
pub use wallet::{TopUp, WalletView};

pub type MarketResult<T> = Result<T, MarketError>;

pub struct Marketplace {
    storage: Arc<dyn StorageBackend>,
    policy: Policy,
    gate: RwLock<()>,
}

impl Marketplace {
    /// Validates the policy and creates the platform ledger accounts.
    pub fn new(storage: Arc<dyn StorageBackend>, policy: Policy) -> MarketResult<Self> {
        policy.validate()?;
        for account in ledger::platform_accounts() {
            storage.ensure_account(&account)?;
        }
        Ok(Self {
            storage,
            policy,
            gate: RwLock::new(()),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Direct storage access that bypasses the gate.
    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    /// Runs `f` under the read side of the gate. Writers wait for it, so `f`
    /// never observes an event that has not committed.
    fn read<T>(&self, f: impl FnOnce(&dyn StorageBackend) -> MarketResult<T>) -> MarketResult<T> {
        let _gate = self
            .gate
            .read()
            .map_err(|_| MarketError::Internal("gate poisoned".to_string()))?;
        f(self.storage.as_ref())
    }

    /// Runs `f` inside one storage transaction while holding the write side
    /// of the gate. Any error rolls the transaction back.
    fn atomically<T>(
        &self,
        event: &'static str,
        f: impl FnOnce(&dyn StorageBackend) -> MarketResult<T>,
    ) -> MarketResult<T> {
        let value = self.run_event(event, f)?;
        increment_counter!("homeserve_events_total", "event" => event);
        Ok(value)
    }

    /// Like [`Marketplace::atomically`] for events that carry an idempotency
    /// key. `f` reports whether it applied the event or replayed an earlier
    /// one; replays are counted apart from applied events.
    fn atomically_keyed<T>(
        &self,
        event: &'static str,
        f: impl FnOnce(&dyn StorageBackend) -> MarketResult<(T, bool)>,
    ) -> MarketResult<(T, bool)> {
        let (value, fresh) = self.run_event(event, f)?;
        if fresh {
            increment_counter!("homeserve_events_total", "event" => event);
        } else {
            increment_counter!("homeserve_event_replays_total", "event" => event);
        }
        Ok((value, fresh))
    }

    fn run_event<T>(
        &self,
        event: &'static str,
        f: impl FnOnce(&dyn StorageBackend) -> MarketResult<T>,
    ) -> MarketResult<T> {
        let _gate = self
            .gate
            .write()
            .map_err(|_| MarketError::Internal("gate poisoned".to_string()))?;

        let storage = self.storage.as_ref();
        let tx_id = storage.begin_transaction()?;
        let result = f(storage).and_then(|value| {
            storage.commit_transaction(tx_id)?;
            Ok(value)
        });

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(rollback_err) = storage.rollback_transaction(tx_id) {
                    tracing::error!(event, error = %rollback_err, "Rollback failed");
                }
                tracing::warn!(event, error = %e, "Event rolled back");
                increment_counter!("homeserve_event_failures_total", "event" => event);
                Err(e)
            }
        }
    }

    fn balance(storage: &dyn StorageBackend, account: &Account) -> MarketResult<Money> {
        let raw = storage.get_balance(&account.id)?;
        Money::new(raw).map_err(|_| MarketError::Internal(format!("account {} has negative balance {raw}", account.id)))
    }

    fn user_balance(storage: &dyn StorageBackend, user_id: UserId) -> MarketResult<Money> {
        Self::balance(storage, &ledger::user_wallet(user_id))
    }

    fn vendor_available(storage: &dyn StorageBackend, vendor_id: VendorId) -> MarketResult<Money> {
        Self::balance(storage, &ledger::vendor_available(vendor_id))
    }

    fn vendor_pending(storage: &dyn StorageBackend, vendor_id: VendorId) -> MarketResult<Money> {
        Self::balance(storage, &ledger::vendor_pending(vendor_id))
    }

    fn record_amount(metric: &'static str, amount: Money) {
        if let Some(paise) = (amount.amount() * Decimal::ONE_HUNDRED).to_u64() {
            counter!(metric, paise);
        }
    }
}

/// Result of looking up an idempotency key before applying an event.
enum Replay {
    Fresh,
    Seen(Uuid),
}

fn check_idempotency(storage: &dyn StorageBackend, key: Option<&str>, operation: &str) -> MarketResult<Replay> {
    let Some(key) = key else {
        return Ok(Replay::Fresh);
    };
    match storage.get_idempotency_record(key)? {
        None => Ok(Replay::Fresh),
        Some(record) if record.operation == operation => {
            tracing::info!(key, operation, reference_id = %record.reference_id, "Idempotent replay");
            Ok(Replay::Seen(record.reference_id))
        }
        Some(record) => Err(MarketError::IdempotencyConflict {
            key: key.to_string(),
            operation: record.operation,
        }),
    }
}

fn remember_idempotency(
    storage: &dyn StorageBackend,
    key: Option<&str>,
    operation: &str,
    reference_id: Uuid,
) -> MarketResult<()> {
    if let Some(key) = key {
        storage.insert_idempotency_record(&IdempotencyRecord {
            key: key.to_string(),
            operation: operation.to_string(),
            reference_id,
            created_at: OffsetDateTime::now_utc(),
        })?;
    }
    Ok(())
}

fn required(field: &str, value: &str) -> MarketResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MarketError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn valid_pin_code(pin_code: &str) -> MarketResult<String> {
    let pin_code = pin_code.trim();
    if pin_code.len() != 6 || !pin_code.chars().all(|c| c.is_ascii_digit()) {
        return Err(MarketError::validation(format!("pin code must be 6 digits, got '{pin_code}'")));
    }
    Ok(pin_code.to_string())
}

fn valid_email(email: &str) -> MarketResult<String> {
    let email = required("email", email)?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(MarketError::validation(format!("invalid email '{email}'"))),
    }
}
