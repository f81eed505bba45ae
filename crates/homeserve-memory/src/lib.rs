//! In-memory storage backend for HomeServe.
//!
//! All data lives in one `State` behind a lock. Transactions snapshot the
//! whole state on begin and restore it on rollback; one transaction may be
//! active at a time.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use homeserve_core::{
    ledger::{self, Account, AccountType},
    models::{
        AdminProfile, ApprovalStatus, Booking, BookingId, BookingStatus, CancellationRecord, CategoryId,
        EarningStatus, EarningType, IdempotencyRecord, ListingId, PaymentMethod, PaymentMethodId, PayoutId,
        PayoutRequest, PayoutStatus,
        ServiceCategory, ServiceListing, ServiceReview, UserId, UserProfile, VendorEarning, VendorId,
        VendorProfile, WalletTransaction,
    },
    BookingFilter, CreateJournalCommand, JournalEntry, ListingFilter, StatementLine, StorageBackend, StorageError,
    TransactionId,
};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Default)]
struct State {
    users: Vec<UserProfile>,
    vendors: Vec<VendorProfile>,
    admins: Vec<AdminProfile>,
    payment_methods: Vec<PaymentMethod>,
    categories: Vec<ServiceCategory>,
    listings: Vec<ServiceListing>,
    bookings: Vec<Booking>,
    cancellations: Vec<CancellationRecord>,
    reviews: Vec<ServiceReview>,
    wallet_transactions: Vec<WalletTransaction>,
    earnings: Vec<VendorEarning>,
    payouts: Vec<PayoutRequest>,
    idempotency: BTreeMap<String, IdempotencyRecord>,
    ledger_accounts: BTreeMap<Arc<str>, LedgerStore>,
    journals: BTreeMap<Uuid, JournalEntry>,
    sequence_value: u64,
}

struct Snapshot {
    tx_id: TransactionId,
    state: State,
}

pub struct InMemoryStorage {
    state: RwLock<State>,
    tx_counter: AtomicU64,
    snapshot: Mutex<Option<Snapshot>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            tx_counter: AtomicU64::new(1),
            snapshot: Mutex::new(None),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StorageError> {
        self.state
            .read()
            .map_err(|_| StorageError::Other("storage lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StorageError> {
        self.state
            .write()
            .map_err(|_| StorageError::Other("storage lock poisoned".to_string()))
    }

    fn snapshot_slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Snapshot>>, StorageError> {
        self.snapshot
            .lock()
            .map_err(|_| StorageError::Other("transaction lock poisoned".to_string()))
    }
}

/// Newest first.
fn newest_first<T: Clone>(items: impl DoubleEndedIterator<Item = T>) -> Vec<T> {
    items.rev().collect()
}

fn replace<T>(
    items: &mut [T],
    entity: &'static str,
    id: Uuid,
    id_of: impl Fn(&T) -> Uuid,
    value: T,
) -> Result<(), StorageError> {
    let slot = items
        .iter_mut()
        .find(|item| id_of(item) == id)
        .ok_or_else(|| StorageError::not_found(entity, id))?;
    *slot = value;
    Ok(())
}

impl StorageBackend for InMemoryStorage {
    fn insert_user(&self, user: &UserProfile) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.users.iter().any(|u| u.id == user.id || u.email == user.email) {
            return Err(StorageError::already_exists("user", &user.email));
        }
        state.users.push(user.clone());
        Ok(())
    }

    fn update_user(&self, user: &UserProfile) -> Result<(), StorageError> {
        let mut state = self.write()?;
        replace(&mut state.users, "user", user.id, |u| u.id, user.clone())
    }

    fn get_user(&self, id: UserId) -> Result<UserProfile, StorageError> {
        self.read()?
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("user", id))
    }

    fn list_users(&self) -> Result<Vec<UserProfile>, StorageError> {
        Ok(newest_first(self.read()?.users.iter().cloned()))
    }

    fn insert_vendor(&self, vendor: &VendorProfile) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.vendors.iter().any(|v| v.id == vendor.id || v.email == vendor.email) {
            return Err(StorageError::already_exists("vendor", &vendor.email));
        }
        state.vendors.push(vendor.clone());
        Ok(())
    }

    fn update_vendor(&self, vendor: &VendorProfile) -> Result<(), StorageError> {
        let mut state = self.write()?;
        replace(&mut state.vendors, "vendor", vendor.id, |v| v.id, vendor.clone())
    }

    fn get_vendor(&self, id: VendorId) -> Result<VendorProfile, StorageError> {
        self.read()?
            .vendors
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("vendor", id))
    }

    fn list_vendors(&self, status: Option<ApprovalStatus>) -> Result<Vec<VendorProfile>, StorageError> {
        let state = self.read()?;
        Ok(newest_first(
            state
                .vendors
                .iter()
                .filter(|v| status.map_or(true, |s| v.approval_status == s))
                .cloned()
                .collect::<Vec<_>>()
                .into_iter(),
        ))
    }

    fn insert_admin(&self, admin: &AdminProfile) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.admins.iter().any(|a| a.id == admin.id || a.email == admin.email) {
            return Err(StorageError::already_exists("admin", &admin.email));
        }
        state.admins.push(admin.clone());
        Ok(())
    }

    fn list_admins(&self) -> Result<Vec<AdminProfile>, StorageError> {
        Ok(newest_first(self.read()?.admins.iter().cloned()))
    }

    fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.payment_methods.iter().any(|m| m.id == method.id) {
            return Err(StorageError::already_exists("payment method", method.id));
        }
        state.payment_methods.push(method.clone());
        Ok(())
    }

    fn update_payment_method(&self, method: &PaymentMethod) -> Result<(), StorageError> {
        let mut state = self.write()?;
        replace(&mut state.payment_methods, "payment method", method.id, |m| m.id, method.clone())
    }

    fn delete_payment_method(&self, id: PaymentMethodId) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let before = state.payment_methods.len();
        state.payment_methods.retain(|m| m.id != id);
        if state.payment_methods.len() == before {
            return Err(StorageError::not_found("payment method", id));
        }
        Ok(())
    }

    fn get_payment_method(&self, id: PaymentMethodId) -> Result<PaymentMethod, StorageError> {
        self.read()?
            .payment_methods
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("payment method", id))
    }

    fn list_payment_methods(&self, user_id: Option<UserId>) -> Result<Vec<PaymentMethod>, StorageError> {
        Ok(newest_first(
            self.read()?
                .payment_methods
                .iter()
                .filter(|m| user_id.map_or(true, |id| m.user_id == id))
                .cloned(),
        ))
    }

    fn insert_category(&self, category: &ServiceCategory) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state
            .categories
            .iter()
            .any(|c| c.id == category.id || c.name.eq_ignore_ascii_case(&category.name))
        {
            return Err(StorageError::already_exists("category", &category.name));
        }
        state.categories.push(category.clone());
        Ok(())
    }

    fn get_category(&self, id: CategoryId) -> Result<ServiceCategory, StorageError> {
        self.read()?
            .categories
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("category", id))
    }

    fn list_categories(&self) -> Result<Vec<ServiceCategory>, StorageError> {
        let mut categories = self.read()?.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    fn insert_listing(&self, listing: &ServiceListing) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.listings.iter().any(|l| l.id == listing.id) {
            return Err(StorageError::already_exists("listing", listing.id));
        }
        state.listings.push(listing.clone());
        Ok(())
    }

    fn update_listing(&self, listing: &ServiceListing) -> Result<(), StorageError> {
        let mut state = self.write()?;
        replace(&mut state.listings, "listing", listing.id, |l| l.id, listing.clone())
    }

    fn delete_listing(&self, id: ListingId) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let before = state.listings.len();
        state.listings.retain(|l| l.id != id);
        if state.listings.len() == before {
            return Err(StorageError::not_found("listing", id));
        }
        Ok(())
    }

    fn get_listing(&self, id: ListingId) -> Result<ServiceListing, StorageError> {
        self.read()?
            .listings
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("listing", id))
    }

    fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<ServiceListing>, StorageError> {
        let state = self.read()?;
        let matching: Vec<ServiceListing> = state
            .listings
            .iter()
            .filter(|l| filter.vendor_id.map_or(true, |v| l.vendor_id == v))
            .filter(|l| filter.category_id.map_or(true, |c| l.category_id == c))
            .filter(|l| !filter.active_only || l.is_active)
            .cloned()
            .collect();
        Ok(newest_first(matching.into_iter()))
    }

    fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.bookings.iter().any(|b| b.id == booking.id) {
            return Err(StorageError::already_exists("booking", booking.id));
        }
        state.bookings.push(booking.clone());
        Ok(())
    }

    fn get_booking(&self, id: BookingId) -> Result<Booking, StorageError> {
        self.read()?
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("booking", id))
    }

    fn update_booking(&self, booking: &Booking, expected: BookingStatus) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let slot = state
            .bookings
            .iter_mut()
            .find(|b| b.id == booking.id)
            .ok_or_else(|| StorageError::not_found("booking", booking.id))?;
        if slot.status != expected {
            return Err(StorageError::conflict("booking", booking.id, expected));
        }
        *slot = booking.clone();
        Ok(())
    }

    fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StorageError> {
        let state = self.read()?;
        let matching: Vec<Booking> = state
            .bookings
            .iter()
            .filter(|b| filter.user_id.map_or(true, |u| b.user_id == u))
            .filter(|b| filter.vendor_id.map_or(true, |v| b.vendor_id == v))
            .cloned()
            .collect();
        Ok(newest_first(matching.into_iter()))
    }

    fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.cancellations.iter().any(|c| c.booking_id == record.booking_id) {
            return Err(StorageError::already_exists("cancellation", record.booking_id));
        }
        state.cancellations.push(record.clone());
        Ok(())
    }

    fn get_cancellation(&self, booking_id: BookingId) -> Result<Option<CancellationRecord>, StorageError> {
        Ok(self
            .read()?
            .cancellations
            .iter()
            .find(|c| c.booking_id == booking_id)
            .cloned())
    }

    fn insert_review(&self, review: &ServiceReview) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.reviews.iter().any(|r| r.booking_id == review.booking_id) {
            return Err(StorageError::already_exists("review", review.booking_id));
        }
        state.reviews.push(review.clone());
        Ok(())
    }

    fn list_reviews(&self, vendor_id: Option<VendorId>) -> Result<Vec<ServiceReview>, StorageError> {
        let state = self.read()?;
        let matching: Vec<ServiceReview> = state
            .reviews
            .iter()
            .filter(|r| vendor_id.map_or(true, |v| r.vendor_id == v))
            .cloned()
            .collect();
        Ok(newest_first(matching.into_iter()))
    }

    fn insert_wallet_transaction(&self, txn: &WalletTransaction) -> Result<(), StorageError> {
        self.write()?.wallet_transactions.push(txn.clone());
        Ok(())
    }

    fn list_wallet_transactions(&self, user_id: Option<UserId>) -> Result<Vec<WalletTransaction>, StorageError> {
        let state = self.read()?;
        let matching: Vec<WalletTransaction> = state
            .wallet_transactions
            .iter()
            .filter(|t| user_id.map_or(true, |u| t.user_id == u))
            .cloned()
            .collect();
        Ok(newest_first(matching.into_iter()))
    }

    fn insert_earning(&self, earning: &VendorEarning) -> Result<(), StorageError> {
        self.write()?.earnings.push(earning.clone());
        Ok(())
    }

    fn update_earning_status(
        &self,
        booking_id: BookingId,
        earning_type: EarningType,
        status: EarningStatus,
    ) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let mut found = false;
        for earning in state
            .earnings
            .iter_mut()
            .filter(|e| e.booking_id == booking_id && e.earning_type == earning_type)
        {
            earning.status = status;
            found = true;
        }
        if !found {
            return Err(StorageError::not_found("earning", booking_id));
        }
        Ok(())
    }

    fn list_earnings(&self, vendor_id: VendorId) -> Result<Vec<VendorEarning>, StorageError> {
        let state = self.read()?;
        let matching: Vec<VendorEarning> = state
            .earnings
            .iter()
            .filter(|e| e.vendor_id == vendor_id)
            .cloned()
            .collect();
        Ok(newest_first(matching.into_iter()))
    }

    fn insert_payout(&self, payout: &PayoutRequest) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.payouts.iter().any(|p| p.id == payout.id) {
            return Err(StorageError::already_exists("payout", payout.id));
        }
        state.payouts.push(payout.clone());
        Ok(())
    }

    fn get_payout(&self, id: PayoutId) -> Result<PayoutRequest, StorageError> {
        self.read()?
            .payouts
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("payout", id))
    }

    fn update_payout(&self, payout: &PayoutRequest, expected: PayoutStatus) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let slot = state
            .payouts
            .iter_mut()
            .find(|p| p.id == payout.id)
            .ok_or_else(|| StorageError::not_found("payout", payout.id))?;
        if slot.status != expected {
            return Err(StorageError::conflict("payout", payout.id, expected));
        }
        *slot = payout.clone();
        Ok(())
    }

    fn list_payouts(&self, vendor_id: Option<VendorId>) -> Result<Vec<PayoutRequest>, StorageError> {
        let state = self.read()?;
        let matching: Vec<PayoutRequest> = state
            .payouts
            .iter()
            .filter(|p| vendor_id.map_or(true, |v| p.vendor_id == v))
            .cloned()
            .collect();
        Ok(newest_first(matching.into_iter()))
    }

    fn ensure_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut state = self.write()?;
        match state.ledger_accounts.get(&account.id) {
            Some(existing) if existing.account_type != account.account_type => {
                Err(StorageError::AccountTypeMismatch(account.id.to_string()))
            }
            Some(_) => Ok(()),
            None => {
                state
                    .ledger_accounts
                    .insert(account.id.clone(), LedgerStore::new(account.account_type));
                Ok(())
            }
        }
    }

    fn post_journal(&self, command: &CreateJournalCommand) -> Result<JournalEntry, StorageError> {
        ledger::validate_journal(command)?;

        let mut state = self.write()?;
        // Resolve every account before touching any balance.
        for entry in &command.ledger_entries {
            if !state.ledger_accounts.contains_key(entry.account_id()) {
                return Err(StorageError::AccountNotFound(entry.account_id().to_string()));
            }
        }

        state.sequence_value += 1;
        let journal = JournalEntry {
            id: Uuid::new_v4(),
            sequence: state.sequence_value,
            description: command.description.clone(),
            reference: command.reference,
            created_at: OffsetDateTime::now_utc(),
        };

        for entry in &command.ledger_entries {
            if let Some(store) = state.ledger_accounts.get_mut(entry.account_id()) {
                let amount = ledger::signed_amount(store.account_type, entry);
                store.add_entry(journal.id, journal.sequence, amount);
            }
        }
        state.journals.insert(journal.id, journal.clone());

        tracing::debug!(journal_id = %journal.id, sequence = journal.sequence, "Journal posted");
        Ok(journal)
    }

    fn get_balance(&self, account_id: &str) -> Result<Decimal, StorageError> {
        let state = self.read()?;
        let store = state
            .ledger_accounts
            .get(account_id)
            .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))?;
        Ok(store.balance)
    }

    fn get_statement(&self, account_id: &str) -> Result<Vec<StatementLine>, StorageError> {
        let state = self.read()?;
        let store = state
            .ledger_accounts
            .get(account_id)
            .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))?;

        let mut balance = Decimal::ZERO;
        let mut lines = Vec::with_capacity(store.entries.len());
        for (journal_id, sequence, amount) in &store.entries {
            balance += amount;
            let description = state
                .journals
                .get(journal_id)
                .map(|j| j.description.clone())
                .unwrap_or_else(|| Arc::from(""));
            lines.push(StatementLine {
                journal_id: *journal_id,
                sequence: *sequence,
                description,
                amount: *amount,
                balance,
            });
        }
        Ok(lines)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(self
            .read()?
            .ledger_accounts
            .iter()
            .map(|(id, store)| Account::new(id.clone(), store.account_type))
            .collect())
    }

    fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>, StorageError> {
        Ok(self.read()?.idempotency.get(key).cloned())
    }

    fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.idempotency.contains_key(&record.key) {
            return Err(StorageError::already_exists("idempotency key", &record.key));
        }
        state.idempotency.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut slot = self.snapshot_slot()?;
        if slot.is_some() {
            return Err(StorageError::TransactionActive);
        }
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *slot = Some(Snapshot {
            tx_id,
            state: self.read()?.clone(),
        });
        tracing::debug!(tx_id, "Transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut slot = self.snapshot_slot()?;
        match slot.as_ref() {
            Some(snapshot) if snapshot.tx_id == tx_id => {
                *slot = None;
                tracing::debug!(tx_id, "Transaction committed");
                Ok(())
            }
            _ => Err(StorageError::NoActiveTransaction),
        }
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut slot = self.snapshot_slot()?;
        match slot.take() {
            Some(snapshot) if snapshot.tx_id == tx_id => {
                *self.write()? = snapshot.state;
                tracing::debug!(tx_id, "Transaction rolled back");
                Ok(())
            }
            other => {
                *slot = other;
                Err(StorageError::NoActiveTransaction)
            }
        }
    }
}

#[derive(Clone)]
struct LedgerStore {
    account_type: AccountType,
    entries: Vec<(Uuid, u64, Decimal)>,
    balance: Decimal,
}

impl LedgerStore {
    fn new(account_type: AccountType) -> Self {
        Self {
            account_type,
            entries: Vec::new(),
            balance: Decimal::ZERO,
        }
    }

    fn add_entry(&mut self, journal_id: Uuid, sequence: u64, amount: Decimal) {
        self.entries.push((journal_id, sequence, amount));
        self.balance += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeserve_core::{ledger::ESCROW, Money, PaymentStatus};
    use time::macros::date;

    fn booking(status: BookingStatus) -> Booking {
        let now = OffsetDateTime::now_utc();
        Booking {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            service_name: "Deep cleaning".to_string(),
            booking_date: date!(2030 - 01 - 15),
            time_slot: "9:00 AM - 11:00 AM".to_string(),
            total_amount: Money::from(1000),
            vendor_amount: None,
            company_amount: None,
            user_address: "12 MG Road".to_string(),
            user_pin_code: "560001".to_string(),
            notes: None,
            status,
            payment_status: PaymentStatus::Paid,
            created_at: now,
            updated_at: now,
        }
    }

    fn seed_accounts(storage: &InMemoryStorage, wallet: &Account) {
        for account in ledger::platform_accounts() {
            storage.ensure_account(&account).unwrap();
        }
        storage.ensure_account(wallet).unwrap();
    }

    #[test]
    fn test_journal_updates_balances() {
        let storage = InMemoryStorage::new();
        let wallet = ledger::user_wallet(Uuid::new_v4());
        seed_accounts(&storage, &wallet);

        let cmd = CreateJournalCommand::new("Wallet recharge", None)
            .debit(ledger::CASH, Money::from(1000))
            .credit(wallet.id.clone(), Money::from(1000));
        storage.post_journal(&cmd).unwrap();

        assert_eq!(storage.get_balance(ledger::CASH).unwrap(), Decimal::from(1000));
        assert_eq!(storage.get_balance(&wallet.id).unwrap(), Decimal::from(1000));

        let statement = storage.get_statement(&wallet.id).unwrap();
        assert_eq!(statement.len(), 1);
        assert_eq!(statement[0].balance, Decimal::from(1000));
    }

    #[test]
    fn test_journal_to_unknown_account_changes_nothing() {
        let storage = InMemoryStorage::new();
        for account in ledger::platform_accounts() {
            storage.ensure_account(&account).unwrap();
        }
        let cmd = CreateJournalCommand::new("Bad", None)
            .debit(ledger::CASH, Money::from(10))
            .credit("user:missing:wallet", Money::from(10));
        assert!(matches!(storage.post_journal(&cmd), Err(StorageError::AccountNotFound(_))));
        assert_eq!(storage.get_balance(ledger::CASH).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_account_type_mismatch() {
        let storage = InMemoryStorage::new();
        storage.ensure_account(&Account::new(ESCROW, AccountType::Liability)).unwrap();
        storage.ensure_account(&Account::new(ESCROW, AccountType::Liability)).unwrap();
        assert!(matches!(
            storage.ensure_account(&Account::new(ESCROW, AccountType::Asset)),
            Err(StorageError::AccountTypeMismatch(_))
        ));
    }

    #[test]
    fn test_booking_compare_and_set() {
        let storage = InMemoryStorage::new();
        let mut b = booking(BookingStatus::Pending);
        storage.insert_booking(&b).unwrap();

        b.status = BookingStatus::Confirmed;
        storage.update_booking(&b, BookingStatus::Pending).unwrap();

        b.status = BookingStatus::Cancelled;
        let err = storage.update_booking(&b, BookingStatus::Pending).unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(storage.get_booking(b.id).unwrap().status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_transaction_rollback_restores_state() {
        let storage = InMemoryStorage::new();
        let wallet = ledger::user_wallet(Uuid::new_v4());
        seed_accounts(&storage, &wallet);

        let tx_id = storage.begin_transaction().unwrap();
        storage.insert_booking(&booking(BookingStatus::Pending)).unwrap();
        storage
            .post_journal(
                &CreateJournalCommand::new("Top-up", None)
                    .debit(ledger::CASH, Money::from(500))
                    .credit(wallet.id.clone(), Money::from(500)),
            )
            .unwrap();
        storage.rollback_transaction(tx_id).unwrap();

        assert!(storage.list_bookings(&BookingFilter::default()).unwrap().is_empty());
        assert_eq!(storage.get_balance(&wallet.id).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_single_active_transaction() {
        let storage = InMemoryStorage::new();
        let tx_id = storage.begin_transaction().unwrap();
        assert!(matches!(storage.begin_transaction(), Err(StorageError::TransactionActive)));
        assert!(matches!(
            storage.commit_transaction(tx_id + 1),
            Err(StorageError::NoActiveTransaction)
        ));
        storage.commit_transaction(tx_id).unwrap();
        assert!(matches!(
            storage.rollback_transaction(tx_id),
            Err(StorageError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_lists_are_newest_first() {
        let storage = InMemoryStorage::new();
        let first = booking(BookingStatus::Pending);
        let second = booking(BookingStatus::Pending);
        storage.insert_booking(&first).unwrap();
        storage.insert_booking(&second).unwrap();
        let ids: Vec<Uuid> = storage
            .list_bookings(&BookingFilter::default())
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_payment_methods_by_user() {
        let storage = InMemoryStorage::new();
        let user_id = Uuid::new_v4();
        let mut card = PaymentMethod {
            id: Uuid::new_v4(),
            user_id,
            method_type: homeserve_core::PaymentMethodType::Card,
            display_name: "HDFC card".to_string(),
            card_last4: Some("4242".to_string()),
            upi_id: None,
            is_default: true,
            created_at: OffsetDateTime::now_utc(),
        };
        storage.insert_payment_method(&card).unwrap();
        let other = PaymentMethod {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ..card.clone()
        };
        storage.insert_payment_method(&other).unwrap();

        assert_eq!(storage.list_payment_methods(Some(user_id)).unwrap(), vec![card.clone()]);
        assert_eq!(storage.list_payment_methods(None).unwrap().len(), 2);

        card.is_default = false;
        storage.update_payment_method(&card).unwrap();
        assert!(!storage.get_payment_method(card.id).unwrap().is_default);

        storage.delete_payment_method(card.id).unwrap();
        assert!(matches!(
            storage.delete_payment_method(card.id),
            Err(StorageError::NotFound { .. })
        ));
    }
}
