use std::fmt::Display;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    ledger::Account,
    models::{
        read::{JournalEntry, StatementLine},
        write::CreateJournalCommand,
        AdminProfile, ApprovalStatus, Booking, BookingId, BookingStatus, CancellationRecord, CategoryId,
        EarningStatus, EarningType, IdempotencyRecord, ListingId, PaymentMethod, PaymentMethodId, PayoutId, PayoutRequest, PayoutStatus,
        ServiceCategory, ServiceListing, ServiceReview, UserId, UserProfile, VendorEarning, VendorId,
        VendorProfile, WalletTransaction,
    },
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },
    #[error("{entity} {id} was modified concurrently (expected status {expected})")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: String,
    },
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account {0} already exists with a different type")]
    AccountTypeMismatch(String),
    #[error("unbalanced journal: {0}")]
    Unbalanced(String),
    #[error("no active transaction")]
    NoActiveTransaction,
    #[error("a transaction is already active")]
    TransactionActive,
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: &'static str, id: impl Display) -> Self {
        StorageError::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl Display, expected: impl Display) -> Self {
        StorageError::Conflict {
            entity,
            id: id.to_string(),
            expected: expected.to_string(),
        }
    }
}

pub type TransactionId = u64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingFilter {
    pub vendor_id: Option<VendorId>,
    pub category_id: Option<CategoryId>,
    pub active_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub user_id: Option<UserId>,
    pub vendor_id: Option<VendorId>,
}

/// Persistence for every marketplace record and the ledger.
///
/// List operations return records newest first (reverse insertion order)
/// unless stated otherwise. Compare-and-set updates fail with
/// [`StorageError::Conflict`] when the stored status differs from `expected`.
pub trait StorageBackend: Send + Sync {
    // Profiles
    fn insert_user(&self, user: &UserProfile) -> Result<(), StorageError>;
    fn update_user(&self, user: &UserProfile) -> Result<(), StorageError>;
    fn get_user(&self, id: UserId) -> Result<UserProfile, StorageError>;
    fn list_users(&self) -> Result<Vec<UserProfile>, StorageError>;

    fn insert_vendor(&self, vendor: &VendorProfile) -> Result<(), StorageError>;
    fn update_vendor(&self, vendor: &VendorProfile) -> Result<(), StorageError>;
    fn get_vendor(&self, id: VendorId) -> Result<VendorProfile, StorageError>;
    fn list_vendors(&self, status: Option<ApprovalStatus>) -> Result<Vec<VendorProfile>, StorageError>;

    fn insert_admin(&self, admin: &AdminProfile) -> Result<(), StorageError>;
    fn list_admins(&self) -> Result<Vec<AdminProfile>, StorageError>;

    fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), StorageError>;
    fn update_payment_method(&self, method: &PaymentMethod) -> Result<(), StorageError>;
    fn delete_payment_method(&self, id: PaymentMethodId) -> Result<(), StorageError>;
    fn get_payment_method(&self, id: PaymentMethodId) -> Result<PaymentMethod, StorageError>;
    fn list_payment_methods(&self, user_id: Option<UserId>) -> Result<Vec<PaymentMethod>, StorageError>;

    // Catalog; categories are unique by name and listed in name order
    fn insert_category(&self, category: &ServiceCategory) -> Result<(), StorageError>;
    fn get_category(&self, id: CategoryId) -> Result<ServiceCategory, StorageError>;
    fn list_categories(&self) -> Result<Vec<ServiceCategory>, StorageError>;

    fn insert_listing(&self, listing: &ServiceListing) -> Result<(), StorageError>;
    fn update_listing(&self, listing: &ServiceListing) -> Result<(), StorageError>;
    fn delete_listing(&self, id: ListingId) -> Result<(), StorageError>;
    fn get_listing(&self, id: ListingId) -> Result<ServiceListing, StorageError>;
    fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<ServiceListing>, StorageError>;

    // Bookings
    fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError>;
    fn get_booking(&self, id: BookingId) -> Result<Booking, StorageError>;
    fn update_booking(&self, booking: &Booking, expected: BookingStatus) -> Result<(), StorageError>;
    fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StorageError>;

    fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), StorageError>;
    fn get_cancellation(&self, booking_id: BookingId) -> Result<Option<CancellationRecord>, StorageError>;

    fn insert_review(&self, review: &ServiceReview) -> Result<(), StorageError>;
    fn list_reviews(&self, vendor_id: Option<VendorId>) -> Result<Vec<ServiceReview>, StorageError>;

    // Wallets and earnings
    fn insert_wallet_transaction(&self, txn: &WalletTransaction) -> Result<(), StorageError>;
    fn list_wallet_transactions(&self, user_id: Option<UserId>) -> Result<Vec<WalletTransaction>, StorageError>;

    fn insert_earning(&self, earning: &VendorEarning) -> Result<(), StorageError>;
    fn update_earning_status(
        &self,
        booking_id: BookingId,
        earning_type: EarningType,
        status: EarningStatus,
    ) -> Result<(), StorageError>;
    fn list_earnings(&self, vendor_id: VendorId) -> Result<Vec<VendorEarning>, StorageError>;

    fn insert_payout(&self, payout: &PayoutRequest) -> Result<(), StorageError>;
    fn get_payout(&self, id: PayoutId) -> Result<PayoutRequest, StorageError>;
    fn update_payout(&self, payout: &PayoutRequest, expected: PayoutStatus) -> Result<(), StorageError>;
    fn list_payouts(&self, vendor_id: Option<VendorId>) -> Result<Vec<PayoutRequest>, StorageError>;

    // Ledger
    /// Creates the account if missing. Fails when it exists with another type.
    fn ensure_account(&self, account: &Account) -> Result<(), StorageError>;
    fn post_journal(&self, command: &CreateJournalCommand) -> Result<JournalEntry, StorageError>;
    fn get_balance(&self, account_id: &str) -> Result<Decimal, StorageError>;
    /// Postings to one account in posting order, with running balances.
    fn get_statement(&self, account_id: &str) -> Result<Vec<StatementLine>, StorageError>;
    /// All accounts in id order.
    fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;

    // Idempotency
    fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>, StorageError>;
    fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<(), StorageError>;

    fn begin_transaction(&self) -> Result<TransactionId, StorageError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
}
