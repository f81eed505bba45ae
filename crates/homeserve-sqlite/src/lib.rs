//! SQLite storage backend for HomeServe.
//!
//! Each record table keeps the columns needed for lookups, filters and
//! compare-and-set updates next to a `data` column holding the full record
//! as JSON. Ledger postings are stored relationally.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
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
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Params};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tx_counter: AtomicU64,
    active_tx: Mutex<Option<TransactionId>>,
}

impl SqliteStorage {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(other)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(other)?;

        let storage = Self {
            conn: Mutex::new(conn),
            tx_counter: AtomicU64::new(1),
            active_tx: Mutex::new(None),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vendors (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                approval_status TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS admins (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payment_methods (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_payment_methods_user ON payment_methods(user_id);

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name
                ON categories(name COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                vendor_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                vendor_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bookings_user ON bookings(user_id);
            CREATE INDEX IF NOT EXISTS idx_bookings_vendor ON bookings(vendor_id);

            CREATE TABLE IF NOT EXISTS cancellations (
                booking_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                booking_id TEXT NOT NULL UNIQUE,
                vendor_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS earnings (
                id TEXT PRIMARY KEY,
                vendor_id TEXT NOT NULL,
                booking_id TEXT NOT NULL,
                earning_type TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payouts (
                id TEXT PRIMARY KEY,
                vendor_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS idempotency_keys (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                account_type TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS journals (
                id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL,
                description TEXT NOT NULL,
                reference TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                journal_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                FOREIGN KEY (journal_id) REFERENCES journals(id),
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_account
                ON ledger_entries(account_id);

            CREATE TABLE IF NOT EXISTS sequence_counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO sequence_counter (id, value) VALUES (1, 0);
            ",
        )
        .map_err(other)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Other("connection lock poisoned".to_string()))
    }

    fn active_tx(&self) -> Result<MutexGuard<'_, Option<TransactionId>>, StorageError> {
        self.active_tx
            .lock()
            .map_err(|_| StorageError::Other("transaction lock poisoned".to_string()))
    }

    fn next_sequence(conn: &Connection) -> Result<u64, StorageError> {
        conn.execute("UPDATE sequence_counter SET value = value + 1 WHERE id = 1", [])
            .map_err(other)?;
        conn.query_row("SELECT value FROM sequence_counter WHERE id = 1", [], |r| r.get(0))
            .map_err(other)
    }

    fn account_type(conn: &Connection, account_id: &str) -> Result<Option<AccountType>, StorageError> {
        let text: Option<String> = conn
            .query_row(
                "SELECT account_type FROM accounts WHERE id = ?1",
                params![account_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(other)?;
        text.map(|t| AccountType::from_str(&t).map_err(StorageError::Other))
            .transpose()
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl Params,
        entity: &'static str,
        id: Uuid,
    ) -> Result<T, StorageError> {
        let conn = self.conn()?;
        query_one(&conn, sql, params)?.ok_or_else(|| StorageError::not_found(entity, id))
    }

    fn fetch_all<T: DeserializeOwned>(&self, sql: &str, params: impl Params) -> Result<Vec<T>, StorageError> {
        let conn = self.conn()?;
        query_all(&conn, sql, params)
    }

    /// Runs an insert, mapping constraint violations to `AlreadyExists`.
    fn insert(
        &self,
        sql: &str,
        params: impl Params,
        entity: &'static str,
        id: impl std::fmt::Display,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(sql, params).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
                StorageError::already_exists(entity, id)
            }
            e => other(e),
        })?;
        Ok(())
    }

    /// Runs an update that must touch exactly one row.
    fn update(&self, sql: &str, params: impl Params, entity: &'static str, id: Uuid) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute(sql, params).map_err(other)?;
        if changed == 0 {
            return Err(StorageError::not_found(entity, id));
        }
        Ok(())
    }

    /// Compare-and-set on a status column. Distinguishes a missing row from a
    /// row whose status moved on.
    fn update_if_status(
        &self,
        table: &str,
        entity: &'static str,
        id: Uuid,
        status: &str,
        expected: &str,
        data: String,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let sql = format!("UPDATE {table} SET status = ?1, data = ?2 WHERE id = ?3 AND status = ?4");
        let changed = conn
            .execute(&sql, params![status, data, id.to_string(), expected])
            .map_err(other)?;
        if changed == 1 {
            return Ok(());
        }
        let exists: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                params![id.to_string()],
                |r| r.get(0),
            )
            .optional()
            .map_err(other)?;
        match exists {
            Some(_) => Err(StorageError::conflict(entity, id, expected)),
            None => Err(StorageError::not_found(entity, id)),
        }
    }
}

fn other(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(other)
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, StorageError> {
    serde_json::from_str(text).map_err(other)
}

fn query_one<T: DeserializeOwned>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>, StorageError> {
    let text: Option<String> = conn.query_row(sql, params, |r| r.get(0)).optional().map_err(other)?;
    text.map(|t| from_json(&t)).transpose()
}

fn query_all<T: DeserializeOwned>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(other)?;
    let rows = stmt.query_map(params, |r| r.get::<_, String>(0)).map_err(other)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(from_json(&row.map_err(other)?)?);
    }
    Ok(result)
}

fn parse_decimal(text: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(text).map_err(other)
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|i| i.to_string())
}

impl StorageBackend for SqliteStorage {
    fn insert_user(&self, user: &UserProfile) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO users (id, email, data) VALUES (?1, ?2, ?3)",
            params![user.id.to_string(), user.email, to_json(user)?],
            "user",
            &user.email,
        )
    }

    fn update_user(&self, user: &UserProfile) -> Result<(), StorageError> {
        self.update(
            "UPDATE users SET email = ?1, data = ?2 WHERE id = ?3",
            params![user.email, to_json(user)?, user.id.to_string()],
            "user",
            user.id,
        )
    }

    fn get_user(&self, id: UserId) -> Result<UserProfile, StorageError> {
        self.fetch("SELECT data FROM users WHERE id = ?1", params![id.to_string()], "user", id)
    }

    fn list_users(&self) -> Result<Vec<UserProfile>, StorageError> {
        self.fetch_all("SELECT data FROM users ORDER BY rowid DESC", [])
    }

    fn insert_vendor(&self, vendor: &VendorProfile) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO vendors (id, email, approval_status, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                vendor.id.to_string(),
                vendor.email,
                vendor.approval_status.as_str(),
                to_json(vendor)?
            ],
            "vendor",
            &vendor.email,
        )
    }

    fn update_vendor(&self, vendor: &VendorProfile) -> Result<(), StorageError> {
        self.update(
            "UPDATE vendors SET email = ?1, approval_status = ?2, data = ?3 WHERE id = ?4",
            params![
                vendor.email,
                vendor.approval_status.as_str(),
                to_json(vendor)?,
                vendor.id.to_string()
            ],
            "vendor",
            vendor.id,
        )
    }

    fn get_vendor(&self, id: VendorId) -> Result<VendorProfile, StorageError> {
        self.fetch("SELECT data FROM vendors WHERE id = ?1", params![id.to_string()], "vendor", id)
    }

    fn list_vendors(&self, status: Option<ApprovalStatus>) -> Result<Vec<VendorProfile>, StorageError> {
        self.fetch_all(
            "SELECT data FROM vendors WHERE (?1 IS NULL OR approval_status = ?1) ORDER BY rowid DESC",
            params![status.map(|s| s.as_str())],
        )
    }

    fn insert_admin(&self, admin: &AdminProfile) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO admins (id, email, data) VALUES (?1, ?2, ?3)",
            params![admin.id.to_string(), admin.email, to_json(admin)?],
            "admin",
            &admin.email,
        )
    }

    fn list_admins(&self) -> Result<Vec<AdminProfile>, StorageError> {
        self.fetch_all("SELECT data FROM admins ORDER BY rowid DESC", [])
    }

    fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO payment_methods (id, user_id, data) VALUES (?1, ?2, ?3)",
            params![method.id.to_string(), method.user_id.to_string(), to_json(method)?],
            "payment method",
            method.id,
        )
    }

    fn update_payment_method(&self, method: &PaymentMethod) -> Result<(), StorageError> {
        self.update(
            "UPDATE payment_methods SET data = ?1 WHERE id = ?2",
            params![to_json(method)?, method.id.to_string()],
            "payment method",
            method.id,
        )
    }

    fn delete_payment_method(&self, id: PaymentMethodId) -> Result<(), StorageError> {
        self.update(
            "DELETE FROM payment_methods WHERE id = ?1",
            params![id.to_string()],
            "payment method",
            id,
        )
    }

    fn get_payment_method(&self, id: PaymentMethodId) -> Result<PaymentMethod, StorageError> {
        self.fetch(
            "SELECT data FROM payment_methods WHERE id = ?1",
            params![id.to_string()],
            "payment method",
            id,
        )
    }

    fn list_payment_methods(&self, user_id: Option<UserId>) -> Result<Vec<PaymentMethod>, StorageError> {
        self.fetch_all(
            "SELECT data FROM payment_methods WHERE (?1 IS NULL OR user_id = ?1) ORDER BY rowid DESC",
            params![opt_id(user_id)],
        )
    }

    fn insert_category(&self, category: &ServiceCategory) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO categories (id, name, data) VALUES (?1, ?2, ?3)",
            params![category.id.to_string(), category.name, to_json(category)?],
            "category",
            &category.name,
        )
    }

    fn get_category(&self, id: CategoryId) -> Result<ServiceCategory, StorageError> {
        self.fetch(
            "SELECT data FROM categories WHERE id = ?1",
            params![id.to_string()],
            "category",
            id,
        )
    }

    fn list_categories(&self) -> Result<Vec<ServiceCategory>, StorageError> {
        self.fetch_all("SELECT data FROM categories ORDER BY name", [])
    }

    fn insert_listing(&self, listing: &ServiceListing) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO listings (id, vendor_id, category_id, is_active, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                listing.id.to_string(),
                listing.vendor_id.to_string(),
                listing.category_id.to_string(),
                listing.is_active,
                to_json(listing)?
            ],
            "listing",
            listing.id,
        )
    }

    fn update_listing(&self, listing: &ServiceListing) -> Result<(), StorageError> {
        self.update(
            "UPDATE listings SET category_id = ?1, is_active = ?2, data = ?3 WHERE id = ?4",
            params![
                listing.category_id.to_string(),
                listing.is_active,
                to_json(listing)?,
                listing.id.to_string()
            ],
            "listing",
            listing.id,
        )
    }

    fn delete_listing(&self, id: ListingId) -> Result<(), StorageError> {
        self.update(
            "DELETE FROM listings WHERE id = ?1",
            params![id.to_string()],
            "listing",
            id,
        )
    }

    fn get_listing(&self, id: ListingId) -> Result<ServiceListing, StorageError> {
        self.fetch(
            "SELECT data FROM listings WHERE id = ?1",
            params![id.to_string()],
            "listing",
            id,
        )
    }

    fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<ServiceListing>, StorageError> {
        self.fetch_all(
            "SELECT data FROM listings
             WHERE (?1 IS NULL OR vendor_id = ?1)
               AND (?2 IS NULL OR category_id = ?2)
               AND (?3 = 0 OR is_active = 1)
             ORDER BY rowid DESC",
            params![opt_id(filter.vendor_id), opt_id(filter.category_id), filter.active_only],
        )
    }

    fn insert_booking(&self, booking: &Booking) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO bookings (id, user_id, vendor_id, status, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                booking.id.to_string(),
                booking.user_id.to_string(),
                booking.vendor_id.to_string(),
                booking.status.as_str(),
                to_json(booking)?
            ],
            "booking",
            booking.id,
        )
    }

    fn get_booking(&self, id: BookingId) -> Result<Booking, StorageError> {
        self.fetch(
            "SELECT data FROM bookings WHERE id = ?1",
            params![id.to_string()],
            "booking",
            id,
        )
    }

    fn update_booking(&self, booking: &Booking, expected: BookingStatus) -> Result<(), StorageError> {
        self.update_if_status(
            "bookings",
            "booking",
            booking.id,
            booking.status.as_str(),
            expected.as_str(),
            to_json(booking)?,
        )
    }

    fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StorageError> {
        self.fetch_all(
            "SELECT data FROM bookings
             WHERE (?1 IS NULL OR user_id = ?1)
               AND (?2 IS NULL OR vendor_id = ?2)
             ORDER BY rowid DESC",
            params![opt_id(filter.user_id), opt_id(filter.vendor_id)],
        )
    }

    fn insert_cancellation(&self, record: &CancellationRecord) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO cancellations (booking_id, data) VALUES (?1, ?2)",
            params![record.booking_id.to_string(), to_json(record)?],
            "cancellation",
            record.booking_id,
        )
    }

    fn get_cancellation(&self, booking_id: BookingId) -> Result<Option<CancellationRecord>, StorageError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            "SELECT data FROM cancellations WHERE booking_id = ?1",
            params![booking_id.to_string()],
        )
    }

    fn insert_review(&self, review: &ServiceReview) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO reviews (id, booking_id, vendor_id, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                review.id.to_string(),
                review.booking_id.to_string(),
                review.vendor_id.to_string(),
                to_json(review)?
            ],
            "review",
            review.booking_id,
        )
    }

    fn list_reviews(&self, vendor_id: Option<VendorId>) -> Result<Vec<ServiceReview>, StorageError> {
        self.fetch_all(
            "SELECT data FROM reviews WHERE (?1 IS NULL OR vendor_id = ?1) ORDER BY rowid DESC",
            params![opt_id(vendor_id)],
        )
    }

    fn insert_wallet_transaction(&self, txn: &WalletTransaction) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO wallet_transactions (id, user_id, data) VALUES (?1, ?2, ?3)",
            params![txn.id.to_string(), txn.user_id.to_string(), to_json(txn)?],
            "wallet transaction",
            txn.id,
        )
    }

    fn list_wallet_transactions(&self, user_id: Option<UserId>) -> Result<Vec<WalletTransaction>, StorageError> {
        self.fetch_all(
            "SELECT data FROM wallet_transactions WHERE (?1 IS NULL OR user_id = ?1) ORDER BY rowid DESC",
            params![opt_id(user_id)],
        )
    }

    fn insert_earning(&self, earning: &VendorEarning) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO earnings (id, vendor_id, booking_id, earning_type, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                earning.id.to_string(),
                earning.vendor_id.to_string(),
                earning.booking_id.to_string(),
                earning.earning_type.as_str(),
                to_json(earning)?
            ],
            "earning",
            earning.id,
        )
    }

    fn update_earning_status(
        &self,
        booking_id: BookingId,
        earning_type: EarningType,
        status: EarningStatus,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let earnings: Vec<VendorEarning> = query_all(
            &conn,
            "SELECT data FROM earnings WHERE booking_id = ?1 AND earning_type = ?2",
            params![booking_id.to_string(), earning_type.as_str()],
        )?;
        if earnings.is_empty() {
            return Err(StorageError::not_found("earning", booking_id));
        }
        for mut earning in earnings {
            earning.status = status;
            conn.execute(
                "UPDATE earnings SET data = ?1 WHERE id = ?2",
                params![to_json(&earning)?, earning.id.to_string()],
            )
            .map_err(other)?;
        }
        Ok(())
    }

    fn list_earnings(&self, vendor_id: VendorId) -> Result<Vec<VendorEarning>, StorageError> {
        self.fetch_all(
            "SELECT data FROM earnings WHERE vendor_id = ?1 ORDER BY rowid DESC",
            params![vendor_id.to_string()],
        )
    }

    fn insert_payout(&self, payout: &PayoutRequest) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO payouts (id, vendor_id, status, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                payout.id.to_string(),
                payout.vendor_id.to_string(),
                payout.status.as_str(),
                to_json(payout)?
            ],
            "payout",
            payout.id,
        )
    }

    fn get_payout(&self, id: PayoutId) -> Result<PayoutRequest, StorageError> {
        self.fetch("SELECT data FROM payouts WHERE id = ?1", params![id.to_string()], "payout", id)
    }

    fn update_payout(&self, payout: &PayoutRequest, expected: PayoutStatus) -> Result<(), StorageError> {
        self.update_if_status(
            "payouts",
            "payout",
            payout.id,
            payout.status.as_str(),
            expected.as_str(),
            to_json(payout)?,
        )
    }

    fn list_payouts(&self, vendor_id: Option<VendorId>) -> Result<Vec<PayoutRequest>, StorageError> {
        self.fetch_all(
            "SELECT data FROM payouts WHERE (?1 IS NULL OR vendor_id = ?1) ORDER BY rowid DESC",
            params![opt_id(vendor_id)],
        )
    }

    fn ensure_account(&self, account: &Account) -> Result<(), StorageError> {
        let conn = self.conn()?;
        match Self::account_type(&conn, &account.id)? {
            Some(existing) if existing != account.account_type => {
                Err(StorageError::AccountTypeMismatch(account.id.to_string()))
            }
            Some(_) => Ok(()),
            None => {
                conn.execute(
                    "INSERT INTO accounts (id, account_type) VALUES (?1, ?2)",
                    params![&*account.id, account.account_type.as_str()],
                )
                .map_err(other)?;
                Ok(())
            }
        }
    }

    fn post_journal(&self, command: &CreateJournalCommand) -> Result<JournalEntry, StorageError> {
        ledger::validate_journal(command)?;

        let conn = self.conn()?;
        let mut postings = Vec::with_capacity(command.ledger_entries.len());
        for entry in &command.ledger_entries {
            let account_type = Self::account_type(&conn, entry.account_id())?
                .ok_or_else(|| StorageError::AccountNotFound(entry.account_id().to_string()))?;
            postings.push((entry.account_id().clone(), ledger::signed_amount(account_type, entry)));
        }

        let journal = JournalEntry {
            id: Uuid::new_v4(),
            sequence: Self::next_sequence(&conn)?,
            description: command.description.clone(),
            reference: command.reference,
            created_at: OffsetDateTime::now_utc(),
        };

        conn.execute(
            "INSERT INTO journals (id, sequence, description, reference, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                journal.id.to_string(),
                journal.sequence,
                &*journal.description,
                opt_id(journal.reference),
                journal.created_at.format(&Rfc3339).map_err(other)?
            ],
        )
        .map_err(other)?;

        for (account_id, amount) in postings {
            conn.execute(
                "INSERT INTO ledger_entries (journal_id, account_id, amount) VALUES (?1, ?2, ?3)",
                params![journal.id.to_string(), &*account_id, amount.to_string()],
            )
            .map_err(other)?;
        }

        tracing::debug!(journal_id = %journal.id, sequence = journal.sequence, "Journal posted");
        Ok(journal)
    }

    fn get_balance(&self, account_id: &str) -> Result<Decimal, StorageError> {
        let conn = self.conn()?;
        if Self::account_type(&conn, account_id)?.is_none() {
            return Err(StorageError::AccountNotFound(account_id.to_string()));
        }
        let mut stmt = conn
            .prepare("SELECT amount FROM ledger_entries WHERE account_id = ?1")
            .map_err(other)?;
        let rows = stmt
            .query_map(params![account_id], |r| r.get::<_, String>(0))
            .map_err(other)?;
        let mut balance = Decimal::ZERO;
        for row in rows {
            balance += parse_decimal(&row.map_err(other)?)?;
        }
        Ok(balance)
    }

    fn get_statement(&self, account_id: &str) -> Result<Vec<StatementLine>, StorageError> {
        let conn = self.conn()?;
        if Self::account_type(&conn, account_id)?.is_none() {
            return Err(StorageError::AccountNotFound(account_id.to_string()));
        }
        let mut stmt = conn
            .prepare(
                "SELECT j.id, j.sequence, j.description, le.amount
                 FROM ledger_entries le
                 JOIN journals j ON j.id = le.journal_id
                 WHERE le.account_id = ?1
                 ORDER BY le.id",
            )
            .map_err(other)?;
        let rows = stmt
            .query_map(params![account_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, u64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })
            .map_err(other)?;

        let mut balance = Decimal::ZERO;
        let mut lines = Vec::new();
        for row in rows {
            let (journal_id, sequence, description, amount) = row.map_err(other)?;
            let amount = parse_decimal(&amount)?;
            balance += amount;
            lines.push(StatementLine {
                journal_id: Uuid::parse_str(&journal_id).map_err(other)?,
                sequence,
                description: Arc::from(description),
                amount,
                balance,
            });
        }
        Ok(lines)
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, account_type FROM accounts ORDER BY id")
            .map_err(other)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(other)?;
        let mut accounts = Vec::new();
        for row in rows {
            let (id, account_type) = row.map_err(other)?;
            let account_type = AccountType::from_str(&account_type).map_err(StorageError::Other)?;
            accounts.push(Account::new(id, account_type));
        }
        Ok(accounts)
    }

    fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>, StorageError> {
        let conn = self.conn()?;
        query_one(&conn, "SELECT data FROM idempotency_keys WHERE key = ?1", params![key])
    }

    fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<(), StorageError> {
        self.insert(
            "INSERT INTO idempotency_keys (key, data) VALUES (?1, ?2)",
            params![record.key, to_json(record)?],
            "idempotency key",
            &record.key,
        )
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut active = self.active_tx()?;
        if active.is_some() {
            return Err(StorageError::TransactionActive);
        }
        let conn = self.conn()?;
        conn.execute_batch("SAVEPOINT homeserve_tx").map_err(other)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        *active = Some(tx_id);
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn()?;
        conn.execute_batch("RELEASE SAVEPOINT homeserve_tx").map_err(other)?;
        *active = None;
        tracing::debug!(tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut active = self.active_tx()?;
        if *active != Some(tx_id) {
            return Err(StorageError::NoActiveTransaction);
        }
        let conn = self.conn()?;
        conn.execute_batch("ROLLBACK TO SAVEPOINT homeserve_tx; RELEASE SAVEPOINT homeserve_tx")
            .map_err(other)?;
        *active = None;
        tracing::debug!(tx_id, "SQLite transaction rolled back");
        Ok(())
    }
}
