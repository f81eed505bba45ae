use homeserve_core::{
    ledger, Booking, BookingFilter, BookingId, BookingStatus, CancellationRecord, CreateJournalCommand, EarningStatus,
    EarningType, ListingId, PaymentStatus, ServiceReview, StorageBackend, StorageError, TransactionType,
    UserId, VendorEarning, VendorId,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::{
    check_idempotency, optional, remember_idempotency, required, valid_pin_code, wallet::WalletEntry, MarketResult,
    Marketplace, Replay,
};
use crate::error::MarketError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub user_id: UserId,
    pub listing_id: ListingId,
    pub booking_date: Date,
    pub time_slot: String,
    pub user_address: String,
    pub user_pin_code: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelBooking {
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub user_id: UserId,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Which of a user's bookings to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingScope {
    #[default]
    All,
    /// Pending or confirmed.
    Booked,
    Completed,
    Cancelled,
}

impl BookingScope {
    fn includes(&self, status: BookingStatus) -> bool {
        match self {
            BookingScope::All => true,
            BookingScope::Booked => matches!(status, BookingStatus::Pending | BookingStatus::Confirmed),
            BookingScope::Completed => status == BookingStatus::Completed,
            BookingScope::Cancelled => status == BookingStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelledBooking {
    pub booking: Booking,
    pub cancellation: CancellationRecord,
}

fn require_status(booking: &Booking, allowed: &[BookingStatus], action: &'static str) -> MarketResult<()> {
    if !allowed.contains(&booking.status) {
        return Err(MarketError::transition("booking", booking.status, action));
    }
    Ok(())
}

fn require_vendor(booking: &Booking, vendor_id: VendorId) -> MarketResult<()> {
    if booking.vendor_id != vendor_id {
        return Err(MarketError::forbidden("booking belongs to another vendor"));
    }
    Ok(())
}

fn require_user(booking: &Booking, user_id: UserId) -> MarketResult<()> {
    if booking.user_id != user_id {
        return Err(MarketError::forbidden("booking belongs to another user"));
    }
    Ok(())
}

/// Stores the booking only if its status is still `expected`.
fn transition(storage: &dyn StorageBackend, booking: &mut Booking, expected: BookingStatus) -> MarketResult<()> {
    booking.updated_at = OffsetDateTime::now_utc();
    storage.update_booking(booking, expected).map_err(|e| match e {
        StorageError::Conflict { .. } => {
            MarketError::Conflict(format!("booking {} was changed by another request", booking.id))
        }
        other => other.into(),
    })
}

impl Marketplace {
    /// Books a listing and moves its price from the user's wallet into escrow.
    pub fn create_booking(&self, input: NewBooking, idempotency_key: Option<&str>) -> MarketResult<Booking> {
        let user_id = input.user_id;
        let operation = format!("create_booking:{user_id}");

        let (booking, fresh) = self.atomically_keyed("create_booking", |storage| {
            if let Replay::Seen(id) = check_idempotency(storage, idempotency_key, &operation)? {
                return Ok((storage.get_booking(id)?, false));
            }

            let time_slot = required("time slot", &input.time_slot)?;
            let user_address = required("service address", &input.user_address)?;
            let user_pin_code = valid_pin_code(&input.user_pin_code)?;
            let today = self.policy.today();
            if input.booking_date < today {
                return Err(MarketError::validation(format!(
                    "booking date {} is in the past",
                    input.booking_date
                )));
            }

            storage.get_user(user_id)?;
            let listing = storage.get_listing(input.listing_id)?;
            if !listing.is_active {
                return Err(MarketError::validation("this service is not currently offered"));
            }
            let vendor = storage.get_vendor(listing.vendor_id)?;
            if !vendor.is_approved() {
                return Err(MarketError::validation("this vendor is not accepting bookings"));
            }

            let price = listing.base_price;
            let balance_before = Self::user_balance(storage, user_id)?;
            if balance_before < price {
                return Err(MarketError::InsufficientBalance {
                    available: balance_before,
                    required: price,
                });
            }

            let now = OffsetDateTime::now_utc();
            let booking = Booking {
                id: Uuid::new_v4(),
                user_id,
                vendor_id: vendor.id,
                listing_id: listing.id,
                service_name: listing.service_name.clone(),
                booking_date: input.booking_date,
                time_slot,
                total_amount: price,
                vendor_amount: None,
                company_amount: None,
                user_address,
                user_pin_code,
                notes: optional(input.notes),
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Paid,
                created_at: now,
                updated_at: now,
            };
            storage.insert_booking(&booking)?;

            let journal = storage.post_journal(
                &CreateJournalCommand::new(format!("Payment for booking {}", booking.id), Some(booking.id))
                    .debit(ledger::user_wallet(user_id).id, price)
                    .credit(ledger::ESCROW, price),
            )?;
            WalletEntry {
                id: Uuid::new_v4(),
                user_id,
                transaction_type: TransactionType::Debit,
                amount: price,
                balance_before,
                description: format!("Payment for {}", listing.service_name),
                payment_method: Some("wallet".to_string()),
                reference_id: booking.id.to_string(),
                journal_id: journal.id,
                storage,
            }
            .record()?;

            remember_idempotency(storage, idempotency_key, &operation, booking.id)?;
            Ok((booking, true))
        })?;

        if fresh {
            Self::record_amount("homeserve_booking_paise_total", booking.total_amount);
            tracing::info!(
                booking_id = %booking.id,
                user_id = %booking.user_id,
                vendor_id = %booking.vendor_id,
                amount = %booking.total_amount,
                "Booking created"
            );
        }
        Ok(booking)
    }

    pub fn get_booking(&self, booking_id: BookingId) -> MarketResult<Booking> {
        self.read(|storage| Ok(storage.get_booking(booking_id)?))
    }

    /// Customer cancellation. The user is refunded the booking amount less the
    /// cancellation fee, which is shared between the vendor and the platform.
    /// A vendor earning recorded at approval is reversed.
    pub fn cancel_booking(&self, booking_id: BookingId, input: CancelBooking) -> MarketResult<CancelledBooking> {
        let reason = required("cancellation reason", &input.reason)?;

        let outcome = self.atomically("cancel_booking", |storage| {
            let mut booking = storage.get_booking(booking_id)?;
            require_user(&booking, input.user_id)?;
            require_status(&booking, &[BookingStatus::Pending, BookingStatus::Confirmed], "cancel")?;

            let previous = booking.status;
            let total = booking.total_amount;
            let split = self.policy.cancellation_split(total);
            let balance_before = Self::user_balance(storage, booking.user_id)?;

            let mut journal = CreateJournalCommand::new(format!("Cancellation of booking {}", booking.id), Some(booking.id));
            if previous == BookingStatus::Confirmed {
                let vendor_amount = booking
                    .vendor_amount
                    .unwrap_or_else(|| self.policy.booking_split(total).vendor_amount);
                journal = journal
                    .debit(ledger::vendor_pending(booking.vendor_id).id, vendor_amount)
                    .debit(ledger::ESCROW, total.saturating_sub(vendor_amount));
                storage.update_earning_status(booking.id, EarningType::Booking, EarningStatus::Reversed)?;
            } else {
                journal = journal.debit(ledger::ESCROW, total);
            }
            let journal = storage.post_journal(
                &journal
                    .credit(ledger::user_wallet(booking.user_id).id, split.refund)
                    .credit(ledger::vendor_available(booking.vendor_id).id, split.vendor_share)
                    .credit(ledger::REVENUE, split.platform_share),
            )?;

            booking.status = BookingStatus::Cancelled;
            booking.payment_status = PaymentStatus::PartiallyRefunded;
            transition(storage, &mut booking, previous)?;

            let now = OffsetDateTime::now_utc();
            let cancellation = CancellationRecord {
                booking_id: booking.id,
                user_id: booking.user_id,
                reason,
                cancellation_fee: split.fee,
                refund_amount: split.refund,
                vendor_share: split.vendor_share,
                platform_share: split.platform_share,
                created_at: now,
            };
            storage.insert_cancellation(&cancellation)?;

            if !split.fee.is_zero() {
                storage.insert_earning(&VendorEarning {
                    id: Uuid::new_v4(),
                    vendor_id: booking.vendor_id,
                    booking_id: booking.id,
                    total_amount: split.fee,
                    vendor_amount: split.vendor_share,
                    company_amount: split.platform_share,
                    earning_type: EarningType::CancellationFee,
                    status: EarningStatus::Available,
                    created_at: now,
                })?;
            }

            if !split.refund.is_zero() {
                WalletEntry {
                    id: Uuid::new_v4(),
                    user_id: booking.user_id,
                    transaction_type: TransactionType::Refund,
                    amount: split.refund,
                    balance_before,
                    description: format!("Refund for cancelled booking: {}", booking.service_name),
                    payment_method: Some("wallet".to_string()),
                    reference_id: booking.id.to_string(),
                    journal_id: journal.id,
                    storage,
                }
                .record()?;
            }

            Ok(CancelledBooking { booking, cancellation })
        })?;

        tracing::info!(
            booking_id = %booking_id,
            refund = %outcome.cancellation.refund_amount,
            vendor_share = %outcome.cancellation.vendor_share,
            platform_share = %outcome.cancellation.platform_share,
            "Booking cancelled by user"
        );
        Ok(outcome)
    }

    /// Vendor accepts a pending booking; the vendor's share moves from escrow
    /// into the vendor's pending balance.
    pub fn approve_booking(&self, booking_id: BookingId, vendor_id: VendorId) -> MarketResult<Booking> {
        let booking = self.atomically("approve_booking", |storage| {
            let mut booking = storage.get_booking(booking_id)?;
            require_vendor(&booking, vendor_id)?;
            require_status(&booking, &[BookingStatus::Pending], "approve")?;

            let split = self.policy.booking_split(booking.total_amount);
            if !split.vendor_amount.is_zero() {
                storage.post_journal(
                    &CreateJournalCommand::new(format!("Vendor share held for booking {}", booking.id), Some(booking.id))
                        .debit(ledger::ESCROW, split.vendor_amount)
                        .credit(ledger::vendor_pending(vendor_id).id, split.vendor_amount),
                )?;
            }

            booking.vendor_amount = Some(split.vendor_amount);
            booking.company_amount = Some(split.platform_amount);
            booking.status = BookingStatus::Confirmed;
            transition(storage, &mut booking, BookingStatus::Pending)?;

            storage.insert_earning(&VendorEarning {
                id: Uuid::new_v4(),
                vendor_id,
                booking_id: booking.id,
                total_amount: booking.total_amount,
                vendor_amount: split.vendor_amount,
                company_amount: split.platform_amount,
                earning_type: EarningType::Booking,
                status: EarningStatus::Pending,
                created_at: OffsetDateTime::now_utc(),
            })?;
            Ok(booking)
        })?;

        tracing::info!(booking_id = %booking.id, vendor_id = %vendor_id, "Booking approved");
        Ok(booking)
    }

    /// Vendor marks a confirmed booking done; the vendor's share becomes
    /// withdrawable and the platform's share is recognised as revenue.
    pub fn complete_booking(&self, booking_id: BookingId, vendor_id: VendorId) -> MarketResult<Booking> {
        let booking = self.atomically("complete_booking", |storage| {
            let mut booking = storage.get_booking(booking_id)?;
            require_vendor(&booking, vendor_id)?;
            require_status(&booking, &[BookingStatus::Confirmed], "complete")?;

            let split = self.policy.booking_split(booking.total_amount);
            let vendor_amount = booking.vendor_amount.unwrap_or(split.vendor_amount);
            let platform_amount = booking.company_amount.unwrap_or(split.platform_amount);
            storage.post_journal(
                &CreateJournalCommand::new(format!("Settlement of booking {}", booking.id), Some(booking.id))
                    .debit(ledger::vendor_pending(vendor_id).id, vendor_amount)
                    .credit(ledger::vendor_available(vendor_id).id, vendor_amount)
                    .debit(ledger::ESCROW, platform_amount)
                    .credit(ledger::REVENUE, platform_amount),
            )?;

            booking.status = BookingStatus::Completed;
            transition(storage, &mut booking, BookingStatus::Confirmed)?;
            storage.update_earning_status(booking.id, EarningType::Booking, EarningStatus::Available)?;

            let mut vendor = storage.get_vendor(vendor_id)?;
            vendor.jobs_completed += 1;
            storage.update_vendor(&vendor)?;
            Ok(booking)
        })?;

        tracing::info!(booking_id = %booking.id, vendor_id = %vendor_id, "Booking completed");
        Ok(booking)
    }

    /// Vendor declines a pending booking; the user gets the full amount back.
    pub fn reject_booking(&self, booking_id: BookingId, vendor_id: VendorId) -> MarketResult<Booking> {
        let booking = self.atomically("reject_booking", |storage| {
            let mut booking = storage.get_booking(booking_id)?;
            require_vendor(&booking, vendor_id)?;
            require_status(&booking, &[BookingStatus::Pending], "reject")?;

            let total = booking.total_amount;
            let balance_before = Self::user_balance(storage, booking.user_id)?;
            let journal = storage.post_journal(
                &CreateJournalCommand::new(format!("Refund for rejected booking {}", booking.id), Some(booking.id))
                    .debit(ledger::ESCROW, total)
                    .credit(ledger::user_wallet(booking.user_id).id, total),
            )?;

            booking.status = BookingStatus::Cancelled;
            booking.payment_status = PaymentStatus::Refunded;
            transition(storage, &mut booking, BookingStatus::Pending)?;

            WalletEntry {
                id: Uuid::new_v4(),
                user_id: booking.user_id,
                transaction_type: TransactionType::Refund,
                amount: total,
                balance_before,
                description: format!("Refund for declined booking: {}", booking.service_name),
                payment_method: Some("wallet".to_string()),
                reference_id: booking.id.to_string(),
                journal_id: journal.id,
                storage,
            }
            .record()?;
            Ok(booking)
        })?;

        tracing::info!(booking_id = %booking.id, vendor_id = %vendor_id, refund = %booking.total_amount, "Booking rejected");
        Ok(booking)
    }

    /// Records a review for a completed booking and refreshes the vendor's
    /// average rating.
    pub fn review_booking(&self, booking_id: BookingId, input: NewReview) -> MarketResult<ServiceReview> {
        if !(1..=5).contains(&input.rating) {
            return Err(MarketError::validation("rating must be between 1 and 5"));
        }

        let review = self.atomically("review_booking", |storage| {
            let booking = storage.get_booking(booking_id)?;
            require_user(&booking, input.user_id)?;
            require_status(&booking, &[BookingStatus::Completed], "review")?;

            let review = ServiceReview {
                id: Uuid::new_v4(),
                booking_id,
                user_id: input.user_id,
                vendor_id: booking.vendor_id,
                rating: input.rating,
                comment: optional(input.comment),
                created_at: OffsetDateTime::now_utc(),
            };
            storage.insert_review(&review).map_err(|e| match e {
                StorageError::AlreadyExists { .. } => MarketError::Conflict("booking has already been reviewed".into()),
                other => other.into(),
            })?;

            let ratings: Vec<Decimal> = storage
                .list_reviews(Some(booking.vendor_id))?
                .iter()
                .map(|r| Decimal::from(r.rating))
                .collect();
            let mut vendor = storage.get_vendor(booking.vendor_id)?;
            vendor.rating = average_rating(&ratings);
            storage.update_vendor(&vendor)?;
            Ok(review)
        })?;

        tracing::info!(booking_id = %booking_id, vendor_id = %review.vendor_id, rating = review.rating, "Booking reviewed");
        Ok(review)
    }

    pub fn user_bookings(&self, user_id: UserId, scope: BookingScope) -> MarketResult<Vec<Booking>> {
        self.read(|storage| {
            storage.get_user(user_id)?;
            Ok(storage
                .list_bookings(&BookingFilter {
                    user_id: Some(user_id),
                    ..BookingFilter::default()
                })?
                .into_iter()
                .filter(|b| scope.includes(b.status))
                .collect())
        })
    }

    pub fn vendor_orders(&self, vendor_id: VendorId) -> MarketResult<Vec<Booking>> {
        self.read(|storage| {
            storage.get_vendor(vendor_id)?;
            Ok(storage.list_bookings(&BookingFilter {
                vendor_id: Some(vendor_id),
                ..BookingFilter::default()
            })?)
        })
    }

    pub fn cancellation(&self, booking_id: BookingId) -> MarketResult<Option<CancellationRecord>> {
        self.read(|storage| Ok(storage.get_cancellation(booking_id)?))
    }
}

/// Mean of the ratings to one decimal place; zero when there are none.
fn average_rating(ratings: &[Decimal]) -> Decimal {
    if ratings.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = ratings.iter().sum();
    (sum / Decimal::from(ratings.len())).round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}
