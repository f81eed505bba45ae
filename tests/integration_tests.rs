use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use homeserve::error::MarketError;

use homeserve::marketplace::{
    BookingScope, CancelBooking, ListingInput, Marketplace, NewBooking, NewPaymentMethod, NewPayout, NewReview,
    NewUser, NewVendor, SearchQuery, SearchSort, TopUp, UserAddress, UserUpdate, VendorDetails, VendorDocumentsInput,
};
use homeserve_core::{
    ledger, ApprovalStatus, BankDetails, Booking, BookingStatus, CancellationRecord, EarningStatus, EarningType, Money,
    NotificationPreferences, PaymentMethodType, PaymentStatus, PayoutStatus, Policy, ServiceListing, StorageBackend,
    StorageError, TransactionType, UserDocuments, UserProfile, VendorProfile,
};
use homeserve_memory::InMemoryStorage;
use homeserve_sqlite::SqliteStorage;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::{Duration, OffsetDateTime};

fn memory_storage() -> Arc<dyn StorageBackend> {
    Arc::new(InMemoryStorage::new())
}

fn sqlite_storage() -> Arc<dyn StorageBackend> {
    Arc::new(SqliteStorage::new(":memory:").unwrap())
}

fn memory_market() -> Marketplace {
    Marketplace::new(memory_storage(), Policy::default()).unwrap()
}

fn sqlite_market() -> Marketplace {
    Marketplace::new(sqlite_storage(), Policy::default()).unwrap()
}

/// Generates one test per storage backend for each scenario function.
/// Scenarios listed after `storage:` receive the backend itself so they can
/// open several marketplaces over it.
macro_rules! backend_tests {
    ($($scenario:ident),* $(,)? $(; storage: $($storage_scenario:ident),* $(,)?)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<$scenario _memory>]() {
                    $scenario(memory_market());
                }

                #[test]
                fn [<$scenario _sqlite>]() {
                    $scenario(sqlite_market());
                }
            )*
            $($(
                #[test]
                fn [<$storage_scenario _memory>]() {
                    $storage_scenario(memory_storage());
                }

                #[test]
                fn [<$storage_scenario _sqlite>]() {
                    $storage_scenario(sqlite_storage());
                }
            )*)?
        }
    };
}

fn money(amount: u32) -> Money {
    Money::from(amount)
}

fn balance(market: &Marketplace, account: &str) -> Decimal {
    market.storage().get_balance(account).unwrap()
}

fn user_balance(market: &Marketplace, user: &UserProfile) -> Money {
    market.wallet(user.id).unwrap().balance
}

struct Fixture {
    user: UserProfile,
    vendor: VendorProfile,
    listing: ServiceListing,
}

fn register_user(market: &Marketplace, name: &str) -> UserProfile {
    market
        .register_user(NewUser {
            full_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: "9876543210".to_string(),
        })
        .unwrap()
}

/// Walks a vendor through the three onboarding steps, leaving it pending review.
fn submit_vendor(market: &Marketplace, business: &str) -> VendorProfile {
    market.seed_categories(&["Cleaning".to_string()]).unwrap();
    let category = market.category_by_name("cleaning").unwrap();
    let vendor = market
        .register_vendor(NewVendor {
            business_name: business.to_string(),
            email: format!("{}@example.com", business.to_lowercase().replace(' ', "")),
            phone: "9000000000".to_string(),
        })
        .unwrap();
    assert_eq!(vendor.approval_status, ApprovalStatus::Draft);

    market
        .submit_vendor_details(
            vendor.id,
            VendorDetails {
                first_name: "Ravi".to_string(),
                last_name: "Kumar".to_string(),
                location: "Indiranagar".to_string(),
                pin_code: "560038".to_string(),
                category_id: category.id,
                profile_image_url: None,
            },
        )
        .unwrap();
    market
        .submit_vendor_documents(
            vendor.id,
            VendorDocumentsInput {
                aadhar_card_url: "https://files.example.com/aadhar.pdf".to_string(),
                pan_card_url: "https://files.example.com/pan.pdf".to_string(),
                gst_certificate_url: None,
                service_location: "Bengaluru East".to_string(),
                service_pin_code: "560038".to_string(),
            },
        )
        .unwrap();
    let submitted = market
        .submit_vendor_bank(
            vendor.id,
            BankDetails {
                bank_name: "State Bank".to_string(),
                account_number: "001122334455".to_string(),
                ifsc_code: "SBIN0000001".to_string(),
                account_holder_name: "Ravi Kumar".to_string(),
            },
        )
        .unwrap();
    assert_eq!(submitted.approval_status, ApprovalStatus::Pending);
    submitted
}

fn onboard_vendor(market: &Marketplace, business: &str) -> VendorProfile {
    let vendor = submit_vendor(market, business);
    market.approve_vendor(vendor.id).unwrap()
}

fn listing_input(market: &Marketplace, name: &str, price: u32) -> ListingInput {
    ListingInput {
        category_id: market.category_by_name("Cleaning").unwrap().id,
        service_name: name.to_string(),
        description: Some("Full home deep clean".to_string()),
        base_price: money(price),
        price_unit: None,
        location: None,
        pin_code: None,
    }
}

fn setup(market: &Marketplace, price: u32) -> Fixture {
    let user = register_user(market, "Asha");
    let vendor = onboard_vendor(market, "Sparkle Homes");
    let listing = market
        .create_listing(vendor.id, listing_input(market, "Deep Cleaning", price))
        .unwrap();
    Fixture { user, vendor, listing }
}

fn top_up(market: &Marketplace, user: &UserProfile, amount: u32) {
    market
        .top_up(
            user.id,
            TopUp {
                amount: money(amount),
                payment_method: None,
            },
            None,
        )
        .unwrap();
}

fn new_booking(fx: &Fixture, days_ahead: i64) -> NewBooking {
    NewBooking {
        user_id: fx.user.id,
        listing_id: fx.listing.id,
        booking_date: OffsetDateTime::now_utc().date() + Duration::days(days_ahead),
        time_slot: "10:00-12:00".to_string(),
        user_address: "12 MG Road".to_string(),
        user_pin_code: "560001".to_string(),
        notes: None,
    }
}

fn book(market: &Marketplace, fx: &Fixture, key: Option<&str>) -> Result<Booking, MarketError> {
    market.create_booking(new_booking(fx, 2), key)
}

fn cancel(market: &Marketplace, fx: &Fixture, booking: &Booking) -> Result<Booking, MarketError> {
    market
        .cancel_booking(
            booking.id,
            CancelBooking {
                user_id: fx.user.id,
                reason: "Plans changed".to_string(),
            },
        )
        .map(|outcome| outcome.booking)
}

fn assert_balanced(market: &Marketplace) {
    let trial_balance = market.trial_balance().unwrap();
    assert!(trial_balance.is_balanced(), "unbalanced ledger:\n{trial_balance}");
}

fn top_up_adds_to_balance(market: Marketplace) {
    let user = register_user(&market, "Asha");
    assert_eq!(user_balance(&market, &user), Money::ZERO);

    let txn = market
        .top_up(
            user.id,
            TopUp {
                amount: money(1000),
                payment_method: Some("upi".to_string()),
            },
            None,
        )
        .unwrap();
    assert_eq!(txn.transaction_type, TransactionType::Recharge);
    assert_eq!(txn.balance_before, Money::ZERO);
    assert_eq!(txn.balance_after, money(1000));
    assert!(txn.reference_id.starts_with("DUMMY_"));

    top_up(&market, &user, 1000);
    let wallet = market.wallet(user.id).unwrap();
    assert_eq!(wallet.balance, money(2000));
    assert_eq!(wallet.transactions.len(), 2);
    assert_eq!(wallet.transactions[0].balance_before, money(1000));
    assert_eq!(balance(&market, ledger::CASH), dec!(2000));
    assert_balanced(&market);
}

fn top_up_limits_are_enforced(market: Marketplace) {
    let user = register_user(&market, "Asha");
    for amount in [50, 100_001] {
        let result = market.top_up(
            user.id,
            TopUp {
                amount: money(amount),
                payment_method: None,
            },
            None,
        );
        assert!(matches!(result, Err(MarketError::Validation(_))), "{amount}: {result:?}");
    }
    assert_eq!(user_balance(&market, &user), Money::ZERO);
}

fn booking_moves_price_into_escrow(market: Marketplace) {
    let fx = setup(&market, 500);
    top_up(&market, &fx.user, 1000);

    let booking = book(&market, &fx, None).unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.total_amount, money(500));

    assert_eq!(user_balance(&market, &fx.user), money(500));
    assert_eq!(balance(&market, ledger::ESCROW), dec!(500));
    let wallet = market.wallet(fx.user.id).unwrap();
    assert_eq!(wallet.transactions[0].transaction_type, TransactionType::Debit);
    assert_eq!(wallet.transactions[0].reference_id, booking.id.to_string());
    assert_eq!(market.vendor_orders(fx.vendor.id).unwrap().len(), 1);
    assert_balanced(&market);
}

fn booking_without_funds_changes_nothing(market: Marketplace) {
    let fx = setup(&market, 500);
    top_up(&market, &fx.user, 100);

    let err = book(&market, &fx, Some("book-1")).unwrap_err();
    match err {
        MarketError::InsufficientBalance { available, required } => {
            assert_eq!(available, money(100));
            assert_eq!(required, money(500));
        }
        other => panic!("expected insufficient balance, got {other:?}"),
    }

    assert!(market.user_bookings(fx.user.id, BookingScope::All).unwrap().is_empty());
    assert_eq!(user_balance(&market, &fx.user), money(100));
    assert_eq!(balance(&market, ledger::ESCROW), Decimal::ZERO);
    assert_eq!(market.wallet(fx.user.id).unwrap().transactions.len(), 1);
    assert!(market.storage().get_idempotency_record("book-1").unwrap().is_none());
    assert_balanced(&market);
}

fn cancellation_splits_the_fee(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();

    let outcome = market
        .cancel_booking(
            booking.id,
            CancelBooking {
                user_id: fx.user.id,
                reason: "Plans changed".to_string(),
            },
        )
        .unwrap();
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
    assert_eq!(outcome.booking.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(outcome.cancellation.cancellation_fee, money(300));
    assert_eq!(outcome.cancellation.refund_amount, money(700));
    assert_eq!(outcome.cancellation.vendor_share, money(150));
    assert_eq!(outcome.cancellation.platform_share, money(150));

    assert_eq!(user_balance(&market, &fx.user), money(700));
    assert_eq!(balance(&market, &ledger::vendor_available(fx.vendor.id).id), dec!(150));
    assert_eq!(balance(&market, ledger::REVENUE), dec!(150));
    assert_eq!(balance(&market, ledger::ESCROW), Decimal::ZERO);

    let wallet = market.wallet(fx.user.id).unwrap();
    assert_eq!(wallet.transactions[0].transaction_type, TransactionType::Refund);
    assert_eq!(wallet.transactions[0].amount, money(700));
    assert_eq!(market.cancellation(booking.id).unwrap(), Some(outcome.cancellation));

    let vendor_wallet = market.vendor_wallet(fx.vendor.id).unwrap();
    assert_eq!(vendor_wallet.available_balance, money(150));
    assert_eq!(vendor_wallet.total_earned, money(150));
    assert_balanced(&market);
}

fn cancellation_after_approval_reverses_vendor_share(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();

    let approved = market.approve_booking(booking.id, fx.vendor.id).unwrap();
    assert_eq!(approved.status, BookingStatus::Confirmed);
    assert_eq!(approved.vendor_amount, Some(money(500)));
    assert_eq!(market.vendor_wallet(fx.vendor.id).unwrap().pending_balance, money(500));

    cancel(&market, &fx, &booking).unwrap();

    let vendor_wallet = market.vendor_wallet(fx.vendor.id).unwrap();
    assert_eq!(vendor_wallet.pending_balance, Money::ZERO);
    assert_eq!(vendor_wallet.available_balance, money(150));
    assert_eq!(user_balance(&market, &fx.user), money(700));
    assert_eq!(balance(&market, ledger::ESCROW), Decimal::ZERO);
    assert_eq!(balance(&market, ledger::REVENUE), dec!(150));

    let earnings = market.storage().list_earnings(fx.vendor.id).unwrap();
    let booking_earning = earnings
        .iter()
        .find(|e| e.earning_type == EarningType::Booking)
        .unwrap();
    assert_eq!(booking_earning.status, EarningStatus::Reversed);
    assert_balanced(&market);
}

fn completion_releases_pending_balance(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();
    market.approve_booking(booking.id, fx.vendor.id).unwrap();

    let before = market.vendor_wallet(fx.vendor.id).unwrap();
    let completed = market.complete_booking(booking.id, fx.vendor.id).unwrap();
    let after = market.vendor_wallet(fx.vendor.id).unwrap();

    assert_eq!(completed.status, BookingStatus::Completed);
    assert_eq!(before.pending_balance, money(500));
    assert_eq!(after.pending_balance, Money::ZERO);
    assert_eq!(after.available_balance, before.available_balance + money(500));
    assert_eq!(after.total_earned, money(500));
    assert_eq!(balance(&market, ledger::REVENUE), dec!(500));
    assert_eq!(balance(&market, ledger::ESCROW), Decimal::ZERO);
    assert_eq!(market.get_vendor(fx.vendor.id).unwrap().jobs_completed, 1);
    assert_eq!(
        market.user_bookings(fx.user.id, BookingScope::Completed).unwrap().len(),
        1
    );
    assert!(market.user_bookings(fx.user.id, BookingScope::Booked).unwrap().is_empty());
    assert_balanced(&market);
}

fn rejection_refunds_in_full(market: Marketplace) {
    let fx = setup(&market, 800);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();

    let rejected = market.reject_booking(booking.id, fx.vendor.id).unwrap();
    assert_eq!(rejected.status, BookingStatus::Cancelled);
    assert_eq!(rejected.payment_status, PaymentStatus::Refunded);
    assert_eq!(user_balance(&market, &fx.user), money(1000));
    assert_eq!(balance(&market, ledger::ESCROW), Decimal::ZERO);

    let err = market.complete_booking(booking.id, fx.vendor.id).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }), "{err:?}");
    assert_balanced(&market);
}

fn vendor_actions_check_ownership(market: Marketplace) {
    let fx = setup(&market, 500);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();
    let other = onboard_vendor(&market, "Other Co");

    let err = market.approve_booking(booking.id, other.id).unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");

    let stranger = register_user(&market, "Bina");
    let err = market
        .cancel_booking(
            booking.id,
            CancelBooking {
                user_id: stranger.id,
                reason: "Not mine".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");
    assert_eq!(market.get_booking(booking.id).unwrap().status, BookingStatus::Pending);
}

fn payout_limits_and_settlement(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();
    market.approve_booking(booking.id, fx.vendor.id).unwrap();
    market.complete_booking(booking.id, fx.vendor.id).unwrap();

    let request = |amount: u32, key: Option<&str>| market.request_payout(fx.vendor.id, NewPayout { amount: money(amount) }, key);

    assert!(matches!(request(99, None), Err(MarketError::Validation(_))));
    assert!(matches!(request(600, None), Err(MarketError::InsufficientBalance { .. })));

    let first = request(300, Some("payout-1")).unwrap();
    assert_eq!(first.status, PayoutStatus::Pending);
    assert_eq!(request(300, Some("payout-1")).unwrap().id, first.id);
    assert_eq!(market.vendor_wallet(fx.vendor.id).unwrap().available_balance, money(200));
    assert_eq!(balance(&market, ledger::PAYOUTS_PAYABLE), dec!(300));

    let processing = market.mark_payout_processing(first.id).unwrap();
    assert_eq!(processing.status, PayoutStatus::Processing);
    let completed = market.complete_payout(first.id).unwrap();
    assert_eq!(completed.status, PayoutStatus::Completed);
    assert!(completed.processed_at.is_some());
    assert_eq!(balance(&market, ledger::PAYOUTS_PAYABLE), Decimal::ZERO);

    let second = request(200, None).unwrap();
    market.reject_payout(second.id).unwrap();
    let err = market.complete_payout(second.id).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }), "{err:?}");

    let wallet = market.vendor_wallet(fx.vendor.id).unwrap();
    assert_eq!(wallet.available_balance, money(200));
    assert_eq!(wallet.total_withdrawn, money(300));
    assert_eq!(market.vendor_payouts(fx.vendor.id).unwrap().len(), 2);
    assert_balanced(&market);
}

fn unapproved_vendors_cannot_sell_or_withdraw(market: Marketplace) {
    market.seed_categories(&["Plumbing".to_string()]).unwrap();
    let category = market.category_by_name("Plumbing").unwrap();
    let vendor = market
        .register_vendor(NewVendor {
            business_name: "Draft Pipes".to_string(),
            email: "draft@example.com".to_string(),
            phone: "9000000001".to_string(),
        })
        .unwrap();

    let err = market
        .create_listing(
            vendor.id,
            ListingInput {
                category_id: category.id,
                service_name: "Leak repair".to_string(),
                description: None,
                base_price: money(400),
                price_unit: None,
                location: None,
                pin_code: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");

    let err = market
        .request_payout(vendor.id, NewPayout { amount: money(100) }, None)
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");

    let err = market.approve_vendor(vendor.id).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }), "{err:?}");
}

fn failed_step_leaves_no_partial_writes(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();

    // A stray cancellation record makes the last insert of the event fail,
    // after the journal and the status change were already written.
    market
        .storage()
        .insert_cancellation(&CancellationRecord {
            booking_id: booking.id,
            user_id: fx.user.id,
            reason: "stray".to_string(),
            cancellation_fee: Money::ZERO,
            refund_amount: Money::ZERO,
            vendor_share: Money::ZERO,
            platform_share: Money::ZERO,
            created_at: OffsetDateTime::now_utc(),
        })
        .unwrap();

    let err = cancel(&market, &fx, &booking).unwrap_err();
    assert!(
        matches!(err, MarketError::Storage(StorageError::AlreadyExists { .. })),
        "{err:?}"
    );

    assert_eq!(market.get_booking(booking.id).unwrap().status, BookingStatus::Pending);
    assert_eq!(user_balance(&market, &fx.user), Money::ZERO);
    assert_eq!(balance(&market, ledger::ESCROW), dec!(1000));
    assert_eq!(balance(&market, ledger::REVENUE), Decimal::ZERO);
    assert_eq!(market.vendor_wallet(fx.vendor.id).unwrap().available_balance, Money::ZERO);
    assert_eq!(market.wallet(fx.user.id).unwrap().transactions.len(), 2);
    assert_balanced(&market);
}

fn idempotent_replay_debits_once(market: Marketplace) {
    let fx = setup(&market, 400);
    let top_up_once = || {
        market.top_up(
            fx.user.id,
            TopUp {
                amount: money(1000),
                payment_method: None,
            },
            Some("topup-abc"),
        )
    };
    let first = top_up_once().unwrap();
    let replay = top_up_once().unwrap();
    assert_eq!(first.id, replay.id);
    assert_eq!(user_balance(&market, &fx.user), money(1000));

    let booking = book(&market, &fx, Some("booking-abc")).unwrap();
    let again = book(&market, &fx, Some("booking-abc")).unwrap();
    assert_eq!(booking.id, again.id);
    assert_eq!(user_balance(&market, &fx.user), money(600));
    assert_eq!(market.user_bookings(fx.user.id, BookingScope::All).unwrap().len(), 1);

    let err = book(&market, &fx, Some("topup-abc")).unwrap_err();
    assert!(matches!(err, MarketError::IdempotencyConflict { .. }), "{err:?}");
    assert_eq!(user_balance(&market, &fx.user), money(600));
    assert_balanced(&market);
}

fn conflicting_transitions_one_wins(market: Marketplace) {
    let market = Arc::new(market);
    let fx = setup(&market, 500);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();

    let (approved, rejected) = std::thread::scope(|s| {
        let approve = s.spawn(|| market.approve_booking(booking.id, fx.vendor.id));
        let reject = s.spawn(|| market.reject_booking(booking.id, fx.vendor.id));
        (approve.join().unwrap(), reject.join().unwrap())
    });
    assert_eq!(
        approved.is_ok() as u8 + rejected.is_ok() as u8,
        1,
        "approve: {approved:?}, reject: {rejected:?}"
    );
    assert_balanced(&market);

    // A writer holding a stale copy is refused by the storage compare-and-set.
    let err = market
        .storage()
        .update_booking(&booking, BookingStatus::Pending)
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }), "{err:?}");
}

fn reviews_update_vendor_rating(market: Marketplace) {
    let fx = setup(&market, 500);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();

    let review = |rating: u8| {
        market.review_booking(
            booking.id,
            NewReview {
                user_id: fx.user.id,
                rating,
                comment: Some("Spotless".to_string()),
            },
        )
    };

    assert!(matches!(review(5), Err(MarketError::InvalidTransition { .. })));
    market.approve_booking(booking.id, fx.vendor.id).unwrap();
    market.complete_booking(booking.id, fx.vendor.id).unwrap();

    assert!(matches!(review(6), Err(MarketError::Validation(_))));
    review(4).unwrap();
    assert!(matches!(review(5), Err(MarketError::Conflict(_))));
    assert_eq!(market.get_vendor(fx.vendor.id).unwrap().rating, dec!(4.0));
    assert_eq!(market.all_reviews().unwrap().len(), 1);
}

fn search_shows_active_listings_of_approved_vendors(market: Marketplace) {
    let fx = setup(&market, 700);
    assert_eq!(fx.listing.service_type, "Cleaning");
    assert_eq!(fx.listing.pin_code.as_deref(), Some("560038"));

    let results = market
        .search(&SearchQuery {
            q: Some("deep".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].business_name, "Sparkle Homes");
    assert_eq!(market.listings_in_category("Cleaning").unwrap().len(), 1);

    let toggled = market.toggle_listing(fx.vendor.id, fx.listing.id).unwrap();
    assert!(!toggled.is_active);
    assert!(market.search(&SearchQuery::default()).unwrap().is_empty());

    top_up(&market, &fx.user, 1000);
    let err = book(&market, &fx, None).unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err:?}");
}

fn user_onboarding_runs_in_order(market: Marketplace) {
    let user = register_user(&market, "Asha");
    assert_eq!(user.onboarding_step, 1);

    let documents = UserDocuments {
        aadhar_card_url: Some("https://files.example.com/a.pdf".to_string()),
        pan_card_url: Some("https://files.example.com/p.pdf".to_string()),
        signature_url: None,
    };
    let err = market.submit_user_documents(user.id, documents.clone()).unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err:?}");

    let user = market
        .submit_user_address(
            user.id,
            UserAddress {
                address: "12 MG Road".to_string(),
                pin_code: "560001".to_string(),
                profile_image_url: None,
            },
        )
        .unwrap();
    assert_eq!(user.onboarding_step, 2);
    let user = market.submit_user_documents(user.id, documents).unwrap();
    assert_eq!(user.onboarding_step, 3);

    let err = market
        .register_user(NewUser {
            full_name: "Asha Again".to_string(),
            email: "ASHA@example.com".to_string(),
            phone: "9876543210".to_string(),
        })
        .unwrap_err();
    assert_eq!(err.status_code().as_u16(), 409, "{err:?}");
}

fn admin_stats_summarise_the_marketplace(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();
    market.approve_booking(booking.id, fx.vendor.id).unwrap();
    market.complete_booking(booking.id, fx.vendor.id).unwrap();

    let stats = market.stats().unwrap();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.vendors, 1);
    assert_eq!(stats.pending_vendors, 0);
    assert_eq!(stats.bookings, 1);
    assert_eq!(stats.listings, 1);
    assert_eq!(stats.platform_revenue, dec!(500));
    assert_eq!(stats.escrow_balance, Decimal::ZERO);
    assert_eq!(market.all_wallet_transactions().unwrap().len(), 2);
    assert!(market.pending_vendors().unwrap().is_empty());
}

fn replayed_keys_skip_input_checks(market: Marketplace) {
    let fx = setup(&market, 400);
    let top_up_with = |amount: u32| {
        market.top_up(
            fx.user.id,
            TopUp {
                amount: money(amount),
                payment_method: None,
            },
            Some("topup-late"),
        )
    };
    let first = top_up_with(1000).unwrap();
    assert_eq!(top_up_with(1).unwrap().id, first.id);

    let booking = market.create_booking(new_booking(&fx, 1), Some("book-late")).unwrap();
    // The retry arrives after the booking date has passed.
    let retry = market.create_booking(new_booking(&fx, -1), Some("book-late")).unwrap();
    assert_eq!(retry.id, booking.id);
    let err = market.create_booking(new_booking(&fx, -1), None).unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err:?}");

    market.approve_booking(booking.id, fx.vendor.id).unwrap();
    market.complete_booking(booking.id, fx.vendor.id).unwrap();
    let payout = market
        .request_payout(fx.vendor.id, NewPayout { amount: money(200) }, Some("payout-late"))
        .unwrap();
    let retry = market
        .request_payout(fx.vendor.id, NewPayout { amount: money(1) }, Some("payout-late"))
        .unwrap();
    assert_eq!(retry.id, payout.id);
    assert_eq!(user_balance(&market, &fx.user), money(600));
    assert_balanced(&market);
}

/// Raises the flag when dropped, including when the owning thread panics.
struct SetOnDrop<'a>(&'a AtomicBool);

impl Drop for SetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn readers_never_see_rolled_back_events(market: Marketplace) {
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);

    let done = AtomicBool::new(false);
    let observed = std::thread::scope(|s| {
        s.spawn(|| {
            let _done = SetOnDrop(&done);
            for _ in 0..40 {
                let booking = book(&market, &fx, None).unwrap();
                market
                    .storage()
                    .insert_cancellation(&CancellationRecord {
                        booking_id: booking.id,
                        user_id: fx.user.id,
                        reason: "stray".to_string(),
                        cancellation_fee: Money::ZERO,
                        refund_amount: Money::ZERO,
                        vendor_share: Money::ZERO,
                        platform_share: Money::ZERO,
                        created_at: OffsetDateTime::now_utc(),
                    })
                    .unwrap();
                assert!(cancel(&market, &fx, &booking).is_err());
                market.reject_booking(booking.id, fx.vendor.id).unwrap();
            }
        });
        let reader = s.spawn(|| {
            let mut seen = BTreeSet::new();
            while !done.load(Ordering::SeqCst) {
                seen.insert(user_balance(&market, &fx.user));
            }
            seen
        });
        reader.join().unwrap()
    });

    // The refund of the failed cancellation would show up as 700.
    assert!(
        observed.iter().all(|b| *b == money(1000) || *b == Money::ZERO),
        "observed uncommitted balances: {observed:?}"
    );
    assert_eq!(user_balance(&market, &fx.user), money(1000));
    assert_balanced(&market);
}

fn search_sorts_results(market: Marketplace) {
    let profiles = [
        ("Alpha Clean", 300, dec!(4.5), 2),
        ("Bravo Clean", 500, dec!(3.0), 10),
        ("Charlie Clean", 400, dec!(4.9), 0),
    ];
    for (business, price, rating, jobs) in profiles {
        let mut vendor = onboard_vendor(&market, business);
        vendor.rating = rating;
        vendor.jobs_completed = jobs;
        market.storage().update_vendor(&vendor).unwrap();
        market
            .create_listing(vendor.id, listing_input(&market, "Sofa Cleaning", price))
            .unwrap();
    }

    let sorted_by = |sort: Option<SearchSort>| -> Vec<String> {
        market
            .search(&SearchQuery {
                q: Some("sofa".to_string()),
                sort,
                ..SearchQuery::default()
            })
            .unwrap()
            .into_iter()
            .map(|r| r.business_name)
            .collect()
    };

    assert_eq!(sorted_by(None), ["Charlie Clean", "Alpha Clean", "Bravo Clean"]);
    assert_eq!(
        sorted_by(Some(SearchSort::Rating)),
        ["Charlie Clean", "Alpha Clean", "Bravo Clean"]
    );
    assert_eq!(
        sorted_by(Some(SearchSort::PriceLow)),
        ["Alpha Clean", "Charlie Clean", "Bravo Clean"]
    );
    assert_eq!(
        sorted_by(Some(SearchSort::PriceHigh)),
        ["Bravo Clean", "Charlie Clean", "Alpha Clean"]
    );
    assert_eq!(sorted_by(Some(SearchSort::Jobs)), ["Bravo Clean", "Alpha Clean", "Charlie Clean"]);
}

fn listings_are_edited_by_their_owner(market: Marketplace) {
    let fx = setup(&market, 700);
    let other = onboard_vendor(&market, "Other Co");

    let edited = market
        .update_listing(
            fx.vendor.id,
            fx.listing.id,
            ListingInput {
                location: Some("Koramangala".to_string()),
                pin_code: Some("560034".to_string()),
                price_unit: Some("per visit".to_string()),
                ..listing_input(&market, "Kitchen Cleaning", 900)
            },
        )
        .unwrap();
    assert_eq!(edited.service_name, "Kitchen Cleaning");
    assert_eq!(edited.base_price, money(900));
    assert_eq!(edited.location.as_deref(), Some("Koramangala"));
    assert_eq!(edited.pin_code.as_deref(), Some("560034"));
    assert_eq!(edited.price_unit, "per visit");

    let reverted = market
        .update_listing(fx.vendor.id, fx.listing.id, listing_input(&market, "Kitchen Cleaning", 900))
        .unwrap();
    assert_eq!(reverted.location.as_deref(), Some("Bengaluru East"));
    assert_eq!(reverted.pin_code.as_deref(), Some("560038"));

    let err = market
        .update_listing(other.id, fx.listing.id, listing_input(&market, "Hijacked", 1))
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");
    let err = market
        .update_listing(fx.vendor.id, fx.listing.id, listing_input(&market, "Free", 0))
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err:?}");
    assert_eq!(market.list_vendor_listings(fx.vendor.id).unwrap(), vec![reverted]);

    let err = market.delete_listing(other.id, fx.listing.id).unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");
    market.delete_listing(fx.vendor.id, fx.listing.id).unwrap();
    assert!(market.list_vendor_listings(fx.vendor.id).unwrap().is_empty());
    let err = market.delete_listing(fx.vendor.id, fx.listing.id).unwrap_err();
    assert_eq!(err.status_code().as_u16(), 404, "{err:?}");
}

fn vendors_are_rejected_only_while_pending(market: Marketplace) {
    let draft = market
        .register_vendor(NewVendor {
            business_name: "Draft Pipes".to_string(),
            email: "draft@example.com".to_string(),
            phone: "9000000001".to_string(),
        })
        .unwrap();
    let err = market.reject_vendor(draft.id).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }), "{err:?}");

    let vendor = submit_vendor(&market, "Sparkle Homes");
    assert_eq!(market.pending_vendors().unwrap().len(), 1);
    let rejected = market.reject_vendor(vendor.id).unwrap();
    assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
    assert!(market.pending_vendors().unwrap().is_empty());

    for result in [market.reject_vendor(vendor.id), market.approve_vendor(vendor.id)] {
        let err = result.unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }), "{err:?}");
    }
    let err = market
        .create_listing(vendor.id, listing_input(&market, "Deep Cleaning", 500))
        .unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");
    assert_eq!(market.get_vendor(vendor.id).unwrap().approval_status, ApprovalStatus::Rejected);
}

fn users_update_profile_and_notifications(market: Marketplace) {
    let user = register_user(&market, "Asha");

    let err = market
        .update_user_profile(
            user.id,
            UserUpdate {
                pin_code: Some("5600".to_string()),
                ..UserUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err:?}");

    let updated = market
        .update_user_profile(
            user.id,
            UserUpdate {
                full_name: Some("Asha Rao".to_string()),
                phone: Some("  ".to_string()),
                address: Some("221 Residency Road".to_string()),
                pin_code: Some("560025".to_string()),
                profile_image_url: None,
            },
        )
        .unwrap();
    assert_eq!(updated.full_name, "Asha Rao");
    assert_eq!(updated.phone, "9876543210");
    assert_eq!(updated.address.as_deref(), Some("221 Residency Road"));
    assert_eq!(updated.pin_code.as_deref(), Some("560025"));
    assert_eq!(updated.email, user.email);

    let preferences = NotificationPreferences {
        sms_notifications: false,
        promotional_offers: true,
        ..NotificationPreferences::default()
    };
    market
        .update_notification_preferences(user.id, preferences.clone())
        .unwrap();
    let stored = market.get_user(user.id).unwrap();
    assert_eq!(stored.notification_preferences, preferences);
    assert_eq!(stored.full_name, "Asha Rao");
}

fn payment_methods_keep_one_default(market: Marketplace) {
    let user = register_user(&market, "Asha");
    let stranger = register_user(&market, "Bina");

    let card = market
        .add_payment_method(
            user.id,
            NewPaymentMethod {
                method_type: PaymentMethodType::Card,
                display_name: "My HDFC Card".to_string(),
                card_number: Some("4111 1111 1111 4242".to_string()),
                upi_id: None,
            },
        )
        .unwrap();
    assert!(card.is_default);
    assert_eq!(card.card_last4.as_deref(), Some("4242"));

    let upi = market
        .add_payment_method(
            user.id,
            NewPaymentMethod {
                method_type: PaymentMethodType::Upi,
                display_name: "GPay".to_string(),
                card_number: None,
                upi_id: Some("asha@okhdfc".to_string()),
            },
        )
        .unwrap();
    assert!(!upi.is_default);

    let err = market
        .add_payment_method(
            user.id,
            NewPaymentMethod {
                method_type: PaymentMethodType::Upi,
                display_name: "Broken".to_string(),
                card_number: Some("4111111111114242".to_string()),
                upi_id: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)), "{err:?}");

    let ids: Vec<_> = market
        .list_payment_methods(user.id)
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![upi.id, card.id]);
    assert!(market.list_payment_methods(stranger.id).unwrap().is_empty());

    let err = market.delete_payment_method(stranger.id, card.id).unwrap_err();
    assert!(matches!(err, MarketError::Forbidden(_)), "{err:?}");

    market.delete_payment_method(user.id, card.id).unwrap();
    let remaining = market.list_payment_methods(user.id).unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].is_default);

    let all = market.all_payment_methods().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].user_name.as_deref(), Some("Asha"));
    assert_eq!(all[0].user_email.as_deref(), Some("asha@example.com"));
}

fn stored_vendor_amount_drives_reversal(storage: Arc<dyn StorageBackend>) {
    let generous = Policy {
        booking_vendor_share: dec!(0.70),
        ..Policy::default()
    };
    let market = Marketplace::new(storage.clone(), generous).unwrap();
    let fx = setup(&market, 1000);
    top_up(&market, &fx.user, 1000);
    let booking = book(&market, &fx, None).unwrap();
    let approved = market.approve_booking(booking.id, fx.vendor.id).unwrap();
    assert_eq!(approved.vendor_amount, Some(money(700)));

    // The share changes before the customer cancels.
    let stingy = Policy {
        booking_vendor_share: dec!(0.40),
        ..Policy::default()
    };
    let market = Marketplace::new(storage, stingy).unwrap();
    cancel(&market, &fx, &booking).unwrap();

    let vendor_wallet = market.vendor_wallet(fx.vendor.id).unwrap();
    assert_eq!(vendor_wallet.pending_balance, Money::ZERO);
    assert_eq!(vendor_wallet.available_balance, money(150));
    assert_eq!(user_balance(&market, &fx.user), money(700));
    assert_eq!(balance(&market, ledger::ESCROW), Decimal::ZERO);
    assert_eq!(balance(&market, ledger::REVENUE), dec!(150));
    assert_balanced(&market);
}

backend_tests!(
    top_up_adds_to_balance,
    top_up_limits_are_enforced,
    booking_moves_price_into_escrow,
    booking_without_funds_changes_nothing,
    cancellation_splits_the_fee,
    cancellation_after_approval_reverses_vendor_share,
    completion_releases_pending_balance,
    rejection_refunds_in_full,
    vendor_actions_check_ownership,
    payout_limits_and_settlement,
    unapproved_vendors_cannot_sell_or_withdraw,
    failed_step_leaves_no_partial_writes,
    idempotent_replay_debits_once,
    conflicting_transitions_one_wins,
    reviews_update_vendor_rating,
    search_shows_active_listings_of_approved_vendors,
    user_onboarding_runs_in_order,
    admin_stats_summarise_the_marketplace,
    replayed_keys_skip_input_checks,
    readers_never_see_rolled_back_events,
    search_sorts_results,
    listings_are_edited_by_their_owner,
    vendors_are_rejected_only_while_pending,
    users_update_profile_and_notifications,
    payment_methods_keep_one_default;
    storage: stored_vendor_amount_drives_reversal,
);
