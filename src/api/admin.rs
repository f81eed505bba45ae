use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use homeserve_core::{
    AdminProfile, AdminStats, Booking, PayoutId, PayoutRequest, ServiceCategory, ServiceListing, ServiceReview,
    TrialBalance, UserProfile, VendorId, VendorProfile, WalletTransaction,
};
use serde::Deserialize;

use super::{created, ApiResponse, ApiResult, AppState, Created};
use crate::marketplace::{NewAdmin, OwnedPaymentMethod};

/// Mounted under `/admin` behind the admin-role check.
pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/users", get(users))
        .route("/vendors", get(vendors))
        .route("/vendors/pending", get(pending_vendors))
        .route("/vendors/:id/approve", post(approve_vendor))
        .route("/vendors/:id/reject", post(reject_vendor))
        .route("/bookings", get(bookings))
        .route("/transactions", get(transactions))
        .route("/listings", get(listings))
        .route("/reviews", get(reviews))
        .route("/payment-methods", get(payment_methods))
        .route("/payouts", get(payouts))
        .route("/payouts/:id/processing", post(payout_processing))
        .route("/payouts/:id/complete", post(complete_payout))
        .route("/payouts/:id/reject", post(reject_payout))
        .route("/ledger/trial-balance", get(trial_balance))
        .route("/categories", post(create_category))
        .route("/profiles", post(create_admin))
}

#[derive(Debug, Deserialize)]
struct NewCategory {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn stats(State(state): State<AppState>) -> ApiResult<AdminStats> {
    Ok(ApiResponse::ok(state.market.stats()?))
}

async fn users(State(state): State<AppState>) -> ApiResult<Vec<UserProfile>> {
    Ok(ApiResponse::ok(state.market.all_users()?))
}

async fn vendors(State(state): State<AppState>) -> ApiResult<Vec<VendorProfile>> {
    Ok(ApiResponse::ok(state.market.all_vendors()?))
}

async fn pending_vendors(State(state): State<AppState>) -> ApiResult<Vec<VendorProfile>> {
    Ok(ApiResponse::ok(state.market.pending_vendors()?))
}

async fn approve_vendor(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.approve_vendor(id)?))
}

async fn reject_vendor(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.reject_vendor(id)?))
}

async fn bookings(State(state): State<AppState>) -> ApiResult<Vec<Booking>> {
    Ok(ApiResponse::ok(state.market.all_bookings()?))
}

async fn transactions(State(state): State<AppState>) -> ApiResult<Vec<WalletTransaction>> {
    Ok(ApiResponse::ok(state.market.all_wallet_transactions()?))
}

async fn listings(State(state): State<AppState>) -> ApiResult<Vec<ServiceListing>> {
    Ok(ApiResponse::ok(state.market.all_listings()?))
}

async fn reviews(State(state): State<AppState>) -> ApiResult<Vec<ServiceReview>> {
    Ok(ApiResponse::ok(state.market.all_reviews()?))
}

async fn payment_methods(State(state): State<AppState>) -> ApiResult<Vec<OwnedPaymentMethod>> {
    Ok(ApiResponse::ok(state.market.all_payment_methods()?))
}

async fn payouts(State(state): State<AppState>) -> ApiResult<Vec<PayoutRequest>> {
    Ok(ApiResponse::ok(state.market.all_payouts()?))
}

async fn payout_processing(State(state): State<AppState>, Path(id): Path<PayoutId>) -> ApiResult<PayoutRequest> {
    Ok(ApiResponse::ok(state.market.mark_payout_processing(id)?))
}

async fn complete_payout(State(state): State<AppState>, Path(id): Path<PayoutId>) -> ApiResult<PayoutRequest> {
    Ok(ApiResponse::ok(state.market.complete_payout(id)?))
}

async fn reject_payout(State(state): State<AppState>, Path(id): Path<PayoutId>) -> ApiResult<PayoutRequest> {
    Ok(ApiResponse::ok(state.market.reject_payout(id)?))
}

async fn trial_balance(State(state): State<AppState>) -> ApiResult<TrialBalance> {
    Ok(ApiResponse::ok(state.market.trial_balance()?))
}

async fn create_category(State(state): State<AppState>, Json(input): Json<NewCategory>) -> Created<ServiceCategory> {
    created(state.market.create_category(&input.name, input.description)?)
}

async fn create_admin(State(state): State<AppState>, Json(input): Json<NewAdmin>) -> Created<AdminProfile> {
    created(state.market.register_admin(input)?)
}
