use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use homeserve_core::{
    BankDetails, Booking, ListingId, PayoutRequest, ServiceListing, VendorId, VendorProfile, VendorWallet,
};
use serde_json::{json, Value};

use super::{created, idempotency_key, ApiResponse, ApiResult, AppState, Created};
use crate::marketplace::{ListingInput, NewPayout, NewVendor, VendorDetails, VendorDocumentsInput, VendorUpdate};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/vendors", post(register))
        .route("/vendors/:id", get(show).patch(update))
        .route("/vendors/:id/onboarding/details", post(details))
        .route("/vendors/:id/onboarding/documents", post(documents))
        .route("/vendors/:id/onboarding/bank", post(bank))
        .route("/vendors/:id/orders", get(orders))
        .route("/vendors/:id/wallet", get(wallet))
        .route("/vendors/:id/listings", get(listings).post(create_listing))
        .route("/vendors/:id/listings/:listing_id", put(update_listing).delete(delete_listing))
        .route("/vendors/:id/listings/:listing_id/toggle", post(toggle_listing))
        .route("/vendors/:id/payouts", get(payouts).post(request_payout))
}

async fn register(State(state): State<AppState>, Json(input): Json<NewVendor>) -> Created<VendorProfile> {
    created(state.market.register_vendor(input)?)
}

async fn show(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.get_vendor(id)?))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<VendorId>,
    Json(input): Json<VendorUpdate>,
) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.update_vendor_profile(id, input)?))
}

async fn details(
    State(state): State<AppState>,
    Path(id): Path<VendorId>,
    Json(input): Json<VendorDetails>,
) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.submit_vendor_details(id, input)?))
}

async fn documents(
    State(state): State<AppState>,
    Path(id): Path<VendorId>,
    Json(input): Json<VendorDocumentsInput>,
) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.submit_vendor_documents(id, input)?))
}

async fn bank(
    State(state): State<AppState>,
    Path(id): Path<VendorId>,
    Json(input): Json<BankDetails>,
) -> ApiResult<VendorProfile> {
    Ok(ApiResponse::ok(state.market.submit_vendor_bank(id, input)?))
}

async fn orders(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<Vec<Booking>> {
    Ok(ApiResponse::ok(state.market.vendor_orders(id)?))
}

async fn wallet(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<VendorWallet> {
    Ok(ApiResponse::ok(state.market.vendor_wallet(id)?))
}

async fn listings(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<Vec<ServiceListing>> {
    Ok(ApiResponse::ok(state.market.list_vendor_listings(id)?))
}

async fn create_listing(
    State(state): State<AppState>,
    Path(id): Path<VendorId>,
    Json(input): Json<ListingInput>,
) -> Created<ServiceListing> {
    created(state.market.create_listing(id, input)?)
}

async fn update_listing(
    State(state): State<AppState>,
    Path((id, listing_id)): Path<(VendorId, ListingId)>,
    Json(input): Json<ListingInput>,
) -> ApiResult<ServiceListing> {
    Ok(ApiResponse::ok(state.market.update_listing(id, listing_id, input)?))
}

async fn delete_listing(
    State(state): State<AppState>,
    Path((id, listing_id)): Path<(VendorId, ListingId)>,
) -> ApiResult<Value> {
    state.market.delete_listing(id, listing_id)?;
    Ok(ApiResponse::ok(json!({ "deleted": listing_id })))
}

async fn toggle_listing(
    State(state): State<AppState>,
    Path((id, listing_id)): Path<(VendorId, ListingId)>,
) -> ApiResult<ServiceListing> {
    Ok(ApiResponse::ok(state.market.toggle_listing(id, listing_id)?))
}

async fn payouts(State(state): State<AppState>, Path(id): Path<VendorId>) -> ApiResult<Vec<PayoutRequest>> {
    Ok(ApiResponse::ok(state.market.vendor_payouts(id)?))
}

async fn request_payout(
    State(state): State<AppState>,
    Path(id): Path<VendorId>,
    headers: HeaderMap,
    Json(input): Json<NewPayout>,
) -> Created<PayoutRequest> {
    created(state.market.request_payout(id, input, idempotency_key(&headers))?)
}
