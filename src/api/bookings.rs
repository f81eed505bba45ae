use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use homeserve_core::{Booking, BookingId, CancellationRecord, ServiceReview, VendorId};
use serde::Deserialize;

use super::{created, idempotency_key, ApiResponse, ApiResult, AppState, Created};
use crate::marketplace::{CancelBooking, CancelledBooking, NewBooking, NewReview};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create))
        .route("/bookings/:id", get(show))
        .route("/bookings/:id/cancellation", get(cancellation))
        .route("/bookings/:id/cancel", post(cancel))
        .route("/bookings/:id/approve", post(approve))
        .route("/bookings/:id/complete", post(complete))
        .route("/bookings/:id/reject", post(reject))
        .route("/bookings/:id/review", post(review))
}

/// Body of the vendor-side transitions.
#[derive(Debug, Deserialize)]
struct VendorAction {
    vendor_id: VendorId,
}

async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<NewBooking>,
) -> Created<Booking> {
    created(state.market.create_booking(input, idempotency_key(&headers))?)
}

async fn show(State(state): State<AppState>, Path(id): Path<BookingId>) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(state.market.get_booking(id)?))
}

async fn cancellation(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
) -> ApiResult<Option<CancellationRecord>> {
    Ok(ApiResponse::ok(state.market.cancellation(id)?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(input): Json<CancelBooking>,
) -> ApiResult<CancelledBooking> {
    Ok(ApiResponse::ok(state.market.cancel_booking(id, input)?))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(action): Json<VendorAction>,
) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(state.market.approve_booking(id, action.vendor_id)?))
}

async fn complete(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(action): Json<VendorAction>,
) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(state.market.complete_booking(id, action.vendor_id)?))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(action): Json<VendorAction>,
) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(state.market.reject_booking(id, action.vendor_id)?))
}

async fn review(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
    Json(input): Json<NewReview>,
) -> Created<ServiceReview> {
    created(state.market.review_booking(id, input)?)
}
