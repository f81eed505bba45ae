use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use homeserve_core::{
    Booking, NotificationPreferences, PaymentMethod, PaymentMethodId, UserDocuments, UserId, UserProfile,
    WalletTransaction,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{created, idempotency_key, ApiResponse, ApiResult, AppState, Created};
use crate::marketplace::{
    BookingScope, NewPaymentMethod, NewUser, TopUp, UserAddress, UserBank, UserUpdate, WalletView,
};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/:id", get(show).patch(update))
        .route("/users/:id/onboarding/address", post(address))
        .route("/users/:id/onboarding/documents", post(documents))
        .route("/users/:id/onboarding/bank", post(bank))
        .route("/users/:id/notifications", put(notifications))
        .route("/users/:id/wallet", get(wallet))
        .route("/users/:id/wallet/top-ups", post(top_up))
        .route("/users/:id/bookings", get(bookings))
        .route("/users/:id/payment-methods", get(payment_methods).post(add_payment_method))
        .route("/users/:id/payment-methods/:pm_id", delete(delete_payment_method))
}

#[derive(Debug, Default, Deserialize)]
struct BookingsQuery {
    #[serde(default)]
    filter: BookingScope,
}

async fn register(State(state): State<AppState>, Json(input): Json<NewUser>) -> Created<UserProfile> {
    created(state.market.register_user(input)?)
}

async fn show(State(state): State<AppState>, Path(id): Path<UserId>) -> ApiResult<UserProfile> {
    Ok(ApiResponse::ok(state.market.get_user(id)?))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(input): Json<UserUpdate>,
) -> ApiResult<UserProfile> {
    Ok(ApiResponse::ok(state.market.update_user_profile(id, input)?))
}

async fn address(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(input): Json<UserAddress>,
) -> ApiResult<UserProfile> {
    Ok(ApiResponse::ok(state.market.submit_user_address(id, input)?))
}

async fn documents(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(input): Json<UserDocuments>,
) -> ApiResult<UserProfile> {
    Ok(ApiResponse::ok(state.market.submit_user_documents(id, input)?))
}

async fn bank(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(input): Json<UserBank>,
) -> ApiResult<UserProfile> {
    Ok(ApiResponse::ok(state.market.submit_user_bank(id, input)?))
}

async fn notifications(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(input): Json<NotificationPreferences>,
) -> ApiResult<UserProfile> {
    Ok(ApiResponse::ok(state.market.update_notification_preferences(id, input)?))
}

async fn wallet(State(state): State<AppState>, Path(id): Path<UserId>) -> ApiResult<WalletView> {
    Ok(ApiResponse::ok(state.market.wallet(id)?))
}

async fn top_up(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    headers: HeaderMap,
    Json(input): Json<TopUp>,
) -> Created<WalletTransaction> {
    created(state.market.top_up(id, input, idempotency_key(&headers))?)
}

async fn bookings(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Query(query): Query<BookingsQuery>,
) -> ApiResult<Vec<Booking>> {
    Ok(ApiResponse::ok(state.market.user_bookings(id, query.filter)?))
}

async fn payment_methods(State(state): State<AppState>, Path(id): Path<UserId>) -> ApiResult<Vec<PaymentMethod>> {
    Ok(ApiResponse::ok(state.market.list_payment_methods(id)?))
}

async fn add_payment_method(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(input): Json<NewPaymentMethod>,
) -> Created<PaymentMethod> {
    created(state.market.add_payment_method(id, input)?)
}

async fn delete_payment_method(
    State(state): State<AppState>,
    Path((id, pm_id)): Path<(UserId, PaymentMethodId)>,
) -> ApiResult<Value> {
    state.market.delete_payment_method(id, pm_id)?;
    Ok(ApiResponse::ok(json!({ "deleted": pm_id })))
}
