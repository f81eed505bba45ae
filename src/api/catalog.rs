use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use homeserve_core::ServiceCategory;

use super::{ApiResponse, ApiResult, AppState};
use crate::marketplace::{SearchQuery, SearchResult};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(categories))
        .route("/categories/:name/listings", get(category_listings))
        .route("/search", get(search))
}

async fn categories(State(state): State<AppState>) -> ApiResult<Vec<ServiceCategory>> {
    Ok(ApiResponse::ok(state.market.list_categories()?))
}

async fn category_listings(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Vec<SearchResult>> {
    Ok(ApiResponse::ok(state.market.listings_in_category(&name)?))
}

async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> ApiResult<Vec<SearchResult>> {
    Ok(ApiResponse::ok(state.market.search(&query)?))
}
