use crate::{listing::ListingPipeline, storage::Store};
use axum::{Router, routing::any};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub pipeline: ListingPipeline,
    pub web_enabled: bool,
    pub web_login_enabled: bool,
    pub url_prefix: String,
    pub trust_proxy: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(any(crate::api::dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
