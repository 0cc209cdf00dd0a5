//! Checkout RPC server: a thin axum wrapper over `PoolSet::checkout` /
//! `PoolSet::return_item`. All correctness lives in the pool engine; this
//! module only translates HTTP in and out.

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::pool_set::PoolSet;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub pool_set: Arc<PoolSet>,
}

pub fn build_router(state: AppState) -> Router {
    routes::router(state)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// Runs the checkout server until `handle.graceful_shutdown` is invoked.
pub async fn serve(addr: SocketAddr, state: AppState, handle: axum_server::Handle) -> std::io::Result<()> {
    let app = build_router(state);
    axum_server::bind(addr).handle(handle).serve(app.into_make_service()).await
}

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
