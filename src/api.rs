use std::sync::Arc;

use serde_json::json;
use warp::http::StatusCode;
use warp::Filter;

use crate::RealtimeCache;

/// Read-only HTTP surface: `GET /stats` and `GET /health`.
pub fn routes(cache: Arc<RealtimeCache>) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // 1. GET /stats
    let stats = warp::get()
    .and(warp::path("stats"))
    .and(warp::path::end())
    .and(with_cache(cache))
    .map(|cache: Arc<RealtimeCache>| match cache.get_stats() {
        Ok(stats) => warp::reply::with_status(warp::reply::json(&stats), StatusCode::OK),
        Err(e) => warp::reply::with_status(
            warp::reply::json(&json!({ "error": e.to_string() })),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    });

    // 2. GET /health
    let health = warp::get()
    .and(warp::path("health"))
    .and(warp::path::end())
    .map(|| warp::reply::json(&json!({ "status": "ok" })));

    stats.or(health)
}

pub async fn start_stats_api(cache: Arc<RealtimeCache>, port: u16) {
    warp::serve(routes(cache)).run(([0, 0, 0, 0], port)).await;
}

fn with_cache(cache: Arc<RealtimeCache>) -> impl Filter<Extract = (Arc<RealtimeCache>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || cache.clone())
}
