//! Read-only HTTP API over the live snapshot and the node store

use crate::context::AppContext;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dhtscope_core::{format_uptime, unix_now, DhtEngine};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Default page size for `/nodes/all`
const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Largest `limit` accepted by `/nodes/top`
const MAX_TOP_LIMIT: i64 = 100;

type Ctx<E> = State<Arc<AppContext<E>>>;

/// Raw query parameters; anything unparsable falls back to a default
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    page: Option<String>,
    limit: Option<String>,
}

pub fn router<E: DhtEngine>(ctx: Arc<AppContext<E>>) -> Router {
    Router::new()
        .route("/", get(health::<E>))
        .route("/stats", get(live_stats::<E>))
        .route("/nodes", get(node_stats::<E>))
        .route("/nodes/all", get(all_nodes::<E>))
        .route("/nodes/top", get(top_nodes::<E>))
        .with_state(ctx)
        .layer(CorsLayer::permissive())
}

/// Serve the API on `listener` until `shutdown` resolves
pub async fn serve<E: DhtEngine>(
    ctx: Arc<AppContext<E>>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("API running on http://{}", addr);
    }
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health<E: DhtEngine>(State(ctx): Ctx<E>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime": format_uptime(ctx.uptime()),
    }))
}

async fn live_stats<E: DhtEngine>(State(ctx): Ctx<E>) -> Json<serde_json::Value> {
    let snapshot = ctx.snapshot();
    let top: Vec<_> = snapshot
        .top_ranked_items
        .iter()
        .map(|(hash, count)| json!({ "hash": hash, "count": count }))
        .collect();

    Json(json!({
        "status": "ok",
        "timestamp": snapshot.taken_at,
        "metrics": {
            "currentNodes": snapshot.current_node_count,
            "uptime": format_uptime(snapshot.uptime),
        },
        "topInfohashes": top,
    }))
}

async fn node_stats<E: DhtEngine>(State(ctx): Ctx<E>) -> Response {
    match ctx.store.aggregate_stats() {
        Ok(stats) => Json(json!({
            "status": "ok",
            "timestamp": unix_now(),
            "stats": stats,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Error getting node stats: {}", e);
            not_found("No data available")
        }
    }
}

async fn all_nodes<E: DhtEngine>(
    State(ctx): Ctx<E>,
    Query(params): Query<PageParams>,
) -> Response {
    let page = parse_param(params.page.as_deref(), 1);
    let limit = parse_param(params.limit.as_deref(), DEFAULT_PAGE_LIMIT);

    match ctx.store.paginated_list(page, limit) {
        Ok(page) => Json(json!({
            "status": "ok",
            "timestamp": unix_now(),
            "data": page.nodes,
            "pagination": page.pagination,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Error getting paginated nodes: {}", e);
            not_found("No nodes found")
        }
    }
}

async fn top_nodes<E: DhtEngine>(
    State(ctx): Ctx<E>,
    Query(params): Query<PageParams>,
) -> Response {
    let limit = parse_param(params.limit.as_deref(), 10).clamp(1, MAX_TOP_LIMIT);

    match ctx.store.top_nodes(limit as u32) {
        Ok(nodes) => Json(json!({
            "status": "ok",
            "timestamp": unix_now(),
            "data": nodes,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Error getting top nodes: {}", e);
            not_found("No nodes found")
        }
    }
}

/// Integer query parameter; missing, unparsable or zero gives `default`
fn parse_param(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::geo::NoGeo;
    use crate::store::NodeStore;
    use axum::body::Body;
    use axum::http::Request;
    use dhtscope_core::engine::mock::MockEngine;
    use dhtscope_core::{Contact, NodeId, NodeObservation, StatsSnapshot};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;
    use tower::ServiceExt;

    fn context() -> Arc<AppContext<MockEngine>> {
        Arc::new(AppContext::new(
            Arc::new(MockEngine::new()),
            NodeStore::open_in_memory().unwrap(),
            Box::new(NoGeo),
            Config::default(),
        ))
    }

    async fn get_json(ctx: Arc<AppContext<MockEngine>>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(ctx)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn seed(ctx: &AppContext<MockEngine>, count: u32) {
        for i in 0..count {
            let mut id = [0u8; 20];
            id[..4].copy_from_slice(&i.to_be_bytes());
            ctx.store
                .upsert_at(
                    &NodeObservation::new(
                        Contact::new(NodeId(id), SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881)),
                        None,
                    ),
                    1_000 + i as u64,
                )
                .unwrap();
        }
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param(None, 50), 50);
        assert_eq!(parse_param(Some("abc"), 50), 50);
        assert_eq!(parse_param(Some("0"), 50), 50);
        assert_eq!(parse_param(Some("-3"), 1), -3);
        assert_eq!(parse_param(Some(" 7 "), 1), 7);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(context(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["uptime"].as_str().unwrap().ends_with('s'));
    }

    #[tokio::test]
    async fn test_live_stats() {
        let ctx = context();
        ctx.publish(StatsSnapshot {
            current_node_count: 321,
            uptime: Duration::from_secs(61),
            top_ranked_items: vec![("aa".to_string(), 4), ("bb".to_string(), 2)],
            taken_at: 1_700_000_000,
        });

        let (status, body) = get_json(ctx, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metrics"]["currentNodes"], 321);
        assert_eq!(body["metrics"]["uptime"], "1m 1s");
        assert_eq!(body["topInfohashes"][0]["hash"], "aa");
        assert_eq!(body["topInfohashes"][1]["count"], 2);
        assert_eq!(body["timestamp"], 1_700_000_000u64);
    }

    #[tokio::test]
    async fn test_node_stats() {
        let ctx = context();
        seed(&ctx, 3);

        let (status, body) = get_json(ctx, "/nodes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["total_historical"], 3);
        assert_eq!(body["stats"]["max_times_seen"], 1);
        assert!(body["stats"]["countryDistribution"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_nodes_clamps_parameters() {
        let ctx = context();
        seed(&ctx, 120);

        let (status, body) = get_json(ctx.clone(), "/nodes/all?page=3&limit=50").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 20);
        assert_eq!(body["pagination"]["hasMore"], false);
        assert_eq!(body["pagination"]["total"], 120);

        let (_, body) = get_json(ctx.clone(), "/nodes/all?page=zero&limit=5000").await;
        assert_eq!(body["pagination"]["page"], 1);
        assert_eq!(body["pagination"]["limit"], 1000);
        assert_eq!(body["data"].as_array().unwrap().len(), 120);

        let (_, body) = get_json(ctx, "/nodes/all").await;
        assert_eq!(body["pagination"]["limit"], 50);
        assert_eq!(body["pagination"]["hasMore"], true);
        assert_eq!(body["data"][0]["last_seen"], 1_119);
    }

    #[tokio::test]
    async fn test_top_nodes() {
        let ctx = context();
        seed(&ctx, 5);

        let (status, body) = get_json(ctx, "/nodes/top?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failures_return_not_found() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let ctx = Arc::new(AppContext::new(
            Arc::new(MockEngine::new()),
            NodeStore::open(temp.path()).unwrap(),
            Box::new(NoGeo),
            Config::default(),
        ));
        seed(&ctx, 3);

        rusqlite::Connection::open(temp.path())
            .unwrap()
            .execute_batch("DROP TABLE dht_nodes")
            .unwrap();

        let (status, body) = get_json(ctx.clone(), "/nodes").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "No data available" }));

        let (status, body) = get_json(ctx.clone(), "/nodes/all").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "No nodes found" }));

        let (status, body) = get_json(ctx.clone(), "/nodes/top").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "No nodes found" }));

        // Live stats never touch the store
        let (status, _) = get_json(ctx, "/stats").await;
        assert_eq!(status, StatusCode::OK);
    }
}
