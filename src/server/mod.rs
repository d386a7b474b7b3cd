//! HTTP front end
//!
//! A thin warp layer: every inbound request is adapted into a
//! `RequestHead`, driven through the lifecycle engine, and handed to the
//! response assembler. All behavior lives in the core — this module only
//! moves bytes and records metrics.

use crate::error::{ConfigError, Result};
use crate::lifecycle::{RequestContext, RequestHead, RequestLifecycleEngine};
use crate::response::ResponseAssembler;
use crate::state::{AppState, RequestTimer};
use bytes::Bytes;
use std::sync::Arc;
use warp::http::{HeaderMap, Method, Response};
use warp::hyper::Body;
use warp::path::FullPath;
use warp::Filter;

pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let addr: std::net::SocketAddr = addr.parse().map_err(|e| {
        crate::error::ServerError::Config(ConfigError::Parse(format!(
            "Invalid server address: {e}"
        )))
    })?;

    tracing::info!(%addr, "starting server");

    let routes = routes(state.clone());
    let shutdown_state = state.clone();
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_state.shutdown_tx.subscribe().recv().await;
    });

    server.await;

    tracing::info!("server stopped");
    Ok(())
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Response<Body>,), Error = warp::Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    warp::any()
        .and(state_filter)
        .and(warp::method())
        .and(warp::path::full())
        .and(
            warp::query::raw()
                .or(warp::any().map(String::new))
                .unify(),
        )
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and_then(handle_request)
}

async fn handle_request(
    state: Arc<AppState>,
    method: Method,
    path: FullPath,
    query: String,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Response<Body>, warp::Rejection> {
    let timer = RequestTimer::new(state.metrics.clone());

    let query = if query.is_empty() { None } else { Some(query) };
    let head = RequestHead::new(method, path.as_str(), query, headers, body);
    tracing::debug!(request_id = %head.id, method = %head.method, path = %head.path, "request received");

    let mut ctx = RequestContext::new(head);
    let engine = RequestLifecycleEngine::new(state.registry.clone());
    let outcome = engine.run(&mut ctx).await;

    let assembler = ResponseAssembler::new(
        state.registry.clone(),
        &state.config,
        state.metrics.clone(),
    );
    let response = assembler.assemble(ctx, outcome);

    if response.status().is_server_error() {
        timer.fail();
    } else {
        timer.finish();
    }

    Ok::<_, warp::Rejection>(response)
}

/// Convenience for embedding hosts and tests: run one request through the
/// full engine + assembler without binding a socket.
pub async fn dispatch(state: &Arc<AppState>, head: RequestHead) -> Response<Body> {
    let mut ctx = RequestContext::new(head);
    let engine = RequestLifecycleEngine::new(state.registry.clone());
    let outcome = engine.run(&mut ctx).await;
    ResponseAssembler::new(
        state.registry.clone(),
        &state.config,
        state.metrics.clone(),
    )
    .assemble(ctx, outcome)
}
