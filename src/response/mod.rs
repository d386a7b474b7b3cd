//! Response assembly
//!
//! Turns the lifecycle's draft state into the final HTTP response. The
//! assembler runs exactly once per request, after the engine finishes
//! (successfully or via abort):
//!
//! 1. A captured pipeline-fatal error renders the error fallback.
//! 2. An uncommitted draft renders the not-found fallback.
//! 3. A committed body runs the rewrite pipeline and global injection
//!    (unless suppressed), then — for materialized bodies only — document
//!    formatting and conditional gzip. Streams are transformed chunk by
//!    chunk and skip full-document post-processing.
//! 4. Queued cookie operations are flushed exactly once, FIFO, on every
//!    branch.
//!
//! A failure inside rewrite, formatting, or compression is logged and that
//! step skipped in favor of the prior value; a failure escaping the whole
//! method still yields a generic plain-text 500 rather than propagating.

pub mod compress;
pub mod fallback;
pub mod format;
pub mod inject;
pub mod rewrite;

use crate::config::Config;
use crate::lifecycle::context::ContextParts;
use crate::lifecycle::{CookieOp, LifecycleOutcome, RequestContext, ResponseBody};
use crate::registry::PluginRegistry;
use crate::state::metrics::Metrics;
use rewrite::ContentRewritePipeline;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, warn};
use warp::http::header::{
    HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, SET_COOKIE, VARY,
};
use warp::http::{HeaderMap, Response, StatusCode};
use warp::hyper::Body;

pub struct ResponseAssembler {
    registry: Arc<PluginRegistry>,
    metrics: Arc<Metrics>,
    compress_enabled: bool,
    public_env_prefix: String,
}

impl ResponseAssembler {
    pub fn new(registry: Arc<PluginRegistry>, config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            metrics,
            compress_enabled: config.render.compress,
            public_env_prefix: config.runtime.public_env_prefix.clone(),
        }
    }

    /// Produce the final response. Never panics and never propagates an
    /// error: the worst outcome is a generic plain-text 500.
    pub fn assemble(&self, ctx: RequestContext, outcome: LifecycleOutcome) -> Response<Body> {
        let request_id = ctx.request().id;
        match self.try_assemble(ctx, outcome) {
            Ok(response) => response,
            Err(err) => {
                error!(%request_id, %err, "response assembly failed, serving generic 500");
                plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    fallback::GENERIC_FAILURE_BODY,
                )
            }
        }
    }

    fn try_assemble(
        &self,
        ctx: RequestContext,
        outcome: LifecycleOutcome,
    ) -> crate::error::Result<Response<Body>> {
        let mut parts = ctx.into_parts();
        let cookie_ops = std::mem::take(&mut parts.cookie_ops);

        if let LifecycleOutcome::Aborted(err) = outcome {
            self.metrics.lifecycle_aborts.inc();
            let document = fallback::render_error_page(&err);
            let mut headers = html_headers();
            flush_cookies(&mut headers, cookie_ops);
            return Ok(build_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                Body::from(document),
            ));
        }

        if !parts.draft.committed() {
            self.metrics.not_found_responses.inc();
            let document = fallback::render_not_found(&parts.request.path);
            let mut headers = html_headers();
            flush_cookies(&mut headers, cookie_ops);
            return Ok(build_response(
                StatusCode::NOT_FOUND,
                headers,
                Body::from(document),
            ));
        }

        let status = parts.draft.status;
        let mut headers = std::mem::take(&mut parts.draft.headers);
        let body = match parts.draft.body.take() {
            Some(body) => body,
            None => ResponseBody::Text(String::new()),
        };

        let response = match body {
            ResponseBody::Text(text) => {
                let body = self.assemble_text(&parts, text, &mut headers);
                build_response(status, flushed(headers, cookie_ops), body)
            }
            ResponseBody::Stream(stream) => {
                let body = self.assemble_stream(&parts, stream);
                build_response(status, flushed(headers, cookie_ops), body)
            }
        };
        Ok(response)
    }

    /// Rewrite, inject, format, and conditionally compress a materialized
    /// body. Each step degrades independently.
    fn assemble_text(&self, parts: &ContextParts, text: String, headers: &mut HeaderMap) -> Body {
        let mut document = text;

        if !parts.suppress_rewrite {
            let pipeline = ContentRewritePipeline::from_registry(&self.registry);
            if !pipeline.is_empty() {
                let mut prepared = pipeline.prepare(&parts.request);
                self.metrics
                    .rewrite_handlers_skipped
                    .inc_by(prepared.skipped as u64);
                let mutations = prepared.take_mutations();
                match rewrite::apply_mutations(mutations, &document) {
                    Ok(transformed) => {
                        document = transformed;
                        ContentRewritePipeline::run_after(
                            &prepared.entries,
                            &parts.request,
                            Some(&document),
                        );
                    }
                    Err(err) => {
                        self.metrics.rewrite_failures.inc();
                        warn!(
                            request_id = %parts.request.id,
                            %err,
                            "rewrite pass failed, serving unrewritten document"
                        );
                    }
                }
            }
        }

        if !parts.suppress_injection {
            if let Some(script) = inject::build_script(&parts.globals, &self.public_env_prefix) {
                document = inject::inject_into_document(document, &script);
            }
        }

        if headers.get(CONTENT_TYPE).is_none() {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static(format::DEFAULT_CONTENT_TYPE),
            );
        }
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if format::is_html(&content_type) {
            document = format::normalize_document(&document);
        }

        let body_bytes = document.into_bytes();
        if self.compress_enabled && compress::should_compress(&parts.request.headers, body_bytes.len())
        {
            match compress::gzip(&body_bytes) {
                Ok(compressed) => {
                    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
                    self.metrics.compressed_responses.inc();
                    return Body::from(compressed);
                }
                Err(err) => {
                    warn!(
                        request_id = %parts.request.id,
                        %err,
                        "compression failed, serving uncompressed body"
                    );
                }
            }
        }
        Body::from(body_bytes)
    }

    /// Apply rewrite and injection incrementally to each chunk as it is
    /// produced. The stream is never buffered; formatting and compression
    /// are skipped for streaming bodies.
    fn assemble_stream(
        &self,
        parts: &ContextParts,
        stream: futures::stream::BoxStream<'static, std::io::Result<bytes::Bytes>>,
    ) -> Body {
        let mut mutations = Vec::new();
        let mut entries = Vec::new();

        if !parts.suppress_rewrite {
            let pipeline = ContentRewritePipeline::from_registry(&self.registry);
            if !pipeline.is_empty() {
                let mut prepared = pipeline.prepare(&parts.request);
                self.metrics
                    .rewrite_handlers_skipped
                    .inc_by(prepared.skipped as u64);
                mutations = prepared.take_mutations();
                entries = prepared.entries;
            }
        }

        if !parts.suppress_injection {
            if let Some(script) = inject::build_script(&parts.globals, &self.public_env_prefix) {
                let injected = Arc::new(AtomicBool::new(false));
                mutations.push(inject::head_append_mutation(script, injected));
            }
        }

        if mutations.is_empty() && entries.is_empty() {
            return Body::wrap_stream(stream);
        }

        let request = parts.request.clone();
        let transformed = rewrite::spawn_stream_rewriter(mutations, stream, move || {
            ContentRewritePipeline::run_after(&entries, &request, None);
        });
        Body::wrap_stream(transformed)
    }
}

fn html_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html;charset=utf-8"),
    );
    headers
}

/// Append queued cookie operations in FIFO order. Runs exactly once per
/// request, on whichever branch produced the response.
fn flush_cookies(headers: &mut HeaderMap, ops: VecDeque<CookieOp>) {
    for op in ops {
        match op.to_header_value() {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(err) => {
                warn!(%err, "dropping unencodable queued cookie");
            }
        }
    }
}

fn flushed(mut headers: HeaderMap, ops: VecDeque<CookieOp>) -> HeaderMap {
    flush_cookies(&mut headers, ops);
    headers
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(format::DEFAULT_CONTENT_TYPE),
    );
    build_response(status, headers, Body::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::PluginError;
    use crate::lifecycle::{Phase, RequestHead, ResponseInit};
    use crate::registry::{PluginRegistry, RuntimeVersions};
    use bytes::Bytes;
    use cookie::Cookie;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use warp::http::header::ACCEPT_ENCODING;
    use warp::http::Method;

    fn empty_registry() -> Arc<PluginRegistry> {
        Arc::new(
            PluginRegistry::builder()
                .build(&RuntimeVersions::current())
                .unwrap(),
        )
    }

    fn assembler() -> ResponseAssembler {
        ResponseAssembler::new(
            empty_registry(),
            &Config::default(),
            Arc::new(Metrics::new()),
        )
    }

    fn committed_ctx(body: &str) -> RequestContext {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        ctx.set_response(body.into(), ResponseInit::default()).unwrap();
        ctx.enter_phase(Phase::Done);
        ctx
    }

    async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        warp::hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_no_commit_renders_not_found() {
        let mut ctx = RequestContext::new(RequestHead::get("/missing"));
        ctx.enter_phase(Phase::Done);
        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("/missing"));
    }

    #[tokio::test]
    async fn test_abort_renders_error_page() {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Done);
        let outcome = LifecycleOutcome::Aborted(crate::error::PluginExecutionError {
            plugin: "boom".to_string(),
            phase: Phase::Request,
            source: PluginError::msg("failed"),
        });
        let response = assembler().assemble(ctx, outcome);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_content_type_defaults_to_plain_text() {
        let response = assembler().assemble(committed_ctx("hello"), LifecycleOutcome::Completed);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            format::DEFAULT_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn test_compression_boundary() {
        for (len, expect_gzip) in [(1024usize, false), (1025usize, true)] {
            let mut headers = HeaderMap::new();
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
            let head = RequestHead::new(Method::GET, "/", None, headers, Bytes::new());
            let mut ctx = RequestContext::new(head);
            ctx.enter_phase(Phase::Request);
            ctx.set_response("x".repeat(len).into(), ResponseInit::default())
                .unwrap();
            ctx.enter_phase(Phase::Done);

            let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
            let compressed = response.headers().get(CONTENT_ENCODING).is_some();
            assert_eq!(compressed, expect_gzip, "body of {len} bytes");

            if expect_gzip {
                assert_eq!(response.headers().get(VARY).unwrap(), "Accept-Encoding");
                let raw = body_bytes(response).await;
                let mut decoder = GzDecoder::new(raw.as_slice());
                let mut decompressed = String::new();
                decoder.read_to_string(&mut decompressed).unwrap();
                assert_eq!(decompressed, "x".repeat(len));
            }
        }
    }

    #[tokio::test]
    async fn test_queued_cookies_flush_fifo_on_every_branch() {
        // Committed branch.
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        ctx.set_cookie(Cookie::new("first", "1"));
        ctx.set_cookie(Cookie::new("second", "2"));
        ctx.set_response("ok".into(), ResponseInit::default()).unwrap();
        ctx.enter_phase(Phase::Done);
        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("first=1"));
        assert!(cookies[1].starts_with("second=2"));

        // Not-found branch still flushes the queue.
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        ctx.set_cookie(Cookie::new("orphan", "v"));
        ctx.enter_phase(Phase::Done);
        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_html_body_is_normalized() {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        let init = ResponseInit::default().header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html"),
        );
        ctx.set_response("<html><body>hi</body></html>".into(), init)
            .unwrap();
        ctx.enter_phase(Phase::Done);

        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.starts_with("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_streaming_body_skips_compression() {
        use futures::StreamExt;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let head = RequestHead::new(Method::GET, "/", None, headers, Bytes::new());
        let mut ctx = RequestContext::new(head);
        ctx.enter_phase(Phase::Request);

        let chunks: Vec<std::io::Result<Bytes>> =
            vec![Ok(Bytes::from("y".repeat(2048))), Ok(Bytes::from("tail"))];
        let stream = futures::stream::iter(chunks).boxed();
        ctx.set_response(ResponseBody::Stream(stream), ResponseInit::default())
            .unwrap();
        ctx.enter_phase(Phase::Done);

        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.ends_with("tail"));
    }

    #[tokio::test]
    async fn test_injection_suppression_respected() {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        ctx.expose_global("__STATE__", serde_json::json!({"a": 1}));
        let init = ResponseInit::default().header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html"),
        );
        ctx.set_response("<html><head></head><body></body></html>".into(), init)
            .unwrap();
        ctx.suppress_injection();
        ctx.enter_phase(Phase::Done);

        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(!body.contains("__STATE__"));
    }

    #[tokio::test]
    async fn test_exposed_globals_injected_into_head() {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        ctx.expose_global("__STATE__", serde_json::json!({"a": 1}));
        let init = ResponseInit::default().header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html"),
        );
        ctx.set_response("<html><head></head><body></body></html>".into(), init)
            .unwrap();
        ctx.enter_phase(Phase::Done);

        let response = assembler().assemble(ctx, LifecycleOutcome::Completed);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains(r#"window.__STATE__ = {"a":1};"#));
        let head_end = body.find("</head>").unwrap();
        assert!(body.find("window.__STATE__").unwrap() < head_end);
    }
}
