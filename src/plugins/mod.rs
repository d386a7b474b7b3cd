//! Built-in plugins
//!
//! Stock plugins shipped with the server and enabled from configuration.
//! They use only the public plugin API, so they double as reference
//! implementations for third-party authors.

use crate::config::BuiltinsConfig;
use crate::error::{PluginError, Result};
use crate::lifecycle::RequestContext;
use crate::registry::{LifecycleHandler, PluginDescriptor};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use warp::http::header::HeaderValue;
use warp::http::HeaderName;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs every request at arrival and seeds the context bag with the
/// request id and arrival time for downstream plugins.
struct RequestLogger;

#[async_trait]
impl LifecycleHandler for RequestLogger {
    async fn handle(&self, ctx: &mut RequestContext) -> std::result::Result<(), PluginError> {
        let request = ctx.request();
        tracing::info!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            "request"
        );

        let mut values = serde_json::Map::new();
        values.insert("requestId".to_string(), json!(request.id.to_string()));
        values.insert(
            "receivedAt".to_string(),
            json!(request.received_at.to_rfc3339()),
        );
        ctx.merge_context(values);
        Ok(())
    }
}

/// Adds conservative security headers to committed responses.
struct SecurityHeaders;

#[async_trait]
impl LifecycleHandler for SecurityHeaders {
    async fn handle(&self, ctx: &mut RequestContext) -> std::result::Result<(), PluginError> {
        if !ctx.committed() {
            return Ok(());
        }
        for (name, value) in [
            ("x-content-type-options", "nosniff"),
            ("x-frame-options", "DENY"),
            ("referrer-policy", "strict-origin-when-cross-origin"),
        ] {
            ctx.set_header(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        Ok(())
    }
}

/// The built-in descriptors enabled by configuration. The logger runs
/// before everything else; the header pass runs after everything else.
pub fn builtin_plugins(config: &BuiltinsConfig) -> Result<Vec<PluginDescriptor>> {
    let mut plugins = Vec::new();

    if config.request_logger {
        plugins.push(
            PluginDescriptor::builder("trellis-request-logger", VERSION)
                .priority(i32::MIN)
                .on_before_request(Arc::new(RequestLogger))
                .build()?,
        );
    }

    if config.security_headers {
        plugins.push(
            PluginDescriptor::builder("trellis-security-headers", VERSION)
                .priority(i32::MAX)
                .on_after_request(Arc::new(SecurityHeaders))
                .build()?,
        );
    }

    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Phase, RequestHead, ResponseInit};

    #[tokio::test]
    async fn test_request_logger_seeds_bag() {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        RequestLogger.handle(&mut ctx).await.unwrap();
        assert!(ctx.context_value("requestId").is_some());
        assert!(ctx.context_value("receivedAt").is_some());
    }

    #[tokio::test]
    async fn test_security_headers_only_on_committed_responses() {
        let mut ctx = RequestContext::new(RequestHead::get("/"));
        ctx.enter_phase(Phase::Request);
        SecurityHeaders.handle(&mut ctx).await.unwrap();
        assert!(ctx.header("x-content-type-options").is_none());

        ctx.set_response("ok".into(), ResponseInit::default())
            .unwrap();
        ctx.enter_phase(Phase::AfterRequest);
        SecurityHeaders.handle(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.header("x-content-type-options")
                .and_then(|v| v.to_str().ok()),
            Some("nosniff")
        );
    }

    #[test]
    fn test_builtins_respect_flags() {
        let all = builtin_plugins(&BuiltinsConfig::default()).unwrap();
        assert_eq!(all.len(), 2);

        let none = builtin_plugins(&BuiltinsConfig {
            request_logger: false,
            security_headers: false,
        })
        .unwrap();
        assert!(none.is_empty());
    }
}
