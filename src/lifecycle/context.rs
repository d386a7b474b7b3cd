//! Request context and response draft state
//!
//! The context owns everything a plugin may observe or mutate during one
//! request: the inbound request head, the phase marker, the response draft,
//! the merge-per-key context bag, queued cookie operations, and the
//! suppression flags consumed later by the response assembler.

use crate::error::LifecycleError;
use crate::lifecycle::cookies::{self, CookieOp};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cookie::Cookie;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use uuid::Uuid;
use warp::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use warp::http::{HeaderMap, HeaderValue, Method, StatusCode};

/// Position of a request in the lifecycle state machine. Monotonic: a phase
/// is never revisited once left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    BeforeRequest,
    Request,
    AfterRequest,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::BeforeRequest => write!(f, "before_request"),
            Phase::Request => write!(f, "request"),
            Phase::AfterRequest => write!(f, "after_request"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Immutable view of the inbound request handed to every plugin callback.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub received_at: DateTime<Utc>,
}

impl RequestHead {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: Option<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query,
            headers,
            body,
            received_at: Utc::now(),
        }
    }

    /// Convenience constructor for a bare GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None, HeaderMap::new(), Bytes::new())
    }

    /// First value of the named header as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Body of a drafted response. Streams are transformed chunk-by-chunk by the
/// assembler and are never buffered in full.
pub enum ResponseBody {
    Text(String),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl ResponseBody {
    pub fn is_stream(&self) -> bool {
        matches!(self, ResponseBody::Stream(_))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            ResponseBody::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody::Text(value)
    }
}

impl From<&str> for ResponseBody {
    fn from(value: &str) -> Self {
        ResponseBody::Text(value.to_string())
    }
}

/// Status and headers accompanying a response commit.
#[derive(Debug, Default)]
pub struct ResponseInit {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
}

impl ResponseInit {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            headers: HeaderMap::new(),
        }
    }

    pub fn header(mut self, name: warp::http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// The draft a committed response accumulates into before assembly.
#[derive(Debug)]
pub struct ResponseDraft {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<ResponseBody>,
    committed: bool,
}

impl ResponseDraft {
    fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            committed: false,
        }
    }

    pub fn committed(&self) -> bool {
        self.committed
    }
}

/// Mutable per-request state shared by all plugin callbacks of one request.
///
/// Created at request arrival, consumed by the assembler, never reused.
#[derive(Debug)]
pub struct RequestContext {
    request: RequestHead,
    phase: Phase,
    draft: ResponseDraft,
    /// Header writes made before any commit; merged into the draft at commit
    /// time with the commit's own headers winning per key.
    header_overrides: HeaderMap,
    send_now: bool,
    suppress_rewrite: bool,
    suppress_injection: bool,
    bag: Map<String, Value>,
    cookie_ops: VecDeque<CookieOp>,
    cookie_cache: Option<HashMap<String, String>>,
    globals: Map<String, Value>,
}

impl RequestContext {
    pub fn new(request: RequestHead) -> Self {
        Self {
            request,
            phase: Phase::BeforeRequest,
            draft: ResponseDraft::new(),
            header_overrides: HeaderMap::new(),
            send_now: false,
            suppress_rewrite: false,
            suppress_injection: false,
            bag: Map::new(),
            cookie_ops: VecDeque::new(),
            cookie_cache: None,
            globals: Map::new(),
        }
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advance the state machine. Phases are monotonic; the engine is the
    /// only caller and never moves backwards.
    pub(crate) fn enter_phase(&mut self, phase: Phase) {
        debug_assert!(phase >= self.phase, "phase must not move backwards");
        self.phase = phase;
    }

    // ------------------------------------------------------------------
    // Context bag
    // ------------------------------------------------------------------

    /// Merge values into the context bag. Existing keys not named here are
    /// preserved; named keys are overwritten (later write wins per key).
    pub fn merge_context(&mut self, values: Map<String, Value>) {
        for (key, value) in values {
            self.bag.insert(key, value);
        }
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.bag
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.bag.get(key)
    }

    // ------------------------------------------------------------------
    // Response draft
    // ------------------------------------------------------------------

    /// Commit a response. Valid only during the request phase and only once
    /// per request.
    pub fn set_response(
        &mut self,
        body: ResponseBody,
        init: ResponseInit,
    ) -> std::result::Result<(), LifecycleError> {
        if self.phase != Phase::Request {
            return Err(LifecycleError::StateViolation {
                phase: self.phase,
                operation: "set_response".to_string(),
            });
        }
        if self.draft.committed {
            return Err(LifecycleError::ResponseAlreadySet);
        }

        if let Some(status) = init.status {
            self.draft.status = status;
        }
        // Pre-commit overrides first, then the commit's own headers on top.
        self.draft.headers = self.header_overrides.clone();
        for (name, value) in init.headers.iter() {
            self.draft.headers.insert(name.clone(), value.clone());
        }
        self.draft.body = Some(body);
        self.draft.committed = true;
        Ok(())
    }

    /// Discard a previous commit so a later handler may re-commit. A no-op
    /// when nothing is committed, so guard plugins can call unconditionally.
    pub fn unset_response(&mut self) -> std::result::Result<(), LifecycleError> {
        if self.phase != Phase::Request {
            return Err(LifecycleError::StateViolation {
                phase: self.phase,
                operation: "unset_response".to_string(),
            });
        }
        self.draft = ResponseDraft::new();
        self.send_now = false;
        Ok(())
    }

    /// Request early termination of the request phase. Requires a prior
    /// commit; the remaining request-phase handlers are skipped but
    /// after_request still runs in full.
    pub fn send_now(&mut self) -> std::result::Result<(), LifecycleError> {
        if self.phase != Phase::Request {
            return Err(LifecycleError::StateViolation {
                phase: self.phase,
                operation: "send_now".to_string(),
            });
        }
        if !self.draft.committed {
            return Err(LifecycleError::ResponseNotSet);
        }
        self.send_now = true;
        Ok(())
    }

    pub fn send_now_requested(&self) -> bool {
        self.send_now
    }

    pub fn committed(&self) -> bool {
        self.draft.committed
    }

    pub fn status(&self) -> StatusCode {
        self.draft.status
    }

    /// Set a response header. Before a commit the value lands in the
    /// override map merged at commit time; after a commit it applies to the
    /// live draft directly.
    pub fn set_header(&mut self, name: warp::http::header::HeaderName, value: HeaderValue) {
        if self.draft.committed {
            self.draft.headers.insert(name, value);
        } else {
            self.header_overrides.insert(name, value);
        }
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        if self.draft.committed {
            self.draft.headers.get(name)
        } else {
            self.header_overrides.get(name)
        }
    }

    pub fn content_type(&self) -> Option<String> {
        self.draft
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    // ------------------------------------------------------------------
    // Cookies
    // ------------------------------------------------------------------

    /// Set a cookie on the response. Defaults (`Path=/`, `SameSite=Lax`) are
    /// applied to attributes the caller left unset. Before a commit the
    /// operation is queued FIFO and flushed exactly once at assembly; after
    /// a commit it is applied to the draft immediately.
    pub fn set_cookie(&mut self, cookie: Cookie<'static>) {
        let op = CookieOp::Set(cookies::apply_defaults(cookie));
        self.push_cookie_op(op);
    }

    /// Delete a cookie by name: emits a `Set-Cookie` with an empty value and
    /// an epoch expiration.
    pub fn delete_cookie(&mut self, name: impl Into<String>) {
        self.push_cookie_op(CookieOp::Delete(name.into()));
    }

    fn push_cookie_op(&mut self, op: CookieOp) {
        if self.draft.committed {
            match op.to_header_value() {
                Ok(value) => {
                    self.draft.headers.append(SET_COOKIE, value);
                }
                Err(err) => {
                    tracing::warn!(request_id = %self.request.id, %err, "dropping unencodable cookie");
                }
            }
        } else {
            self.cookie_ops.push_back(op);
        }
    }

    /// Value of a cookie sent by the client. The request's `Cookie` header
    /// is parsed once and cached for the remainder of the request.
    pub fn request_cookie(&mut self, name: &str) -> Option<String> {
        if self.cookie_cache.is_none() {
            let mut cache = HashMap::new();
            for header in self.request.headers.get_all(COOKIE) {
                if let Ok(raw) = header.to_str() {
                    for parsed in Cookie::split_parse(raw.to_string()).flatten() {
                        cache.insert(parsed.name().to_string(), parsed.value().to_string());
                    }
                }
            }
            self.cookie_cache = Some(cache);
        }
        self.cookie_cache
            .as_ref()
            .and_then(|cache| cache.get(name).cloned())
    }

    pub fn pending_cookie_ops(&self) -> usize {
        self.cookie_ops.len()
    }

    // ------------------------------------------------------------------
    // Suppression and injection
    // ------------------------------------------------------------------

    /// Skip the content-rewrite pipeline for this response.
    pub fn suppress_rewrite(&mut self) {
        self.suppress_rewrite = true;
    }

    /// Skip the global-value-injection step for this response.
    pub fn suppress_injection(&mut self) {
        self.suppress_injection = true;
    }

    pub fn rewrite_suppressed(&self) -> bool {
        self.suppress_rewrite
    }

    pub fn injection_suppressed(&self) -> bool {
        self.suppress_injection
    }

    pub fn clear_rewrite_suppression(&mut self) {
        self.suppress_rewrite = false;
    }

    pub fn clear_injection_suppression(&mut self) {
        self.suppress_injection = false;
    }

    /// Expose a serialized value to the client under the named global
    /// binding. Later writes win per name.
    pub fn expose_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    pub(crate) fn into_parts(self) -> ContextParts {
        ContextParts {
            request: self.request,
            draft: self.draft,
            suppress_rewrite: self.suppress_rewrite,
            suppress_injection: self.suppress_injection,
            cookie_ops: self.cookie_ops,
            globals: self.globals,
        }
    }
}

/// Everything the assembler needs once the lifecycle has finished.
pub(crate) struct ContextParts {
    pub request: RequestHead,
    pub draft: ResponseDraft,
    pub suppress_rewrite: bool,
    pub suppress_injection: bool,
    pub cookie_ops: VecDeque<CookieOp>,
    pub globals: Map<String, Value>,
}
