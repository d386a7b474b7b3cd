//! Per-request lifecycle state machine
//!
//! One `RequestContext` exists per in-flight request and is never shared
//! across requests. The `RequestLifecycleEngine` walks the context through
//! the phase state machine, invoking registered plugin handlers strictly
//! sequentially in priority order.
//!
//! # Modules
//!
//! - `context`: request head, response draft, and the phase-gated state bag
//! - `cookies`: FIFO cookie operation queue and `Set-Cookie` rendering
//! - `engine`: the before/request/after phase state machine

pub mod context;
pub mod cookies;
pub mod engine;

pub use context::{Phase, RequestContext, RequestHead, ResponseBody, ResponseInit};
pub use cookies::CookieOp;
pub use engine::{LifecycleOutcome, RequestLifecycleEngine};
