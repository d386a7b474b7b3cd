//! Cookie operations and `Set-Cookie` rendering
//!
//! Cookie mutations requested before a response commit are queued and
//! flushed exactly once, in FIFO order, when the assembler produces the
//! final response. Defaults are `Path=/` and `SameSite=Lax`; deletion emits
//! an empty value expiring at the Unix epoch.

use cookie::{Cookie, SameSite};
use time::OffsetDateTime;
use warp::http::header::{HeaderValue, InvalidHeaderValue};

/// A pending cookie mutation.
#[derive(Debug, Clone)]
pub enum CookieOp {
    Set(Cookie<'static>),
    Delete(String),
}

impl CookieOp {
    /// Render this operation as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let rendered = match self {
            CookieOp::Set(cookie) => cookie.to_string(),
            CookieOp::Delete(name) => deletion_cookie(name).to_string(),
        };
        HeaderValue::from_str(&rendered)
    }
}

/// Fill in attributes the caller left unset.
pub fn apply_defaults(mut cookie: Cookie<'static>) -> Cookie<'static> {
    if cookie.path().is_none() {
        cookie.set_path("/");
    }
    if cookie.same_site().is_none() {
        cookie.set_same_site(SameSite::Lax);
    }
    cookie
}

fn deletion_cookie(name: &str) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), "");
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    cookie
}
