//! Middleware components.
//!
//! Includes login attempt limiting and encrypted session management.

mod ratelimit;
mod session;

pub use ratelimit::{LoginCheck, LoginRateLimiter, normalize_identity};
pub use session::{
    SESSION_COOKIE_NAME, Session, SessionManager, SessionStatus, find_cookie, format_set_cookie,
    strip_cookie, unix_now,
};
