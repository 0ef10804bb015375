//! Façade request handling.
//!
//! Routing, backend failover, response shaping, the event relay and the
//! connection listener.

pub mod headers;
pub mod listener;
pub mod relay;
pub mod response;
pub mod router;
pub mod selector;
pub mod service;

pub use listener::serve;
pub use relay::EventRelay;
pub use selector::{BackendSelector, UpstreamReply, UpstreamRequest};
pub use service::Gateway;
