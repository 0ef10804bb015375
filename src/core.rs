//! Gateway components.
//!
//! Login throttling and sessions live in `middleware`; routing, failover, the
//! event relay and the listener live in `proxy`.

pub mod middleware;
pub mod proxy;
