//! Cryptographic utilities.
//!
//! Provides authenticated encryption for client-held session cookies.

pub mod cookie;
pub use cookie::CookieCrypto;
