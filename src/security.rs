//! Security modules.
//!
//! Cookie cryptography used by the session layer.

pub mod crypto;
