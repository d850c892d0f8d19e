//! Locally connected peers
//!
//! [`Client`] wraps one peer's transport; [`Hub`] registers clients and
//! routes their messages, locally or through the directory to remote nodes.

mod client;
mod hub;

pub use client::*;
pub use hub::*;
