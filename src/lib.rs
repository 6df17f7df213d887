//! murmur: resilient client communication layer for a voice assistant.
//!
//! # Components
//!
//! - **Connection manager** ([`connection`]): one persistent duplex link to
//!   the backend with correlation-id request/response matching, heartbeats
//!   and capped exponential reconnect backoff.
//! - **Refresh coordinator** ([`auth`]): attaches bearer credentials to HTTP
//!   calls and turns a burst of 401s into a single refresh, replaying each
//!   request once or forcing a logout.
//! - **Classification façade** ([`classifier`]): remote-first intent
//!   classification with retries, an on-device fallback, a TTL cache,
//!   rolling metrics and health tracking.
//!
//! [`MurmurClient`] wires all three from a [`MurmurConfig`].

pub mod auth;
pub mod classifier;
pub mod client;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{MurmurClient, MurmurClientBuilder};
pub use config::MurmurConfig;
pub use error::{MurmurError, Result};
