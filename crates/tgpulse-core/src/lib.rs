//! Core of the Telegram wait/notify bridge.
//!
//! This crate is intentionally framework-agnostic. The Telegram Bot API lives
//! behind ports (traits) implemented in adapter crates; the MCP shim drives the
//! [`bridge::Bridge`] façade.

pub mod bridge;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod pulse;
pub mod state;
pub mod utils;

pub use errors::{Error, Result};
