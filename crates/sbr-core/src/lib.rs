//! Core domain + application logic for storybridge.
//!
//! This crate is framework-agnostic. The story source (Instagram), the
//! destination (Telegram) and the inbound HTTP surface live behind ports
//! (traits) implemented in adapter crates.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod poller;
pub mod ports;
pub mod relay;
pub mod session;
pub mod staging;
pub mod webhook;

pub use errors::{Error, Result};

#[cfg(test)]
mod testing;
