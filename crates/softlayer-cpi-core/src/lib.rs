//! # softlayer-cpi-core
//!
//! Core types and utilities shared by the BOSH SoftLayer CPI crates.
//!
//! This crate provides the error taxonomy, configuration structures, HTTP retry settings and
//! the bounded polling primitive every long-running SoftLayer operation is built on.
//!
//! ## Modules
//!
//! - [`error`] - Error types, remote exception classification and CPI error mapping
//! - [`config`] - CPI configuration (credentials, registry, agent options, timeouts)
//! - [`client`] - HTTP client settings and retry policy
//! - [`poll`] - Generic "poll until predicate or deadline" helper

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod poll;

// Re-export commonly used types
pub use error::{Error, ExceptionKind, Result, ResultExt};
