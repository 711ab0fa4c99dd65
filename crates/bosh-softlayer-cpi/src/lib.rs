//! BOSH Cloud Provider Interface for SoftLayer.
//!
//! Turns the director's CPI verbs into SoftLayer orders, transactions and guest commands:
//!
//! - [`vm`] - finding, creating, re-imaging and deleting virtual guests and bare metal servers
//! - [`disk`] - persistent iSCSI volumes and their attachment
//! - [`stemcell`] - image templates used as stemcells
//! - [`agent_env`] and [`registry`] - the agent settings document and where it is stored
//! - [`action`] - request decoding and verb dispatch

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod agent_env;
pub mod disk;
pub mod network;
pub mod registry;
pub mod ssh;
pub mod stemcell;
pub mod vm;

pub use action::{dispatcher_from_config, Dispatcher, Request, Response};
