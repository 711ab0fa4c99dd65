//! SoftLayer client for the BOSH CPI.
//!
//! This crate exposes the SoftLayer object model, a REST transport ([`RestApi`]) and the
//! polling facade ([`SoftLayerClient`]) the CPI drives guests, volumes and images through.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod client;
pub mod models;
pub mod pricing;
pub mod rest;

pub use api::{filter_path, merge_filters, RebootKind, SoftLayerApi};
pub use client::{ClientManager, ReloadRequest, SoftLayerClient, UpgradeRequest, VolumeRequest};
#[cfg(any(test, feature = "mock"))]
pub use client::MockSoftLayerClient;
pub use models::{
    BlockDeviceTemplateGroup, Hardware, Location, NetworkStorage, SshKey, Transaction,
    VirtualGuest,
};
pub use rest::{RestApi, RestApiBuilder};

/// Convenient result alias matching the shared CPI error type.
pub type Result<T> = softlayer_cpi_core::Result<T>;
