// src/lib.rs

//! Terraform Registry Mirror
//!
//! A self-hosted mirror for the public provider registry and HashiCorp tool
//! binaries. Two roles share one on-disk store:
//!
//! - The **downloader** discovers, filters, fetches, verifies and atomically
//!   materializes provider archives, then writes the Network Mirror index
//!   documents and a metadata journal.
//! - The **server** publishes the resulting tree over HTTP(S), with health,
//!   version and metrics endpoints.

pub mod client;
pub mod downloader;
mod error;
pub mod filters;
pub mod fsutil;
pub mod indexgen;
pub mod metadata;
pub mod registry;
pub mod server;
pub mod version;

pub use error::{Error, Result};
