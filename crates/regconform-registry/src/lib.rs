//! # regconform Registry
//!
//! Client side of the OCI distribution protocol, instrumented for
//! conformance testing.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Distribution                           │
//! │   blob uploads · mounts · fetches · manifests · tags ·      │
//! │   referrers, each response checked against the contract    │
//! └─────────────────────────────────────────────────────────────┘
//!                          │ RegistryApi::send
//!                          ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────┐
//! │  RegistryClient (reqwest)    │  │  in-process registries   │
//! └──────────────────────────────┘  └──────────────────────────┘
//! ```
//!
//! A contract violation surfaces as a [`RegistryError`] for which
//! [`RegistryError::is_protocol_violation`] is true. Transport failures are
//! kept apart so they are never mistaken for non-conformance.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use regconform_registry::{Distribution, RegistryAuth, RegistryClient, RegistryConfig, TlsMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RegistryConfig::new("localhost:5000")
//!         .with_tls(TlsMode::Disabled)
//!         .with_auth(RegistryAuth::None);
//!     let distribution = Distribution::new(Arc::new(RegistryClient::new(config)?));
//!
//!     distribution.ping().await?;
//!     let tags = distribution.tag_list_all("conformance/one", 100).await?;
//!     println!("{tags:?}");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
mod client;
mod config;
mod error;
pub mod oci;
mod protocol;

pub use api::{ApiRequest, ApiResponse, Method, RegistryApi};
pub use client::RegistryClient;
pub use config::{RegistryAuth, RegistryConfig, TlsMode};
pub use error::RegistryError;
pub use oci::{ErrorCode, ErrorInfo, ErrorResponse, TagList};
pub use protocol::{Distribution, ManifestUpload, MountOutcome, Referrers, TagPage};
