//! # Regconform Core
//!
//! Core types for the regconform registry conformance engine.
//!
//! This crate has no network dependency. It provides:
//!
//! - [`Status`] - Ordered outcome severity with a monotonic merge
//! - [`FixtureBuilder`] / [`Dataset`] - Synthetic, content-addressed test data
//! - [`scenario`] - The dataset shapes a conformance run pushes
//! - [`CapabilityMatrix`] - Per-operation enablement and worst observed status
//! - [`ResultNode`] - Hierarchical record of every test step
//!
//! ## Example
//!
//! ```rust
//! use regconform_core::{FixtureBuilder, GenOptions, Platform};
//!
//! let mut builder = FixtureBuilder::with_seed("image", 7);
//! let opts = GenOptions::default();
//! let (layer, diff_id, _) = builder.gen_layer(0, &opts).unwrap();
//! let (config, _) = builder
//!     .gen_config(&Platform::linux_amd64(), &[diff_id], &opts)
//!     .unwrap();
//! let (manifest, _) = builder.gen_manifest(&config, &[layer], &opts).unwrap();
//!
//! let dataset = builder.build();
//! assert_eq!(dataset.manifest_order(), &[manifest]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capability;
pub mod digest;
pub mod error;
pub mod fixture;
pub mod oci;
pub mod results;
pub mod scenario;
pub mod status;

#[cfg(test)]
mod proptest_tests;

pub use capability::{ApiToggles, Capability, CapabilityMatrix};
pub use digest::{Digest, DigestAlgorithm};
pub use error::{CapabilityError, FixtureError, Result};
pub use fixture::{Dataset, FixtureBuilder, GenOptions};
pub use oci::{Descriptor, ImageConfig, Index, Manifest, MediaType, Platform};
pub use results::{ResultNode, StatusCounts};
pub use scenario::DataShape;
pub use status::Status;
