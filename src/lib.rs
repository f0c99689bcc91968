//! key-cert-provisioner - obtain a signed workload certificate from the cluster
//!
//! Runs as an init container. It generates a private key, submits a
//! certificate signing request to the Kubernetes signing authority, waits
//! for the request to be approved and signed, and writes the certificate and
//! key into a directory shared with the workload.
//!
//! # Architecture
//!
//! - The key never leaves the pod; only the CSR is sent to the authority
//! - The authority's version selects one of two CSR schema generations,
//!   once per run, for both submission and watch
//! - A process-wide deadline races the flow; expiry exits with a distinct
//!   status so the restart policy retries with fresh material
//!
//! # Modules
//!
//! - [`pki`] - Key generation and PKCS#10 construction
//! - [`authority`] - Version-aware signing-request client
//! - [`provisioner`] - The end-to-end flow and its deadline
//! - [`output`] - Atomic output file writer
//! - [`registrar`] - Optional APIService registration
//! - [`config`] - CLI/environment configuration
//! - [`error`] - Error types and exit codes

#![deny(missing_docs)]

pub mod authority;
pub mod config;
pub mod error;
pub mod output;
pub mod pki;
pub mod provisioner;
pub mod registrar;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
