//! PKI operations for the workload identity
//!
//! This module generates the workload's private key and the PKCS#10 request
//! that carries its identity to the signing authority. Key material never
//! leaves this process except through the output writer.
//!
//! # Security Model
//!
//! - The key pair is generated locally from the OS CSPRNG
//! - Only the CSR (public key + identity) is sent to the authority
//! - The private key is written to disk only after the request is approved

use thiserror::Error;

mod csr;
mod key;

pub use csr::{build_csr, SignatureAlgorithm, WorkloadIdentity, EMAIL_ADDRESS_OID};
pub use key::{KeyAlgorithm, KeyFamily, KeyMaterial};

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation or key serialization failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// The signature algorithm cannot be produced with the generated key
    #[error("signature algorithm {signature:?} is not supported for {key:?} keys")]
    UnsupportedCombination {
        /// Requested signature algorithm
        signature: SignatureAlgorithm,
        /// Generated key algorithm
        key: KeyAlgorithm,
    },

    /// CSR encoding or signing failed
    #[error("CSR encoding failed: {0}")]
    CsrEncodingFailed(String),

    /// PEM parsing error
    #[error("PEM parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the block tag and DER bytes
pub fn parse_pem(pem_data: &[u8]) -> Result<(String, Vec<u8>)> {
    let pem_obj = ::pem::parse(pem_data)
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok((pem_obj.tag().to_string(), pem_obj.contents().to_vec()))
}
