//! Error types for the key/certificate provisioner

use std::time::Duration;

use thiserror::Error;

use crate::pki::PkiError;

/// Exit status for any fatal error
pub const EXIT_FAILURE: i32 = 1;

/// Exit status when the deadline fires before a disposition is observed
///
/// Distinct from [`EXIT_FAILURE`] so the surrounding restart policy can tell
/// "timed out, retry me" apart from a hard failure.
pub const EXIT_TIMEOUT: i32 = 2;

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing or invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Pod IP does not parse as an IPv4 or IPv6 address
    #[error("invalid pod IP {0:?}")]
    InvalidIp(String),

    /// Private key generation failed
    #[error("key generation error: {0}")]
    KeyGeneration(String),

    /// CSR could not be encoded or signed
    #[error("CSR encoding error: {0}")]
    CsrEncoding(String),

    /// The authority reported a version we cannot interpret
    #[error("failed to parse authority version: {0}")]
    VersionParse(String),

    /// Creating the signing request failed
    #[error("submission error: {0}")]
    Submission(String),

    /// The watch on signing requests failed or closed early
    #[error("watch error: {0}")]
    Watch(String),

    /// The authority denied the request
    #[error("CSR was denied for this pod. CSR name: {name}")]
    RequestDenied {
        /// Name of the denied request
        name: String,
    },

    /// The authority marked the request as failed
    #[error("CSR failed for this pod. CSR name: {name}")]
    RequestFailed {
        /// Name of the failed request
        name: String,
    },

    /// No disposition was observed before the deadline
    #[error("timed out after {0:?} waiting for a signed certificate")]
    Timeout(Duration),

    /// Writing output files failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Upserting the APIService registration failed
    #[error("registration error: {0}")]
    Registration(String),

    /// The provisioning task ended without producing a result
    #[error("provisioning task error: {0}")]
    Task(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a version parse error with the given message
    pub fn version_parse(msg: impl Into<String>) -> Self {
        Self::VersionParse(msg.into())
    }

    /// Create a submission error with the given message
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }

    /// Create a watch error with the given message
    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }

    /// Create a persistence error with the given message
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a registration error with the given message
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    /// True when the authority itself said no (denied or failed)
    ///
    /// Lets operators tell "the authority rejected us" apart from
    /// "we could not talk to the authority".
    pub fn is_disposition(&self) -> bool {
        matches!(self, Self::RequestDenied { .. } | Self::RequestFailed { .. })
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Timeout(_) => EXIT_TIMEOUT,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<PkiError> for Error {
    fn from(err: PkiError) -> Self {
        match err {
            PkiError::KeyGenerationFailed(msg) => Self::KeyGeneration(msg),
            other => Self::CsrEncoding(other.to_string()),
        }
    }
}

impl From<clap::Error> for Error {
    fn from(err: clap::Error) -> Self {
        // clap exits with 2 on usage errors, which would read as a timeout
        Self::Config(err.to_string().trim_end().to_string())
    }
}
