//! Signing-authority client
//!
//! The cluster exposes certificate signing requests under two incompatible
//! schema generations. [`SigningRequests`] hides the difference: one
//! implementation per generation, chosen once per run from the
//! [`AuthorityVersion`] and used for both submission and watch.
//!
//! The state machine itself ([`submit`], [`watch_for_disposition`]) only
//! sees schema-neutral [`SigningRequest`] and [`ObservedRequest`] values.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::Client;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::registrar::{ApiServices, KubeApiServices};
use crate::{Error, Result};

mod current;
mod legacy;
mod version;

pub use current::CurrentSigningRequests;
pub use legacy::{
    LegacyCertificateSigningRequest, LegacyCertificateSigningRequestSpec,
    LegacyCertificateSigningRequestStatus, LegacyCondition, LegacySigningRequests,
};
pub use version::{AuthorityVersion, SchemaGeneration, CURRENT_SCHEMA_MIN_MINOR};

/// Label key identifying the application that owns a request
pub const APP_LABEL: &str = "k8s-app";

/// Usages requested for every certificate
pub const REQUESTED_USAGES: [&str; 4] = [
    "server auth",
    "client auth",
    "digital signature",
    "key agreement",
];

/// A request to submit, independent of schema generation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningRequest {
    /// Resource name, unique per attempt
    pub name: String,
    /// PEM-encoded PKCS#10 request
    pub request: Vec<u8>,
    /// Signer that should issue the certificate
    pub signer_name: String,
    /// Requested key usages
    pub usages: Vec<String>,
    /// Resource labels
    pub labels: BTreeMap<String, String>,
}

impl SigningRequest {
    /// Build a request with the standard usages and owner label
    pub fn new(
        name: impl Into<String>,
        request: Vec<u8>,
        signer_name: impl Into<String>,
        app_name: &str,
    ) -> Self {
        Self {
            name: name.into(),
            request,
            signer_name: signer_name.into(),
            usages: REQUESTED_USAGES.iter().map(|u| u.to_string()).collect(),
            labels: BTreeMap::from([(APP_LABEL.to_string(), app_name.to_string())]),
        }
    }
}

/// One condition as reported by the authority
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedCondition {
    /// `Approved`, `Denied` or `Failed`
    pub type_: String,
    /// Condition status; unset is meaningful for the legacy schema
    pub status: Option<String>,
}

/// A signing request as seen on the watch stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedRequest {
    /// Resource name
    pub name: String,
    /// Conditions in the order reported
    pub conditions: Vec<ObservedCondition>,
    /// Issued certificate, empty until signed
    pub certificate: Vec<u8>,
}

/// Terminal outcome of a signing request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Approved and signed
    Approved(Vec<u8>),
    /// Denied by the approver
    Denied,
    /// Signing failed
    Failed,
}

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The resource was created
    Created,
    /// A resource with the same name already exists
    AlreadyExists,
}

/// Stream of observed signing requests
pub type ObservedStream = BoxStream<'static, Result<ObservedRequest>>;

/// Signing-request operations for one schema generation
///
/// This trait allows mocking the Kubernetes API in tests while using the
/// real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SigningRequests: Send + Sync {
    /// Schema generation this implementation speaks
    fn schema(&self) -> SchemaGeneration;

    /// Create the request
    async fn create(&self, request: &SigningRequest) -> Result<CreateOutcome>;

    /// Delete a request by name; a missing request is not an error
    async fn delete(&self, name: &str) -> Result<()>;

    /// Watch every signing request of this generation
    fn watch(&self) -> ObservedStream;
}

/// Access to the authority's API surface
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authority: Send + Sync {
    /// Version reported by the authority
    async fn version(&self) -> Result<AuthorityVersion>;

    /// Signing-request operations for `schema`
    fn signing_requests(&self, schema: SchemaGeneration) -> Box<dyn SigningRequests>;

    /// APIService registration operations
    fn api_services(&self) -> Box<dyn ApiServices>;
}

/// [`Authority`] backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeAuthority {
    client: Client,
}

impl KubeAuthority {
    /// Create a new KubeAuthority wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Authority for KubeAuthority {
    async fn version(&self) -> Result<AuthorityVersion> {
        let info = self.client.apiserver_version().await?;
        AuthorityVersion::try_from(&info)
    }

    fn signing_requests(&self, schema: SchemaGeneration) -> Box<dyn SigningRequests> {
        match schema {
            SchemaGeneration::Legacy => Box::new(LegacySigningRequests::new(self.client.clone())),
            SchemaGeneration::Current => Box::new(CurrentSigningRequests::new(self.client.clone())),
        }
    }

    fn api_services(&self) -> Box<dyn ApiServices> {
        Box::new(KubeApiServices::new(self.client.clone()))
    }
}

/// Submit `request`, replacing a stale request of the same name
///
/// A name conflict means an earlier attempt crashed after submitting. Its
/// request is bound to a key we no longer hold, so it is deleted and the
/// create is retried exactly once.
pub async fn submit(requests: &dyn SigningRequests, request: &SigningRequest) -> Result<()> {
    let name = request.name.as_str();

    match requests.create(request).await {
        Ok(CreateOutcome::Created) => {}
        Ok(CreateOutcome::AlreadyExists) => {
            warn!(name = %name, "signing request already exists, replacing stale request");
            requests.delete(name).await.map_err(|e| {
                Error::submission(format!("failed to delete stale request {}: {}", name, e))
            })?;
            match requests.create(request).await {
                Ok(CreateOutcome::Created) => {}
                Ok(CreateOutcome::AlreadyExists) => {
                    return Err(Error::submission(format!(
                        "request {} still exists after deleting it",
                        name
                    )))
                }
                Err(e) => {
                    return Err(Error::submission(format!(
                        "failed to recreate request {}: {}",
                        name, e
                    )))
                }
            }
        }
        Err(e) => {
            return Err(Error::submission(format!(
                "failed to create request {}: {}",
                name, e
            )))
        }
    }

    info!(
        name = %name,
        signer = %request.signer_name,
        api_version = requests.schema().api_version(),
        "created signing request"
    );
    Ok(())
}

/// Evaluate one observation
///
/// Returns `None` while the request is in flight: no conditions yet, no
/// certificate yet, or no condition that is true.
pub fn evaluate(schema: SchemaGeneration, observed: &ObservedRequest) -> Option<Disposition> {
    if observed.conditions.is_empty() || observed.certificate.is_empty() {
        return None;
    }

    for condition in &observed.conditions {
        if !schema.condition_is_true(&condition.type_, condition.status.as_deref()) {
            continue;
        }
        match condition.type_.as_str() {
            "Approved" => return Some(Disposition::Approved(observed.certificate.clone())),
            "Denied" => return Some(Disposition::Denied),
            "Failed" => return Some(Disposition::Failed),
            _ => {}
        }
    }
    None
}

/// Watch until the request named `name` reaches a terminal state
///
/// Returns the issued certificate. There is no timeout here; the caller
/// owns the deadline.
pub async fn watch_for_disposition(requests: &dyn SigningRequests, name: &str) -> Result<Vec<u8>> {
    let schema = requests.schema();
    let mut stream = requests.watch();

    info!(name = %name, "watching signing request until it has been signed and approved");

    let mut last_error = None;
    while let Some(event) = stream.next().await {
        let observed = match event {
            Ok(observed) => observed,
            // The watcher backs off and re-lists; the deadline bounds how long
            Err(Error::Watch(reason)) => {
                warn!(name = %name, error = %reason, "watch interrupted, retrying");
                last_error = Some(reason);
                continue;
            }
            Err(e) => return Err(e),
        };
        if observed.name != name {
            continue;
        }

        match evaluate(schema, &observed) {
            Some(Disposition::Approved(certificate)) => {
                info!(name = %name, "signing request approved");
                return Ok(certificate);
            }
            Some(Disposition::Denied) => {
                return Err(Error::RequestDenied {
                    name: name.to_string(),
                })
            }
            Some(Disposition::Failed) => {
                return Err(Error::RequestFailed {
                    name: name.to_string(),
                })
            }
            None => debug!(
                name = %name,
                conditions = observed.conditions.len(),
                has_certificate = !observed.certificate.is_empty(),
                "signing request not yet terminal"
            ),
        }
    }

    Err(Error::watch(match last_error {
        Some(reason) => format!(
            "watch closed before {} reached a terminal state: {}",
            name, reason
        ),
        None => format!("watch closed before {} reached a terminal state", name),
    }))
}
