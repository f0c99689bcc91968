//! `certificates.k8s.io/v1beta1` signing requests
//!
//! The v1beta1 resource was removed from the generated API bindings, so it is
//! declared here with only the fields this client reads or writes.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CreateOutcome, ObservedCondition, ObservedRequest, ObservedStream, SchemaGeneration,
    SigningRequest, SigningRequests,
};
use crate::{Error, Result};

/// Spec of a v1beta1 CertificateSigningRequest
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "certificates.k8s.io",
    version = "v1beta1",
    kind = "CertificateSigningRequest",
    root = "LegacyCertificateSigningRequest",
    plural = "certificatesigningrequests",
    status = "LegacyCertificateSigningRequestStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCertificateSigningRequestSpec {
    /// PEM-encoded PKCS#10 request
    pub request: ByteString,

    /// Requested signer; optional in this generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,

    /// Requested key usages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<String>>,
}

/// Status of a v1beta1 CertificateSigningRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCertificateSigningRequestStatus {
    /// Approval conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<LegacyCondition>>,

    /// Issued certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ByteString>,
}

/// Condition of a v1beta1 request; `status` may be absent
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCondition {
    /// `Approved`, `Denied` or `Failed`
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Signing requests against the legacy schema
pub struct LegacySigningRequests {
    api: Api<LegacyCertificateSigningRequest>,
}

impl LegacySigningRequests {
    /// Create a new client for cluster-scoped v1beta1 requests
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn to_resource(request: &SigningRequest) -> LegacyCertificateSigningRequest {
    let mut csr = LegacyCertificateSigningRequest::new(
        &request.name,
        LegacyCertificateSigningRequestSpec {
            request: ByteString(request.request.clone()),
            signer_name: Some(request.signer_name.clone()),
            usages: Some(request.usages.clone()),
        },
    );
    csr.metadata.labels = Some(request.labels.clone());
    csr
}

fn observe(csr: LegacyCertificateSigningRequest) -> ObservedRequest {
    let name = csr.name_any();
    let status = csr.status.unwrap_or_default();
    ObservedRequest {
        name,
        conditions: status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .map(|c| ObservedCondition {
                type_: c.type_,
                status: c.status,
            })
            .collect(),
        certificate: status.certificate.map(|c| c.0).unwrap_or_default(),
    }
}

#[async_trait]
impl SigningRequests for LegacySigningRequests {
    fn schema(&self) -> SchemaGeneration {
        SchemaGeneration::Legacy
    }

    async fn create(&self, request: &SigningRequest) -> Result<CreateOutcome> {
        match self
            .api
            .create(&PostParams::default(), &to_resource(request))
            .await
        {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(name = %name, "legacy signing request already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn watch(&self) -> ObservedStream {
        watcher(self.api.clone(), watcher::Config::default().any_semantic())
            .default_backoff()
            .applied_objects()
            .map_ok(observe)
            .map_err(|e| Error::watch(e.to_string()))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn resource_type_is_v1beta1() {
        assert_eq!(
            LegacyCertificateSigningRequest::api_version(&()),
            "certificates.k8s.io/v1beta1"
        );
        assert_eq!(LegacyCertificateSigningRequest::kind(&()), "CertificateSigningRequest");
        assert_eq!(
            LegacyCertificateSigningRequest::plural(&()),
            "certificatesigningrequests"
        );
    }

    #[test]
    fn resource_carries_request_fields() {
        let req = SigningRequest::new("ns1:pod1:abc123", b"CSR".to_vec(), "example.com/signer", "typha");
        let csr = to_resource(&req);
        assert_eq!(csr.metadata.name.as_deref(), Some("ns1:pod1:abc123"));
        assert_eq!(csr.spec.signer_name.as_deref(), Some("example.com/signer"));
        assert_eq!(csr.spec.request.0, b"CSR");

        let json = serde_json::to_value(&csr).unwrap();
        assert_eq!(json["apiVersion"], "certificates.k8s.io/v1beta1");
        assert_eq!(json["spec"]["signerName"], "example.com/signer");
        assert_eq!(json["metadata"]["labels"]["k8s-app"], "typha");
    }

    #[test]
    fn approval_without_status_survives_decoding() {
        // Older authorities omit status on approval conditions entirely
        let csr: LegacyCertificateSigningRequest = serde_json::from_value(serde_json::json!({
            "apiVersion": "certificates.k8s.io/v1beta1",
            "kind": "CertificateSigningRequest",
            "metadata": { "name": "ns1:pod1:abc123" },
            "spec": { "request": "Q1NS" },
            "status": {
                "conditions": [{ "type": "Approved", "reason": "AutoApproved" }],
                "certificate": "Q0VSVERBVEE="
            }
        }))
        .unwrap();

        let observed = observe(csr);
        assert_eq!(observed.name, "ns1:pod1:abc123");
        assert_eq!(observed.certificate, b"CERTDATA");
        assert_eq!(observed.conditions.len(), 1);
        assert_eq!(observed.conditions[0].type_, "Approved");
        assert_eq!(observed.conditions[0].status, None);
        assert!(SchemaGeneration::Legacy.condition_is_true(
            &observed.conditions[0].type_,
            observed.conditions[0].status.as_deref()
        ));
    }
}
