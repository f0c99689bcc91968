//! `certificates.k8s.io/v1` signing requests

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestSpec,
};
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use super::{
    CreateOutcome, ObservedCondition, ObservedRequest, ObservedStream, SchemaGeneration,
    SigningRequest, SigningRequests,
};
use crate::{Error, Result};

/// Signing requests against the current schema
pub struct CurrentSigningRequests {
    api: Api<CertificateSigningRequest>,
}

impl CurrentSigningRequests {
    /// Create a new client for cluster-scoped v1 requests
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn to_resource(request: &SigningRequest) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            labels: Some(request.labels.clone()),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(request.request.clone()),
            signer_name: request.signer_name.clone(),
            usages: Some(request.usages.clone()),
            ..Default::default()
        },
        status: None,
    }
}

fn observe(csr: CertificateSigningRequest) -> ObservedRequest {
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
                status: Some(c.status),
            })
            .collect(),
        certificate: status.certificate.map(|c| c.0).unwrap_or_default(),
    }
}

#[async_trait]
impl SigningRequests for CurrentSigningRequests {
    fn schema(&self) -> SchemaGeneration {
        SchemaGeneration::Current
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
                debug!(name = %name, "signing request already gone");
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
