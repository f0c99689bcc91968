//! Aggregated API server registration
//!
//! When the provisioned workload is itself an aggregated API server, the
//! issued certificate is published as the `caBundle` of its `APIService`
//! so the authority can verify it.

use async_trait::async_trait;
use k8s_openapi::ByteString;
use kube::api::PostParams;
use kube::{Api, Client, CustomResource};
use serde::{Deserialize, Serialize};
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Default API group served by the aggregated server
pub const DEFAULT_GROUP: &str = "projectcalico.org";
/// Default API version served by the aggregated server
pub const DEFAULT_VERSION: &str = "v3";
/// Default namespace of the backing service
pub const DEFAULT_SERVICE_NAMESPACE: &str = "tigera-system";
/// Default name of the backing service
pub const DEFAULT_SERVICE_NAME: &str = "tigera-api";

const GROUP_PRIORITY_MINIMUM: i32 = 1500;
const VERSION_PRIORITY: i32 = 200;

/// Spec of an `apiregistration.k8s.io/v1` APIService
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "apiregistration.k8s.io",
    version = "v1",
    kind = "APIService",
    root = "ApiService",
    plural = "apiservices",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ApiServiceSpec {
    /// API group name
    pub group: String,

    /// API version within the group
    pub version: String,

    /// Minimum priority of the group
    pub group_priority_minimum: i32,

    /// Priority of this version within the group
    pub version_priority: i32,

    /// Service fronting the aggregated server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,

    /// PEM bundle used to verify the server's serving certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<ByteString>,
}

/// Reference to the service backing an APIService
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ServiceReference {
    /// Service name
    pub name: String,
    /// Service namespace
    pub namespace: String,
}

/// Target of an APIService registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiServiceRegistration {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Namespace of the backing service
    pub service_namespace: String,
    /// Name of the backing service
    pub service_name: String,
}

impl Default for ApiServiceRegistration {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            version: DEFAULT_VERSION.to_string(),
            service_namespace: DEFAULT_SERVICE_NAMESPACE.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl ApiServiceRegistration {
    /// Resource name, `<version>.<group>`
    pub fn name(&self) -> String {
        format!("{}.{}", self.version, self.group)
    }

    /// Desired spec with `ca_bundle` as the trust anchor
    pub fn spec(&self, ca_bundle: &[u8]) -> ApiServiceSpec {
        ApiServiceSpec {
            group: self.group.clone(),
            version: self.version.clone(),
            group_priority_minimum: GROUP_PRIORITY_MINIMUM,
            version_priority: VERSION_PRIORITY,
            service: Some(ServiceReference {
                name: self.service_name.clone(),
                namespace: self.service_namespace.clone(),
            }),
            ca_bundle: Some(ByteString(ca_bundle.to_vec())),
        }
    }
}

/// APIService operations
///
/// This trait allows mocking the Kubernetes API in tests while using the
/// real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiServices: Send + Sync {
    /// Get an APIService by name, `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<ApiService>>;

    /// Create an APIService
    async fn create(&self, service: &ApiService) -> Result<()>;

    /// Replace an existing APIService
    async fn replace(&self, service: &ApiService) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeApiServices {
    api: Api<ApiService>,
}

impl KubeApiServices {
    /// Create a new client for cluster-scoped APIServices
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ApiServices for KubeApiServices {
    async fn get(&self, name: &str) -> Result<Option<ApiService>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, service: &ApiService) -> Result<()> {
        self.api.create(&PostParams::default(), service).await?;
        Ok(())
    }

    async fn replace(&self, service: &ApiService) -> Result<()> {
        let name = service
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::registration("APIService has no name"))?;
        self.api.replace(name, &PostParams::default(), service).await?;
        Ok(())
    }
}

/// Create or update the APIService so it trusts `ca_bundle`
///
/// An existing registration keeps its metadata; only the spec is replaced.
pub async fn register_api_service(
    services: &dyn ApiServices,
    registration: &ApiServiceRegistration,
    ca_bundle: &[u8],
) -> Result<()> {
    let name = registration.name();
    let spec = registration.spec(ca_bundle);

    let existing = services.get(&name).await.map_err(|e| {
        Error::registration(format!("failed to read APIService {}: {}", name, e))
    })?;

    match existing {
        Some(mut service) => {
            service.spec = spec;
            services.replace(&service).await.map_err(|e| {
                Error::registration(format!("failed to update APIService {}: {}", name, e))
            })?;
            info!(name = %name, "updated APIService registration");
        }
        None => {
            services
                .create(&ApiService::new(&name, spec))
                .await
                .map_err(|e| {
                    Error::registration(format!("failed to create APIService {}: {}", name, e))
                })?;
            info!(name = %name, "created APIService registration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &[u8] = b"-----BEGIN CERTIFICATE-----\nCERTDATA\n-----END CERTIFICATE-----\n";

    fn existing(resource_version: &str) -> ApiService {
        let mut service = ApiService::new(
            "v3.projectcalico.org",
            ApiServiceSpec {
                group: "projectcalico.org".to_string(),
                version: "v3".to_string(),
                group_priority_minimum: 100,
                version_priority: 1,
                service: None,
                ca_bundle: Some(ByteString(b"stale".to_vec())),
            },
        );
        service.metadata.resource_version = Some(resource_version.to_string());
        service
    }

    #[test]
    fn default_registration_targets_calico_api() {
        let reg = ApiServiceRegistration::default();
        assert_eq!(reg.name(), "v3.projectcalico.org");

        let spec = reg.spec(CERT);
        assert_eq!(spec.group, "projectcalico.org");
        assert_eq!(spec.version, "v3");
        assert_eq!(spec.group_priority_minimum, 1500);
        assert_eq!(spec.version_priority, 200);
        assert_eq!(
            spec.service,
            Some(ServiceReference {
                name: "tigera-api".to_string(),
                namespace: "tigera-system".to_string(),
            })
        );
        assert_eq!(spec.ca_bundle.map(|b| b.0), Some(CERT.to_vec()));
    }

    #[test]
    fn serializes_as_v1_apiservice() {
        let reg = ApiServiceRegistration::default();
        let service = ApiService::new(&reg.name(), reg.spec(b"abc"));
        let json = serde_json::to_value(&service).unwrap();

        assert_eq!(json["apiVersion"], "apiregistration.k8s.io/v1");
        assert_eq!(json["kind"], "APIService");
        assert_eq!(json["spec"]["groupPriorityMinimum"], 1500);
        assert_eq!(json["spec"]["versionPriority"], 200);
        assert_eq!(json["spec"]["caBundle"], "YWJj");
        assert_eq!(json["spec"]["service"]["namespace"], "tigera-system");
    }

    // ==========================================================================
    // Story Tests: Publishing The Serving CA
    // ==========================================================================

    /// Story: First run creates the registration
    #[tokio::test]
    async fn story_missing_registration_is_created() {
        let mut mock = MockApiServices::new();
        mock.expect_get()
            .withf(|name| name == "v3.projectcalico.org")
            .times(1)
            .returning(|_| Ok(None));
        mock.expect_create()
            .withf(|svc| {
                svc.metadata.name.as_deref() == Some("v3.projectcalico.org")
                    && svc.spec.ca_bundle.as_ref().map(|b| b.0.as_slice()) == Some(CERT)
            })
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_replace().never();

        register_api_service(&mock, &ApiServiceRegistration::default(), CERT)
            .await
            .unwrap();
    }

    /// Story: A restart replaces the spec but keeps the existing metadata
    #[tokio::test]
    async fn story_existing_registration_is_updated_in_place() {
        let mut mock = MockApiServices::new();
        mock.expect_get()
            .times(1)
            .returning(|_| Ok(Some(existing("42"))));
        mock.expect_replace()
            .withf(|svc| {
                svc.metadata.resource_version.as_deref() == Some("42")
                    && svc.spec.group_priority_minimum == 1500
                    && svc.spec.ca_bundle.as_ref().map(|b| b.0.as_slice()) == Some(CERT)
            })
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_create().never();

        register_api_service(&mock, &ApiServiceRegistration::default(), CERT)
            .await
            .unwrap();
    }

    /// Story: Lookup failures other than not-found abort registration
    #[tokio::test]
    async fn story_lookup_failure_is_a_registration_error() {
        let mut mock = MockApiServices::new();
        mock.expect_get()
            .returning(|_| Err(Error::config("forbidden")));
        mock.expect_create().never();
        mock.expect_replace().never();

        let err = register_api_service(&mock, &ApiServiceRegistration::default(), CERT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registration(ref m) if m.contains("forbidden")));
    }

    #[tokio::test]
    async fn custom_target_uses_its_own_name() {
        let reg = ApiServiceRegistration {
            group: "metrics.example.com".to_string(),
            version: "v1beta1".to_string(),
            service_namespace: "monitoring".to_string(),
            service_name: "metrics-api".to_string(),
        };

        let mut mock = MockApiServices::new();
        mock.expect_get()
            .withf(|name| name == "v1beta1.metrics.example.com")
            .returning(|_| Ok(None));
        mock.expect_create()
            .withf(|svc| svc.spec.service.as_ref().map(|s| s.name.as_str()) == Some("metrics-api"))
            .times(1)
            .returning(|_| Ok(()));

        register_api_service(&mock, &reg, CERT).await.unwrap();
    }
}
