//! Startup configuration
//!
//! Flags fall back to the environment variables a pod spec sets, so the
//! binary runs unchanged as an init container. Everything is resolved once
//! into a [`ProvisioningConfig`] and passed down explicitly.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use crate::output::{CaBundle, OutputConfig};
use crate::pki::{KeyAlgorithm, SignatureAlgorithm, WorkloadIdentity};
use crate::registrar::{
    ApiServiceRegistration, DEFAULT_GROUP, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_NAMESPACE,
    DEFAULT_VERSION,
};
use crate::{Error, Result};

/// Length of the random or UID-derived request-name suffix
const SUFFIX_LEN: usize = 6;

/// Default deadline for the whole provisioning flow
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// key-cert-provisioner - obtain a signed workload certificate via a CSR
#[derive(Parser, Debug, Clone)]
#[command(name = "key-cert-provisioner", version, about, long_about = None)]
pub struct Args {
    /// Namespace of this pod
    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: String,

    /// Name of this pod
    #[arg(long, env = "POD_NAME")]
    pub pod_name: String,

    /// UID of this pod; seeds the request-name suffix when set
    #[arg(long, env = "POD_UID")]
    pub pod_uid: Option<String>,

    /// Signer that should issue the certificate
    #[arg(long, env = "SIGNER")]
    pub signer: String,

    /// Subject common name
    #[arg(long, env = "COMMON_NAME")]
    pub common_name: String,

    /// Optional PKCS#9 email address
    #[arg(long, env = "EMAIL_ADDRESS")]
    pub email_address: Option<String>,

    /// Pod IP, added as an IP subject alternative name
    #[arg(long, env = "POD_IP")]
    pub pod_ip: String,

    /// Comma-separated DNS subject alternative names
    #[arg(long, env = "DNS_NAMES", value_delimiter = ',', required = true)]
    pub dns_names: Vec<String>,

    /// Signature algorithm, e.g. SHA256WithRSA or ECDSAWithSHA384
    #[arg(long, env = "SIGNATURE_ALGORITHM", default_value = "")]
    pub signature_algorithm: String,

    /// Key algorithm, e.g. RSAWithSize2048 or ECDSAWithCurve256
    #[arg(long, env = "KEY_ALGORITHM", default_value = "")]
    pub key_algorithm: String,

    /// Directory the certificate and key are written to
    #[arg(long, env = "SECRET_LOCATION")]
    pub secret_location: PathBuf,

    /// File name of the private key
    #[arg(long, env = "KEY_NAME")]
    pub key_name: String,

    /// File name of the certificate
    #[arg(long, env = "CERT_NAME")]
    pub cert_name: String,

    /// CA bundle to copy next to the certificate
    #[arg(long, env = "CA_BUNDLE_PATH")]
    pub ca_bundle_path: Option<PathBuf>,

    /// File name of the copied CA bundle
    #[arg(long, env = "CA_BUNDLE_NAME", default_value = "ca.crt")]
    pub ca_bundle_name: String,

    /// Value of the k8s-app label on the signing request
    #[arg(long, env = "APP_NAME", default_value = "key-cert-provisioner")]
    pub app_name: String,

    /// Register this workload as an aggregated API server
    ///
    /// Only the exact value `true` enables registration; any other value
    /// leaves it off instead of failing startup.
    #[arg(
        long,
        env = "REGISTER_APISERVER",
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_flag
    )]
    pub register_apiserver: bool,

    /// API group of the APIService registration
    #[arg(long, env = "APISERVICE_GROUP", default_value = DEFAULT_GROUP)]
    pub apiservice_group: String,

    /// API version of the APIService registration
    #[arg(long, env = "APISERVICE_VERSION", default_value = DEFAULT_VERSION)]
    pub apiservice_version: String,

    /// Namespace of the service backing the APIService
    #[arg(long, env = "APISERVICE_SERVICE_NAMESPACE", default_value = DEFAULT_SERVICE_NAMESPACE)]
    pub apiservice_service_namespace: String,

    /// Name of the service backing the APIService
    #[arg(long, env = "APISERVICE_SERVICE_NAME", default_value = DEFAULT_SERVICE_NAME)]
    pub apiservice_service_name: String,

    /// Seconds to wait for a signed certificate before giving up
    #[arg(long, env = "TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

/// Resolved provisioning configuration
#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    /// Signing request name, unique per attempt
    pub request_name: String,
    /// Signer identifier
    pub signer: String,
    /// Identity embedded in the CSR
    pub identity: WorkloadIdentity,
    /// Private key algorithm
    pub key_algorithm: KeyAlgorithm,
    /// Output locations
    pub output: OutputConfig,
    /// `k8s-app` label value
    pub app_name: String,
    /// APIService to register, when requested
    pub registration: Option<ApiServiceRegistration>,
    /// Deadline for the whole flow
    pub timeout: Duration,
}

impl ProvisioningConfig {
    /// Validate `args` and resolve them into a configuration
    pub fn from_args(args: Args) -> Result<Self> {
        let pod_namespace = required("POD_NAMESPACE", args.pod_namespace)?;
        let pod_name = required("POD_NAME", args.pod_name)?;
        let signer = required("SIGNER", args.signer)?;
        let common_name = required("COMMON_NAME", args.common_name)?;
        let key_name = required("KEY_NAME", args.key_name)?;
        let cert_name = required("CERT_NAME", args.cert_name)?;

        if args.secret_location.as_os_str().is_empty() {
            return Err(Error::config("SECRET_LOCATION cannot be empty"));
        }

        let dns_names: Vec<String> = args
            .dns_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if dns_names.is_empty() {
            return Err(Error::config("DNS_NAMES cannot be empty"));
        }

        let pod_ip: IpAddr = args
            .pod_ip
            .trim()
            .parse()
            .map_err(|_| Error::InvalidIp(args.pod_ip.clone()))?;

        let ca_bundle = match &args.ca_bundle_path {
            Some(path) => Some(CaBundle {
                name: required("CA_BUNDLE_NAME", args.ca_bundle_name.clone())?,
                contents: std::fs::read(path).map_err(|e| {
                    Error::config(format!(
                        "failed to read CA bundle {}: {}",
                        path.display(),
                        e
                    ))
                })?,
            }),
            None => None,
        };

        let registration = args.register_apiserver.then(|| ApiServiceRegistration {
            group: args.apiservice_group.clone(),
            version: args.apiservice_version.clone(),
            service_namespace: args.apiservice_service_namespace.clone(),
            service_name: args.apiservice_service_name.clone(),
        });

        let suffix = request_suffix(args.pod_uid.as_deref());

        Ok(Self {
            request_name: format!("{}:{}:{}", pod_namespace, pod_name, suffix),
            signer,
            identity: WorkloadIdentity {
                common_name,
                email_address: args.email_address.filter(|e| !e.is_empty()),
                dns_names,
                pod_ip,
                signature_algorithm: SignatureAlgorithm::from_selector(&args.signature_algorithm),
            },
            key_algorithm: KeyAlgorithm::from_selector(&args.key_algorithm),
            output: OutputConfig {
                directory: args.secret_location,
                cert_name,
                key_name,
                ca_bundle,
            },
            app_name: args.app_name,
            registration,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}

fn required(name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::config(format!("{} cannot be empty", name)));
    }
    Ok(value)
}

/// First characters of the pod UID, or of a fresh UUID when there is none
fn request_suffix(pod_uid: Option<&str>) -> String {
    match pod_uid.map(str::trim).filter(|uid| !uid.is_empty()) {
        Some(uid) => uid.chars().take(SUFFIX_LEN).collect(),
        None => Uuid::new_v4().to_string().chars().take(SUFFIX_LEN).collect(),
    }
}

fn parse_flag(value: &str) -> std::result::Result<bool, std::convert::Infallible> {
    Ok(value == "true")
}
