//! key-cert-provisioner - init container that obtains a signed certificate

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use key_cert_provisioner::authority::KubeAuthority;
use key_cert_provisioner::config::{Args, ProvisioningConfig};
use key_cert_provisioner::error::EXIT_FAILURE;
use key_cert_provisioner::provisioner::{run_with_deadline, Provisioner};

#[tokio::main]
async fn main() {
    // The kube client needs a process-wide rustls provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(EXIT_FAILURE);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        // Help and version output go through clap with status 0
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let err = key_cert_provisioner::Error::from(e);
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(err.exit_code());
        }
    };

    if let Err(e) = run(args).await {
        let code = e
            .downcast_ref::<key_cert_provisioner::Error>()
            .map(key_cert_provisioner::Error::exit_code)
            .unwrap_or(EXIT_FAILURE);
        tracing::error!(error = %e, exit_code = code, "provisioning failed");
        std::process::exit(code);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ProvisioningConfig::from_args(args)?;
    tracing::info!(
        name = %config.request_name,
        signer = %config.signer,
        timeout = ?config.timeout,
        "starting key and certificate provisioning"
    );

    let client = kube::Client::try_default()
        .await
        .map_err(key_cert_provisioner::Error::from)?;

    let timeout = config.timeout;
    let provisioner = Provisioner::new(KubeAuthority::new(client), config);
    run_with_deadline(timeout, provisioner.run()).await?;
    Ok(())
}
