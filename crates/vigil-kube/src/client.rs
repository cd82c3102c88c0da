//! Kubernetes client construction

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};
use vigil_core::Error;

use crate::config::HarnessConfig;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const CONTEXT: &str = "create_client";

/// Build client config from an explicit kubeconfig or by inference
async fn load_config(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Config, Error> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..KubeConfigOptions::default()
    };

    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(
                    path.display().to_string(),
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| Error::config(CONTEXT, format!("failed to load kubeconfig: {}", e)))
        }
        None if context.is_some() => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::config(CONTEXT, format!("failed to load kubeconfig: {}", e))),
        None => Config::infer()
            .await
            .map_err(|e| Error::config(CONTEXT, format!("failed to infer config: {}", e))),
    }
}

/// Create a client with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = load_config(kubeconfig, context).await?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    debug!(cluster_url = %config.cluster_url, "Creating kube client");
    Client::try_from(config)
        .map_err(|e| Error::config(CONTEXT, format!("failed to create client: {}", e)))
}

/// Create a client for the configured cluster and check the API server answers
///
/// The version request is sent once; an unreachable API server is an
/// [`Error::Observation`] for the caller to handle.
pub async fn connect(config: &HarnessConfig) -> Result<Client, Error> {
    let client = create_client_with_timeout(
        config.kubeconfig.as_deref(),
        config.context.as_deref(),
        DEFAULT_CONNECT_TIMEOUT,
        DEFAULT_READ_TIMEOUT,
    )
    .await?;

    let version = client
        .apiserver_version()
        .await
        .map_err(|e| Error::observation("apiserver", e.to_string()))?;

    info!(
        version = %format!("{}.{}", version.major, version.minor),
        platform = %version.platform,
        "Connected to API server"
    );
    Ok(client)
}
