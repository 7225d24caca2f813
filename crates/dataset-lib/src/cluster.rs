//! Kubernetes client construction
//!
//! Kubeconfig resolution order: explicit path, then in-cluster service
//! account / `KUBECONFIG` / `~/.kube/config` via inference. TLS can be
//! pinned to a CA bundle or, for lab clusters, verification disabled.

use crate::error::WatchError;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Connection settings for the Kubernetes API
#[derive(Debug, Clone, Default)]
pub struct ClusterConnection {
    pub kubeconfig: Option<PathBuf>,
    /// PEM bundle trusted in addition to the kubeconfig's CA data
    pub ca_file: Option<PathBuf>,
    /// `Some(false)` disables certificate verification
    pub verify_tls: Option<bool>,
}

impl ClusterConnection {
    pub async fn client(&self) -> Result<Client, WatchError> {
        let config = self.config().await?;
        Client::try_from(config).map_err(WatchError::Api)
    }

    pub async fn config(&self) -> Result<Config, WatchError> {
        let mut config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    WatchError::Config(format!("reading {}: {}", path.display(), e))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| WatchError::Config(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| WatchError::Config(e.to_string()))?,
        };

        if let Some(ca_file) = &self.ca_file {
            let certs = read_ca_bundle(ca_file)?;
            info!(path = %ca_file.display(), certs = certs.len(), "Using CA bundle");
            config.root_cert = Some(certs);
        }

        if self.verify_tls == Some(false) {
            warn!("TLS certificate verification disabled for the Kubernetes API");
            config.accept_invalid_certs = true;
        }

        Ok(config)
    }
}

/// DER certificates from a PEM file
fn read_ca_bundle(path: &Path) -> Result<Vec<Vec<u8>>, WatchError> {
    let pem = std::fs::read(path)
        .map_err(|e| WatchError::Config(format!("reading {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .map_err(|e| WatchError::Config(format!("parsing {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(WatchError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}
