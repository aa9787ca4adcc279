use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::endpoints::{EndpointRegistry, Service};

/// Local cache of service interface descriptions. Each description is
/// fetched once per (service, environment) and persisted; the dispatcher
/// itself never reads the contents, callers that need the descriptor get
/// a path.
#[derive(Debug, Clone)]
pub struct WsdlCache {
    dir: PathBuf,
    registry: EndpointRegistry,
    client: reqwest::Client,
}

impl WsdlCache {
    pub fn new(dir: impl Into<PathBuf>, registry: EndpointRegistry, client: reqwest::Client) -> Self {
        Self {
            dir: dir.into(),
            registry,
            client,
        }
    }

    fn descriptor_path(&self, service: Service) -> PathBuf {
        self.dir.join(format!(
            "{}{}.wsdl",
            service.id(),
            self.registry.environment().file_suffix()
        ))
    }

    /// Return the local descriptor for `service`, downloading it on first
    /// use.
    pub async fn resolve(&self, service: Service) -> Result<PathBuf> {
        let path = self.descriptor_path(service);
        if path.exists() {
            debug!(service = %service, path = %path.display(), "using cached service description");
            return Ok(path);
        }

        let url = format!("{}?wsdl", self.registry.url_for(service));
        debug!(service = %service, url = %url, "fetching service description");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("fetching service description")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "service description fetch failed with status {}",
                response.status()
            ));
        }
        let body = response.text().await.context("reading service description")?;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating descriptor directory {}", self.dir.display()))?;
        fs::write(&path, body).with_context(|| format!("writing descriptor {}", path.display()))?;
        info!(service = %service, path = %path.display(), "service description cached");
        Ok(path)
    }
}
