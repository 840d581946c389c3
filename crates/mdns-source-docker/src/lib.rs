// # Docker Container Source
//
// Lists running containers through the Docker Engine API
// (`GET /containers/json`) with the bollard client.
//
// ## Endpoints
//
// - `unix:///var/run/docker.sock` (default)
// - `tcp://host:port`: plain HTTP
//
// The source is strictly read-only and keeps nothing between calls.

use std::path::PathBuf;

use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::{API_DEFAULT_VERSION, Docker};
use mdns_core::config::SourceConfig;
use mdns_core::traits::{ContainerSnapshot, ContainerSource, ContainerSourceFactory};
use mdns_core::{ComponentRegistry, Error, Result};
use tracing::{debug, warn};

/// Socket used when no host is configured
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Where the Docker Engine API lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path
    Unix(PathBuf),
    /// Base URL (`http://host:port`)
    Tcp(String),
}

impl Endpoint {
    /// Parse a `DOCKER_HOST` style address
    ///
    /// # Parameters
    ///
    /// - `host`: `unix:///path`, `tcp://host:port`, or `None` for the default socket
    pub fn parse(host: Option<&str>) -> Result<Self> {
        let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(Endpoint::Unix(PathBuf::from(DEFAULT_SOCKET)));
        };

        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::config("Docker host unix:// needs a socket path"));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if let Some(addr) = host.strip_prefix("tcp://") {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(Error::config("Docker host tcp:// needs an address"));
            }
            return Ok(Endpoint::Tcp(format!("http://{}", addr)));
        }

        Err(Error::config(format!(
            "Docker host must use unix:// or tcp:// scheme, got {}",
            host
        )))
    }

    /// Build a client for this endpoint; no connection is made yet
    fn client(&self) -> Result<Docker> {
        let client = match self {
            Endpoint::Unix(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                REQUEST_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            Endpoint::Tcp(base) => {
                Docker::connect_with_http(base, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        };

        client.map_err(|e| Error::config(format!("Invalid Docker endpoint {:?}: {}", self, e)))
    }
}

/// Convert one listing entry; entries without an id are skipped
pub fn snapshot_from_summary(summary: ContainerSummary) -> Option<ContainerSnapshot> {
    let id = summary.id?;
    let name = summary
        .names
        .as_deref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.chars().take(12).collect());

    Some(ContainerSnapshot::new(
        id,
        name,
        summary.labels.unwrap_or_default(),
    ))
}

/// Map a client error to the engine's error kinds
///
/// The daemon answering with an error status or an unreadable payload is a
/// source error; everything else means Docker could not be reached.
fn classify(err: bollard::errors::Error) -> Error {
    use bollard::errors::Error as DockerError;

    match err {
        DockerError::DockerResponseServerError { .. }
        | DockerError::JsonDataError { .. }
        | DockerError::JsonSerdeError { .. } => {
            Error::container_source(format!("Docker listing failed: {}", err))
        }
        other => Error::transport(format!("Cannot reach Docker: {}", other)),
    }
}

/// Container source backed by the Docker Engine API
pub struct DockerSource {
    endpoint: Endpoint,
    client: Docker,
}

impl DockerSource {
    /// Create a new Docker source
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let client = endpoint.client()?;
        Ok(Self { endpoint, client })
    }

    /// The configured endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ContainerSource for DockerSource {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let summaries = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(classify)?;

        let total = summaries.len();
        let containers: Vec<ContainerSnapshot> = summaries
            .into_iter()
            .filter_map(snapshot_from_summary)
            .collect();
        if containers.len() < total {
            warn!(
                "Skipped {} container(s) without an id",
                total - containers.len()
            );
        }

        debug!("Docker reports {} running container(s)", containers.len());
        Ok(containers)
    }

    fn source_name(&self) -> &'static str {
        "docker"
    }
}

/// Factory for creating Docker sources
pub struct DockerFactory;

impl ContainerSourceFactory for DockerFactory {
    fn create(&self, config: &SourceConfig) -> Result<Box<dyn ContainerSource>> {
        match config {
            SourceConfig::Docker { host } => {
                let endpoint = Endpoint::parse(host.as_deref())?;
                Ok(Box::new(DockerSource::new(endpoint)?))
            }
            _ => Err(Error::config("Invalid config for Docker container source")),
        }
    }
}

/// Register the Docker source with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_source("docker", Box::new(DockerFactory));
}
