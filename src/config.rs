//! YAML config loading and upstream URL validation.
//!
//! The config file names the aggregator itself and the set of upstream
//! servers to federate:
//!
//! ```yaml
//! name: mcgravity
//! version: 1.0.0
//! description: aggregated MCP endpoint
//! servers:
//!   echo:
//!     url: http://localhost:3010/sse
//!     name: echo-server
//! ```
//!
//! Config errors are fatal at startup and reported to the operator.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::ProxyError;
use crate::upstream::UpstreamDescriptor;

/// The identity the aggregator presents to downstream clients. Fixed for
/// the process lifetime.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub servers: HashMap<String, ServerEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ServerEntry {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
        }
    }

    /// Validate and convert all server entries into upstream descriptors.
    pub fn upstreams(&self) -> Result<Vec<UpstreamDescriptor>, ProxyError> {
        self.servers
            .values()
            .map(|entry| entry.descriptor())
            .collect()
    }
}

impl ServerEntry {
    fn descriptor(&self) -> Result<UpstreamDescriptor, ProxyError> {
        let url = parse_upstream_url(&self.url)?;
        let mut descriptor = UpstreamDescriptor::from_url(url);
        if let Some(name) = &self.name {
            descriptor.name = name.clone();
        }
        if let Some(version) = &self.version {
            descriptor.version = version.clone();
        }
        descriptor.description = self.description.clone();
        descriptor.tags = self.tags.clone();
        Ok(descriptor)
    }
}

/// Parse and validate an upstream URL: absolute, http or https.
pub fn parse_upstream_url(raw: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(raw)
        .map_err(|err| ProxyError::Config(format!("invalid upstream URL {}: {}", raw, err)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProxyError::Config(format!(
            "unsupported scheme {} for upstream URL {}",
            other, raw
        ))),
    }
}

/// Load and parse a YAML config file.
pub fn load(path: &Path) -> Result<ConfigFile, ProxyError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| ProxyError::Config(format!("cannot read {}: {}", path.display(), err)))?;
    serde_yaml::from_str(&raw)
        .map_err(|err| ProxyError::Config(format!("invalid config {}: {}", path.display(), err)))
}
