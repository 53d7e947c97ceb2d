//! Upstream MCP client sessions over SSE.
//!
//! Every forwarded invocation opens a fresh connection, issues one RPC and
//! closes it again. This avoids long-term upstream session management and
//! keeps concurrent downstream callers from blocking each other. The only
//! long-lived connection per upstream is the registration one, which the
//! composer keeps open as a liveness watch.

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo,
        GetPromptRequestParam, GetPromptResult, Implementation, PaginatedRequestParam, Prompt,
        ReadResourceRequestParam, ReadResourceResult, Resource, ServerCapabilities, Tool,
    },
    service::{RunningService, ServiceError},
    transport::SseClientTransport,
    RoleClient, ServiceExt,
};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::ServerIdentity;
use crate::error::ProxyError;

/// Static description of one upstream MCP server, as loaded from the config
/// file or the command line. Immutable after load.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamDescriptor {
    pub url: Url,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl UpstreamDescriptor {
    /// Build a descriptor from a bare URL, defaulting the name to the URL
    /// host and the version to `1.0.0`.
    pub fn from_url(url: Url) -> Self {
        let name = url.host_str().unwrap_or("upstream").to_string();
        Self {
            url,
            name,
            version: "1.0.0".to_string(),
            description: None,
            tags: None,
        }
    }

    /// The registry key for this upstream: its stringified URL.
    pub fn key(&self) -> String {
        self.url.to_string()
    }
}

/// One live MCP client session against an upstream server.
pub struct UpstreamConnection {
    inner: RunningService<RoleClient, ClientInfo>,
    key: String,
}

impl UpstreamConnection {
    /// Open the outbound SSE transport and perform the MCP handshake.
    pub async fn open(
        descriptor: &UpstreamDescriptor,
        identity: &ServerIdentity,
    ) -> Result<Self, ProxyError> {
        let key = descriptor.key();
        let transport = SseClientTransport::start(key.clone())
            .await
            .map_err(|err| ProxyError::UpstreamConnect {
                upstream: key.clone(),
                message: err.to_string(),
            })?;

        let client_info = ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: identity.name.clone(),
                version: identity.version.clone(),
            },
        };

        let inner =
            client_info
                .serve(transport)
                .await
                .map_err(|err| ProxyError::UpstreamConnect {
                    upstream: key.clone(),
                    message: err.to_string(),
                })?;

        debug!("connected to upstream {}", key);
        Ok(Self { inner, key })
    }

    /// Capabilities advertised by the upstream during the handshake.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.inner
            .peer_info()
            .map(|info| info.capabilities.clone())
            .unwrap_or_default()
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, ServiceError> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.inner.list_tools(page_param(cursor.take())).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, ServiceError> {
        let mut resources = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.inner.list_resources(page_param(cursor.take())).await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(resources)
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, ServiceError> {
        let mut prompts = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.inner.list_prompts(page_param(cursor.take())).await?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(prompts)
    }

    pub async fn call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, ServiceError> {
        self.inner.call_tool(request).await
    }

    pub async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, ServiceError> {
        self.inner.read_resource(request).await
    }

    pub async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
    ) -> Result<GetPromptResult, ServiceError> {
        self.inner.get_prompt(request).await
    }

    /// Release the upstream session.
    pub async fn close(self) {
        if let Err(err) = self.inner.cancel().await {
            debug!("error closing upstream {}: {}", self.key, err);
        }
    }

    /// Wait until the upstream ends the session (remote close or crash).
    pub async fn closed(self) {
        let _ = self.inner.waiting().await;
    }
}

fn page_param(cursor: Option<String>) -> Option<PaginatedRequestParam> {
    cursor.map(|cursor| PaginatedRequestParam {
        cursor: Some(cursor),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_come_from_the_url() {
        let url = Url::parse("http://tools.example.com:3010/sse").expect("valid url");
        let descriptor = UpstreamDescriptor::from_url(url);
        assert_eq!(descriptor.name, "tools.example.com");
        assert_eq!(descriptor.version, "1.0.0");
        assert_eq!(descriptor.key(), "http://tools.example.com:3010/sse");
        assert!(descriptor.description.is_none());
    }

    #[test]
    fn descriptor_serializes_url_as_string() {
        let url = Url::parse("http://localhost:3010/sse").expect("valid url");
        let descriptor = UpstreamDescriptor::from_url(url);
        let value = serde_json::to_value(&descriptor).expect("serializable");
        assert_eq!(value["url"], "http://localhost:3010/sse");
        assert_eq!(value["name"], "localhost");
    }
}
