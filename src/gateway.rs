/**
 * The MCP server exposed to downstream clients.
 *
 * Holds the union of capabilities registered from all upstreams and, per
 * invocation, forwards the request to whichever upstream advertised the
 * capability. Handlers stay stateless: each entry records the owning
 * upstream's key, the registry is consulted only at dispatch time, and the
 * forwarding connection is opened and closed per call.
 */
use std::collections::HashMap;
use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
        Implementation, ListPromptsResult, ListResourcesResult, ListToolsResult,
        PaginatedRequestParam, Prompt, ProtocolVersion, ReadResourceRequestParam,
        ReadResourceResult, Resource, ServerCapabilities, ServerInfo, Tool,
    },
    service::{RequestContext, ServiceError},
    Error, RoleServer, ServerHandler,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ServerIdentity;
use crate::error::ProxyError;
use crate::registry::UpstreamRegistry;
use crate::schema::{self, ArgSchema};
use crate::upstream::UpstreamConnection;

struct ProxiedTool {
    tool: Tool,
    args: ArgSchema,
    upstream: String,
}

struct ProxiedResource {
    resource: Resource,
    upstream: String,
}

struct ProxiedPrompt {
    prompt: Prompt,
    upstream: String,
}

/// The aggregating MCP server handler.
#[derive(Clone)]
pub struct Gateway {
    identity: ServerIdentity,
    registry: UpstreamRegistry,
    tools: Arc<RwLock<HashMap<String, ProxiedTool>>>,
    resources: Arc<RwLock<HashMap<String, ProxiedResource>>>,
    prompts: Arc<RwLock<HashMap<String, ProxiedPrompt>>>,
}

impl Gateway {
    pub fn new(identity: ServerIdentity, registry: UpstreamRegistry) -> Self {
        Self {
            identity,
            registry,
            tools: Arc::new(RwLock::new(HashMap::new())),
            resources: Arc::new(RwLock::new(HashMap::new())),
            prompts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    /// Install tools advertised by an upstream. Collisions across upstreams
    /// are resolved last-writer-wins.
    pub async fn install_tools(&self, upstream: &str, tools: Vec<Tool>) {
        let mut installed = self.tools.write().await;
        for tool in tools {
            let args = schema::convert(tool.input_schema.as_ref());
            let name = tool.name.to_string();
            let entry = ProxiedTool {
                tool,
                args,
                upstream: upstream.to_string(),
            };
            if let Some(previous) = installed.insert(name.clone(), entry) {
                if previous.upstream != upstream {
                    debug!(
                        "tool {} re-registered: {} replaces {}",
                        name, upstream, previous.upstream
                    );
                }
            }
        }
    }

    pub async fn install_resources(&self, upstream: &str, resources: Vec<Resource>) {
        let mut installed = self.resources.write().await;
        for resource in resources {
            let uri = resource.uri.clone();
            installed.insert(
                uri,
                ProxiedResource {
                    resource,
                    upstream: upstream.to_string(),
                },
            );
        }
    }

    pub async fn install_prompts(&self, upstream: &str, prompts: Vec<Prompt>) {
        let mut installed = self.prompts.write().await;
        for prompt in prompts {
            let name = prompt.name.clone();
            installed.insert(
                name,
                ProxiedPrompt {
                    prompt,
                    upstream: upstream.to_string(),
                },
            );
        }
    }

    pub async fn installed_tools(&self) -> Vec<Tool> {
        self.tools
            .read()
            .await
            .values()
            .map(|entry| entry.tool.clone())
            .collect()
    }

    pub async fn installed_resources(&self) -> Vec<Resource> {
        self.resources
            .read()
            .await
            .values()
            .map(|entry| entry.resource.clone())
            .collect()
    }

    pub async fn installed_prompts(&self) -> Vec<Prompt> {
        self.prompts
            .read()
            .await
            .values()
            .map(|entry| entry.prompt.clone())
            .collect()
    }

    /// Open a fresh connection to the capability's upstream, or fail with a
    /// client-not-found error while the upstream is disconnected.
    async fn open_upstream(&self, upstream: &str) -> Result<UpstreamConnection, Error> {
        let descriptor = self
            .registry
            .get(upstream)
            .await
            .ok_or(ProxyError::ClientNotFound(upstream.to_string()))?;
        let connection = UpstreamConnection::open(&descriptor, &self.identity).await?;
        Ok(connection)
    }

    pub async fn forward_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult, Error> {
        let (upstream, args) = {
            let tools = self.tools.read().await;
            let entry = tools.get(request.name.as_ref()).ok_or_else(|| {
                Error::invalid_params(format!("unknown tool: {}", request.name), None)
            })?;
            (entry.upstream.clone(), entry.args.clone())
        };

        let arguments = Value::Object(request.arguments.clone().unwrap_or_default());
        if let Err(reason) = args.validate(&arguments) {
            return Err(Error::invalid_params(
                format!("invalid arguments for {}: {}", request.name, reason),
                None,
            ));
        }

        let name = request.name.clone();
        let connection = self.open_upstream(&upstream).await?;
        let result = connection.call_tool(request).await;
        connection.close().await;
        result.map_err(|err| upstream_error(&upstream, err)).inspect(|_| {
            debug!("forwarded tool {} to {}", name, upstream);
        })
    }

    pub async fn forward_resource(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, Error> {
        let upstream = {
            let resources = self.resources.read().await;
            let entry = resources.get(&request.uri).ok_or_else(|| {
                Error::invalid_params(format!("unknown resource: {}", request.uri), None)
            })?;
            entry.upstream.clone()
        };

        let uri = request.uri.clone();
        let connection = self.open_upstream(&upstream).await?;
        let result = connection.read_resource(request).await;
        connection.close().await;
        result.map_err(|err| upstream_error(&upstream, err)).inspect(|_| {
            debug!("forwarded resource {} to {}", uri, upstream);
        })
    }

    pub async fn forward_prompt(
        &self,
        request: GetPromptRequestParam,
    ) -> Result<GetPromptResult, Error> {
        let upstream = {
            let prompts = self.prompts.read().await;
            let entry = prompts.get(&request.name).ok_or_else(|| {
                Error::invalid_params(format!("unknown prompt: {}", request.name), None)
            })?;
            entry.upstream.clone()
        };

        let name = request.name.clone();
        let connection = self.open_upstream(&upstream).await?;
        let result = connection.get_prompt(request).await;
        connection.close().await;
        result.map_err(|err| upstream_error(&upstream, err)).inspect(|_| {
            debug!("forwarded prompt {} to {}", name, upstream);
        })
    }
}

/// Surface the upstream's own JSON-RPC error unchanged; wrap everything
/// else as an internal error naming the upstream.
fn upstream_error(upstream: &str, err: ServiceError) -> Error {
    match err {
        ServiceError::McpError(err) => err,
        other => Error::from(ProxyError::UpstreamInvocation {
            upstream: upstream.to_string(),
            message: other.to_string(),
        }),
    }
}

impl ServerHandler for Gateway {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: self.identity.name.clone(),
                version: self.identity.version.clone(),
            },
            instructions: self.identity.description.clone(),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, Error> {
        let tools = self.installed_tools().await;
        info!("listing {} aggregated tools", tools.len());
        Ok(ListToolsResult {
            next_cursor: None,
            tools,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, Error> {
        self.forward_tool(request).await
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, Error> {
        Ok(ListResourcesResult {
            next_cursor: None,
            resources: self.installed_resources().await,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, Error> {
        self.forward_resource(request).await
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, Error> {
        Ok(ListPromptsResult {
            next_cursor: None,
            prompts: self.installed_prompts().await,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, Error> {
        self.forward_prompt(request).await
    }
}
