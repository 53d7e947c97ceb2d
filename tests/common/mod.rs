//! Shared fixtures: an echo MCP upstream and an in-process aggregator.

use std::sync::Arc;
use std::time::Duration;

use mcgravity::{
    api_routes, config, serve, Composer, Gateway, ServerIdentity, SseServer, SseServerConfig,
    UpstreamDescriptor, UpstreamRegistry,
};
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    Error, RoleServer, ServerHandler,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A minimal upstream exposing a single `echo(message: string)` tool.
#[derive(Clone, Default)]
pub struct EchoServer;

pub fn echo_tool() -> Tool {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "message": {"type": "string"}
        },
        "required": ["message"]
    });
    Tool::new(
        "echo",
        "Echoes the message back",
        Arc::new(schema.as_object().cloned().expect("object schema")),
    )
}

impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "echo-server".to_string(),
                version: "1.0.0".to_string(),
            },
            instructions: None,
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, Error> {
        Ok(ListToolsResult {
            next_cursor: None,
            tools: vec![echo_tool()],
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, Error> {
        if request.name != "echo" {
            return Err(Error::invalid_params(
                format!("unknown tool: {}", request.name),
                None,
            ));
        }
        let message = request
            .arguments
            .as_ref()
            .and_then(|args| args.get("message"))
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Tool echo: {}",
            message
        ))]))
    }
}

/// Serve the echo upstream on the given listener; returns its SSE URL.
pub fn spawn_echo_on(listener: TcpListener, ct: CancellationToken) -> String {
    let addr = listener.local_addr().expect("listener address");
    let (sse_server, router) = SseServer::new(SseServerConfig {
        keep_alive: Some(Duration::from_secs(15)),
        ct: ct.clone(),
    });
    sse_server.with_service(EchoServer::default);
    tokio::spawn(serve(listener, router, ct));
    format!("http://{}/sse", addr)
}

/// Serve the echo upstream on an ephemeral port.
pub async fn spawn_echo_upstream() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let ct = CancellationToken::new();
    let url = spawn_echo_on(listener, ct.clone());
    (url, ct)
}

pub struct Aggregator {
    pub base_url: String,
    pub registry: UpstreamRegistry,
    pub ct: CancellationToken,
}

/// Spawn the aggregator frontend with the given upstream URLs and retry
/// interval.
pub async fn spawn_aggregator(upstreams: &[String], retry: Duration) -> Aggregator {
    let ct = CancellationToken::new();
    let registry = UpstreamRegistry::new();
    let identity = ServerIdentity {
        name: "mcgravity".to_string(),
        version: "1.0.0".to_string(),
        description: Some("aggregated MCP endpoint".to_string()),
    };
    let gateway = Gateway::new(identity, registry.clone());

    let descriptors: Vec<UpstreamDescriptor> = upstreams
        .iter()
        .map(|raw| {
            config::parse_upstream_url(raw)
                .map(UpstreamDescriptor::from_url)
                .expect("valid upstream url")
        })
        .collect();
    Composer::new(gateway.clone(), ct.clone())
        .with_retry_interval(retry)
        .register_all(descriptors);

    let (sse_server, router) = SseServer::new(SseServerConfig {
        keep_alive: Some(Duration::from_secs(15)),
        ct: ct.clone(),
    });
    let router = router.merge(api_routes(registry.clone()));
    sse_server.with_service(move || gateway.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind aggregator");
    let addr = listener.local_addr().expect("aggregator address");
    tokio::spawn(serve(listener, router, ct.clone()));

    Aggregator {
        base_url: format!("http://{}", addr),
        registry,
        ct,
    }
}

/// Poll until the probe returns true, or panic after the deadline.
pub async fn wait_until<F, Fut>(what: &str, deadline: Duration, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if probe().await {
            return;
        }
        if start.elapsed() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
