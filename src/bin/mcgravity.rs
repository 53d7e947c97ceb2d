/**
 * The entry point for the mcgravity aggregator.
 * It sets up logging, resolves the upstream set and runs the frontend.
 */
use anyhow::Context;
use clap::Parser;
use mcgravity::{
    api_routes, config, serve, Composer, Gateway, ProxyError, ServerIdentity, SseServer,
    SseServerConfig, UpstreamDescriptor, UpstreamRegistry,
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// McGravity CLI arguments
#[derive(Parser)]
#[command(
    name = "mcgravity",
    version = env!("CARGO_PKG_VERSION"),
    about = "Aggregate multiple MCP servers behind a single SSE endpoint",
    after_help = "Examples:\n  \
        Aggregate two upstream servers:\n  \
        mcgravity http://localhost:3010/sse http://localhost:3011/sse\n  \
        Use a config file:\n  \
        mcgravity --config config.yaml --port 3001
",
)]
struct Cli {
    /// Upstream MCP server URLs (SSE endpoints) to aggregate.
    #[arg(value_name = "URL")]
    upstreams: Vec<String>,

    /// Host to bind the frontend on.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port to bind the frontend on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Path to a YAML config file. When it exists, its servers replace the
    /// positional URLs and its name/version become the server identity.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name the aggregator presents to downstream clients.
    #[arg(long = "mcp-name", default_value = "mcgravity")]
    mcp_name: String,

    /// Version the aggregator presents to downstream clients.
    #[arg(long = "mcp-version", default_value = "1.0.0")]
    mcp_version: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (identity, upstreams) = resolve(&cli)?;
    info!(
        "starting {} v{} with {} upstream(s)",
        identity.name,
        identity.version,
        upstreams.len()
    );

    let ct = CancellationToken::new();
    let registry = UpstreamRegistry::new();
    let gateway = Gateway::new(identity, registry.clone());

    // Register upstreams in the background; failures retry on a fixed
    // schedule and never block the frontend.
    Composer::new(gateway.clone(), ct.clone()).register_all(upstreams);

    let (sse_server, router) = SseServer::new(SseServerConfig {
        keep_alive: Some(std::time::Duration::from_secs(15)),
        ct: ct.clone(),
    });
    let router = router.merge(api_routes(registry));
    sse_server.with_service(move || gateway.clone());

    let listener = TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", cli.host, cli.port))?;

    let shutdown_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_ct.cancel();
        }
    });

    serve(listener, router, ct).await?;
    Ok(())
}

/// Resolve the server identity and upstream set from the CLI and, when
/// present, the config file. The config file wins for both.
fn resolve(cli: &Cli) -> Result<(ServerIdentity, Vec<UpstreamDescriptor>), ProxyError> {
    if let Some(path) = cli.config.as_ref().filter(|path| path.exists()) {
        let file = config::load(path)?;
        let upstreams = file.upstreams()?;
        return Ok((file.identity(), upstreams));
    }

    let identity = ServerIdentity {
        name: cli.mcp_name.clone(),
        version: cli.mcp_version.clone(),
        description: None,
    };
    let upstreams = cli
        .upstreams
        .iter()
        .map(|raw| config::parse_upstream_url(raw).map(UpstreamDescriptor::from_url))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((identity, upstreams))
}
