/**
 * McGravity - an MCP reverse proxy / aggregator.
 *
 * One SSE endpoint in front of many MCP servers: the gateway exposes the
 * union of tools, resources and prompts advertised by the configured
 * upstreams and forwards each invocation to the upstream that advertised
 * the capability.
 */
pub mod composer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod schema;
pub mod session;
pub mod sse_server;
pub mod upstream;

pub use self::composer::Composer;
pub use self::config::ServerIdentity;
pub use self::error::ProxyError;
pub use self::gateway::Gateway;
pub use self::registry::UpstreamRegistry;
pub use self::sse_server::{api_routes, serve, SseServer, SseServerConfig};
pub use self::upstream::UpstreamDescriptor;
