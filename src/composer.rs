//! Upstream registration and reconnect supervision.
//!
//! Each configured upstream gets its own task. The task connects,
//! enumerates the upstream's capabilities, installs them on the gateway and
//! records the descriptor in the registry. The registration connection is
//! then held open purely as a liveness watch: when it ends, the descriptor
//! is removed (dispatches fail with a client-not-found error during the
//! outage) and the task reconnects on a fixed schedule, skipping
//! re-enumeration since the capabilities are already installed.

use std::time::Duration;

use rmcp::service::ServiceError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gateway::Gateway;
use crate::upstream::{UpstreamConnection, UpstreamDescriptor};

/// Fixed delay between reconnect attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub struct Composer {
    gateway: Gateway,
    retry_interval: Duration,
    ct: CancellationToken,
}

impl Composer {
    pub fn new(gateway: Gateway, ct: CancellationToken) -> Self {
        Self {
            gateway,
            retry_interval: RETRY_INTERVAL,
            ct,
        }
    }

    /// Override the retry interval (tests use a short one).
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Spawn one supervision task per upstream. Failures never block the
    /// other upstreams or the HTTP frontend.
    pub fn register_all(&self, upstreams: impl IntoIterator<Item = UpstreamDescriptor>) {
        for descriptor in upstreams {
            let gateway = self.gateway.clone();
            let retry = self.retry_interval;
            let ct = self.ct.clone();
            tokio::spawn(supervise(gateway, descriptor, retry, ct));
        }
    }
}

async fn supervise(
    gateway: Gateway,
    descriptor: UpstreamDescriptor,
    retry: Duration,
    ct: CancellationToken,
) {
    let key = descriptor.key();
    // Set after the first successful enumeration; reconnects keep the
    // already-installed capabilities and only restore the registry entry.
    let mut skip_register = false;

    loop {
        let connected = tokio::select! {
            _ = ct.cancelled() => return,
            result = UpstreamConnection::open(&descriptor, gateway.identity()) => result,
        };

        let connection = match connected {
            Ok(connection) => connection,
            Err(err) => {
                warn!("{}; retrying in {:?}", err, retry);
                if sleep_or_shutdown(retry, &ct).await {
                    return;
                }
                continue;
            }
        };

        gateway.registry().put(descriptor.clone()).await;

        if !skip_register {
            match enumerate(&gateway, &key, &connection).await {
                Ok((tools, resources, prompts)) => {
                    info!(
                        "registered upstream {} ({} tools, {} resources, {} prompts)",
                        key, tools, resources, prompts
                    );
                    skip_register = true;
                }
                Err(err) => {
                    warn!(
                        "failed to enumerate upstream {}: {}; retrying in {:?}",
                        key, err, retry
                    );
                    gateway.registry().remove(&key).await;
                    connection.close().await;
                    if sleep_or_shutdown(retry, &ct).await {
                        return;
                    }
                    continue;
                }
            }
        } else {
            info!("reconnected upstream {}", key);
        }

        // The connection now only watches for the session ending; forwarded
        // invocations open their own short-lived connections.
        let closed = connection.closed();
        tokio::pin!(closed);
        tokio::select! {
            _ = ct.cancelled() => return,
            _ = &mut closed => {}
        }

        gateway.registry().remove(&key).await;
        warn!("upstream {} disconnected; reconnecting in {:?}", key, retry);
        if sleep_or_shutdown(retry, &ct).await {
            return;
        }
    }
}

/// List everything the upstream advertises and install it on the gateway.
/// Capabilities the upstream does not declare are skipped.
async fn enumerate(
    gateway: &Gateway,
    key: &str,
    connection: &UpstreamConnection,
) -> Result<(usize, usize, usize), ServiceError> {
    let capabilities = connection.capabilities();

    let tools = if capabilities.tools.is_some() {
        connection.list_tools().await?
    } else {
        Vec::new()
    };
    let resources = if capabilities.resources.is_some() {
        connection.list_resources().await?
    } else {
        Vec::new()
    };
    let prompts = if capabilities.prompts.is_some() {
        connection.list_prompts().await?
    } else {
        Vec::new()
    };

    let counts = (tools.len(), resources.len(), prompts.len());
    gateway.install_tools(key, tools).await;
    gateway.install_resources(key, resources).await;
    gateway.install_prompts(key, prompts).await;
    Ok(counts)
}

/// Sleep for the retry interval; returns true when shutdown was requested.
async fn sleep_or_shutdown(retry: Duration, ct: &CancellationToken) -> bool {
    tokio::select! {
        _ = ct.cancelled() => true,
        _ = tokio::time::sleep(retry) => false,
    }
}
