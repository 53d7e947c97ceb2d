use thiserror::Error;

/// Errors produced by the aggregator.
///
/// Transport and connect failures are recovered locally (the session is
/// closed, or the upstream is retried); invocation and routing failures are
/// surfaced to the downstream caller as JSON-RPC errors; config failures are
/// fatal at startup.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The session transport is closed; nothing can be sent or received.
    #[error("session transport is not connected")]
    NotConnected,

    /// The inbound payload is not a valid JSON-RPC message.
    #[error("invalid JSON-RPC payload: {0}")]
    Protocol(String),

    /// Could not reach or handshake an upstream server.
    #[error("failed to connect to upstream {upstream}: {message}")]
    UpstreamConnect { upstream: String, message: String },

    /// The upstream accepted the call but failed mid-flight.
    #[error("upstream {upstream} call failed: {message}")]
    UpstreamInvocation { upstream: String, message: String },

    /// The capability's upstream is not in the registry (disconnected and
    /// not yet reconnected).
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Invalid config file or upstream URL.
    #[error("invalid config: {0}")]
    Config(String),
}

impl From<ProxyError> for rmcp::Error {
    fn from(err: ProxyError) -> Self {
        rmcp::Error::internal_error(err.to_string(), None)
    }
}
