use thiserror::Error;

/// Error returned by a single JSON-RPC call.
///
/// These are transient by nature: the client never retries, the poller
/// decides what to do with them.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RpcError {
    /// The call did not complete within the configured timeout.
    #[error("RPC call timed out")]
    Timeout,
    /// The node could not be reached at all.
    #[error("connection to RPC endpoint refused")]
    ConnectionRefused,
    /// The node answered, but not with something we understand.
    #[error("malformed RPC response: {0}")]
    MalformedResponse(String),
    /// The node returned a JSON-RPC `error` object.
    #[error("node error {code}: {message}")]
    NodeError { code: i64, message: String },
    /// The HTTP layer answered with a status other than 200.
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    /// Any other transport failure (TLS, broken body, ...).
    #[error("RPC transport error: {0}")]
    Transport(String),
}

/// Stable, label-friendly classification of an [`RpcError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RpcErrorKind {
    Timeout,
    ConnectionRefused,
    MalformedResponse,
    NodeError,
    /// 4xx status: usually a wrong URL or a node refusing the method.
    Http4xx,
    /// 5xx status: the node or a proxy in front of it is failing.
    Http5xx,
    /// Any other non-200 status.
    HttpOther,
    Transport,
}

impl RpcErrorKind {
    pub const ALL: [RpcErrorKind; 8] = [
        RpcErrorKind::Timeout,
        RpcErrorKind::ConnectionRefused,
        RpcErrorKind::MalformedResponse,
        RpcErrorKind::NodeError,
        RpcErrorKind::Http4xx,
        RpcErrorKind::Http5xx,
        RpcErrorKind::HttpOther,
        RpcErrorKind::Transport,
    ];

    /// Label value used for this kind in exported metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::ConnectionRefused => "connection_refused",
            RpcErrorKind::MalformedResponse => "malformed_response",
            RpcErrorKind::NodeError => "node_error",
            RpcErrorKind::Http4xx => "http_4xx",
            RpcErrorKind::Http5xx => "http_5xx",
            RpcErrorKind::HttpOther => "http_other",
            RpcErrorKind::Transport => "transport",
        }
    }
}

impl RpcError {
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            RpcError::Timeout => RpcErrorKind::Timeout,
            RpcError::ConnectionRefused => RpcErrorKind::ConnectionRefused,
            RpcError::MalformedResponse(_) => RpcErrorKind::MalformedResponse,
            RpcError::NodeError { .. } => RpcErrorKind::NodeError,
            RpcError::HttpStatus(status) => match status {
                400..=499 => RpcErrorKind::Http4xx,
                500..=599 => RpcErrorKind::Http5xx,
                _ => RpcErrorKind::HttpOther,
            },
            RpcError::Transport(_) => RpcErrorKind::Transport,
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        RpcError::MalformedResponse(msg.into())
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RpcError::Timeout
        } else if e.is_connect() {
            RpcError::ConnectionRefused
        } else if e.is_decode() {
            RpcError::MalformedResponse(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }
}
