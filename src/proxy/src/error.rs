use std::io;

use thiserror::Error;

/// Failures that end a single proxy session. Startup failures (unreadable
/// credential files, bind errors) are reported with `anyhow` in the binary
/// instead; nothing here outlives the session that raised it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[source] io::Error),

    #[error("unsupported protocol version {0}; only protocol 10 is supported")]
    ProtocolUnsupported(u8),

    #[error("malformed frame: {0}")]
    FrameMalformed(&'static str),

    #[error("unknown user {0:?}")]
    UserUnknown(String),

    #[error("authentication mismatch for user {0:?}")]
    AuthMismatch(String),

    #[error("peer closed the connection mid-handshake")]
    Eof,

    #[error("query rewrite would grow the packet to {0} bytes")]
    OversizedRewrite(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}
