use thiserror::Error;

use crate::protocol::Protocol;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Unsupported protocol '{protocol}'.")]
    UnsupportedProtocol { protocol: Protocol },
    #[error("Failed to build {protocol} client: {message}")]
    BuildClient { protocol: Protocol, message: String },
    #[error("Failed to bind realtime server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Client pool is closed.")]
    PoolClosed,
}
