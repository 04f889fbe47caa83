use thiserror::Error;

use super::{ConfigError, RequestError, StartupError};

pub type AppResult<T> = Result<T, AppError>;

/// Top-level error for the binary. Only `Config` and `Startup` terminate
/// the process; request-level failures are recorded per outcome and never
/// bubble this far.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("Worker {id} failed: {source}")]
    Worker {
        id: u64,
        #[source]
        source: RequestError,
    },
    #[error("Failed to write report artifacts: {source}")]
    ReportArtifacts {
        #[source]
        source: std::io::Error,
    },
}
