use thiserror::Error;

use crate::protocol::Response;

/// Failure of a single request as it travels the middleware chain.
///
/// Variants that reach the transport carry the partially-built [`Response`]
/// (duration and request echo are populated on both paths) so the worker can
/// still record a full outcome for the report.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("connection failed: {message}")]
    Connect { message: String },
    #[error("request failed: {message}")]
    Transport {
        message: String,
        response: Box<Response>,
    },
    #[error("request timed out")]
    Timeout { response: Box<Response> },
    #[error("failed to read response body: {message}")]
    ResponseRead {
        message: String,
        response: Box<Response>,
    },
    #[error("response verification failed: {message}")]
    Verification {
        message: String,
        response: Box<Response>,
    },
    #[error("circuit breaker open")]
    BreakerOpen,
    #[error("cancelled")]
    Cancelled,
}

impl RequestError {
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            RequestError::Transport { response, .. }
            | RequestError::Timeout { response }
            | RequestError::ResponseRead { response, .. }
            | RequestError::Verification { response, .. } => Some(response),
            RequestError::Connect { .. }
            | RequestError::BreakerOpen
            | RequestError::Cancelled => None,
        }
    }

    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            RequestError::Transport { response, .. }
            | RequestError::Timeout { response }
            | RequestError::ResponseRead { response, .. }
            | RequestError::Verification { response, .. } => Some(*response),
            RequestError::Connect { .. }
            | RequestError::BreakerOpen
            | RequestError::Cancelled => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }
}
