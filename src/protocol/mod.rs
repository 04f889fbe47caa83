mod http;
mod websocket;


use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::{Config, VerifyKind};
use crate::error::{RequestError, StartupError};

pub use http::HttpClient;
pub use websocket::WsClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
    Websocket,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
            Protocol::Websocket => "websocket",
        };
        f.write_str(name)
    }
}

/// Wire-agnostic request. Immutable once built for an iteration.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

/// Wire-agnostic response. The request echo fields are mandatory whenever a
/// transport was reached, so the detail view can reproduce the exchange.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub duration: Duration,
    pub error: Option<String>,
    pub request_url: String,
    pub request_method: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: String,
    pub request_query: String,
    pub verifications: Vec<VerificationResult>,
}

impl Response {
    /// Seed a response with the request echo; transports fill in the rest.
    #[must_use]
    pub fn echo_of(request: &Request) -> Self {
        let query = url::Url::parse(&request.url)
            .map(|parsed| parsed.query().unwrap_or_default().to_owned())
            .unwrap_or_default();
        Response {
            request_url: request.url.clone(),
            request_method: request.method.clone(),
            request_headers: request.headers.clone(),
            request_body: request.body.clone(),
            request_query: query,
            ..Response::default()
        }
    }

    #[must_use]
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// One assertion outcome appended to the response by a verifier.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    #[serde(rename = "type")]
    pub kind: VerifyKind,
    pub success: bool,
    pub message: String,
    pub expect: String,
    pub actual: String,
}

/// Capability set every wire protocol exposes to the core.
///
/// Implementations may be stateful (a WebSocket stream) or stateless
/// (keep-alive HTTP); stateful ones use interior mutability so a client can
/// be shared behind an `Arc`.
#[async_trait]
pub trait Client: Send + Sync {
    async fn connect(&self) -> Result<(), RequestError>;

    /// Sends one request. `response.duration` is populated with the elapsed
    /// wall time whether or not the call succeeds; errors that reached the
    /// wire carry the echoed response.
    async fn send(&self, request: &Request) -> Result<Response, RequestError>;

    async fn close(&self) -> Result<(), RequestError>;

    fn protocol(&self) -> Protocol;
}

pub type SharedClient = Arc<dyn Client>;

pub type ClientFactory = Arc<dyn Fn() -> Result<SharedClient, StartupError> + Send + Sync>;

/// Closure over the configured protocol; the executor seeds the middleware
/// chain with one probe client from this and the pool creates the rest.
#[must_use]
pub fn client_factory(config: Arc<Config>) -> ClientFactory {
    Arc::new(move || match config.protocol {
        Protocol::Http => {
            let client = HttpClient::new(&config)?;
            Ok(Arc::new(client) as SharedClient)
        }
        Protocol::Websocket => {
            let client = WsClient::new(&config)?;
            Ok(Arc::new(client) as SharedClient)
        }
        Protocol::Grpc => Err(StartupError::UnsupportedProtocol {
            protocol: Protocol::Grpc,
        }),
    })
}
