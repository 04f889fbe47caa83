use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::VerifyConfig;
use crate::error::RequestError;
use crate::protocol::{Request, Response, SharedClient};
use crate::shutdown::Shutdown;
use crate::verify;

use super::breaker::Circuit;

/// A stage of the request pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: &Request, shutdown: &Shutdown)
        -> Result<Response, RequestError>;
}

pub type SharedHandler = Arc<dyn Handler>;

/// A layer wrapping the next handler. Layers are applied right-to-left so
/// the declared order (breaker, retry, verify) is the runtime call order.
pub type Middleware = Box<dyn FnOnce(SharedHandler) -> SharedHandler + Send>;

#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Middleware>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        MiddlewareChain::default()
    }

    #[must_use]
    pub fn with(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    #[must_use]
    pub fn build(self, terminal: SharedHandler) -> SharedHandler {
        let mut handler = terminal;
        for middleware in self.middlewares.into_iter().rev() {
            handler = middleware(handler);
        }
        handler
    }
}

/// Terminal stage: adapts a client's `send`.
pub struct TransportHandler {
    client: SharedClient,
}

impl TransportHandler {
    #[must_use]
    pub fn new(client: SharedClient) -> Self {
        TransportHandler { client }
    }
}

#[async_trait]
impl Handler for TransportHandler {
    async fn call(
        &self,
        request: &Request,
        _shutdown: &Shutdown,
    ) -> Result<Response, RequestError> {
        self.client.send(request).await
    }
}

struct BreakerHandler {
    circuit: Arc<Circuit>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for BreakerHandler {
    async fn call(
        &self,
        request: &Request,
        shutdown: &Shutdown,
    ) -> Result<Response, RequestError> {
        if !self.circuit.allow() {
            return Err(RequestError::BreakerOpen);
        }
        let result = self.next.call(request, shutdown).await;
        self.circuit.record(result.is_ok());
        result
    }
}

#[must_use]
pub fn breaker_middleware(circuit: Arc<Circuit>) -> Middleware {
    Box::new(move |next| Arc::new(BreakerHandler { circuit, next }))
}

struct RetryHandler {
    max_retries: u32,
    interval: Duration,
    next: SharedHandler,
}

#[async_trait]
impl Handler for RetryHandler {
    async fn call(
        &self,
        request: &Request,
        shutdown: &Shutdown,
    ) -> Result<Response, RequestError> {
        let mut result = self.next.call(request, shutdown).await;
        let mut attempt = 0u32;
        while attempt < self.max_retries {
            match &result {
                Ok(_) => break,
                // Cancellation is terminal; no retry-past-cancel.
                Err(err) if err.is_cancelled() => break,
                Err(_) => {}
            }
            if shutdown.is_triggered() {
                break;
            }
            tokio::select! {
                () = shutdown.triggered() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
            attempt += 1;
            debug!(attempt, url = %request.url, "retrying request");
            result = self.next.call(request, shutdown).await;
        }
        result
    }
}

#[must_use]
pub fn retry_middleware(max_retries: u32, interval: Duration) -> Middleware {
    Box::new(move |next| {
        Arc::new(RetryHandler {
            max_retries,
            interval,
            next,
        })
    })
}

struct VerifyHandler {
    config: VerifyConfig,
    next: SharedHandler,
}

#[async_trait]
impl Handler for VerifyHandler {
    async fn call(
        &self,
        request: &Request,
        shutdown: &Shutdown,
    ) -> Result<Response, RequestError> {
        let mut response = self.next.call(request, shutdown).await?;
        match verify::apply(&self.config, &mut response) {
            Ok(()) => Ok(response),
            Err(message) => Err(RequestError::Verification {
                message,
                response: Box::new(response),
            }),
        }
    }
}

#[must_use]
pub fn verify_middleware(config: VerifyConfig) -> Middleware {
    Box::new(move |next| Arc::new(VerifyHandler { config, next }))
}
