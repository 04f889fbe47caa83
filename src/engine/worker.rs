use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::RequestError;
use crate::protocol::{Response, SharedClient};
use crate::shutdown::Shutdown;
use crate::stats::{Collector, RequestOutcome};
use crate::verify;

use super::dependency::DependencyResolver;
use super::middleware::SharedHandler;
use super::progress::ProgressTracker;
use super::selector::{ApiRequestConfig, ApiSelector};

/// One virtual user: borrows a client, loops over its request budget and
/// drives the middleware pipeline.
pub struct Worker {
    id: u64,
    client: SharedClient,
    handler: SharedHandler,
    collector: Arc<Collector>,
    selector: Arc<ApiSelector>,
    /// Iterations to run; 0 means until the shutdown fires (duration mode).
    request_count: u64,
    progress: Arc<ProgressTracker>,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: u64,
        client: SharedClient,
        handler: SharedHandler,
        collector: Arc<Collector>,
        selector: Arc<ApiSelector>,
        request_count: u64,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Worker {
            id,
            client,
            handler,
            collector,
            selector,
            request_count,
            progress,
        }
    }

    /// # Errors
    ///
    /// Returns a [`RequestError`] only when the client cannot connect;
    /// request-level failures are recorded as outcomes instead.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), RequestError> {
        if let Err(err) = self.client.connect().await {
            error!(worker = self.id, "connect failed: {}", err);
            return Err(err);
        }
        debug!(worker = self.id, "worker started");

        let mut iteration = 0u64;
        loop {
            if self.request_count > 0 && iteration >= self.request_count {
                break;
            }
            if shutdown.is_triggered() {
                break;
            }

            if let Some(resolver) = self.selector.dependency_resolver() {
                // In dependency mode one iteration walks the whole chain in
                // topological order, so later endpoints always see bindings
                // this worker's earlier endpoints produced.
                let resolver = Arc::clone(resolver);
                for name in resolver.execution_order() {
                    if shutdown.is_triggered() {
                        break;
                    }
                    let Some(api) = resolver.api(name) else {
                        continue;
                    };
                    let api = substitute_bindings(api, &resolver.bindings());
                    self.execute(&api, Some(&resolver), shutdown).await;
                }
            } else {
                let api = self.selector.next();
                self.execute(&api, None, shutdown).await;
            }

            iteration += 1;
        }

        debug!(worker = self.id, iterations = iteration, "worker finished");
        Ok(())
    }

    async fn execute(
        &self,
        api: &ApiRequestConfig,
        resolver: Option<&DependencyResolver>,
        shutdown: &Shutdown,
    ) {
        let request = api.build_request();

        let result = tokio::select! {
            () = shutdown.triggered() => return,
            result = self.handler.call(&request, shutdown) => result,
        };

        let outcome = match result {
            Ok(mut response) => {
                // All per-endpoint verifications are recorded; the first
                // failure decides the outcome.
                let mut first_failure: Option<String> = None;
                for rule in &api.verify {
                    if let Err(message) = verify::apply(rule, &mut response) {
                        first_failure.get_or_insert(message);
                    }
                }

                self.extract(api, resolver, &response);

                match first_failure {
                    None => RequestOutcome::from_response(&response, true, None),
                    Some(message) => {
                        RequestOutcome::from_response(&response, false, Some(message))
                    }
                }
            }
            Err(err) if err.is_cancelled() => return,
            Err(err) => {
                let message = err.to_string();
                match err.into_response() {
                    Some(response) => {
                        self.extract(api, resolver, &response);
                        RequestOutcome::from_response(&response, false, Some(message))
                    }
                    None => {
                        // The transport was never reached; echo the request
                        // so the detail view still identifies the call.
                        let response = Response::echo_of(&request);
                        RequestOutcome::from_response(&response, false, Some(message))
                    }
                }
            }
        };

        self.collector.record(outcome);
        self.progress.increment();
    }

    fn extract(
        &self,
        api: &ApiRequestConfig,
        resolver: Option<&DependencyResolver>,
        response: &Response,
    ) {
        let Some(resolver) = resolver else {
            return;
        };
        if api.extractors.is_empty() {
            return;
        }
        let values = api.extractors.extract_all(response);
        resolver.store(&api.name, values);
    }
}

/// Dispatch-time substitution: literal replacement of `{{.api.var}}`
/// placeholders in the URL, headers and body. Idempotent for a fixed set of
/// bindings.
#[must_use]
pub fn substitute_bindings(
    api: &ApiRequestConfig,
    bindings: &HashMap<String, String>,
) -> ApiRequestConfig {
    if bindings.is_empty() {
        return api.clone();
    }

    let mut substituted = api.clone();
    substituted.url = replace_placeholders(&substituted.url, bindings);
    substituted.body = replace_placeholders(&substituted.body, bindings);
    for value in substituted.headers.values_mut() {
        *value = replace_placeholders(value, bindings);
    }
    substituted
}

fn replace_placeholders(text: &str, bindings: &HashMap<String, String>) -> String {
    if !text.contains("{{.") {
        return text.to_owned();
    }
    let mut result = text.to_owned();
    for (key, value) in bindings {
        let placeholder = format!("{{{{.{}}}}}", key);
        if result.contains(&placeholder) {
            result = result.replace(&placeholder, value);
        }
    }
    result
}
