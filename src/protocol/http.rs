use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{RequestError, StartupError};

use super::{Client, Protocol, Request, Response};

/// HTTP transport on top of a pooled reqwest client.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Builds the underlying client from the `http` config section.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] when the client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, StartupError> {
        let timeout = config
            .timeout
            .to_duration()
            .map_err(|err| StartupError::BuildClient {
                protocol: Protocol::Http,
                message: err.to_string(),
            })?;

        let mut builder = reqwest::Client::builder().timeout(timeout);

        if config.http.follow_redirects {
            builder = builder.redirect(redirect::Policy::limited(10));
        } else {
            builder = builder.redirect(redirect::Policy::none());
        }

        if config.http.keepalive {
            builder = builder.pool_max_idle_per_host(config.http.max_conns_per_host);
        } else {
            builder = builder
                .pool_max_idle_per_host(0)
                .pool_idle_timeout(Some(Duration::from_secs(0)));
        }

        if config.http.http2 {
            builder = builder.http2_prior_knowledge();
        }

        let client = builder.build().map_err(|err| StartupError::BuildClient {
            protocol: Protocol::Http,
            message: err.to_string(),
        })?;

        Ok(HttpClient { client })
    }

    fn classify(err: &reqwest::Error, response: Box<Response>) -> RequestError {
        if err.is_timeout() {
            RequestError::Timeout { response }
        } else {
            RequestError::Transport {
                message: err.to_string(),
                response,
            }
        }
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn connect(&self) -> Result<(), RequestError> {
        // Connections are established lazily by the pool inside reqwest.
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<Response, RequestError> {
        let started = Instant::now();
        let mut response = Response::echo_of(request);

        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            RequestError::Transport {
                message: format!("invalid method '{}'", request.method),
                response: Box::new(response.clone()),
            }
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| RequestError::Transport {
                    message: format!("invalid header name '{}'", name),
                    response: Box::new(response.clone()),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| RequestError::Transport {
                    message: format!("invalid header value for '{}'", name),
                    response: Box::new(response.clone()),
                })?;
            headers.insert(header_name, header_value);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone().into_bytes());
        }

        let wire_response = match builder.send().await {
            Ok(resp) => resp,
            Err(err) => {
                response.duration = started.elapsed();
                response.error = Some(err.to_string());
                return Err(Self::classify(&err, Box::new(response)));
            }
        };

        response.status_code = wire_response.status().as_u16();
        for (name, value) in wire_response.headers() {
            if let Ok(text) = value.to_str() {
                response
                    .headers
                    .entry(name.to_string())
                    .or_insert_with(|| text.to_owned());
            }
        }

        match wire_response.bytes().await {
            Ok(body) => {
                response.duration = started.elapsed();
                response.body = body.to_vec();
                Ok(response)
            }
            Err(err) => {
                response.duration = started.elapsed();
                response.error = Some(err.to_string());
                let message = err.to_string();
                Err(RequestError::ResponseRead {
                    message,
                    response: Box::new(response),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), RequestError> {
        Ok(())
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }
}
