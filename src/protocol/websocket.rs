use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::Config;
use crate::error::{RequestError, StartupError};

use super::{Client, Protocol, Request, Response};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport: one outbound message, one reply per send.
///
/// The stream is stateful, so it lives behind a mutex; `send` dials lazily
/// when `connect` has not run or the previous exchange tore the stream down.
pub struct WsClient {
    timeout: Duration,
    stream: Mutex<Option<WsStream>>,
}

impl WsClient {
    /// # Errors
    ///
    /// Returns a [`StartupError`] when the timeout cannot be resolved.
    pub fn new(config: &Config) -> Result<Self, StartupError> {
        let timeout = config
            .timeout
            .to_duration()
            .map_err(|err| StartupError::BuildClient {
                protocol: Protocol::Websocket,
                message: err.to_string(),
            })?;
        Ok(WsClient {
            timeout,
            stream: Mutex::new(None),
        })
    }

    async fn dial(&self, url: &str) -> Result<WsStream, RequestError> {
        let connect = connect_async(url);
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(err)) => Err(RequestError::Connect {
                message: err.to_string(),
            }),
            Err(_) => Err(RequestError::Connect {
                message: format!("connect timed out after {:?}", self.timeout),
            }),
        }
    }
}

#[async_trait]
impl Client for WsClient {
    async fn connect(&self) -> Result<(), RequestError> {
        // The URL only arrives with the first request; nothing to do yet.
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<Response, RequestError> {
        let started = Instant::now();
        let mut response = Response::echo_of(request);

        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial(&request.url).await?);
        }
        let stream = guard.as_mut().ok_or(RequestError::Cancelled)?;

        let outbound = Message::Text(request.body.clone());
        if let Err(err) = stream.send(outbound).await {
            *guard = None;
            response.duration = started.elapsed();
            response.error = Some(err.to_string());
            return Err(RequestError::Transport {
                message: err.to_string(),
                response: Box::new(response),
            });
        }

        loop {
            let next = tokio::time::timeout(self.timeout, stream.next()).await;
            match next {
                Ok(Some(Ok(Message::Text(text)))) => {
                    response.duration = started.elapsed();
                    response.body = text.into_bytes();
                    return Ok(response);
                }
                Ok(Some(Ok(Message::Binary(bytes)))) => {
                    response.duration = started.elapsed();
                    response.body = bytes;
                    return Ok(response);
                }
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)))) => {
                    // Control frames are not replies; keep reading.
                }
                Ok(Some(Ok(Message::Close(_))) | Some(Err(_)) | None) => {
                    *guard = None;
                    response.duration = started.elapsed();
                    let message = "connection closed before a reply arrived".to_owned();
                    response.error = Some(message.clone());
                    return Err(RequestError::Transport {
                        message,
                        response: Box::new(response),
                    });
                }
                Err(_) => {
                    response.duration = started.elapsed();
                    response.error = Some("read timed out".to_owned());
                    return Err(RequestError::Timeout {
                        response: Box::new(response),
                    });
                }
            }
        }
    }

    async fn close(&self) -> Result<(), RequestError> {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            drop(stream.send(Message::Close(None)).await);
        }
        Ok(())
    }

    fn protocol(&self) -> Protocol {
        Protocol::Websocket
    }
}
