//! Rust client for a wirebridge server.
//!
//! Arguments are converted to transport case before they are sent, so
//! `json!({ "taskId": 1 })` and `json!({ "task_id": 1 })` are equivalent.
//! Results come back in transport case, which is what `serde` structs with
//! Rust field names expect.

mod sse;

pub use sse::{SseDecoder, SseEvent};

use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use wirebridge_core::naming::to_transport_case;
use wirebridge_core::{
    BridgeError, ChannelCreated, ChannelMessage, CommandResponse, ErrorCode, SocketEnvelope,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with an error envelope.
    #[error(transparent)]
    Remote(#[from] BridgeError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Error code when the server sent one.
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            ClientError::Remote(err) => Some(&err.code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call a unary command and return the raw result.
    pub async fn call(&self, command: &str, args: Value) -> Result<Value, ClientError> {
        let response = self
            .http
            .post(format!("{}/command/{command}", self.base_url))
            .json(&to_transport_case(args))
            .send()
            .await?;
        let response: CommandResponse = read_json(response).await?;
        Ok(response.result)
    }

    /// Call a unary command and deserialize its result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        command: &str,
        args: impl Serialize,
    ) -> Result<T, ClientError> {
        let result = self.call(command, serde_json::to_value(args)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Create a channel for a stream command and subscribe to it.
    pub async fn open_channel<T: DeserializeOwned + Send + 'static>(
        &self,
        command: &str,
        args: impl Serialize,
    ) -> Result<Channel<T>, ClientError> {
        let args = to_transport_case(serde_json::to_value(args)?);
        let response = self
            .http
            .post(format!("{}/channel/{command}", self.base_url))
            .json(&args)
            .send()
            .await?;
        let created: ChannelCreated = read_json(response).await?;
        let id = created.channel_id;

        let response = self
            .http
            .get(format!("{}/channel/stream/{id}", self.base_url))
            .send()
            .await?;
        let response = check_status(response).await?;
        let values = channel_values(Box::pin(response.bytes_stream()))
            .map(|item| item.and_then(|value| Ok(serde_json::from_value::<T>(value)?)));

        tracing::debug!("Subscribed to channel {} ({})", id, command);
        Ok(Channel {
            id,
            client: self.clone(),
            values: values.boxed(),
        })
    }

    pub async fn close_channel(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(format!("{}/channel/{id}", self.base_url))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn connect_socket(&self, name: &str) -> Result<SocketClient, ClientError> {
        let url = match self.base_url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}/ws/{name}"),
            None => format!("{}/ws/{name}", self.base_url),
        };
        let (inner, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(SocketClient { inner })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await?;
    let err = serde_json::from_slice::<BridgeError>(&body).unwrap_or_else(|_| {
        BridgeError::new(
            ErrorCode::UnknownError,
            status.canonical_reason().unwrap_or("request failed"),
        )
    });
    Err(ClientError::Remote(err))
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let response = check_status(response).await?;
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

struct EventState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Turn an event-stream body into channel values. Ends after `close`; an
/// `error` event is yielded once and ends the stream too.
fn channel_values<S, B>(body: S) -> impl Stream<Item = Result<Value, ClientError>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
{
    let state = EventState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                let payload = match serde_json::from_str(&event.data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        state.finished = true;
                        return Some((Err(err.into()), state));
                    }
                };
                match ChannelMessage::from_event(&event.event, payload) {
                    Some(ChannelMessage::Data(value)) => return Some((Ok(value), state)),
                    Some(ChannelMessage::Error(err)) => {
                        state.finished = true;
                        return Some((Err(ClientError::Remote(err)), state));
                    }
                    Some(ChannelMessage::Close) => return None,
                    None => continue,
                }
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.finished = true;
                    return Some((
                        Err(ClientError::Protocol(
                            "channel stream ended without close".to_string(),
                        )),
                        state,
                    ));
                }
            }
        }
    })
}

/// A subscribed channel. Yields values until the server closes it.
pub struct Channel<T> {
    id: String,
    client: BridgeClient,
    values: BoxStream<'static, Result<T, ClientError>>,
}

impl<T> Channel<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the server to close the channel.
    pub async fn close(self) -> Result<(), ClientError> {
        self.client.close_channel(&self.id).await
    }
}

impl<T> Stream for Channel<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().values.poll_next_unpin(cx)
    }
}

/// An open WebSocket session.
pub struct SocketClient {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SocketClient {
    pub async fn send<T: Serialize>(&mut self, event: &str, data: T) -> Result<(), ClientError> {
        let frame = serde_json::to_string(&SocketEnvelope {
            event: event.to_string(),
            data: to_transport_case(serde_json::to_value(data)?),
        })?;
        self.inner.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    /// Next server frame, or `None` once the server has closed.
    pub async fn recv(&mut self) -> Option<Result<SocketEnvelope, ClientError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(Into::into));
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.inner.close(None).await?;
        Ok(())
    }
}
