//! Bidirectional sockets.
//!
//! A [`SocketHandler`] declares the events each side may send and the
//! callbacks that handle client events. A [`SocketSession`] runs one
//! connection over any text-frame stream and sink, so the transport stays
//! outside this crate.

use crate::dispatch::panic_message;
use crate::error::{BridgeError, BuildError, CommandError, ErrorCode};
use crate::lifecycle::Lifecycle;
use crate::naming::to_transport_case;
use crate::registry::{Registry, RegistryHandle};
use crate::schema::reject_streams;
use crate::types::{Describe, TypeDescriptor};
use crate::validate::validate;
use crate::wire::SocketEnvelope;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type EventFn =
    Arc<dyn Fn(SocketSender, Value) -> BoxFuture<'static, Result<(), CommandError>> + Send + Sync>;
type HookFn = Arc<dyn Fn(SocketSender) -> BoxFuture<'static, Result<(), CommandError>> + Send + Sync>;

/// Identifies one socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(Uuid);

impl SocketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket '{socket}' does not declare server event '{event}'")]
    UndeclaredEvent { socket: String, event: String },
    #[error("socket closed")]
    Closed,
    #[error("failed to serialize socket message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<SocketError> for CommandError {
    fn from(err: SocketError) -> Self {
        CommandError::new(err.to_string())
    }
}

/// Declaration of a socket endpoint.
pub struct SocketHandler {
    name: String,
    doc: Option<String>,
    module: Option<String>,
    server_events: BTreeMap<String, TypeDescriptor>,
    client_events: BTreeMap<String, TypeDescriptor>,
    callbacks: HashMap<String, EventFn>,
    on_connect: Option<HookFn>,
    on_disconnect: Option<HookFn>,
}

impl fmt::Debug for SocketHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandler")
            .field("name", &self.name)
            .field("server_events", &self.server_events.keys().collect::<Vec<_>>())
            .field("client_events", &self.client_events.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SocketHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
            module: None,
            server_events: BTreeMap::new(),
            client_events: BTreeMap::new(),
            callbacks: HashMap::new(),
            on_connect: None,
            on_disconnect: None,
        }
    }

    pub fn describe(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Declare an event the server may push.
    pub fn server_event<T: Describe + ?Sized>(self, event: impl Into<String>) -> Self {
        self.server_event_with(event, T::describe())
    }

    pub fn server_event_with(mut self, event: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.server_events.insert(event.into(), ty);
        self
    }

    /// Declare an event the client may send.
    pub fn client_event<T: Describe + ?Sized>(self, event: impl Into<String>) -> Self {
        self.client_event_with(event, T::describe())
    }

    pub fn client_event_with(mut self, event: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.client_events.insert(event.into(), ty);
        self
    }

    /// Handle a declared client event. The payload is validated against the
    /// declared type before it is deserialized into `T`.
    pub fn on<T, F, Fut>(mut self, event: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(SocketSender, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let callback: EventFn = Arc::new(move |sender, data| {
            let f = f.clone();
            Box::pin(async move {
                let data: T = serde_json::from_value(data).map_err(|err| {
                    CommandError::new(format!("event payload: {err}"))
                        .with_code(ErrorCode::InvalidArgument)
                })?;
                f(sender, data).await
            })
        });
        self.callbacks.insert(event.into(), callback);
        self
    }

    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SocketSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |sender| Box::pin(f(sender))));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SocketSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.on_disconnect = Some(Arc::new(move |sender| Box::pin(f(sender))));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Server events in name order.
    pub fn server_events(&self) -> impl Iterator<Item = (&str, &TypeDescriptor)> {
        self.server_events.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Client events in name order.
    pub fn client_events(&self) -> impl Iterator<Item = (&str, &TypeDescriptor)> {
        self.client_events.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        let mut handled: Vec<_> = self.callbacks.keys().collect();
        handled.sort();
        for event in handled {
            if !self.client_events.contains_key(event) {
                return Err(BuildError::UndeclaredEvent {
                    socket: self.name.clone(),
                    event: event.clone(),
                });
            }
        }
        for (owner, ty) in self.event_types() {
            reject_streams(&owner, "data", ty)?;
        }
        Ok(())
    }

    /// Every declared event type, labelled for build errors.
    pub(crate) fn event_types(&self) -> Vec<(String, &TypeDescriptor)> {
        let server = self.server_events.iter().map(|(event, ty)| {
            (format!("socket '{}' server event '{event}'", self.name), ty)
        });
        let client = self.client_events.iter().map(|(event, ty)| {
            (format!("socket '{}' client event '{event}'", self.name), ty)
        });
        server.chain(client).collect()
    }
}

/// Handle callbacks use to push events to their client.
#[derive(Clone)]
pub struct SocketSender {
    id: SocketId,
    handler: Arc<SocketHandler>,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl fmt::Debug for SocketSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSender")
            .field("id", &self.id)
            .field("socket", &self.handler.name)
            .finish()
    }
}

impl SocketSender {
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Push a declared server event.
    pub async fn send<T: Serialize>(&self, event: &str, data: T) -> Result<(), SocketError> {
        if !self.handler.server_events.contains_key(event) {
            return Err(SocketError::UndeclaredEvent {
                socket: self.handler.name.clone(),
                event: event.to_string(),
            });
        }
        let data = to_transport_case(serde_json::to_value(data)?);
        self.send_envelope(&SocketEnvelope::new(event, data)).await
    }

    /// Push an `error` event.
    pub async fn send_error(&self, err: &BridgeError) -> Result<(), SocketError> {
        self.send_envelope(&SocketEnvelope::error(err)).await
    }

    async fn send_envelope(&self, envelope: &SocketEnvelope) -> Result<(), SocketError> {
        if self.cancel.is_cancelled() {
            return Err(SocketError::Closed);
        }
        let frame = serde_json::to_string(envelope)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SocketError::Closed),
            res = self.tx.send(frame) => res.map_err(|_| SocketError::Closed),
        }
    }

    /// End the session from the server side. Frames already queued are
    /// still flushed.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session has ended, from either side.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

/// Opens socket sessions against the current registry.
#[derive(Debug, Clone)]
pub struct SocketManager {
    registry: RegistryHandle,
    capacity: usize,
}

impl SocketManager {
    pub fn new(registry: RegistryHandle) -> Self {
        Self {
            registry,
            capacity: crate::channel::DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Resolve the handler for a new connection. Fails before any upgrade
    /// when the socket does not exist.
    pub fn open(&self, name: &str) -> Result<SocketSession, BridgeError> {
        let registry = self.registry.snapshot();
        let handler = registry.socket(name).cloned().ok_or_else(|| {
            BridgeError::new(
                ErrorCode::UnknownCommand,
                format!("Socket '{name}' not found"),
            )
        })?;
        let mut state = Lifecycle::Created;
        state.advance(Lifecycle::Initializing);
        Ok(SocketSession {
            id: SocketId::new(),
            handler,
            registry,
            capacity: self.capacity,
            state,
        })
    }
}

/// One connection to a socket handler.
pub struct SocketSession {
    id: SocketId,
    handler: Arc<SocketHandler>,
    registry: Arc<Registry>,
    capacity: usize,
    state: Lifecycle,
}

impl fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSession")
            .field("id", &self.id)
            .field("socket", &self.handler.name)
            .field("state", &self.state)
            .finish()
    }
}

impl SocketSession {
    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Run the session until the client goes away or the server closes it.
    /// Returns the final state.
    ///
    /// Inbound frames are handled one at a time, in arrival order. A callback
    /// still running when the client disconnects is dropped.
    pub async fn run<I, O>(self, mut inbound: I, mut outbound: O) -> Lifecycle
    where
        I: Stream<Item = String> + Unpin,
        O: Sink<String> + Unpin,
    {
        let SocketSession {
            id,
            handler,
            registry,
            capacity,
            state: initial,
        } = self;
        let (tx, mut rx) = mpsc::channel::<String>(capacity);
        let cancel = CancellationToken::new();
        let sender = SocketSender {
            id,
            handler: handler.clone(),
            tx,
            cancel: cancel.clone(),
        };
        tracing::debug!("Socket {} connected to {}", id, handler.name);

        let writer = async {
            loop {
                tokio::select! {
                    biased;
                    frame = rx.recv() => match frame {
                        Some(frame) => {
                            if outbound.send(frame).await.is_err() {
                                cancel.cancel();
                                return;
                            }
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
            while let Ok(frame) = rx.try_recv() {
                if outbound.send(frame).await.is_err() {
                    return;
                }
            }
            let _ = outbound.close().await;
        };

        let reader = async {
            let mut state = initial;
            let mut backlog = VecDeque::new();
            let connected = match &handler.on_connect {
                Some(hook) => {
                    let connect = run_hook(&sender, hook, "connect");
                    guarded(connect, &mut inbound, &mut backlog, capacity, &cancel).await
                }
                None => Some(true),
            };
            if connected == Some(true) {
                state.advance(Lifecycle::Open);
                loop {
                    let text = match backlog.pop_front() {
                        Some(text) => text,
                        None => {
                            let frame = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break,
                                frame = inbound.next() => frame,
                            };
                            let Some(text) = frame else {
                                break;
                            };
                            text
                        }
                    };
                    if cancel.is_cancelled() {
                        break;
                    }
                    let frame = handle_frame(&registry, &handler, &sender, &text);
                    if guarded(frame, &mut inbound, &mut backlog, capacity, &cancel)
                        .await
                        .is_none()
                    {
                        tracing::debug!("Socket {} released an in-flight callback", id);
                        break;
                    }
                }
            }
            if connected != Some(false) {
                state.advance(Lifecycle::Closing);
            }
            if let Some(hook) = &handler.on_disconnect {
                run_hook(&sender, hook, "disconnect").await;
            }
            if connected == Some(false) {
                state.advance(Lifecycle::Failed);
            } else {
                state.advance(Lifecycle::Closed);
            }
            cancel.cancel();
            drop(sender);
            state
        };

        let (state, ()) = tokio::join!(reader, writer);
        tracing::debug!("Socket {} on {} finished: {:?}", id, handler.name, state);
        state
    }
}

/// Drive `work` while watching the transport. Frames that arrive in the
/// meantime are queued, up to `limit`. Returns `None` and drops `work` when
/// the client goes away or the session is closed first.
async fn guarded<I, F>(
    work: F,
    inbound: &mut I,
    backlog: &mut VecDeque<String>,
    limit: usize,
    cancel: &CancellationToken,
) -> Option<F::Output>
where
    I: Stream<Item = String> + Unpin,
    F: Future,
{
    tokio::pin!(work);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            out = &mut work => return Some(out),
            frame = inbound.next(), if backlog.len() < limit => match frame {
                Some(text) => backlog.push_back(text),
                None => return None,
            },
        }
    }
}

async fn run_hook(sender: &SocketSender, hook: &HookFn, label: &str) -> bool {
    let err = match AssertUnwindSafe(hook(sender.clone())).catch_unwind().await {
        Ok(Ok(())) => return true,
        Ok(Err(err)) => err.into_bridge_error(ErrorCode::ExecutionError),
        Err(panic) => BridgeError::execution(panic_message(panic.as_ref())),
    };
    tracing::warn!("Socket {} {} hook failed: {}", sender.id, label, err);
    let _ = sender.send_error(&err).await;
    false
}

async fn handle_frame(
    registry: &Registry,
    handler: &SocketHandler,
    sender: &SocketSender,
    text: &str,
) {
    let envelope: SocketEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            let err = BridgeError::invalid_argument(format!("Malformed socket frame: {err}"));
            let _ = sender.send_error(&err).await;
            return;
        }
    };
    let Some(ty) = handler.client_events.get(&envelope.event) else {
        tracing::warn!(
            "Socket {} ignoring undeclared event {}",
            handler.name,
            envelope.event
        );
        return;
    };
    let Some(callback) = handler.callbacks.get(&envelope.event) else {
        tracing::debug!("Socket {} has no handler for {}", handler.name, envelope.event);
        return;
    };

    let data = to_transport_case(envelope.data);
    if let Err(err) = validate(registry.definitions(), &envelope.event, ty, &data) {
        let _ = sender.send_error(&err).await;
        return;
    }
    let err = match AssertUnwindSafe(callback(sender.clone(), data))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.into_bridge_error(ErrorCode::ExecutionError),
        Err(panic) => BridgeError::execution(panic_message(panic.as_ref())),
    };
    tracing::warn!(
        "Socket {} handler for {} failed: {}",
        handler.name,
        envelope.event,
        err
    );
    let _ = sender.send_error(&err).await;
}
