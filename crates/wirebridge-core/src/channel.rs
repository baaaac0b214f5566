//! Server-push channels.
//!
//! A channel is created by a client request, attached by exactly one
//! subscription, and driven by its command's stream handler until the handler
//! finishes, fails, or the channel is closed.

use crate::dispatch::{panic_message, prepare_args};
use crate::error::{BridgeError, CommandError, ErrorCode};
use crate::lifecycle::Lifecycle;
use crate::naming::to_transport_case;
use crate::registry::{Args, CommandKind, Handler, RegistryHandle, StreamFn};
use crate::wire::ChannelMessage;
use futures_util::{FutureExt, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(30);

/// Opaque channel token handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChannelId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Attach and close failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel '{0}' not found")]
    NotFound(String),
    #[error("Channel '{0}' is already attached")]
    AlreadyAttached(ChannelId),
}

impl From<ChannelError> for BridgeError {
    fn from(err: ChannelError) -> Self {
        BridgeError::channel_init(err.to_string())
    }
}

/// Why a handler's send did not go through.
#[derive(Debug, thiserror::Error)]
pub enum ChannelSendError {
    #[error("channel closed")]
    Closed,
    #[error("failed to serialize channel message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<ChannelSendError> for CommandError {
    fn from(err: ChannelSendError) -> Self {
        CommandError::new(err.to_string())
    }
}

/// Handle a stream handler uses to push values to its subscriber.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<ChannelMessage>,
    cancel: CancellationToken,
}

impl ChannelSender {
    /// Push one value. Waits while the subscriber is behind.
    pub async fn send<T: Serialize>(&self, value: T) -> Result<(), ChannelSendError> {
        if self.cancel.is_cancelled() {
            return Err(ChannelSendError::Closed);
        }
        let value = to_transport_case(serde_json::to_value(value)?);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChannelSendError::Closed),
            res = self.tx.send(ChannelMessage::Data(value)) => {
                res.map_err(|_| ChannelSendError::Closed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once nobody is listening anymore.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

#[derive(Debug)]
struct ChannelShared {
    id: ChannelId,
    command: String,
    state: Mutex<Lifecycle>,
    cancel: CancellationToken,
}

impl ChannelShared {
    fn new(id: ChannelId, command: &str) -> Self {
        Self {
            id,
            command: command.to_string(),
            state: Mutex::new(Lifecycle::Created),
            cancel: CancellationToken::new(),
        }
    }

    fn state(&self) -> Lifecycle {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: Lifecycle) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(next)
    }
}

struct ChannelEntry {
    shared: Arc<ChannelShared>,
    handler: StreamFn,
    /// Taken by the first attach.
    args: Option<Args>,
}

type ChannelTable = Mutex<HashMap<ChannelId, ChannelEntry>>;

fn lock(table: &ChannelTable) -> MutexGuard<'_, HashMap<ChannelId, ChannelEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks every live channel.
#[derive(Clone)]
pub struct ChannelManager {
    registry: RegistryHandle,
    channels: Arc<ChannelTable>,
    capacity: usize,
    attach_timeout: Duration,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.len())
            .field("capacity", &self.capacity)
            .field("attach_timeout", &self.attach_timeout)
            .finish()
    }
}

impl ChannelManager {
    pub fn new(registry: RegistryHandle) -> Self {
        Self {
            registry,
            channels: Arc::default(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
        }
    }

    /// Per-channel queue size. Producers wait when it is full.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// How long a created channel waits for its subscription.
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// Validate a channel request and reserve an id. The handler does not
    /// start until [`attach`](Self::attach).
    ///
    /// Must be called inside a tokio runtime.
    pub fn create(&self, name: &str, payload: Value) -> Result<ChannelId, BridgeError> {
        let registry = self.registry.snapshot();
        let command = registry.lookup(name)?;
        let handler = match (command.kind(), command.handler_ref()) {
            (CommandKind::Stream, Some(Handler::Stream(handler))) => handler.clone(),
            _ => {
                return Err(BridgeError::invalid_argument(format!(
                    "Command '{name}' does not support channels"
                )));
            }
        };
        let args = prepare_args(registry.definitions(), command, payload)?;

        let id = ChannelId::new();
        let shared = Arc::new(ChannelShared::new(id, name));
        shared.advance(Lifecycle::Initializing);
        lock(&self.channels).insert(
            id,
            ChannelEntry {
                shared,
                handler,
                args: Some(args),
            },
        );
        self.spawn_expiry(id);
        tracing::debug!("Channel {} created for {}", id, name);
        Ok(id)
    }

    fn spawn_expiry(&self, id: ChannelId) {
        let table = Arc::downgrade(&self.channels);
        let timeout = self.attach_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = lock(&table);
            if table.get(&id).is_some_and(|entry| entry.args.is_some())
                && let Some(entry) = table.remove(&id)
            {
                entry.shared.advance(Lifecycle::Closing);
                entry.shared.advance(Lifecycle::Closed);
                tracing::debug!("Channel {} expired before anyone attached", id);
            }
        });
    }

    /// Bind the one subscription and start the handler.
    pub fn attach(&self, id: ChannelId) -> Result<ChannelSubscription, ChannelError> {
        let (shared, handler, args) = {
            let mut table = lock(&self.channels);
            let entry = table
                .get_mut(&id)
                .ok_or_else(|| ChannelError::NotFound(id.to_string()))?;
            let args = entry.args.take().ok_or(ChannelError::AlreadyAttached(id))?;
            (entry.shared.clone(), entry.handler.clone(), args)
        };
        shared.advance(Lifecycle::Open);

        let (tx, rx) = mpsc::channel(self.capacity);
        let sender = ChannelSender {
            tx: tx.clone(),
            cancel: shared.cancel.clone(),
        };
        tokio::spawn(drive(shared.clone(), handler, args, sender, tx));
        tracing::debug!("Channel {} attached", id);

        Ok(ChannelSubscription {
            shared,
            rx,
            table: Arc::downgrade(&self.channels),
            done: false,
        })
    }

    /// Close a channel on client request.
    ///
    /// An attached channel delivers one `close` and nothing after it. A
    /// channel that was never attached is simply dropped.
    pub fn close(&self, id: ChannelId) -> Result<(), ChannelError> {
        let mut table = lock(&self.channels);
        let entry = table
            .get(&id)
            .ok_or_else(|| ChannelError::NotFound(id.to_string()))?;
        if entry.args.is_some() {
            if let Some(entry) = table.remove(&id) {
                entry.shared.advance(Lifecycle::Closing);
                entry.shared.advance(Lifecycle::Closed);
            }
        } else if entry.shared.advance(Lifecycle::Closing) {
            entry.shared.cancel.cancel();
        }
        tracing::debug!("Channel {} closed by client", id);
        Ok(())
    }

    /// Cancel every channel. Used on shutdown.
    pub fn close_all(&self) {
        let table = lock(&self.channels);
        for entry in table.values() {
            if entry.shared.advance(Lifecycle::Closing) {
                entry.shared.cancel.cancel();
            }
        }
    }

    pub fn state(&self, id: ChannelId) -> Option<Lifecycle> {
        lock(&self.channels).get(&id).map(|entry| entry.shared.state())
    }

    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn drive(
    shared: Arc<ChannelShared>,
    handler: StreamFn,
    args: Args,
    sender: ChannelSender,
    tx: mpsc::Sender<ChannelMessage>,
) {
    let cancel = shared.cancel.clone();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = AssertUnwindSafe(handler(args, sender)).catch_unwind() => outcome,
    };

    let message = match outcome {
        Ok(Ok(())) => {
            if !shared.advance(Lifecycle::Closing) {
                return;
            }
            ChannelMessage::Close
        }
        Ok(Err(err)) => {
            let err = err.into_bridge_error(ErrorCode::ChannelError);
            tracing::warn!("Channel {} ({}) failed: {}", shared.id, shared.command, err);
            if !shared.advance(Lifecycle::Failed) {
                return;
            }
            ChannelMessage::Error(err)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!("Channel {} ({}) panicked: {}", shared.id, shared.command, message);
            if !shared.advance(Lifecycle::Failed) {
                return;
            }
            ChannelMessage::Error(BridgeError::channel(message))
        }
    };

    // Queued after every data message the handler produced.
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tx.send(message) => {}
    }
}

/// The receiving end of an attached channel.
///
/// Yields data messages in producer order, then exactly one terminal message
/// (`Close` or `Error`), then `None`. Dropping it early counts as a
/// disconnect and stops the handler.
pub struct ChannelSubscription {
    shared: Arc<ChannelShared>,
    rx: mpsc::Receiver<ChannelMessage>,
    table: Weak<ChannelTable>,
    done: bool,
}

impl fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("id", &self.shared.id)
            .field("command", &self.shared.command)
            .field("done", &self.done)
            .finish()
    }
}

impl ChannelSubscription {
    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn command(&self) -> &str {
        &self.shared.command
    }

    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        if self.done {
            return None;
        }
        let message = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => ChannelMessage::Close,
            message = self.rx.recv() => message.unwrap_or_else(|| {
                ChannelMessage::Error(BridgeError::channel("Channel terminated unexpectedly"))
            }),
        };
        if message.is_terminal() {
            self.finish(&message);
        }
        Some(message)
    }

    pub fn into_stream(self) -> impl Stream<Item = ChannelMessage> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|message| (message, sub))
        })
    }

    fn finish(&mut self, message: &ChannelMessage) {
        self.done = true;
        match message {
            ChannelMessage::Close => {
                self.shared.advance(Lifecycle::Closing);
                self.shared.advance(Lifecycle::Closed);
            }
            _ => {
                self.shared.advance(Lifecycle::Failed);
            }
        }
        self.shared.cancel.cancel();
        self.remove();
    }

    fn remove(&self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).remove(&self.shared.id);
        }
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.shared.advance(Lifecycle::Closing);
        self.shared.advance(Lifecycle::Closed);
        self.shared.cancel.cancel();
        self.remove();
        tracing::debug!("Channel {} subscriber went away", self.shared.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Command, Registry};
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn manager(dropped: Arc<AtomicBool>) -> ChannelManager {
        let registry = Registry::builder()
            .command(
                Command::stream("count")
                    .param::<u32>("up_to")
                    .yields::<u32>()
                    .stream_handler(|args: Args, tx: ChannelSender| async move {
                        let up_to: u32 = args.get("up_to")?;
                        for i in 0..=up_to {
                            tx.send(i).await?;
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        Ok(())
                    }),
            )
            .command(
                Command::stream("flaky")
                    .param_with_default::<Option<String>>("code")
                    .yields::<serde_json::Value>()
                    .stream_handler(|args: Args, tx: ChannelSender| async move {
                        tx.send(json!({"step_no": 1})).await?;
                        let code: Option<String> = args.get("code")?;
                        let err = CommandError::new("sensor offline");
                        Err(match code {
                            Some(code) => err.with_code(code),
                            None => err,
                        })
                    }),
            )
            .command(
                Command::stream("forever")
                    .yields::<u64>()
                    .stream_handler(move |_, tx: ChannelSender| {
                        let guard = SetOnDrop(dropped.clone());
                        async move {
                            let _guard = guard;
                            let mut i = 0u64;
                            loop {
                                tx.send(i).await?;
                                i += 1;
                                tokio::time::sleep(Duration::from_millis(2)).await;
                            }
                        }
                    }),
            )
            .command(
                Command::unary("ping")
                    .returns::<String>()
                    .handler(|_| async { Ok("pong") }),
            )
            .build()
            .unwrap();
        ChannelManager::new(registry.into())
    }

    #[tokio::test]
    async fn delivers_values_in_order_then_close() {
        let manager = manager(Arc::default());
        let id = manager.create("count", json!({"upTo": 2})).unwrap();
        assert_eq!(manager.state(id), Some(Lifecycle::Initializing));

        let messages: Vec<_> = manager.attach(id).unwrap().into_stream().collect().await;
        assert_eq!(
            messages,
            vec![
                ChannelMessage::Data(json!(0)),
                ChannelMessage::Data(json!(1)),
                ChannelMessage::Data(json!(2)),
                ChannelMessage::Close,
            ]
        );
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn handler_failure_yields_one_error() {
        let manager = manager(Arc::default());
        let id = manager.create("flaky", json!({})).unwrap();
        let mut sub = manager.attach(id).unwrap();
        assert_eq!(
            sub.recv().await,
            Some(ChannelMessage::Data(json!({"step_no": 1})))
        );
        match sub.recv().await {
            Some(ChannelMessage::Error(err)) => {
                assert_eq!(err.code, ErrorCode::ChannelError);
                assert_eq!(err.message, "sensor offline");
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(sub.recv().await, None);
        assert_eq!(manager.state(id), None);

        let id = manager.create("flaky", json!({"code": "SENSOR_DOWN"})).unwrap();
        let messages: Vec<_> = manager.attach(id).unwrap().into_stream().collect().await;
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[1],
            ChannelMessage::Error(err) if err.code == ErrorCode::Custom("SENSOR_DOWN".into())
        ));
    }

    #[tokio::test]
    async fn client_close_delivers_close_once() {
        let dropped = Arc::new(AtomicBool::new(false));
        let manager = manager(dropped.clone());
        let id = manager.create("forever", json!({})).unwrap();
        let mut sub = manager.attach(id).unwrap();
        assert_eq!(sub.recv().await, Some(ChannelMessage::Data(json!(0))));

        manager.close(id).unwrap();
        assert_eq!(sub.recv().await, Some(ChannelMessage::Close));
        assert_eq!(sub.recv().await, None);
        assert!(manager.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_subscription_stops_handler() {
        let dropped = Arc::new(AtomicBool::new(false));
        let manager = manager(dropped.clone());
        let id = manager.create("forever", json!({})).unwrap();
        let mut sub = manager.attach(id).unwrap();
        sub.recv().await.unwrap();
        drop(sub);

        assert_eq!(manager.state(id), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn attach_rules() {
        let manager = manager(Arc::default());
        let id = manager.create("count", json!({"up_to": 0})).unwrap();
        let _sub = manager.attach(id).unwrap();
        assert_eq!(
            manager.attach(id).unwrap_err(),
            ChannelError::AlreadyAttached(id)
        );
        let missing = ChannelId::new();
        assert!(matches!(
            manager.attach(missing),
            Err(ChannelError::NotFound(_))
        ));
        let err: BridgeError = ChannelError::NotFound("x".into()).into();
        assert_eq!(err.code, ErrorCode::ChannelInitError);
    }

    #[tokio::test]
    async fn create_validates_like_dispatch() {
        let manager = manager(Arc::default());
        let err = manager.create("nope", json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownCommand);
        let err = manager.create("ping", json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        let err = manager.create("count", json!({"upTo": "two"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unattached_channels_expire() {
        let manager = manager(Arc::default()).with_attach_timeout(Duration::from_secs(30));
        let id = manager.create("count", json!({"up_to": 1})).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(manager.state(id), None);
        assert!(matches!(manager.attach(id), Err(ChannelError::NotFound(_))));
    }

    #[tokio::test]
    async fn closing_an_unattached_channel_removes_it() {
        let manager = manager(Arc::default());
        let id = manager.create("count", json!({"up_to": 1})).unwrap();
        manager.close(id).unwrap();
        assert!(manager.is_empty());
        assert!(matches!(manager.close(id), Err(ChannelError::NotFound(_))));
    }

    #[tokio::test]
    async fn sender_reports_closed_after_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sender = ChannelSender {
            tx,
            cancel: cancel.clone(),
        };
        sender.send(1).await.unwrap();
        cancel.cancel();
        assert!(sender.is_closed());
        assert!(matches!(sender.send(2).await, Err(ChannelSendError::Closed)));
    }

    #[test]
    fn channel_id_roundtrips_as_string() {
        let id = ChannelId::new();
        let parsed: ChannelId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(
            serde_json::to_value(id).unwrap(),
            json!(id.to_string())
        );
    }
}
