//! The command registry.
//!
//! Commands and socket handlers are declared with builders and collected by a
//! [`RegistryBuilder`]. [`RegistryBuilder::build`] validates the whole schema
//! once; the resulting [`Registry`] is immutable. A [`RegistryHandle`] lets a
//! reload swap in a new registry without disturbing in-flight requests.

use crate::channel::ChannelSender;
use crate::error::{BridgeError, BuildError, CommandError};
use crate::schema::{Definitions, reject_streams};
use crate::socket::SocketHandler;
use crate::types::{Describe, Primitive, TypeDescriptor};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

pub(crate) type UnaryFn =
    Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value, CommandError>> + Send + Sync>;
pub(crate) type StreamFn =
    Arc<dyn Fn(Args, ChannelSender) -> BoxFuture<'static, Result<(), CommandError>> + Send + Sync>;

/// Validated, transport-case arguments handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Deserialize one argument. A missing argument reads as `null`, so
    /// `Option<T>` parameters come back as `None`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, CommandError> {
        let value = self.0.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| {
            CommandError::new(format!("argument '{name}': {err}"))
                .with_code(crate::ErrorCode::InvalidArgument)
        })
    }

    /// Deserialize one argument, falling back to `default` when it is absent.
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, CommandError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(_) => self.get(name),
        }
    }

    /// Deserialize the whole argument object into one struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|err| {
            CommandError::new(format!("arguments: {err}"))
                .with_code(crate::ErrorCode::InvalidArgument)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Unary commands answer once; stream commands push through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Unary,
    Stream,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeDescriptor,
    pub has_default: bool,
}

impl Param {
    pub fn is_required(&self) -> bool {
        !self.has_default && !self.ty.is_nullable()
    }
}

#[derive(Clone)]
pub(crate) enum Handler {
    Unary(UnaryFn),
    Stream(StreamFn),
}

/// A remote-callable operation.
#[derive(Clone)]
pub struct Command {
    name: String,
    kind: CommandKind,
    params: Vec<Param>,
    returns: TypeDescriptor,
    doc: Option<String>,
    module: Option<String>,
    handler: Option<Handler>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Start declaring a request/response command. Returns `null` until
    /// [`returns`](Self::returns) says otherwise.
    pub fn unary(name: impl Into<String>) -> Self {
        Self::with_kind(name, CommandKind::Unary)
    }

    /// Start declaring a streaming command. Declare the payload with
    /// [`yields`](Self::yields).
    pub fn stream(name: impl Into<String>) -> Self {
        Self::with_kind(name, CommandKind::Stream)
    }

    fn with_kind(name: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: Vec::new(),
            returns: TypeDescriptor::Primitive(Primitive::Null),
            doc: None,
            module: None,
            handler: None,
        }
    }

    pub fn param<T: Describe + ?Sized>(self, name: impl Into<String>) -> Self {
        self.param_with(name, T::describe())
    }

    pub fn param_with(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty,
            has_default: false,
        });
        self
    }

    /// A parameter the handler defaults when the client leaves it out.
    pub fn param_with_default<T: Describe + ?Sized>(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: T::describe(),
            has_default: true,
        });
        self
    }

    pub fn returns<T: Describe + ?Sized>(self) -> Self {
        self.returns_with(T::describe())
    }

    pub fn returns_with(mut self, ty: TypeDescriptor) -> Self {
        self.returns = ty;
        self
    }

    /// Payload type of a streaming command.
    pub fn yields<T: Describe + ?Sized>(self) -> Self {
        self.yields_with(T::describe())
    }

    pub fn yields_with(self, ty: TypeDescriptor) -> Self {
        self.returns_with(TypeDescriptor::stream(ty))
    }

    pub fn describe(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Free-form origin label, shown in listings.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Async handler for a unary command.
    pub fn handler<F, Fut, T>(mut self, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CommandError>> + Send + 'static,
        T: Serialize,
    {
        let handler: UnaryFn = Arc::new(move |args| {
            let fut = f(args);
            Box::pin(async move {
                let out = fut.await?;
                Ok(serde_json::to_value(out)?)
            })
        });
        self.handler = Some(Handler::Unary(handler));
        self
    }

    /// Synchronous handler for a unary command, run on the blocking pool.
    pub fn blocking_handler<F, T>(mut self, f: F) -> Self
    where
        F: Fn(Args) -> Result<T, CommandError> + Send + Sync + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: UnaryFn = Arc::new(move |args| {
            let f = f.clone();
            Box::pin(async move {
                let out = tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|err| CommandError::new(format!("blocking handler failed: {err}")))??;
                Ok(serde_json::to_value(out)?)
            })
        });
        self.handler = Some(Handler::Unary(handler));
        self
    }

    /// Async handler for a streaming command. It runs for the lifetime of the
    /// channel; returning `Ok` closes it, returning `Err` fails it.
    pub fn stream_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Args, ChannelSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        let handler: StreamFn = Arc::new(move |args, sender| Box::pin(f(args, sender)));
        self.handler = Some(Handler::Stream(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Return type; `Stream(T)` for streaming commands.
    pub fn returns_type(&self) -> &TypeDescriptor {
        &self.returns
    }

    /// Element type pushed by a streaming command.
    pub fn payload_type(&self) -> Option<&TypeDescriptor> {
        match &self.returns {
            TypeDescriptor::Stream(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub(crate) fn handler_ref(&self) -> Option<&Handler> {
        self.handler.as_ref()
    }

    fn validate(&self) -> Result<(), BuildError> {
        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(param.name.as_str()) {
                return Err(BuildError::DuplicateParameter {
                    command: self.name.clone(),
                    param: param.name.clone(),
                });
            }
            let owner = format!("command '{}' parameter '{}'", self.name, param.name);
            reject_streams(&owner, &param.name, &param.ty)?;
        }

        let owner = format!("command '{}'", self.name);
        match (self.kind, &self.handler) {
            (_, None) => return Err(BuildError::MissingHandler(self.name.clone())),
            (CommandKind::Unary, Some(Handler::Unary(_)))
            | (CommandKind::Stream, Some(Handler::Stream(_))) => {}
            _ => return Err(BuildError::HandlerMismatch(self.name.clone())),
        }
        match (self.kind, &self.returns) {
            (CommandKind::Unary, returns) => reject_streams(&owner, "return", returns),
            (CommandKind::Stream, TypeDescriptor::Stream(inner)) => {
                reject_streams(&owner, "payload", inner)
            }
            (CommandKind::Stream, _) => Err(BuildError::MissingStreamPayload(self.name.clone())),
        }
    }
}

/// Immutable table of everything the bridge exposes.
#[derive(Debug, Default)]
pub struct Registry {
    commands: BTreeMap<String, Arc<Command>>,
    sockets: BTreeMap<String, Arc<SocketHandler>>,
    definitions: Definitions,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn command(&self, name: &str) -> Option<&Arc<Command>> {
        self.commands.get(name)
    }

    /// Commands in name order.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.values()
    }

    pub fn socket(&self, name: &str) -> Option<&Arc<SocketHandler>> {
        self.sockets.get(name)
    }

    /// Socket handlers in name order.
    pub fn sockets(&self) -> impl Iterator<Item = &Arc<SocketHandler>> {
        self.sockets.values()
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// No commands and no sockets.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.sockets.is_empty()
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<&Arc<Command>, BridgeError> {
        self.command(name)
            .ok_or_else(|| BridgeError::unknown_command(name))
    }
}

/// Collects commands, sockets and standalone models.
#[derive(Default)]
pub struct RegistryBuilder {
    commands: Vec<Command>,
    sockets: Vec<SocketHandler>,
    models: Vec<TypeDescriptor>,
}

impl RegistryBuilder {
    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn socket(mut self, socket: SocketHandler) -> Self {
        self.sockets.push(socket);
        self
    }

    /// Include a model that is only reachable by name, so that references to
    /// it resolve and it appears in the generated client.
    pub fn model<T: Describe + ?Sized>(self) -> Self {
        self.model_with(T::describe())
    }

    pub fn model_with(mut self, ty: TypeDescriptor) -> Self {
        self.models.push(ty);
        self
    }

    /// Validate everything and freeze the registry.
    pub fn build(self) -> Result<Registry, BuildError> {
        let mut names = HashSet::new();
        let mut definitions = Definitions::default();

        for model in &self.models {
            let owner = format!("model '{}'", model.type_name().unwrap_or("anonymous"));
            definitions.collect(&owner, model)?;
        }

        for command in &self.commands {
            if !names.insert(command.name.clone()) {
                return Err(BuildError::DuplicateName(command.name.clone()));
            }
            command.validate()?;
            for param in &command.params {
                let owner = format!("command '{}' parameter '{}'", command.name, param.name);
                definitions.collect(&owner, &param.ty)?;
            }
            let owner = format!("command '{}' return type", command.name);
            definitions.collect(&owner, &command.returns)?;
        }

        for socket in &self.sockets {
            if !names.insert(socket.name().to_string()) {
                return Err(BuildError::DuplicateName(socket.name().to_string()));
            }
            socket.validate()?;
            for (owner, ty) in socket.event_types() {
                definitions.collect(&owner, ty)?;
            }
        }

        // References are checked once every definition is known, so a type
        // may refer to one declared later.
        for command in &self.commands {
            for param in &command.params {
                let owner = format!("command '{}' parameter '{}'", command.name, param.name);
                definitions.check_references(&owner, &param.ty)?;
            }
            let owner = format!("command '{}' return type", command.name);
            definitions.check_references(&owner, &command.returns)?;
        }
        for socket in &self.sockets {
            for (owner, ty) in socket.event_types() {
                definitions.check_references(&owner, ty)?;
            }
        }
        definitions.check_all_references()?;

        Ok(Registry {
            commands: self
                .commands
                .into_iter()
                .map(|c| (c.name.clone(), Arc::new(c)))
                .collect(),
            sockets: self
                .sockets
                .into_iter()
                .map(|s| (s.name().to_string(), Arc::new(s)))
                .collect(),
            definitions,
        })
    }
}

/// Shared pointer to the current registry.
///
/// Readers take a snapshot and keep it for the whole request; a reload
/// replaces the pointer, never the registry it points to.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    current: Arc<RwLock<Arc<Registry>>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub fn snapshot(&self) -> Arc<Registry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new registry, returning the previous one.
    pub fn replace(&self, registry: Arc<Registry>) -> Arc<Registry> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, registry)
    }
}

impl From<Registry> for RegistryHandle {
    fn from(registry: Registry) -> Self {
        Self::new(registry)
    }
}
