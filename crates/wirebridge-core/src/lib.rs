//! Core of wirebridge: a typed bridge from backend commands to a generated
//! TypeScript client.
//!
//! Commands and sockets are declared with builders and frozen into a
//! [`Registry`]. The registry drives three things: argument validation and
//! invocation ([`Dispatcher`]), push channels and sockets
//! ([`ChannelManager`], [`SocketManager`]), and client generation
//! ([`codegen::generate`]). Transports live in other crates.

mod channel;
mod dispatch;
mod error;
mod lifecycle;
mod registry;
mod schema;
mod socket;
mod types;
mod validate;
mod wire;

pub mod codegen;
pub mod naming;

pub use channel::{
    ChannelError, ChannelId, ChannelManager, ChannelSendError, ChannelSender, ChannelSubscription,
    DEFAULT_ATTACH_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
};
pub use dispatch::Dispatcher;
pub use error::{BridgeError, BuildError, CommandError, ErrorCode};
pub use lifecycle::Lifecycle;
pub use registry::{Args, Command, CommandKind, Param, Registry, RegistryBuilder, RegistryHandle};
pub use schema::{Definition, Definitions};
pub use socket::{SocketError, SocketHandler, SocketId, SocketManager, SocketSender, SocketSession};
pub use types::{Describe, EnumDef, Field, Primitive, RecordDef, TypeDescriptor};
pub use validate::validate;
pub use wire::{ChannelCreated, ChannelMessage, CommandResponse, SocketEnvelope};
