use crate::config::BridgeConfig;
use crate::error::ApiError;
use crate::reload::Reloader;
use std::sync::Arc;
use wirebridge_core::{ChannelManager, Dispatcher, Registry, RegistryHandle, SocketManager};

/// Everything a request handler needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeContext {
    config: Arc<BridgeConfig>,
    registry: RegistryHandle,
    dispatcher: Dispatcher,
    channels: ChannelManager,
    sockets: SocketManager,
}

impl BridgeContext {
    pub fn new(registry: Registry, config: BridgeConfig) -> Self {
        let registry = RegistryHandle::new(registry);
        let channels = ChannelManager::new(registry.clone())
            .with_capacity(config.channel_capacity)
            .with_attach_timeout(config.attach_timeout());
        let sockets = SocketManager::new(registry.clone()).with_capacity(config.channel_capacity);
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            config: Arc::new(config),
            registry,
            channels,
            sockets,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn sockets(&self) -> &SocketManager {
        &self.sockets
    }

    pub fn reloader(&self) -> Reloader {
        Reloader::new(self.registry.clone(), self.config.generate_ts.clone())
    }

    pub(crate) fn error(&self, err: impl Into<ApiError>) -> ApiError {
        err.into().redact(self.config.debug)
    }
}
