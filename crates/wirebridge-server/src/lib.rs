//! HTTP transport for a wirebridge registry.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /` | status, bridge title, command names |
//! | `GET /commands` | command and socket listing |
//! | `POST /command/{name}` | unary call, answers `{ "result": ... }` |
//! | `POST /channel/{name}` | create a push channel, answers `{ "channelId": ... }` |
//! | `GET /channel/stream/{id}` | server-sent events for a channel |
//! | `DELETE /channel/{id}` | close a channel |
//! | `GET /ws/{name}` | WebSocket session |

mod config;
mod context;
mod error;
mod reload;
mod routes;

pub use config::{BridgeArgs, BridgeConfig, ConfigError};
pub use context::BridgeContext;
pub use error::{ApiError, status_for};
pub use reload::{ReloadError, Reloader};
pub use routes::router;

use std::future::Future;
use wirebridge_core::{CommandKind, codegen};

/// Serve `ctx` until `shutdown` resolves.
///
/// Writes the TypeScript client first when configured. On shutdown every
/// open channel is cancelled so streaming responses can finish.
pub async fn serve(
    ctx: BridgeContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let config = ctx.config().clone();
    let registry = ctx.registry().snapshot();

    if let Some(path) = &config.generate_ts
        && codegen::write(&registry, path)?
    {
        tracing::info!("Wrote {}", path.display());
    }

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!("{}", config.title);
    tracing::info!(
        "{} commands, {} sockets",
        registry.command_count(),
        registry.sockets().count()
    );
    for command in registry.commands() {
        match command.kind() {
            CommandKind::Unary => tracing::info!("  {}", command.name()),
            CommandKind::Stream => tracing::info!("  {} [channel]", command.name()),
        }
    }
    for socket in registry.sockets() {
        tracing::info!("  {} [socket]", socket.name());
    }
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    let channels = ctx.channels().clone();
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Shutting down");
            channels.close_all();
        })
        .await?;
    Ok(())
}

/// Resolves on ctrl-c.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
