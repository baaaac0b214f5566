//! Kitchen-sink server.
//!
//! Run:
//!   cargo run -p wirebridge-example-kitchen-sink --bin kitchen-sink -- --generate-ts web/src/generated/api.ts
//!
//! Then:
//!   curl -X POST localhost:8000/command/get_user -d '{"user_id": 1}'
//!   curl -X POST localhost:8000/channel/weather_updates -d '{"city": "Oslo"}'
//!   curl -N localhost:8000/channel/stream/<channelId>
//!
//! On unix, SIGHUP rebuilds the registry and regenerates the client.

use clap::Parser;
use kitchen_sink::AppState;
use tracing_subscriber::EnvFilter;
use wirebridge_server::{BridgeArgs, BridgeContext};

#[derive(Parser)]
#[command(name = "kitchen-sink", about = "wirebridge kitchen-sink example")]
struct Cli {
    #[command(flatten)]
    bridge: BridgeArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = cli.bridge.resolve()?;
    if cli.bridge.title.is_none() && cli.bridge.config.is_none() {
        config.title = "Kitchen Sink API".to_string();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(config.log_directive("kitchen_sink").parse()?)
                .add_directive(config.log_directive("wirebridge_server").parse()?)
                .add_directive(config.log_directive("wirebridge_core").parse()?),
        )
        .init();

    let state = AppState::new();
    let ctx = BridgeContext::new(kitchen_sink::registry(&state)?, config);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let reloader = ctx.reloader();
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                tracing::info!("SIGHUP received, reloading");
                if let Err(e) = reloader.reload(|| kitchen_sink::registry(&state)) {
                    tracing::error!("Reload failed: {}", e);
                }
            }
        });
    }

    wirebridge_server::serve(ctx, wirebridge_server::ctrl_c()).await
}
