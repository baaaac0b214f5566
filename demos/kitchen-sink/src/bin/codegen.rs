//! Write the kitchen-sink TypeScript client without starting a server.
//!
//!   cargo run -p wirebridge-example-kitchen-sink --bin kitchen-sink-codegen -- web/src/generated/api.ts

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wirebridge_core::codegen;

#[derive(Parser)]
#[command(name = "kitchen-sink-codegen", about = "Generate the kitchen-sink TypeScript client")]
struct Cli {
    /// Output file. The runtime module is written next to it.
    #[arg(default_value = "web/src/generated/api.ts")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kitchen_sink=info".parse()?))
        .init();

    let cli = Cli::parse();
    let registry = kitchen_sink::registry(&kitchen_sink::AppState::new())?;
    if codegen::write(&registry, &cli.out)? {
        tracing::info!("Generated TypeScript client: {}", cli.out.display());
    } else {
        tracing::info!("{} is up to date", cli.out.display());
    }
    Ok(())
}
