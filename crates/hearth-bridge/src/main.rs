use std::env;
use std::sync::Arc;

use hearth_core::agent::ClaudeAgent;
use hearth_core::{Bridge, BridgeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let config = BridgeConfig::from_env();
    let bridge = match Bridge::start(config, Arc::new(ClaudeAgent::new()))? {
        Some(bridge) => bridge,
        None => {
            // Nothing to do with the gate off; exit quietly so the
            // launcher can keep us in its supervision tree.
            return Ok(());
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received");
    bridge.shutdown().await;

    Ok(())
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("HEARTH_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("HEARTH_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
