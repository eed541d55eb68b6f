#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use berth::{EngineOption, InterceptorFn, ServerLifecycle};
use clap::Parser;
use config::{CliArgs, ServerConfig};
use std::sync::Arc;
use tracing::{debug, info};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    telemetry::init_logging();
    info!(
        "Starting berth-server on {}:{} (health: {}, reflection: {})",
        config.address, config.port, config.health_check, config.reflection
    );

    let mut lifecycle = ServerLifecycle::new();
    lifecycle.enable_health_check(config.health_check);
    lifecycle.enable_reflection(config.reflection);
    if let Some(age) = config.max_connection_age {
        lifecycle.set_keepalive_max_connection_age(age);
    }
    lifecycle.set_drain_timeout(config.drain_timeout);
    lifecycle.add_option(EngineOption::custom(|server| {
        server.http2_adaptive_window(Some(true))
    }));

    let access_log: InterceptorFn = Arc::new(|request| {
        debug!(metadata = ?request.metadata(), "accepted call");
        Ok(request)
    });
    lifecycle.set_unary_interceptors(vec![access_log]);
    lifecycle.add_shutdown_hook(|| info!("Hosted services released"));

    lifecycle.build();
    lifecycle.listen_and_serve(&config.address, config.port).await?;
    lifecycle.await_termination().await?;
    Ok(())
}
