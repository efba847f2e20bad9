//! Hornet Guard Edge Unit - Main Entry Point

use std::sync::Arc;

use anyhow::Context;
use control_server::{ControlServer, FIRMWARE_VERSION};
use tokio::sync::watch;
use tracing::{info, warn};
use unit::{init_logging, Hardware, Heartbeat, UnitContext, UnitOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    info!("=== Hornet Guard unit v{} ===", FIRMWARE_VERSION);
    let dev = std::env::args().any(|arg| arg == "--dev");
    let options = if dev {
        info!("Development mode: local paths, test pattern stream");
        UnitOptions::dev()
    } else {
        UnitOptions::production()
    };

    let ctx = Arc::new(UnitContext::build(options, Hardware::host())?);
    ctx.start_workers()?;

    let server = ControlServer::bind(ctx.options().server.clone(), Arc::new(ctx.app_state()))
        .await
        .context("binding control server")?;
    let server_shutdown = server.shutdown_handle();
    let server_task = tokio::spawn(server.run());

    let (heartbeat_stop, heartbeat_rx) = watch::channel(false);
    let heartbeat_task = tokio::spawn(Heartbeat::new(ctx.clone())?.run(heartbeat_rx));

    ctx.finish_boot();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    server_shutdown.shutdown();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Control server exited with error: {}", e),
        Err(e) => warn!("Control server task failed: {}", e),
    }

    let workers = ctx.clone();
    tokio::task::spawn_blocking(move || workers.stop_workers()).await?;

    heartbeat_stop.send_replace(true);
    if let Err(e) = heartbeat_task.await {
        warn!("Heartbeat task failed: {}", e);
    }

    let hardware = ctx.clone();
    tokio::task::spawn_blocking(move || hardware.park_hardware()).await?;

    info!("Shutdown complete");
    Ok(())
}
