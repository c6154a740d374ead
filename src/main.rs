//! vigild - host-based network firewall daemon.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vigild::commands::CommandRegistry;
use vigild::config::Config;
use vigild::context::FirewallContext;
use vigild::server::{tls, CommandServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let base_dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    let config = Config::load_or_init(&base_dir).map_err(|e| {
        error!(base_dir = %base_dir, error = %e, "failed to load configuration");
        e
    })?;

    info!(
        base_dir = %base_dir,
        port = config.command_server.port,
        syslog = %config.tail.syslog_path.display(),
        "starting vigild"
    );

    let root = CancellationToken::new();
    {
        let root = root.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                root.cancel();
            }
        });
    }

    // Reconciles persisted block state before anything else runs.
    let ctx = FirewallContext::initialize(config, root.clone()).await?;

    ctx.start_periodic_tasks();
    ctx.start_tail();

    let acceptor = tls::load_or_generate_acceptor(
        &ctx.config.certificate_path(),
        &ctx.config.certificate_key_path(),
    )?;

    let registry = Arc::new(CommandRegistry::with_defaults());
    let command_ctx = ctx.command_context();
    command_ctx.attach_registry(&registry);

    let server = CommandServer::bind(
        ctx.config.command_server.port,
        registry,
        command_ctx,
        Some(acceptor),
        ctx.config.command_server.allow_plaintext_commands,
        root.clone(),
    )
    .await?;

    // Runs until the root token is cancelled (interrupt or `exit`).
    server.run().await;

    ctx.scheduler.cancel_all();
    info!("shutdown complete");
    Ok(())
}
