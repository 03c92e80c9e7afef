//! CLI entrypoint for dejaview-host.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dejaview_host::navigator::LogNavigator;
use dejaview_host::pages::SurfaceRegistry;
use dejaview_host::web::{start_web_server, HostState};
use dejaview_host::{load_config, Overrides};
use dejaview_supervisor::html::PageOptions;
use dejaview_supervisor::{BackendSupervisor, DocumentId};
use tracing::info;

use cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        engine: cli.engine.clone(),
        startup_timeout_ms: cli.startup_timeout_ms,
        local_ui: cli.ui_dir.is_some(),
    };
    let config = load_config(cli.config.as_deref(), &overrides)?;
    let options = PageOptions::from_config(&config);
    info!(engine = %config.engine.display(), "starting dejaview-host");

    let documents: Vec<DocumentId> = cli.traces.iter().map(DocumentId::new).collect();
    let supervisor = BackendSupervisor::start_default(config);
    let registry = Arc::new(SurfaceRegistry::new(documents, options));
    for index in 0..registry.documents().len() {
        registry.open(&supervisor, index);
    }

    let state = Arc::new(HostState {
        supervisor: supervisor.clone(),
        runtime: tokio::runtime::Handle::current(),
        registry: Arc::clone(&registry),
        navigator: Arc::new(LogNavigator::new()),
        ui_dir: cli.ui_dir.clone(),
    });
    let server = start_web_server(&cli.listen, state)?;
    info!("serving surfaces on http://{}/", server.listen);
    for (index, doc) in registry.documents().iter().enumerate() {
        for id in registry.surfaces_of(index) {
            info!(doc = %doc, "surface: http://{}/surfaces/{id}", server.listen);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    supervisor.shutdown().await?;
    tokio::task::spawn_blocking(move || server.stop()).await?;
    Ok(())
}
