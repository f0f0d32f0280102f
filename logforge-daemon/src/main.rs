use anyhow::{Context, Result};
use clap::Parser;

use logforge_core::config::LogforgeConfig;
use logforge_daemon::cli::DaemonCli;
use logforge_daemon::orchestrator::{Orchestrator, load_processor_config};
use logforge_daemon::{logging, metrics_server, upgrade};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogforgeConfig::load(&cli.config)
        .await
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }

    if cli.upgrade_legacy {
        print!("{}", upgrade::upgrade_legacy(&config)?);
        return Ok(());
    }

    if cli.validate {
        load_processor_config(&cli.config).await?;
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "logforge-daemon starting");

    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    let orchestrator = Orchestrator::new(&cli.config, config);
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    orchestrator.run(reader, tokio::io::stdout()).await?;
    Ok(())
}
