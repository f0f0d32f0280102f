//! Daemon orchestrator -- wires input, the worker pool and output together.
//!
//! # Data Flow
//!
//! ```text
//! reader ─> InputBatcher ─> Pool (input) ─> workers ─> Pool (output) ─> writer
//!                              ▲
//!                 SIGHUP ─> reload (new ProcessorConfig)
//! ```
//!
//! # Shutdown
//!
//! On SIGTERM/SIGINT, on end of input, or when the external shutdown token
//! is cancelled, the input stops reading and flushes its pending batch.
//! Dropping the input sender lets the pool finish every admitted batch,
//! after which the output closes and the daemon returns.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logforge_core::config::LogforgeConfig;
use logforge_core::metrics as m;
use logforge_processor::{PoolBuilder, ProcessorConfig};

use crate::input::InputBatcher;
use crate::output::write_bundles;

/// Uptime gauge update period.
const UPTIME_INTERVAL: Duration = Duration::from_secs(15);

/// Counts reported when the daemon returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events admitted to the pool.
    pub events_in: u64,
    /// Events written to the output.
    pub events_out: u64,
}

/// Why the main loop ended.
enum StopReason {
    Signal(&'static str),
    EndOfInput,
    Cancelled,
}

/// Top-level daemon.
pub struct Orchestrator {
    config_path: PathBuf,
    config: LogforgeConfig,
    shutdown: CancellationToken,
    start_time: Instant,
}

impl Orchestrator {
    /// Create an orchestrator for an already loaded configuration.
    ///
    /// `config_path` is re-read on every reload.
    pub fn new(config_path: impl Into<PathBuf>, config: LogforgeConfig) -> Self {
        Self {
            config_path: config_path.into(),
            config,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LogforgeConfig {
        &self.config
    }

    /// Run until a shutdown signal, end of input, or cancellation.
    ///
    /// # Errors
    ///
    /// - The program fails to compile
    /// - Signal handlers cannot be installed
    /// - Reading input or writing output fails
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        use tokio::signal::unix::{SignalKind, signal};

        let processor = ProcessorConfig::from_core(&self.config)
            .context("failed to build processor configuration")?;
        let (mut pool, channels) = PoolBuilder::new()
            .config(processor)
            .build()
            .context("failed to build worker pool")?;
        pool.start()
            .map_err(|e| anyhow::anyhow!("failed to start worker pool: {}", e))?;

        let input_token = CancellationToken::new();
        let mut input_task: JoinHandle<Result<u64>> = tokio::spawn(
            InputBatcher::from_config(&self.config).run(reader, channels.input, input_token.clone()),
        );
        let output_task = tokio::spawn(write_bundles(channels.output, writer));
        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown.clone()));

        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| anyhow::anyhow!("failed to install SIGHUP handler: {}", e))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

        tracing::info!(config = %self.config_path.display(), "logforge-daemon running");

        let mut input_result = None;
        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break StopReason::Cancelled,
                _ = sigterm.recv() => break StopReason::Signal("SIGTERM"),
                _ = sigint.recv() => break StopReason::Signal("SIGINT"),
                _ = sighup.recv() => {
                    reload(&self.config_path, &channels.reload).await;
                }
                result = &mut input_task => {
                    input_result = Some(result);
                    break StopReason::EndOfInput;
                }
            }
        };

        match reason {
            StopReason::Signal(name) => tracing::info!(signal = name, "shutdown signal received"),
            StopReason::EndOfInput => tracing::info!("input finished, draining"),
            StopReason::Cancelled => tracing::info!("shutdown requested, draining"),
        }

        input_token.cancel();
        let input_result = match input_result {
            Some(result) => result,
            None => input_task.await,
        };
        drop(channels.reload);

        let events_in = input_result.context("input task panicked")??;
        let events_out = output_task.await.context("output task panicked")??;
        pool.wait()
            .await
            .map_err(|e| anyhow::anyhow!("worker pool failed: {}", e))?;

        self.shutdown.cancel();
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        tracing::info!(events_in, events_out, "logforge-daemon shut down");
        Ok(RunSummary {
            events_in,
            events_out,
        })
    }
}

/// Load and compile the configuration at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, fails validation, or
/// its program fails to compile.
pub async fn load_processor_config(path: &Path) -> Result<ProcessorConfig> {
    let config = LogforgeConfig::load(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;
    ProcessorConfig::from_core(&config).context("failed to build processor configuration")
}

/// Re-read the configuration and hand the new program to the pool.
///
/// A failed reload keeps the running program.
async fn reload(path: &Path, sender: &mpsc::Sender<ProcessorConfig>) {
    tracing::info!(config = %path.display(), "reloading configuration");
    match load_processor_config(path).await {
        Ok(config) => {
            if sender.send(config).await.is_err() {
                tracing::warn!("worker pool is gone, reload dropped");
            }
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "reload failed, keeping current program");
            metrics::counter!(m::PROCESSOR_RELOADS_TOTAL, m::LABEL_RESULT => "failure")
                .increment(1);
        }
    }
}

fn spawn_uptime_updater(start_time: Instant, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UPTIME_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
            }
        }
    })
}
