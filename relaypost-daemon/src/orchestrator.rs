//! Pipeline orchestration -- graph assembly and daemon lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `relaypost-daemon`.
//! It opens the state store, builds the node graph from configuration,
//! starts the source workers, and supervises them until a shutdown
//! signal arrives or every worker drains on its own (batch runs with
//! `stop_on_eof`).
//!
//! # Shutdown Order
//!
//! 1. Every node is asked to stop; source workers observe the flag
//!    within one poll cycle and record their final offset on exit
//! 2. Worker threads are joined off the async runtime
//! 3. The state store is flushed once more so offsets recorded during
//!    the wind-down survive the restart

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::broadcast;

use relaypost_core::RelaypostConfig;
use relaypost_pipeline::{BuildContext, Graph, NodeRegistry, StateStore};

use crate::cli::DaemonCli;
use crate::metrics_server;

/// The main daemon orchestrator.
///
/// Owns the loaded configuration, the constructed graph, and the state
/// store handle used for the final flush after workers are joined.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: RelaypostConfig,
    /// Constructed pipeline graph (nodes in declaration order).
    graph: Graph,
    /// State store shared with every source node.
    state: Arc<StateStore>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for the uptime metric).
    start_time: Instant,
}

impl Orchestrator {
    /// Build from an already-loaded configuration.
    ///
    /// The caller is expected to have applied CLI and environment
    /// overrides and run validation. This performs the following steps:
    ///
    /// 1. Install the metrics recorder when `[metrics]` is enabled
    /// 2. Open the state store under the configured policy
    /// 3. Build the node graph, honoring the `--node` whitelist and
    ///    the `--no-resume` / `--test-mode` flags
    ///
    /// # Errors
    ///
    /// Returns an error if the state store or the metrics recorder
    /// cannot be set up. Invalid node declarations do not fail the
    /// build; they are logged and skipped so the rest of the pipeline
    /// keeps running.
    pub fn build_from_config(config: RelaypostConfig, cli: &DaemonCli) -> Result<Self> {
        // Install the recorder before node construction so counters
        // registered while nodes are built land in the registry.
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let state = Arc::new(
            StateStore::open(&config.pipeline.state_file, config.pipeline.state_policy)
                .map_err(|e| anyhow::anyhow!("failed to open state store: {}", e))?,
        );

        let registry = NodeRegistry::with_builtins();
        let ctx = BuildContext {
            state: Arc::clone(&state),
            pipeline: config.pipeline.clone(),
            resume: !cli.no_resume,
            test_mode: cli.test_mode,
        };
        let graph = Graph::build(&config.nodes, &registry, &ctx, cli.whitelist());

        if graph.node_count() == 0 {
            tracing::warn!("graph is empty, daemon will idle until a shutdown signal");
        }

        if config.metrics.enabled {
            record_daemon_metrics(graph.node_count());
        }

        let (shutdown_tx, _) = broadcast::channel(16);

        Ok(Self {
            config,
            graph,
            state,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the graph and supervise it until shutdown.
    ///
    /// Blocks until one of two things happens:
    ///
    /// - `SIGTERM` or `SIGINT` arrives (long-running daemon), or
    /// - every source worker exits on its own (batch runs where all
    ///   sources set `stop_on_eof`)
    ///
    /// Either way the graph is stopped, workers are joined, and the
    /// state store is flushed before this returns.
    pub async fn run(&mut self) -> Result<()> {
        // Write PID file if configured
        if !self.config.general.pid_file.is_empty() {
            write_pid_file(Path::new(&self.config.general.pid_file))?;
        }

        let workers = self.graph.start();
        let worker_count = workers.len();

        // Spawn uptime updater task
        let mut uptime_task = if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            Some(spawn_uptime_updater(self.start_time, shutdown_rx))
        } else {
            None
        };

        // Join worker threads off the async runtime. The task finishing
        // on its own means every source hit stop_on_eof.
        let mut drained = tokio::task::spawn_blocking(move || {
            for (name, handle) in workers {
                if handle.join().is_err() {
                    tracing::error!(node = name.as_str(), "source worker panicked");
                }
            }
        });

        tracing::info!(workers = worker_count, "entering main event loop");
        let mut run_error = None;

        tokio::select! {
            signal = wait_for_shutdown_signal() => {
                match signal {
                    Ok(name) => tracing::info!(signal = name, "shutdown signal received"),
                    Err(err) => {
                        tracing::error!(error = %err, "signal handling failed, shutting down");
                        run_error = Some(err);
                    }
                }
                self.graph.stop();
                if let Err(err) = (&mut drained).await {
                    tracing::error!(error = %err, "worker supervisor task failed");
                }
            }
            join = &mut drained => {
                if let Err(err) = join {
                    tracing::error!(error = %err, "worker supervisor task failed");
                }
                tracing::info!("all source workers finished");
                self.graph.stop();
            }
        }

        // Workers record their final offsets as they exit, which can
        // land after the flush inside Graph::stop. Flush once more now
        // that every worker has been joined.
        if let Err(err) = self.state.flush() {
            tracing::warn!(error = %err, "failed to flush state store after drain");
        }

        let _ = self.shutdown_tx.send(());
        if let Some(task) = uptime_task.take() {
            let _ = task.await;
        }

        // Remove PID file
        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }

        tracing::info!("relaypost daemon shut down");
        match run_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of nodes that made it into the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &RelaypostConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file (prevents
///   TOCTOU races)
/// - Verifies the created file is a regular file (prevents symlink
///   attacks)
/// - Creates the parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the PID file cannot be written, including when
/// it already exists; the message carries the PID found inside it.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Record daemon-level metrics (build info, node count).
///
/// Called once during orchestrator construction.
fn record_daemon_metrics(node_count: usize) {
    use relaypost_core::metrics as m;

    // Build info (always 1, with version label)
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_NODES_RUNNING).set(node_count as f64);

    tracing::debug!(
        node_count = node_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that periodically updates the uptime metric.
///
/// Updates every 10 seconds to keep the metric fresh for Prometheus
/// scrapes.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use relaypost_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use clap::Parser as _;

    fn plain_cli() -> DaemonCli {
        DaemonCli::try_parse_from(["relaypost-daemon"]).expect("should parse empty CLI")
    }

    #[test]
    fn test_write_pid_file_creates_parent_directory() {
        // Given: A path with non-existent parent directory
        let temp_dir = std::env::temp_dir();
        let test_dir = temp_dir.join(format!("relaypost_test_{}", std::process::id()));
        let pid_file = test_dir.join("subdir").join("test.pid");

        // When: Writing PID file
        let result = write_pid_file(&pid_file);

        // Then: Should succeed and create parent directory
        assert!(
            result.is_ok(),
            "write_pid_file should create parent directory"
        );
        assert!(pid_file.exists(), "PID file should exist");

        // Verify content
        let content = fs::read_to_string(&pid_file).expect("should read PID file");
        assert_eq!(
            content.trim(),
            std::process::id().to_string(),
            "PID file should contain current process ID"
        );

        // Cleanup
        let _ = fs::remove_dir_all(&test_dir);
    }

    #[test]
    fn test_write_pid_file_fails_if_already_exists() {
        // Given: An existing PID file
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("relaypost_test_dup_{}.pid", std::process::id()));
        fs::write(&pid_file, "12345").expect("should write initial PID file");

        // When: Attempting to write PID file again
        let result = write_pid_file(&pid_file);

        // Then: Should fail with appropriate error
        assert!(
            result.is_err(),
            "write_pid_file should fail when file already exists"
        );
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("already exists"),
            "error should mention file already exists, got: {}",
            err_msg
        );
        assert!(
            err_msg.contains("12345"),
            "error should show existing PID, got: {}",
            err_msg
        );

        // Cleanup
        let _ = fs::remove_file(&pid_file);
    }

    #[test]
    fn test_remove_pid_file_succeeds() {
        // Given: An existing PID file
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("relaypost_test_remove_{}.pid", std::process::id()));
        fs::write(&pid_file, "99999").expect("should write PID file");
        assert!(pid_file.exists(), "PID file should exist before removal");

        // When: Removing PID file
        remove_pid_file(&pid_file);

        // Then: File should be removed
        assert!(!pid_file.exists(), "PID file should be removed");
    }

    #[test]
    fn test_remove_pid_file_handles_nonexistent_gracefully() {
        // Given: A non-existent PID file
        let temp_dir = std::env::temp_dir();
        let pid_file = temp_dir.join(format!("relaypost_test_nonexist_{}.pid", std::process::id()));
        assert!(!pid_file.exists(), "PID file should not exist before test");

        // When: Attempting to remove non-existent file
        // Then: Should not panic (logs warning internally)
        remove_pid_file(&pid_file);
    }

    #[test]
    fn test_build_from_config_constructs_declared_nodes() {
        // Given: A two-node configuration with metrics disabled
        let dir = tempfile::tempdir().expect("tempdir");
        let config_toml = format!(
            r#"
[pipeline]
state_file = "{state}"

[[node]]
name = "strip"
type = "rewriter"
outputs = ["console"]
rules = []

[[node]]
name = "console"
type = "console_output"
"#,
            state = dir.path().join("state.json").display()
        );
        let config = RelaypostConfig::parse(&config_toml).expect("config should parse");

        // When: Building the orchestrator
        let orchestrator =
            Orchestrator::build_from_config(config, &plain_cli()).expect("build should succeed");

        // Then: Both nodes are in the graph
        assert_eq!(orchestrator.node_count(), 2);
        assert_eq!(orchestrator.config().nodes.len(), 2);
    }

    #[test]
    fn test_build_from_config_honors_node_whitelist() {
        // Given: Two declared nodes but a whitelist naming one
        let dir = tempfile::tempdir().expect("tempdir");
        let config_toml = format!(
            r#"
[pipeline]
state_file = "{state}"

[[node]]
name = "keeper"
type = "console_output"

[[node]]
name = "dropped"
type = "console_output"
"#,
            state = dir.path().join("state.json").display()
        );
        let config = RelaypostConfig::parse(&config_toml).expect("config should parse");
        let cli = DaemonCli::try_parse_from(["relaypost-daemon", "--node", "keeper"])
            .expect("should parse CLI");

        // When: Building the orchestrator
        let orchestrator =
            Orchestrator::build_from_config(config, &cli).expect("build should succeed");

        // Then: Only the whitelisted node is constructed
        assert_eq!(orchestrator.node_count(), 1);
    }

    #[test]
    fn test_build_from_config_accepts_empty_graph() {
        // Given: A configuration without node declarations
        let dir = tempfile::tempdir().expect("tempdir");
        let config_toml = format!(
            r#"
[pipeline]
state_file = "{state}"
"#,
            state = dir.path().join("state.json").display()
        );
        let config = RelaypostConfig::parse(&config_toml).expect("config should parse");

        // When / Then: Build succeeds with zero nodes
        let orchestrator =
            Orchestrator::build_from_config(config, &plain_cli()).expect("build should succeed");
        assert_eq!(orchestrator.node_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_uptime_updater_shutdown_signal() {
        // Given: A running uptime updater
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_uptime_updater(Instant::now(), shutdown_rx);

        // When: Sending shutdown signal
        let _ = shutdown_tx.send(());

        // Then: Task should complete quickly
        let result = tokio::time::timeout(tokio::time::Duration::from_millis(100), task).await;
        assert!(
            result.is_ok(),
            "uptime updater should shut down within timeout"
        );
    }

    #[tokio::test]
    async fn test_run_returns_when_workers_drain() {
        // Given: A batch graph whose only source stops at EOF
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("batch.log");
        fs::write(
            &log,
            "h:web1 ts:2014-12-20 13:21:09 content:nginx: GET / 200\n",
        )
        .expect("should write log fixture");
        let pid_file = dir.path().join("relaypost.pid");
        let out = dir.path().join("archive.log");

        let config_toml = format!(
            r#"
[general]
pid_file = "{pid}"

[pipeline]
state_file = "{state}"

[[node]]
name = "batch_tail"
type = "syslog_file"
outputs = ["archive"]
path = "{log}"
parser = "record_text"
stop_on_eof = true

[[node]]
name = "archive"
type = "file_output"
path = "{out}"
"#,
            pid = pid_file.display(),
            state = dir.path().join("state.json").display(),
            log = log.display(),
            out = out.display(),
        );
        let config = RelaypostConfig::parse(&config_toml).expect("config should parse");
        let mut orchestrator =
            Orchestrator::build_from_config(config, &plain_cli()).expect("build should succeed");
        assert_eq!(orchestrator.node_count(), 2);

        // When: Running the daemon
        let result =
            tokio::time::timeout(tokio::time::Duration::from_secs(10), orchestrator.run()).await;

        // Then: run returns on its own once the source drains
        let run_result = result.expect("run should return before the timeout");
        run_result.expect("run should succeed");
        assert!(!pid_file.exists(), "PID file should be removed after run");
        let written = fs::read_to_string(&out).expect("archive output should exist");
        assert!(written.contains("nginx: GET / 200"));
    }
}
