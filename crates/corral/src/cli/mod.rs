//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use color_eyre::eyre::{Result, WrapErr};
use corral_common::ContainerId;
use tabled::{Table, Tabled};

use crate::exec::Signal;
use crate::runtime::{ContainerConfig, Runtime, RuntimeConfig};

/// Corral - OCI runtime on top of an lxc-style isolation engine
#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Runtime root directory [default: /run/corral]
    #[arg(long, global = true, env = "CORRAL_ROOT")]
    pub root: Option<PathBuf>,

    /// Runtime configuration file [default: /etc/corral/config.toml]
    #[arg(long, global = true, env = "CORRAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cgroup paths use the systemd slice:prefix:name encoding
    #[arg(long, global = true, env = "CORRAL_SYSTEMD_CGROUP")]
    pub systemd_cgroup: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Append log output to a file instead of stderr
    #[arg(long, global = true, env = "CORRAL_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Runtime commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a container
    Create {
        /// Container ID
        container_id: String,

        /// Path to the OCI bundle
        #[arg(short, long, default_value = ".")]
        bundle: PathBuf,

        /// Unix socket receiving the console PTY master
        #[arg(long)]
        console_socket: Option<PathBuf>,

        /// File receiving the monitor PID
        #[arg(long)]
        pid_file: Option<PathBuf>,

        /// Engine log file of the container
        #[arg(long)]
        container_log: Option<PathBuf>,

        /// Engine log level (trace, debug, info, notice, warn, error, crit, alert, fatal)
        #[arg(long)]
        container_log_level: Option<String>,

        /// Seconds to wait for the container to be created
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Start a created container
    Start {
        /// Container ID
        container_id: String,

        /// Seconds to wait for the container to start
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Query container state
    State {
        /// Container ID
        container_id: String,
    },

    /// Send a signal to the container init process
    Kill {
        /// Container ID
        container_id: String,

        /// Signal number or name (9, kill, SIGKILL)
        #[arg(default_value = "SIGTERM")]
        signal: Signal,

        /// Seconds to wait for the signal to be delivered
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete a container
    Delete {
        /// Container ID
        container_id: String,

        /// Kill the container first if it is still running
        #[arg(short, long)]
        force: bool,

        /// Seconds to wait for the container to be deleted
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List containers
    List {
        /// Only display container IDs
        #[arg(short, long)]
        quiet: bool,
    },

    /// Generate shell completions
    Completion {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "BUNDLE")]
    bundle: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

fn timeout_or(seconds: Option<u64>, default: Duration) -> Duration {
    seconds.map_or(default, Duration::from_secs)
}

impl Cli {
    /// Builds the runtime configuration: defaults, the configuration file,
    /// then command line flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::load(self.config.as_deref())?;
        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if self.systemd_cgroup {
            config = config.with_systemd_cgroup(true);
        }
        Ok(config)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed operation.
    pub async fn execute(self) -> Result<()> {
        if let Commands::Completion { shell } = self.command {
            let mut cmd = Self::command();
            clap_complete::generate(shell, &mut cmd, "corral", &mut std::io::stdout());
            return Ok(());
        }

        let runtime = Runtime::new(self.runtime_config()?);
        let timeouts = runtime.config().timeouts;

        match self.command {
            Commands::Create {
                container_id,
                bundle,
                console_socket,
                pid_file,
                container_log,
                container_log_level,
                timeout,
            } => {
                runtime.check_host()?;
                let id = ContainerId::new(container_id)?;
                let config = ContainerConfig::from_bundle(id, &bundle)
                    .wrap_err_with(|| format!("failed to load bundle {}", bundle.display()))?
                    .with_console_socket(console_socket)
                    .with_pid_file(pid_file)
                    .with_log(container_log, container_log_level);
                runtime
                    .create(config, timeout_or(timeout, timeouts.create()))
                    .await?;
                Ok(())
            }

            Commands::Start {
                container_id,
                timeout,
            } => {
                let container = runtime.load(&ContainerId::new(container_id)?)?;
                runtime
                    .start(&container, timeout_or(timeout, timeouts.start()))
                    .await?;
                Ok(())
            }

            Commands::State { container_id } => {
                let state = runtime.state(&ContainerId::new(container_id)?)?;
                println!("{}", serde_json::to_string_pretty(&state)?);
                Ok(())
            }

            Commands::Kill {
                container_id,
                signal,
                timeout,
            } => {
                let container = runtime.load(&ContainerId::new(container_id)?)?;
                runtime
                    .kill(&container, signal, timeout_or(timeout, timeouts.kill()))
                    .await?;
                Ok(())
            }

            Commands::Delete {
                container_id,
                force,
                timeout,
            } => {
                let id = ContainerId::new(container_id)?;
                runtime
                    .delete(&id, force, timeout_or(timeout, timeouts.delete()))
                    .await?;
                Ok(())
            }

            Commands::List { quiet } => {
                let ids = runtime.list()?;
                if quiet {
                    for id in ids {
                        println!("{id}");
                    }
                    return Ok(());
                }

                let mut rows = Vec::new();
                for id in ids {
                    let container = match runtime.load(&id) {
                        Ok(container) => container,
                        // Deleted while listing.
                        Err(e) if e.is_not_exist() => continue,
                        Err(e) => {
                            tracing::warn!(container_id = %id, error = %e, "failed to load container");
                            continue;
                        }
                    };
                    let state = container.state()?;
                    rows.push(ContainerRow {
                        id: state.id,
                        status: state.status.to_string(),
                        pid: state.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
                        bundle: state.bundle.display().to_string(),
                        created: container.descriptor().created_at.to_rfc3339(),
                    });
                }
                println!("{}", Table::new(rows));
                Ok(())
            }

            Commands::Completion { .. } => Ok(()),
        }
    }
}
