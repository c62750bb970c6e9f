// CLI module - Run a program detached from the terminal

pub mod output;

use crate::config::LaunchConfig;
use crate::daemon::{detach, ProcessSplit};
use crate::error::{DaemonError, Result};
use clap::Parser;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// daemonizer - Run a program in the background, detached from the terminal
#[derive(Parser, Debug)]
#[command(name = "daemonizer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Launch configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment variables (KEY=VALUE format)
    #[arg(short, long)]
    env: Vec<String>,

    /// Print only the daemon's PID
    #[arg(short, long)]
    quiet: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Program to run and its arguments
    #[arg(last = true)]
    command: Vec<String>,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        init_logging(&cli.log_level);
        cli.execute()
    }

    /// Detach, then exec the configured program in the child
    fn execute(&self) -> Result<()> {
        // Everything that can fail visibly happens before the terminal is gone
        let config = self.build_config()?;
        config.ensure_program_exists()?;

        debug!(program = %config.program.display(), "Detaching");

        match detach()? {
            ProcessSplit::Parent { child } => {
                output::print_detached(child.as_raw(), &config, self.quiet);
                Ok(())
            }
            ProcessSplit::Child => Err(launch(&config)),
        }
    }

    /// Build the launch configuration from the config file and CLI arguments
    fn build_config(&self) -> Result<LaunchConfig> {
        let mut config = match &self.config {
            Some(path) => LaunchConfig::from_file(path)?,
            None => LaunchConfig::default(),
        };

        let env = parse_env_vars(&self.env)?;
        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (Some(PathBuf::from(program)), args.to_vec()),
            None => (None, Vec::new()),
        };
        config.merge(program, args, env);
        config.validate()?;

        let cwd = std::env::current_dir()?;
        config.resolve_program(&cwd);

        Ok(config)
    }
}

/// Replace the daemon with the configured program. Only returns on failure.
fn launch(config: &LaunchConfig) -> DaemonError {
    let err = Command::new(&config.program)
        .args(&config.args)
        .envs(&config.env)
        .exec();

    DaemonError::LaunchError(format!("{}: {}", config.program.display(), err))
}

/// Install the stderr subscriber; `RUST_LOG` wins over `--log-level`
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        match env_str.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(DaemonError::ConfigError(format!(
                    "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                    env_str
                )));
            }
        }
    }

    Ok(map)
}
