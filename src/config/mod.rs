use crate::error::{DaemonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// The program the launcher runs once detached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Path to the executable, or a bare name looked up in PATH
    #[serde(default)]
    pub program: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables added to the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchConfig {
    /// Create a configuration for `program` with the given arguments
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Load a launch configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<LaunchConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(DaemonError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<LaunchConfig> {
        toml::from_str(contents)
            .map_err(|e| DaemonError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<LaunchConfig> {
        serde_json::from_str(contents)
            .map_err(|e| DaemonError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Apply command-line overrides: a program replaces the file's program
    /// and arguments, env entries are merged over the file's.
    pub fn merge(&mut self, program: Option<PathBuf>, args: Vec<String>, env: HashMap<String, String>) {
        if let Some(program) = program {
            self.program = program;
            self.args = args;
        }
        self.env.extend(env);
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(DaemonError::MissingConfigField("program".to_string()));
        }

        for key in self.env.keys() {
            if key.is_empty() {
                return Err(DaemonError::ConfigValidationError(
                    "environment variable name cannot be empty".to_string(),
                ));
            }
            if key.contains('=') {
                return Err(DaemonError::ConfigValidationError(format!(
                    "Invalid environment variable name: {}",
                    key
                )));
            }
        }

        Ok(())
    }

    /// Make a relative program path absolute against `base`.
    ///
    /// The daemon runs from `/`, so `./run.sh` has to be pinned down before
    /// detaching. Bare names without a separator are left for PATH lookup.
    pub fn resolve_program(&mut self, base: &Path) {
        if self.program.is_absolute() || !self.is_path() {
            return;
        }
        self.program = base.join(&self.program);
    }

    /// Fail early when an explicit program path does not exist, since the
    /// daemon has no terminal left to report it on.
    pub fn ensure_program_exists(&self) -> Result<()> {
        if self.is_path() && !self.program.exists() {
            return Err(DaemonError::LaunchError(format!(
                "Program does not exist: {}",
                self.program.display()
            )));
        }
        Ok(())
    }

    fn is_path(&self) -> bool {
        self.program.to_string_lossy().contains(MAIN_SEPARATOR)
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.program = PathBuf::from(Self::expand_env_in_string(&self.program.to_string_lossy()));

        self.args = self
            .args
            .iter()
            .map(|arg| Self::expand_env_in_string(arg))
            .collect();

        // Values only
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Self::expand_env_in_string(v)))
            .collect();
    }

    /// Expand `$VAR` and `${VAR}` references in a string. Unset variables
    /// are left untouched.
    fn expand_env_in_string(s: &str) -> String {
        shellexpand::env_with_context_no_errors(s, |name| std::env::var(name).ok()).into_owned()
    }
}
