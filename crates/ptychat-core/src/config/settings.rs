use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the session root directory
pub const SESSIONS_DIR_ENV: &str = "PTYCHAT_SESSIONS_DIR";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Chat bridge for interactive agent processes")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory holding one folder per session
    #[arg(long, global = true)]
    pub sessions_dir: Option<PathBuf>,

    /// Working directory for the supervised process
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the agent and relay stdin lines to it (default)
    Run {
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Look for a session created around now and print it
    Locate {
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Accept sessions created this many seconds from now
        #[arg(long)]
        tolerance: Option<u64>,
    },
    /// Follow a session state file and print new assistant messages
    Tail {
        /// Path to the session state file
        path: PathBuf,
        /// Polling interval in milliseconds
        #[arg(short = 'i', long)]
        interval_ms: Option<u64>,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Executable of the supervised agent
    #[serde(default = "default_command")]
    pub command: String,

    /// Fixed arguments passed to the agent
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory for the agent (current directory when unset)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Directory containing one subdirectory per session
    #[serde(default)]
    pub sessions_dir: Option<PathBuf>,

    /// Name of the state file inside each session directory
    #[serde(default = "default_state_file_name")]
    pub state_file_name: String,

    /// Session locator settings
    #[serde(default)]
    pub locator: LocatorSettings,

    /// Session tailer settings
    #[serde(default)]
    pub tailer: TailerSettings,

    /// Pseudo-terminal settings
    #[serde(default)]
    pub pty: PtySettings,
}

fn default_command() -> String {
    "acli".to_string()
}

fn default_args() -> Vec<String> {
    vec!["rovodev".to_string(), "run".to_string()]
}

fn default_state_file_name() -> String {
    "session_context.json".to_string()
}

/// Session locator settings
///
/// Tolerance and timeout share one generous default: the only correlation
/// available is the session's creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorSettings {
    /// Interval between directory scans in milliseconds
    #[serde(default = "default_locator_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum distance between a session's creation time and now (seconds)
    #[serde(default = "default_locator_window")]
    pub match_tolerance_secs: u64,

    /// Give up after this many seconds
    #[serde(default = "default_locator_window")]
    pub timeout_secs: u64,
}

fn default_locator_poll_interval() -> u64 {
    100
}

fn default_locator_window() -> u64 {
    120
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_locator_poll_interval(),
            match_tolerance_secs: default_locator_window(),
            timeout_secs: default_locator_window(),
        }
    }
}

/// Session tailer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailerSettings {
    /// Interval between state file reads in milliseconds
    #[serde(default = "default_tailer_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_tailer_poll_interval() -> u64 {
    1000
}

impl Default for TailerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_tailer_poll_interval(),
        }
    }
}

/// Pseudo-terminal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtySettings {
    /// Terminal rows
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Terminal columns
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// How often the exit watcher checks the child (milliseconds)
    #[serde(default = "default_exit_poll_interval")]
    pub exit_poll_interval_ms: u64,
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

fn default_exit_poll_interval() -> u64 {
    100
}

impl Default for PtySettings {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
            exit_poll_interval_ms: default_exit_poll_interval(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            workspace_root: None,
            sessions_dir: None,
            state_file_name: default_state_file_name(),
            locator: LocatorSettings::default(),
            tailer: TailerSettings::default(),
            pty: PtySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::from_file(p);
            }
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("ptychat/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/ptychat/config.toml")),
            dirs::home_dir().map(|p| p.join(".ptychat.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply environment overrides
    pub fn merge_env(&mut self) {
        if let Some(dir) = std::env::var_os(SESSIONS_DIR_ENV) {
            if !dir.is_empty() {
                self.sessions_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(dir) = &cli.sessions_dir {
            self.sessions_dir = Some(dir.clone());
        }
        if let Some(workspace) = &cli.workspace {
            self.workspace_root = Some(workspace.clone());
        }
        match &cli.command {
            Some(Command::Locate { timeout, tolerance }) => {
                if let Some(timeout) = timeout {
                    self.locator.timeout_secs = *timeout;
                }
                if let Some(tolerance) = tolerance {
                    self.locator.match_tolerance_secs = *tolerance;
                }
            }
            Some(Command::Tail {
                interval_ms: Some(interval),
                ..
            }) => {
                self.tailer.poll_interval_ms = *interval;
            }
            _ => {}
        }
    }

    /// Validate and normalize settings values
    ///
    /// Ensures poll intervals have a minimum value to prevent CPU exhaustion.
    pub fn validate(&mut self) {
        const MIN_POLL_INTERVAL: u64 = 10;

        if self.locator.poll_interval_ms < MIN_POLL_INTERVAL {
            self.locator.poll_interval_ms = MIN_POLL_INTERVAL;
        }
        if self.tailer.poll_interval_ms < MIN_POLL_INTERVAL {
            self.tailer.poll_interval_ms = MIN_POLL_INTERVAL;
        }
        if self.pty.exit_poll_interval_ms < MIN_POLL_INTERVAL {
            self.pty.exit_poll_interval_ms = MIN_POLL_INTERVAL;
        }
        if self.pty.rows == 0 {
            self.pty.rows = default_rows();
        }
        if self.pty.cols == 0 {
            self.pty.cols = default_cols();
        }
        if self.state_file_name.trim().is_empty() {
            self.state_file_name = default_state_file_name();
        }
    }

    /// Resolve the session root directory (`~/.rovodev/sessions` by default)
    pub fn resolved_sessions_dir(&self) -> PathBuf {
        if let Some(dir) = &self.sessions_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rovodev")
            .join("sessions")
    }

    /// Resolve the agent's working directory
    pub fn resolved_workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
