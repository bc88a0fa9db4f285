//! Process-wide `tracing` setup.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "chatstream.logs.jsonl";
const ENABLED_KEYS: [&str; 2] = ["CHATSTREAM_OBSERVABILITY_ENABLED", "CHATSTREAM_OBSERVABILITY"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr. Stdout is left to the caller.
    Console,
    /// JSON lines appended to a file.
    JsonFile(PathBuf),
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directive; `RUST_LOG`, then `info`, when absent or invalid.
    pub filter: Option<String>,
    pub output: LogOutput,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: None,
            output: LogOutput::Console,
        }
    }
}

impl LogSettings {
    /// Reads `CHATSTREAM_OBSERVABILITY_ENABLED` (or `CHATSTREAM_OBSERVABILITY`),
    /// `CHATSTREAM_LOG_LEVEL` and `CHATSTREAM_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|raw| parse_bool_env(&raw).unwrap_or(true))
            .unwrap_or(true);
        let filter = lookup("CHATSTREAM_LOG_LEVEL").filter(|v| !v.trim().is_empty());
        let output = lookup("CHATSTREAM_JSON_LOG_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(|p| LogOutput::JsonFile(PathBuf::from(p)))
            .unwrap_or(LogOutput::Console);
        Self {
            enabled,
            filter,
            output,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(directive) = self.filter.as_deref()
            && let Ok(filter) = EnvFilter::try_new(directive)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Installs the global subscriber. Returns `false` if disabled or one was already set.
    pub fn install(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let filter = self.env_filter();
        match &self.output {
            LogOutput::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                tracing_subscriber::registry()
                    .with(filter)
                    .with(json_layer)
                    .try_init()
                    .is_ok()
            }
            LogOutput::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(console_layer)
                    .try_init()
                    .is_ok()
            }
        }
    }
}

/// Initialize logging once per process from [`LogSettings::from_env`].
pub fn init_observability() {
    INIT.get_or_init(|| {
        LogSettings::from_env().install();
    });
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}
