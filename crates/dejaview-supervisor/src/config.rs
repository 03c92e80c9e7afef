//! Supervisor configuration loading.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::SupervisorError;

pub const DEFAULT_ENGINE: &str = "trace_processor_shell";
pub const DEFAULT_READY_PATTERN: &str = "[HTTP] Starting RPC server on localhost:{port}";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_UI_BASE: &str = "/ui";

/// How a backend is asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateSignal {
    /// Polite termination request (SIGTERM on unix).
    Term,
    /// Forced termination.
    Kill,
}

impl TerminateSignal {
    pub fn parse(text: &str) -> Result<Self, SupervisorError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "term" | "sigterm" => Ok(Self::Term),
            "kill" | "sigkill" => Ok(Self::Kill),
            _ => Err(SupervisorError::InvalidConfig(
                format!("invalid signal '{text}' (expected 'term' or 'kill')").into(),
            )),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "term",
            Self::Kill => "kill",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub engine: PathBuf,
    pub engine_args: Vec<SmolStr>,
    pub ready_pattern: SmolStr,
    /// `None` disables the startup deadline.
    pub startup_timeout: Option<Duration>,
    pub restart_signal: TerminateSignal,
    pub close_signal: TerminateSignal,
    pub ui_base: SmolStr,
    pub ui_version: SmolStr,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            engine: PathBuf::from(DEFAULT_ENGINE),
            engine_args: Vec::new(),
            ready_pattern: SmolStr::new(DEFAULT_READY_PATTERN),
            startup_timeout: Some(DEFAULT_STARTUP_TIMEOUT),
            restart_signal: TerminateSignal::Kill,
            close_signal: TerminateSignal::Term,
            ui_base: SmolStr::new(DEFAULT_UI_BASE),
            ui_version: SmolStr::new(env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    supervisor: SupervisorSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SupervisorSection {
    engine: Option<String>,
    engine_args: Option<Vec<String>>,
    ready_pattern: Option<String>,
    startup_timeout_ms: Option<u64>,
    restart_signal: Option<String>,
    close_signal: Option<String>,
    ui_base: Option<String>,
    ui_version: Option<String>,
}

impl SupervisorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SupervisorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            SupervisorError::InvalidConfig(
                format!("failed to read {}: {err}", path.display()).into(),
            )
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SupervisorError> {
        let raw: ConfigFile = toml::from_str(text)
            .map_err(|err| SupervisorError::InvalidConfig(err.to_string().into()))?;
        let section = raw.supervisor;
        let mut config = Self::default();

        if let Some(engine) = section.engine {
            config.engine = PathBuf::from(engine);
        }
        if let Some(args) = section.engine_args {
            config.engine_args = args.into_iter().map(SmolStr::from).collect();
        }
        if let Some(pattern) = section.ready_pattern {
            config.ready_pattern = SmolStr::from(pattern);
        }
        if let Some(timeout_ms) = section.startup_timeout_ms {
            config.startup_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        }
        if let Some(signal) = section.restart_signal {
            config.restart_signal = TerminateSignal::parse(&signal)?;
        }
        if let Some(signal) = section.close_signal {
            config.close_signal = TerminateSignal::parse(&signal)?;
        }
        if let Some(base) = section.ui_base {
            config.ui_base = SmolStr::from(base.trim_end_matches('/'));
        }
        if let Some(version) = section.ui_version {
            config.ui_version = SmolStr::from(version);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.engine.as_os_str().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "supervisor.engine must not be empty".into(),
            ));
        }
        if self.ready_pattern.replace("{port}", "").trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "supervisor.ready_pattern must contain text besides {port}".into(),
            ));
        }
        if self.ui_version.trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "supervisor.ui_version must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// File name of the engine binary, used in loading pages.
    #[must_use]
    pub fn engine_name(&self) -> String {
        self.engine
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.engine.display().to_string())
    }
}
