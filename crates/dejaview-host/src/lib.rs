//! `dejaview-host` - serves DejaView surfaces to a browser.
//!
//! Each trace given on the command line is a document; every browser page
//! under `/surfaces/<id>` is a surface bound to one of them.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

pub mod navigator;
pub mod pages;
pub mod web;

use std::time::Duration;

use dejaview_supervisor::{SupervisorConfig, SupervisorError};

/// Command-line overrides applied on top of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub engine: Option<std::path::PathBuf>,
    pub startup_timeout_ms: Option<u64>,
    /// Set when the UI bundle is served locally.
    pub local_ui: bool,
}

/// Load the supervisor configuration and apply `overrides`.
pub fn load_config(
    path: Option<&std::path::Path>,
    overrides: &Overrides,
) -> Result<SupervisorConfig, SupervisorError> {
    let mut config = match path {
        Some(path) => SupervisorConfig::load(path)?,
        None => SupervisorConfig::default(),
    };
    if let Some(engine) = &overrides.engine {
        config.engine = engine.clone();
    }
    if let Some(timeout_ms) = overrides.startup_timeout_ms {
        config.startup_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
    }
    if overrides.local_ui {
        config.ui_base = dejaview_supervisor::config::DEFAULT_UI_BASE.into();
    }
    config.validate()?;
    Ok(config)
}
