//! CLI definitions for dejaview-host.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "dejaview-host",
    version,
    about = "Serve DejaView trace surfaces backed by trace_processor_shell",
    after_help = "Examples:\n  dejaview-host boot.perfetto\n  dejaview-host --listen 127.0.0.1:9400 --ui-dir ./ui-dist a.trace b.trace\n  dejaview-host --config dejaview.toml --verbose boot.perfetto"
)]
pub struct Cli {
    /// Supervisor configuration file (TOML, `[supervisor]` table).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Trace processor binary (overrides the config file).
    #[arg(long, value_name = "PATH")]
    pub engine: Option<PathBuf>,
    /// Address for the HTTP front end.
    #[arg(long, default_value = "127.0.0.1:9400")]
    pub listen: String,
    /// Startup deadline in milliseconds; 0 disables it.
    #[arg(long, value_name = "MS")]
    pub startup_timeout_ms: Option<u64>,
    /// Serve the DejaView UI bundle from this directory under /ui.
    #[arg(long, value_name = "DIR")]
    pub ui_dir: Option<PathBuf>,
    /// Show debug logs, including backend output.
    #[arg(long, short)]
    pub verbose: bool,
    /// Trace files to open.
    #[arg(required = true, value_name = "TRACE")]
    pub traces: Vec<PathBuf>,
}
