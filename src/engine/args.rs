use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use super::EngineOptions;

#[derive(Parser)]
pub struct DaemonArgs {
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[arg(long)]
    pub focus: bool,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long = "target-minutes")]
    pub target_minutes: Option<i64>,
    #[arg(long = "no-blocking")]
    pub no_blocking: bool,
}

impl DaemonArgs {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            start_focus_session: self.focus,
            focus_description: self.description.clone().map(Into::into),
            focus_target_seconds: self.target_minutes.map(|v| v * 60),
            blocking_enabled: !self.no_blocking,
        }
    }
}
