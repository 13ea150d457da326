use clap::Subcommand;

use super::config::ConfigArgs;
use super::replay::ReplayArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay a scenario file through the decision loop
    Replay(ReplayArgs),

    /// Inspect or validate the qapilot configuration
    Config(ConfigArgs),

    /// Show version and build information
    Info,
}
