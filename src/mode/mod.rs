//! The `quacktor` binary runs in one of the modes defined in this module.

mod node;
mod qpmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use quacktor::config::QuacktorConfig;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Runs the qpmd registry daemon
    Qpmd(qpmd::Args),
    /// Starts a node and registers a named system with qpmd
    Node(node::Args),
}

impl Mode {
    fn config(&self) -> Option<&PathBuf> {
        match self {
            Mode::Qpmd(args) => args.config.as_ref(),
            Mode::Node(args) => args.config.as_ref(),
        }
    }
}

pub(crate) async fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = QuacktorConfig::load_or_default(cli.mode.config().map(PathBuf::as_path))?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    match cli.mode {
        Mode::Qpmd(args) => qpmd::start(args, config).await,
        Mode::Node(args) => node::start(args, config).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Mode};

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn node_requires_a_system() {
        assert!(Cli::try_parse_from(["quacktor", "node"]).is_err());
        let cli = Cli::try_parse_from(["quacktor", "node", "--system", "printer"]).unwrap();
        assert!(matches!(cli.mode, Mode::Node(args) if args.system == "printer"));
    }
}
