//! Logtrail CLI - lt command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod logging;
mod util;

/// Logtrail - follow log files across renames and rotations
#[derive(Parser)]
#[command(name = "lt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/logtrail/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print lines appended to files and directories until Ctrl-C
    Tail {
        /// Files or directories to follow
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Read files that already exist from their beginning
        #[arg(long)]
        from_start: bool,

        /// Identify files by content signature (network filesystems)
        #[arg(long)]
        signature: bool,

        /// Use the polling watch backend
        #[arg(long)]
        poll: bool,

        /// Directory for persistent read positions
        #[arg(long)]
        offsets: Option<PathBuf>,
    },
    /// Show the files a directory tail would follow
    Info {
        /// Directory to inspect
        dir: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print an annotated example config
    Example,
    /// Validate a config file and print the effective settings
    Check {
        /// Config file to check
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Tail {
            paths,
            from_start,
            signature,
            poll,
            offsets,
        } => {
            let mut config = util::load_config(cli.config.as_deref())?;
            util::apply_overrides(&mut config, from_start, signature, poll, offsets);
            cmd::tail::run(paths, config).await
        }
        Commands::Info { dir, json } => {
            let config = util::load_config(cli.config.as_deref())?;
            cmd::info::run(&dir, json, config).await
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Example => cmd::config::run_example(),
            ConfigCommands::Check { file } => cmd::config::run_check(&file),
        },
    }
}
