pub mod commands;
pub mod dispatch;

use crate::config::{Config, ConfigOverrides};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "har-capturer")]
#[command(version, about = "Capture HAR documents from a running Chrome")]
#[command(
    long_about = "Load pages in a Chrome instance reachable through its remote debugging port and write the network activity as HAR 1.2"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<commands::Command>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Remote debugging host")]
    pub host: Option<String>,

    #[arg(long, global = true, help = "Remote debugging port")]
    pub port: Option<u16>,

    #[arg(short, long, global = true, help = "Write the document to a file instead of stdout")]
    pub output: Option<PathBuf>,

    #[arg(long, global = true, help = "Pretty-print JSON output")]
    pub pretty: bool,

    #[arg(
        long,
        global = true,
        conflicts_with = "pretty",
        help = "Write JSON on a single line"
    )]
    pub compact: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            json_pretty: match (self.pretty, self.compact) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            ..Default::default()
        };
        if let Some(commands::Command::Capture(args)) = &self.command {
            args.apply(&mut overrides);
        }
        overrides
    }
}

pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };

    let config = Arc::new(config.load_with_overrides(cli.overrides()));
    config.validate()?;

    dispatch::dispatch(cli, config).await
}
