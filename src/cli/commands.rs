use crate::config::ConfigOverrides;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "Load URLs in Chrome and write a HAR document")]
    Capture(CaptureArgs),

    #[command(about = "Build a HAR document from a stored CDP event log")]
    Replay {
        #[arg(long, help = "URL the log was captured for")]
        url: String,
        #[arg(help = "JSON array of {method, params} messages")]
        log: PathBuf,
        #[arg(short, long, help = "Attach response bodies found in the log")]
        content: bool,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        subcommand: ConfigCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    #[arg(required = true, help = "URLs to load, in order")]
    pub urls: Vec<String>,

    #[arg(short, long, help = "Also capture response bodies")]
    pub content: bool,

    #[arg(long, help = "Allow the browser cache")]
    pub cache: bool,

    #[arg(short = 'a', long, help = "User agent override")]
    pub agent: Option<String>,

    #[arg(short = 'b', long = "block", value_name = "PATTERN", help = "Block URLs matching the pattern")]
    pub blocked_urls: Vec<String>,

    #[arg(
        short = 'H',
        long = "header",
        value_name = "NAME: VALUE",
        value_parser = parse_header,
        help = "Extra request header"
    )]
    pub headers: Vec<(String, String)>,

    #[arg(short = 'i', long, help = "Ignore certificate errors")]
    pub insecure: bool,

    #[arg(long, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, help = "Viewport height")]
    pub height: Option<u32>,

    #[arg(short = 't', long, value_name = "MS", help = "Per-page timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(short = 'd', long, value_name = "MS", help = "Keep recording this long after load")]
    pub delay: Option<u64>,

    #[arg(short = 'r', long, help = "Retries per URL after a failure")]
    pub retry: Option<u32>,

    #[arg(short = 'e', long, value_name = "MS", help = "Delay between retries")]
    pub retry_delay: Option<u64>,

    #[arg(short = 'x', long, help = "Stop at the first failed URL (sequential only)")]
    pub abort_on_failure: bool,

    #[arg(short = 'P', long, value_name = "N", help = "Load up to N pages at once")]
    pub parallel: Option<usize>,

    #[arg(long, value_name = "BYTES", help = "Largest POST body to keep")]
    pub max_post_data: Option<u64>,

    #[arg(long, value_name = "EXPRESSION", help = "Script evaluated after load, stored as _user")]
    pub post_eval: Option<String>,
}

impl CaptureArgs {
    pub fn apply(&self, overrides: &mut ConfigOverrides) {
        overrides.width = self.width;
        overrides.height = self.height;
        overrides.content = self.content;
        overrides.cache = self.cache;
        overrides.user_agent = self.agent.clone();
        overrides.blocked_urls = self.blocked_urls.clone();
        overrides.extra_headers = self.headers.iter().cloned().collect();
        overrides.insecure = self.insecure;
        overrides.max_post_data_size = self.max_post_data;
        overrides.settle_ms = self.delay;
        overrides.timeout_ms = self.timeout;
        overrides.retry = self.retry;
        overrides.retry_delay_ms = self.retry_delay;
        overrides.abort_on_failure = self.abort_on_failure;
        overrides.parallel = self.parallel;
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME: VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{}'", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    #[command(about = "Initialize config file with defaults")]
    Init,

    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Show config file path")]
    Path,
}
