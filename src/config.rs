use crate::{HarError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub creator: CreatorConfig,
}

/// Remote debugging endpoint and the viewport of the tabs it opens.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CaptureConfig {
    /// Also fetch every response body.
    #[serde(default)]
    pub content: bool,
    /// Leave the browser cache enabled.
    #[serde(default)]
    pub cache: bool,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub blocked_urls: Vec<String>,
    /// Ignore certificate errors.
    #[serde(default)]
    pub insecure: bool,
    pub max_post_data_size: Option<u64>,
    /// Keep recording this long after the page is considered loaded.
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoaderConfig {
    /// Per-page limit; unbounded when absent.
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Stop at the first URL that exhausts its retries (sequential mode only).
    #[serde(default)]
    pub abort_on_failure: bool,
    pub parallel: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_json_pretty")]
    pub json_pretty: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatorConfig {
    #[serde(default = "default_creator_name")]
    pub name: String,
    #[serde(default = "default_creator_version")]
    pub version: String,
    #[serde(default = "default_creator_comment")]
    pub comment: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    9222
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    800
}
fn default_json_pretty() -> bool {
    true
}
fn default_creator_name() -> String {
    "HAR Capturer".to_string()
}
fn default_creator_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_creator_comment() -> Option<String> {
    Some(env!("CARGO_PKG_REPOSITORY").to_string()).filter(|s| !s.is_empty())
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json_pretty: default_json_pretty(),
        }
    }
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            name: default_creator_name(),
            version: default_creator_version(),
            comment: default_creator_comment(),
        }
    }
}

impl CaptureConfig {
    pub fn settle(&self) -> Option<Duration> {
        (self.settle_ms > 0).then(|| Duration::from_millis(self.settle_ms))
    }
}

impl LoaderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config"))
        })
        .map(|p| p.join("har-capturer"))
        .ok_or_else(|| HarError::ConfigError("Could not determine config directory".into()))
}

impl Config {
    pub fn load() -> Result<Self> {
        let global_path = default_config_path()?;
        let mut config = Self::load_layers(
            Some(global_path.as_path()),
            Path::new(".har-capturer.toml"),
        )?;
        config.load_from_env();
        Ok(config)
    }

    /// Global file, then the project file on top of it. Missing files are skipped.
    pub fn load_layers(global: Option<&Path>, project: &Path) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = global
            && path.exists()
        {
            let content = std::fs::read_to_string(path)?;
            config = toml::from_str(&content)?;
        }

        if project.exists() {
            let content = std::fs::read_to_string(project)?;
            let project_config: Config = toml::from_str(&content)?;
            config = config.merge(project_config);
        }

        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.load_from_env();
        Ok(config)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(host) = cli_overrides.host {
            config.browser.host = host;
        }
        if let Some(port) = cli_overrides.port {
            config.browser.port = port;
        }
        if let Some(width) = cli_overrides.width {
            config.browser.width = width;
        }
        if let Some(height) = cli_overrides.height {
            config.browser.height = height;
        }
        if cli_overrides.content {
            config.capture.content = true;
        }
        if cli_overrides.cache {
            config.capture.cache = true;
        }
        if let Some(agent) = cli_overrides.user_agent {
            config.capture.user_agent = Some(agent);
        }
        if !cli_overrides.blocked_urls.is_empty() {
            config.capture.blocked_urls = cli_overrides.blocked_urls;
        }
        config.capture.extra_headers.extend(cli_overrides.extra_headers);
        if cli_overrides.insecure {
            config.capture.insecure = true;
        }
        if let Some(size) = cli_overrides.max_post_data_size {
            config.capture.max_post_data_size = Some(size);
        }
        if let Some(settle) = cli_overrides.settle_ms {
            config.capture.settle_ms = settle;
        }
        if let Some(timeout) = cli_overrides.timeout_ms {
            config.loader.timeout_ms = Some(timeout);
        }
        if let Some(retry) = cli_overrides.retry {
            config.loader.retry = retry;
        }
        if let Some(delay) = cli_overrides.retry_delay_ms {
            config.loader.retry_delay_ms = delay;
        }
        if cli_overrides.abort_on_failure {
            config.loader.abort_on_failure = true;
        }
        if let Some(parallel) = cli_overrides.parallel {
            config.loader.parallel = Some(parallel);
        }
        if let Some(pretty) = cli_overrides.json_pretty {
            config.output.json_pretty = pretty;
        }

        config
    }

    /// Project values win wherever they differ from the defaults.
    fn merge(mut self, other: Config) -> Self {
        let defaults = Config::default();

        if other.browser.host != defaults.browser.host {
            self.browser.host = other.browser.host;
        }
        if other.browser.port != defaults.browser.port {
            self.browser.port = other.browser.port;
        }
        if other.browser.width != defaults.browser.width {
            self.browser.width = other.browser.width;
        }
        if other.browser.height != defaults.browser.height {
            self.browser.height = other.browser.height;
        }

        if other.capture.content {
            self.capture.content = true;
        }
        if other.capture.cache {
            self.capture.cache = true;
        }
        if other.capture.user_agent.is_some() {
            self.capture.user_agent = other.capture.user_agent;
        }
        if !other.capture.blocked_urls.is_empty() {
            self.capture.blocked_urls = other.capture.blocked_urls;
        }
        if other.capture.insecure {
            self.capture.insecure = true;
        }
        if other.capture.max_post_data_size.is_some() {
            self.capture.max_post_data_size = other.capture.max_post_data_size;
        }
        if other.capture.settle_ms != defaults.capture.settle_ms {
            self.capture.settle_ms = other.capture.settle_ms;
        }
        self.capture.extra_headers.extend(other.capture.extra_headers);

        if other.loader.timeout_ms.is_some() {
            self.loader.timeout_ms = other.loader.timeout_ms;
        }
        if other.loader.retry != defaults.loader.retry {
            self.loader.retry = other.loader.retry;
        }
        if other.loader.retry_delay_ms != defaults.loader.retry_delay_ms {
            self.loader.retry_delay_ms = other.loader.retry_delay_ms;
        }
        if other.loader.abort_on_failure {
            self.loader.abort_on_failure = true;
        }
        if other.loader.parallel.is_some() {
            self.loader.parallel = other.loader.parallel;
        }

        if other.output.json_pretty != defaults.output.json_pretty {
            self.output.json_pretty = other.output.json_pretty;
        }

        if other.creator.name != defaults.creator.name {
            self.creator.name = other.creator.name;
        }
        if other.creator.version != defaults.creator.version {
            self.creator.version = other.creator.version;
        }
        if other.creator.comment != defaults.creator.comment {
            self.creator.comment = other.creator.comment;
        }

        self
    }

    fn load_from_env(&mut self) {
        if let Ok(host) = std::env::var("HAR_CAPTURER_HOST") {
            self.browser.host = host;
        }
        if let Ok(port) = std::env::var("HAR_CAPTURER_PORT")
            && let Ok(port) = port.parse()
        {
            self.browser.port = port;
        }
        if let Ok(timeout) = std::env::var("HAR_CAPTURER_TIMEOUT")
            && let Ok(timeout) = timeout.parse()
        {
            self.loader.timeout_ms = Some(timeout);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.browser.port == 0 {
            return Err(HarError::ConfigError("port must be greater than 0".into()));
        }

        if self.browser.width == 0 || self.browser.height == 0 {
            return Err(HarError::ConfigError(
                "viewport width and height must be greater than 0".into(),
            ));
        }

        if self.loader.parallel == Some(0) {
            return Err(HarError::ConfigError(
                "parallel must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub content: bool,
    pub cache: bool,
    pub user_agent: Option<String>,
    pub blocked_urls: Vec<String>,
    pub extra_headers: BTreeMap<String, String>,
    pub insecure: bool,
    pub max_post_data_size: Option<u64>,
    pub settle_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub retry: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub abort_on_failure: bool,
    pub parallel: Option<usize>,
    pub json_pretty: Option<bool>,
}
