use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Timed out")]
    Timeout,

    #[error("{0}")]
    Navigation(String),

    #[error("Failed to fetch response body: {0}")]
    ResponseBody(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Page load did not complete")]
    IncompleteCapture,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid event log: {0}")]
    InvalidLog(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("General error: {0}")]
    General(String),
}

impl HarError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Connection(_) => vec![
                "Ensure Chrome is running with --remote-debugging-port".into(),
                "Check the --host and --port values".into(),
            ],
            Self::Disconnected => vec![
                "Check if Chrome was closed or crashed during the load".into(),
                "Verify network connectivity if using remote debugging".into(),
            ],
            Self::Timeout => vec![
                "Increase the per-page limit with --timeout".into(),
                "Check if the page keeps loading resources indefinitely".into(),
            ],
            Self::Navigation(_) => vec![
                "Ensure URL includes protocol (http:// or https://)".into(),
                "Check if URL is accessible".into(),
            ],
            Self::ResponseBody(_) => vec!["Retry without --content".into()],
            Self::ConfigError(_) => vec![
                "Check configuration file syntax".into(),
                "Use --config to specify a different config file".into(),
            ],
            Self::InvalidLog(_) | Self::IncompleteCapture => vec![
                "Ensure the log is a JSON array of {method, params} messages".into(),
                "Check that the log contains the load events of the page".into(),
            ],
            _ => vec!["Run with --verbose for more details".into()],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection(_) | Self::Disconnected => 3,
            Self::Timeout => 4,
            Self::IoError(_) => 6,
            Self::ConfigError(_) | Self::TomlDeError(_) | Self::TomlSerError(_) => 7,
            Self::InvalidLog(_) | Self::IncompleteCapture | Self::JsonError(_) => 2,
            _ => 1,
        }
    }
}
