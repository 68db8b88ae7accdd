pub mod capture;
pub mod chrome;
pub mod cli;
pub mod config;
pub mod error;
pub mod har;
pub mod loader;
pub mod output;
pub mod timeouts;
pub mod timer;

pub use capture::{PageRecord, replay_events};
pub use config::Config;
pub use error::HarError;
pub use har::Har;
pub use loader::{Loader, LoaderEvent};

pub type Result<T> = std::result::Result<T, HarError>;
