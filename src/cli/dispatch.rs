use super::{
    Cli,
    commands::{CaptureArgs, Command, ConfigCommand},
};
use crate::{
    HarError, Result,
    capture,
    chrome::ChromeSessionProvider,
    config::Config,
    har::RandomPageIds,
    loader::{EvaluateHook, Loader, LoaderEvent},
    output::{self, text},
};
use std::path::Path;
use std::sync::Arc;

pub async fn dispatch(mut cli: Cli, config: Arc<Config>) -> Result<()> {
    let command = match cli.command.take() {
        Some(cmd) => cmd,
        None => {
            eprintln!("No command provided. Use --help for usage.");
            std::process::exit(1);
        }
    };

    match command {
        Command::Capture(args) => handle_capture(args, &cli, config).await,
        Command::Replay { url, log, content } => handle_replay(&url, &log, content, &cli, &config),
        Command::Config { subcommand } => handle_config_command(subcommand, &config),
    }
}

async fn handle_capture(args: CaptureArgs, cli: &Cli, config: Arc<Config>) -> Result<()> {
    let provider = Arc::new(ChromeSessionProvider::new());
    let (mut loader, mut events) = Loader::new(args.urls, config.clone(), provider);
    if let Some(expression) = args.post_eval {
        loader = loader.with_post_hook(Arc::new(EvaluateHook::new(expression)));
    }

    let report = async {
        let mut failures = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                LoaderEvent::Load { url, index, .. } => eprintln!("{}", text::load(index, &url)),
                LoaderEvent::Done { url, index, .. } => eprintln!("{}", text::done(index, &url)),
                LoaderEvent::Fail {
                    url, index, error, ..
                } => {
                    failures += 1;
                    eprintln!("{}", text::fail(index, &url, &error.to_string()));
                    if cli.verbose {
                        for suggestion in error.suggestions() {
                            eprintln!("{}", text::info(&suggestion));
                        }
                    }
                }
                LoaderEvent::Archive(_) => {}
            }
        }
        failures
    };

    let (har, failures) = tokio::join!(loader.run(), report);
    tracing::debug!("{} failed attempts", failures);

    output::write_json(&har, cli.output.as_deref(), config.output.json_pretty)
}

fn handle_replay(url: &str, log: &Path, content: bool, cli: &Cli, config: &Config) -> Result<()> {
    let raw = std::fs::read_to_string(log)?;
    let har = capture::from_log(
        url,
        &raw,
        content || config.capture.content,
        &config.creator,
        &mut RandomPageIds,
    )?;
    output::write_json(&har, cli.output.as_deref(), config.output.json_pretty)
}

fn handle_config_command(subcommand: ConfigCommand, config: &Config) -> Result<()> {
    match subcommand {
        ConfigCommand::Init => {
            let path = crate::config::default_config_path()?;
            let dir = path
                .parent()
                .ok_or_else(|| HarError::ConfigError("Invalid config path".into()))?;
            std::fs::create_dir_all(dir)?;

            if path.exists() {
                return Err(HarError::ConfigError(format!(
                    "Config file already exists at {}",
                    path.display()
                )));
            }
            std::fs::write(&path, toml::to_string_pretty(&Config::default())?)?;
            println!("{}", text::success(&format!("Created {}", path.display())));
            Ok(())
        }
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
        ConfigCommand::Path => {
            let path = crate::config::default_config_path()?;
            println!("{}", text::key_value("Config Path", &path.display().to_string()));
            println!("{}", text::key_value("Exists", &path.exists().to_string()));
            Ok(())
        }
    }
}
