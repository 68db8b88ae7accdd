use serde::Serialize;

pub fn to_json<T: Serialize>(data: &T, pretty: bool) -> crate::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(serde_json::to_string(data)?)
    }
}

/// Write `data` as JSON to `path`, or to stdout when no path is given.
pub fn write_json<T: Serialize>(
    data: &T,
    path: Option<&std::path::Path>,
    pretty: bool,
) -> crate::Result<()> {
    let json = to_json(data, pretty)?;
    match path {
        Some(path) => std::fs::write(path, json + "\n")?,
        None => println!("{}", json),
    }
    Ok(())
}

pub mod text {
    use colored::Colorize;

    pub fn success(msg: &str) -> String {
        format!("{} {}", "✓".green().bold(), msg)
    }

    pub fn error(msg: &str) -> String {
        format!("{} {}", "✗".red().bold(), msg)
    }

    pub fn info(msg: &str) -> String {
        format!("{} {}", "ℹ".blue().bold(), msg)
    }

    pub fn key_value(key: &str, value: &str) -> String {
        format!("  {}: {}", key.bold(), value)
    }

    /// Progress line of one page load attempt.
    pub fn load(index: usize, url: &str) -> String {
        format!("{} {} {}", "LOAD".cyan().bold(), index, url)
    }

    pub fn done(index: usize, url: &str) -> String {
        format!("{} {} {}", "DONE".green().bold(), index, url)
    }

    pub fn fail(index: usize, url: &str, error: &str) -> String {
        format!("{} {} {} ({})", "FAIL".red().bold(), index, url, error)
    }
}
