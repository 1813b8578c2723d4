//! Treespy CLI - treespy command

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use treespy_watcher::{Backend, Engine, Event, Topic, WatchOptions};

/// Treespy - watch a directory tree and print what changes
#[derive(Parser)]
#[command(name = "treespy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to watch
    root: PathBuf,

    /// Only report files matching these globs (repeatable)
    #[arg(long)]
    only: Vec<String>,

    /// Skip files and directories matching these globs (repeatable)
    #[arg(long)]
    skip: Vec<String>,

    /// Poll every MS milliseconds instead of using native notifications
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,

    /// Resume token location; changes since the last run are replayed
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// TOML options file; flags are added on top
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn options(&self) -> Result<WatchOptions> {
        let mut options = match &self.config {
            Some(path) => WatchOptions::from_toml_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => WatchOptions::default(),
        };

        options = options.only(self.only.iter().cloned()).skip(self.skip.iter().cloned());
        if let Some(interval_ms) = self.poll {
            options = options.backend(Backend::Poll { interval_ms });
        }
        if let Some(path) = &self.snapshot {
            options = options.snapshot_path(path);
        }
        Ok(options)
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a Event> for JsonEvent<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            event: event.name(),
            path: event.path(),
            size: event.stats().map(|stats| stats.len()),
            error: match event {
                Event::Error(e) => Some(e.to_string()),
                _ => None,
            },
        }
    }
}

fn print_json(event: &Event) {
    match serde_json::to_string(&JsonEvent::from(event)) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::error!("Failed to encode event: {}", e),
    }
}

fn print_human(event: &Event) {
    let path = event.path().unwrap_or("");
    match event {
        Event::Create { .. } => println!("{} {}", "+".green().bold(), path),
        Event::Update { .. } => println!("{} {}", "~".yellow().bold(), path),
        Event::Delete { .. } => println!("{} {}", "-".red().bold(), path),
        Event::Ready => println!("{}", "Watching for changes (Ctrl-C to stop)".dimmed()),
        Event::Error(e) => eprintln!("{} {}", "error:".red().bold(), e),
        Event::Crawl { .. } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = cli.options()?;

    let engine = Engine::open(&cli.root, options)
        .with_context(|| format!("Failed to watch {}", cli.root.display()))?;

    let print: fn(&Event) = if cli.json { print_json } else { print_human };
    engine
        .on(Topic::All, move |event, _root| print(event))
        .on(Topic::Ready, move |event, _root| print(event))
        .on(Topic::Error, move |event, _root| print(event));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    engine.close().await?;

    if !cli.json {
        println!(
            "{} {} files tracked, {} ignored",
            "Stopped.".bold(),
            engine.files().len().saturating_sub(engine.dirs().len()),
            engine.ignored().len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_extend_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = dir.path().join("treespy.toml");
        std::fs::write(&config, "skip = [\"target/\"]\n").unwrap();

        let cli = Cli::parse_from([
            "treespy",
            "/tmp",
            "--config",
            config.to_str().unwrap(),
            "--skip",
            "*.log",
            "--only",
            "*.rs",
            "--poll",
            "250",
        ]);
        let options = cli.options().unwrap();

        assert_eq!(options.filters.skip, vec!["target/", "*.log"]);
        assert_eq!(options.filters.only, vec!["*.rs"]);
        assert_eq!(options.backend, Backend::Poll { interval_ms: 250 });
    }

    #[test]
    fn test_json_event_shape() {
        let event = Event::Delete { path: "a/b.rs".into() };
        let line = serde_json::to_string(&JsonEvent::from(&event)).unwrap();
        assert_eq!(line, r#"{"event":"delete","path":"a/b.rs"}"#);
    }
}
