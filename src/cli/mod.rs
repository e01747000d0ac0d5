use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::clipboard::{self, ClipboardProvider, MemoryClipboard};
use crate::config::Config;
use crate::engine::Engine;
use crate::history::{HistoryEvent, HistoryItem, ItemId};

pub mod output;

use output::format_row;

#[derive(Parser)]
#[command(name = "clipkeep")]
#[command(about = "Clipboard history manager")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Watch the clipboard and record history")]
    Watch {
        /// Detach and keep watching in the background
        #[arg(short, long)]
        daemon: bool,
    },

    #[command(about = "Stop the background watcher")]
    Stop,

    #[command(about = "Show clipboard history")]
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    #[command(about = "Search clipboard history")]
    Search {
        query: String,

        #[arg(long)]
        json: bool,
    },

    #[command(about = "Record text in the history")]
    Add {
        text: String,

        /// Mark the item as generated rather than copied by the user
        #[arg(long)]
        internal: bool,
    },

    #[command(about = "Copy an item back to the clipboard by id or shortcut")]
    Select { item: String },

    #[command(about = "Pin an item")]
    Pin {
        id: String,

        /// Pin character, the first free one when omitted
        #[arg(long = "char")]
        character: Option<char>,
    },

    #[command(about = "Unpin an item")]
    Unpin { id: String },

    #[command(about = "Delete an item")]
    Delete { id: String },

    #[command(about = "Remove every unpinned item")]
    Clear,

    #[command(about = "Remove every item, pinned ones included")]
    ClearAll,

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

pub struct CliHandler {
    config: Config,
    config_path: Option<PathBuf>,
    engine: Option<Arc<Engine>>,
}

impl CliHandler {
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            engine: None,
        }
    }

    /// Lazily open the history, with the system clipboard when it is needed
    fn ensure_engine(&mut self, system_clipboard: bool) -> Result<Arc<Engine>> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }

        info!("Opening history at {:?}", self.config.history.database);
        let provider: Arc<dyn ClipboardProvider> = if system_clipboard {
            clipboard::create_provider().context("Failed to access the system clipboard")?
        } else {
            Arc::new(MemoryClipboard::new())
        };
        let engine = Arc::new(
            Engine::open(self.config.clone(), provider).context("Failed to open history")?,
        );
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Watch { daemon } => self.watch(daemon).await,
            Commands::Stop => self.stop(),
            Commands::List { limit, json } => self.list(limit, json).await,
            Commands::Search { query, json } => self.search(&query, json).await,
            Commands::Add { text, internal } => self.add(text, internal).await,
            Commands::Select { item } => self.select(&item).await,
            Commands::Pin { id, character } => self.pin(&id, character).await,
            Commands::Unpin { id } => self.unpin(&id).await,
            Commands::Delete { id } => self.delete(&id).await,
            Commands::Clear => self.clear(false).await,
            Commands::ClearAll => self.clear(true).await,
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    #[cfg(unix)]
    async fn watch(&mut self, background: bool) -> Result<()> {
        use crate::daemon;

        if daemon::is_daemon_running()? {
            bail!("Watcher is already running");
        }
        if background {
            let pid = daemon::spawn_background(self.config_path.as_deref())?;
            println!("Watching clipboard in the background (PID {})", pid);
            return Ok(());
        }

        daemon::write_pidfile(std::process::id())?;
        let result = self.run_watcher(daemon::wait_for_shutdown()).await;
        daemon::remove_pidfile()?;
        result
    }

    #[cfg(not(unix))]
    async fn watch(&mut self, background: bool) -> Result<()> {
        if background {
            bail!("Background mode is only available on unix");
        }
        self.run_watcher(async {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")
        })
        .await
    }

    async fn run_watcher<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let engine = self.ensure_engine(true)?;
        let mut events = engine.subscribe().await;
        engine.start().await;
        info!(
            "Watching clipboard every {}ms",
            self.config.clipboard.poll_interval_ms
        );

        let engine_for_log = engine.clone();
        let log_task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let HistoryEvent::Added { id } = event {
                    if let Some(item) = engine_for_log.get(id).await {
                        info!("Recorded: {}", item.title);
                    }
                }
            }
        });

        let result = shutdown.await;
        log_task.abort();
        engine.stop();
        result
    }

    #[cfg(unix)]
    fn stop(&self) -> Result<()> {
        crate::daemon::stop_daemon()?;
        println!("Watcher stopped");
        Ok(())
    }

    #[cfg(not(unix))]
    fn stop(&self) -> Result<()> {
        bail!("Background mode is only available on unix")
    }

    async fn list(&mut self, limit: usize, json: bool) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        let mut items = engine.snapshot().await;
        items.truncate(limit);

        if json {
            println!("{}", serde_json::to_string_pretty(&items)?);
            return Ok(());
        }
        if items.is_empty() {
            println!("No clipboard history found");
            return Ok(());
        }
        for item in &items {
            println!("{}", format_row(item, false));
        }
        Ok(())
    }

    async fn search(&mut self, query: &str, json: bool) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        engine.set_query(query).await;
        let items = engine.snapshot().await;

        if json {
            println!("{}", serde_json::to_string_pretty(&items)?);
            return Ok(());
        }
        if items.is_empty() {
            println!("No matches for {:?}", query);
            return Ok(());
        }
        for item in &items {
            println!("{}", format_row(item, true));
        }
        Ok(())
    }

    async fn add(&mut self, text: String, internal: bool) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        let mut candidate = HistoryItem::from_text(text);
        if internal {
            candidate = candidate.internal();
        }

        match engine.add(candidate).await.id() {
            Some(id) => println!("Recorded {}", id),
            None => println!("Nothing to record"),
        }
        Ok(())
    }

    async fn select(&mut self, item: &str) -> Result<()> {
        let engine = self.ensure_engine(true)?;

        let mut chars = item.chars();
        if let (Some(key), None) = (chars.next(), chars.next()) {
            if let Some(id) = engine.select_shortcut(key).await? {
                println!("Copied {} to the clipboard", id);
                return Ok(());
            }
        }

        let id = resolve_id(&engine, item).await?;
        engine.select(id).await?;
        println!("Copied {} to the clipboard", id);
        Ok(())
    }

    async fn pin(&mut self, id: &str, character: Option<char>) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        let id = resolve_id(&engine, id).await?;

        let pin = match character {
            Some(c) => {
                engine.pin_with(id, c).await?;
                c
            }
            None => match engine.get(id).await.and_then(|item| item.pin) {
                Some(existing) => existing,
                None => engine
                    .toggle_pin(id)
                    .await?
                    .ok_or_else(|| anyhow!("Item was not pinned"))?,
            },
        };
        println!("Pinned {} as '{}'", id, pin);
        Ok(())
    }

    async fn unpin(&mut self, id: &str) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        let id = resolve_id(&engine, id).await?;

        if engine.get(id).await.and_then(|item| item.pin).is_some() {
            engine.toggle_pin(id).await?;
            println!("Unpinned {}", id);
        } else {
            println!("{} is not pinned", id);
        }
        Ok(())
    }

    async fn delete(&mut self, id: &str) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        let id = resolve_id(&engine, id).await?;
        let item = engine.delete(id).await?;
        println!("Deleted {}", item.title);
        Ok(())
    }

    async fn clear(&mut self, all: bool) -> Result<()> {
        let engine = self.ensure_engine(false)?;
        let removed = if all {
            engine.clear_all().await
        } else {
            engine.clear().await
        };
        println!("Removed {} items", removed.len());
        Ok(())
    }

    fn handle_config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&self.config)?);
            }
            ConfigAction::Init { force } => {
                let path = match &self.config_path {
                    Some(path) => path.clone(),
                    None => Config::default_path()
                        .ok_or_else(|| anyhow!("Could not determine config directory"))?,
                };
                Config::write_example(&path, force)?;
                println!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                // Loading already validated it
                self.config.validate()?;
                println!("Configuration is valid");
            }
        }
        Ok(())
    }
}

/// Full id, or an unambiguous prefix of the simple (dashless) form
pub async fn resolve_id(engine: &Engine, input: &str) -> Result<ItemId> {
    if let Ok(id) = input.parse::<ItemId>() {
        return Ok(id);
    }

    let prefix = input.to_lowercase().replace('-', "");
    if prefix.is_empty() {
        bail!("Empty item id");
    }
    let matches: Vec<ItemId> = engine
        .items()
        .await
        .iter()
        .map(|item| item.id)
        .filter(|id| id.simple().to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("No item matches {:?}", input),
        _ => bail!("{:?} matches {} items, use a longer prefix", input, matches.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryDatabase;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["clipkeep", "pin", "abcd", "--char", "x"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Pin {
                ref id,
                character: Some('x')
            } if id == "abcd"
        ));

        let cli = Cli::try_parse_from(["clipkeep", "-v", "watch", "--daemon"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Watch { daemon: true }));

        let cli = Cli::try_parse_from(["clipkeep", "clear-all"]).unwrap();
        assert!(matches!(cli.command, Commands::ClearAll));

        assert!(Cli::try_parse_from(["clipkeep", "pin"]).is_err());
    }

    #[tokio::test]
    async fn test_resolve_id_by_prefix() {
        let engine = Engine::new(
            Config::default(),
            Arc::new(MemoryClipboard::new()),
            Box::new(HistoryDatabase::in_memory().unwrap()),
        )
        .unwrap();
        let id = engine
            .add(HistoryItem::from_text("hello"))
            .await
            .id()
            .unwrap();

        let simple = id.simple().to_string();
        assert_eq!(resolve_id(&engine, &simple[..8]).await.unwrap(), id);
        assert_eq!(resolve_id(&engine, &id.to_string()).await.unwrap(), id);
        assert!(resolve_id(&engine, "zzzz").await.is_err());
        assert!(resolve_id(&engine, "").await.is_err());
    }
}
