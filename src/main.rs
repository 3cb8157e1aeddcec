//! plugin-order - Inspect and reconcile Gamebryo plugin load orders
//!
//! Main entry point for the command-line application.
//!
//! # Overview
//!
//! The binary initializes:
//! - Configuration loading ([`ConfigManager`], `PluginOrder Settings.yaml` plus
//!   `PLUGIN_ORDER__*` environment overrides)
//! - Logging infrastructure (daily rotated file, console output with `--debug`)
//! - A tokio runtime; engine calls run on the blocking pool because they
//!   sleep while waiting out locked records
//! - The [`LoadOrderEngine`] for the configured game
//!
//! # Commands
//!
//! - `load-order` / `active`: print the reconciled lists
//! - `set-order`, `move`, `set-active`, `activate`, `deactivate`: mutate them
//! - `sort [--trial]`: sort against a masterlist
//! - `detect <dir>`: identify the game owning a `Data` folder, falling back to its plugin lists
//! - `watch`: print change notifications until Ctrl+C

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use plugin_order::logging::{LogOptions, setup_logging};
use plugin_order::services::{MasterlistSorter, PluginWatcher, detect_game};
use plugin_order::{
    APP_NAME, ConfigManager, LoadOrderEngine, PluginChange, Settings, VERSION, WriteOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "plugin-order", version)]
#[command(about = "Inspect and reconcile Gamebryo plugin load orders", long_about = None)]
struct Cli {
    /// Directory holding `PluginOrder Settings.yaml` and the logs
    #[arg(long, global = true, env = "PLUGIN_ORDER_CONFIG_DIR")]
    config_dir: Option<Utf8PathBuf>,

    /// Game mode id (Oblivion, Fallout3, FalloutNV, Skyrim); overrides settings
    #[arg(long, global = true)]
    game: Option<String>,

    /// The game's Data folder; overrides settings
    #[arg(long, global = true)]
    plugin_dir: Option<Utf8PathBuf>,

    /// Debug logging, mirrored to the console
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the load order
    LoadOrder,

    /// Print the active plugins
    Active,

    /// Replace the load order (critical plugins are always kept first)
    SetOrder {
        #[arg(required = true)]
        plugins: Vec<Utf8PathBuf>,
    },

    /// Move one plugin to a load order index
    Move { plugin: Utf8PathBuf, index: usize },

    /// Replace the active plugin list
    SetActive { plugins: Vec<Utf8PathBuf> },

    /// Activate one plugin
    Activate { plugin: Utf8PathBuf },

    /// Deactivate one plugin
    Deactivate { plugin: Utf8PathBuf },

    /// Sort the load order against a masterlist
    Sort {
        /// Report the sorted order without applying it
        #[arg(long)]
        trial: bool,

        /// Masterlist file; defaults to the configured one
        #[arg(short, long)]
        masterlist: Option<Utf8PathBuf>,
    },

    /// Detect which game a Data folder belongs to
    Detect {
        dir: Utf8PathBuf,

        /// Folder holding plugins.txt / loadorder.txt, checked when the Data
        /// folder has no known master
        #[arg(long)]
        local_data_dir: Option<Utf8PathBuf>,
    },

    /// Print change notifications until interrupted
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => ConfigManager::default_config_dir()?,
    };
    let config_manager = ConfigManager::new(&config_dir)?;
    let mut settings = config_manager.load_settings()?;

    let mut log_options = LogOptions::new(config_dir.join("logs"), APP_NAME);
    log_options.debug_mode = cli.debug || settings.debug_mode;
    log_options.console_output = cli.debug;
    let _guard = setup_logging(&log_options)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    if let Commands::Detect {
        dir,
        local_data_dir,
    } = &cli.command
    {
        return detect(dir, local_data_dir.as_deref());
    }

    if let Some(game) = cli.game {
        settings.game = game;
    }
    if let Some(dir) = cli.plugin_dir {
        settings.plugin_directory = dir.into_string();
    }
    if settings.game.trim().is_empty() && !settings.plugin_directory.trim().is_empty() {
        let local_data_dir = settings.local_data_directory.trim();
        let record_dir = (!local_data_dir.is_empty()).then(|| Utf8Path::new(local_data_dir));
        let Some(game) = detect_game(Utf8Path::new(settings.plugin_directory.trim()), record_dir)
        else {
            bail!("No game configured and none detected in {}", settings.plugin_directory);
        };
        settings.game = game.mode_id().to_string();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("plugin-order-worker")
        .build()?;

    let result = runtime.block_on(run(cli.command, settings));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Shutdown complete");

    result
}

async fn run(command: Commands, settings: Settings) -> Result<()> {
    let engine = Arc::new(
        LoadOrderEngine::from_settings(&settings).context("Failed to set up the load order engine")?,
    );

    match command {
        Commands::LoadOrder => {
            let order = blocking(&engine, |e| e.load_order()).await?;
            print_plugins(&engine, &order);
        }
        Commands::Active => {
            let active = blocking(&engine, |e| e.active_plugins()).await?;
            print_plugins(&engine, &active);
        }
        Commands::SetOrder { plugins } => {
            let outcome = blocking(&engine, move |e| e.set_load_order(&plugins)).await?;
            report("load order", outcome)?;
        }
        Commands::Move { plugin, index } => {
            let outcome =
                blocking(&engine, move |e| e.set_plugin_position(&plugin, index)).await??;
            report("load order", outcome)?;
        }
        Commands::SetActive { plugins } => {
            let outcome = blocking(&engine, move |e| e.set_active_plugins(&plugins)).await?;
            report("active plugins", outcome)?;
        }
        Commands::Activate { plugin } => {
            let outcome =
                blocking(&engine, move |e| e.set_plugin_active(&plugin, true)).await??;
            report("active plugins", outcome)?;
        }
        Commands::Deactivate { plugin } => {
            let outcome =
                blocking(&engine, move |e| e.set_plugin_active(&plugin, false)).await??;
            report("active plugins", outcome)?;
        }
        Commands::Sort { trial, masterlist } => {
            let Some(masterlist) = masterlist.or_else(|| settings.masterlist_path()) else {
                bail!("No masterlist given and none configured");
            };
            let sorter = MasterlistSorter::new(masterlist, engine.game());
            let result = blocking(&engine, move |e| e.sort_plugins(&sorter, trial)).await??;

            print_plugins(&engine, &result.sorted);
            println!(
                "{} of {} plugins recognised{}",
                result.recognized,
                result.sorted.len(),
                if trial { " (trial, nothing written)" } else { "" }
            );
        }
        Commands::Watch => watch(&engine, settings.debounce()).await?,
        Commands::Detect {
            dir,
            local_data_dir,
        } => detect(&dir, local_data_dir.as_deref())?,
    }

    engine.metrics().log_summary();
    Ok(())
}

/// Run an engine call on the blocking pool.
async fn blocking<T, F>(engine: &Arc<LoadOrderEngine>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&LoadOrderEngine) -> T + Send + 'static,
{
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .context("Engine task panicked")
}

async fn watch(engine: &Arc<LoadOrderEngine>, debounce: Duration) -> Result<()> {
    let mut rx = engine.subscribe();
    let watcher = PluginWatcher::start(Arc::clone(engine), debounce)
        .context("Failed to start watching the game folders")?;

    println!(
        "Watching {} and {} (Ctrl+C to stop)",
        engine.paths().plugin_dir,
        engine.paths().local_data_dir
    );

    loop {
        tokio::select! {
            change = rx.recv() => match change {
                Ok(change) => println!("{}", describe(&change)),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} change notifications", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watcher");
                break;
            }
        }
    }

    // Joins the watcher thread
    tokio::task::spawn_blocking(move || drop(watcher))
        .await
        .context("Watcher shutdown panicked")?;
    Ok(())
}

fn describe(change: &PluginChange) -> String {
    match change {
        PluginChange::LoadOrderChanged => "load order changed".to_string(),
        PluginChange::ActivePluginsChanged => "active plugins changed".to_string(),
        PluginChange::ExternalPluginAdded { path } => format!("plugin added: {}", path),
    }
}

fn detect(dir: &Utf8Path, local_data_dir: Option<&Utf8Path>) -> Result<()> {
    match detect_game(dir, local_data_dir) {
        Some(game) => {
            println!("{} ({})", game.mode_id(), game.name());
            Ok(())
        }
        None => bail!("No supported game found in {}", dir),
    }
}

fn print_plugins(engine: &LoadOrderEngine, plugins: &[Utf8PathBuf]) {
    for (index, plugin) in plugins.iter().enumerate() {
        println!("{:>3} {}", index, engine.paths().relativize(plugin));
    }
}

fn report(what: &str, outcome: WriteOutcome) -> Result<()> {
    match outcome {
        WriteOutcome::Written => println!("Saved {}", what),
        WriteOutcome::Unchanged => println!("No change to {}", what),
        WriteOutcome::GaveUp => bail!("Gave up saving {}: the file stayed locked", what),
        WriteOutcome::Failed => bail!("Failed to save {}; see the log for details", what),
    }
    Ok(())
}
