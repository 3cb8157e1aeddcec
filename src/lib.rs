// plugin-order - Load order and active plugin reconciliation for Gamebryo games
//
// This is the library crate containing the engine and its collaborators.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{GameMode, GamePaths, Settings};
pub use services::{EngineOptions, LoadOrderEngine, LoadOrderError, WriteOutcome};
pub use state::{ChangeNotifier, PluginChange};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
