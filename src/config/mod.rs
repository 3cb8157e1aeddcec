use crate::models::{Settings, SettingsFile};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use std::fs;

/// Settings file name inside the configuration directory.
pub const SETTINGS_FILE_NAME: &str = "PluginOrder Settings.yaml";

/// Prefix for environment overrides, e.g. `PLUGIN_ORDER__RETRY_ATTEMPTS=5`.
pub const ENV_PREFIX: &str = "PLUGIN_ORDER";

/// Configuration manager for loading and saving the YAML settings file.
///
/// Values from `PluginOrder Settings.yaml` can be overridden per field by
/// `PLUGIN_ORDER__<FIELD>` environment variables (field names in snake case).
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing the settings file; created if missing
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join(SETTINGS_FILE_NAME),
            config_dir,
        })
    }

    /// The platform default configuration directory (`<config>/plugin-order`).
    pub fn default_config_dir() -> Result<Utf8PathBuf> {
        let base = dirs::config_dir().context("Could not determine the configuration folder")?;
        let base = Utf8PathBuf::try_from(base).context("Configuration folder is not UTF-8")?;
        Ok(base.join("plugin-order"))
    }

    /// Load settings from the file, then apply environment overrides.
    ///
    /// # Returns
    /// The loaded Settings, or defaults (plus overrides) if the file doesn't exist
    pub fn load_settings(&self) -> Result<Settings> {
        let environment = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read environment overrides")?;

        self.load_settings_with(&environment)
    }

    /// Load settings from the file and apply overrides from `overrides`.
    pub fn load_settings_with(&self, overrides: &config::Config) -> Result<Settings> {
        let mut settings = self.load_settings_file()?;
        apply_overrides(&mut settings, overrides)?;
        Ok(settings)
    }

    fn load_settings_file(&self) -> Result<Settings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
            return Ok(Settings::default());
        }

        let file_contents = fs::read_to_string(&self.settings_path)
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let file: SettingsFile = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(file.plugin_order)
    }

    /// Save the settings file.
    ///
    /// # Arguments
    /// * `settings` - The Settings to save
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let file = SettingsFile {
            plugin_order: settings.clone(),
        };
        let yaml_string =
            serde_yaml_ng::to_string(&file).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}

fn lookup<T: DeserializeOwned>(source: &config::Config, key: &str) -> Result<Option<T>> {
    match source.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Invalid override for {}", key)),
    }
}

/// Overwrite settings fields present in `source` (keys in snake case).
pub fn apply_overrides(settings: &mut Settings, source: &config::Config) -> Result<()> {
    if let Some(game) = lookup(source, "game")? {
        settings.game = game;
    }
    if let Some(dir) = lookup(source, "plugin_directory")? {
        settings.plugin_directory = dir;
    }
    if let Some(dir) = lookup(source, "local_data_directory")? {
        settings.local_data_directory = dir;
    }
    if let Some(masterlist) = lookup(source, "masterlist")? {
        settings.masterlist = masterlist;
    }
    if let Some(ms) = lookup(source, "retry_interval_ms")? {
        settings.retry_interval_ms = ms;
    }
    if let Some(attempts) = lookup(source, "retry_attempts")? {
        settings.retry_attempts = attempts;
    }
    if let Some(ms) = lookup(source, "settle_window_ms")? {
        settings.settle_window_ms = ms;
    }
    if let Some(ms) = lookup(source, "debounce_ms")? {
        settings.debounce_ms = ms;
    }
    if let Some(debug) = lookup(source, "debug_mode")? {
        settings.debug_mode = debug;
    }
    Ok(())
}
