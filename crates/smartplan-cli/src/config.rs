//! Configuration file management for smartplan.
//!
//! Provides a TOML-based config file at `~/.config/smartplan/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default (or error
//! for required settings).

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use smartplan_core::gateway::GeminiConfig;
use smartplan_db::config::DbConfig;
use smartplan_db::models::ModelId;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub model: ModelSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model used when none is chosen per request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the smartplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/smartplan` or
/// `~/.config/smartplan`, including on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("smartplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("smartplan")
}

/// Return the path to the smartplan config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix since it holds credentials.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct AppConfig {
    pub db_config: DbConfig,
    pub gemini: GeminiConfig,
    pub default_model: ModelId,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Resolve configuration from flags, environment, and the config file.
    ///
    /// - DB URL: `cli_db_url` > `SMARTPLAN_DATABASE_URL` > `database.url` > error
    /// - DB password: `SMARTPLAN_DATABASE_PASSWORD` > `database.password` > error
    /// - API key: `GOOGLE_API_KEY` > `model.api_key` > error
    /// - Default model: `cli_model` > `GENAI_MODEL` > `model.default` > `gemini-2.5-flash`
    /// - Endpoint: `SMARTPLAN_MODEL_ENDPOINT` > `model.endpoint` > Gemini public API
    pub fn resolve(cli_db_url: Option<&str>, cli_model: Option<&str>) -> Result<Self> {
        Self::resolve_from(load_config().ok(), cli_db_url, cli_model)
    }

    fn resolve_from(
        file_config: Option<ConfigFile>,
        cli_db_url: Option<&str>,
        cli_model: Option<&str>,
    ) -> Result<Self> {
        let (database, model) = match file_config {
            Some(cfg) => (Some(cfg.database), cfg.model),
            None => (None, ModelSection::default()),
        };

        // Store URL and credential.
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Some(url) = env_var("SMARTPLAN_DATABASE_URL") {
            url
        } else if let Some(ref section) = database {
            section.url.clone()
        } else {
            bail!(
                "database URL not found; set SMARTPLAN_DATABASE_URL or run `smartplan init` to create a config file"
            );
        };
        let Some(password) = env_var("SMARTPLAN_DATABASE_PASSWORD")
            .or_else(|| database.and_then(|section| section.password))
        else {
            bail!(
                "database password not found; set SMARTPLAN_DATABASE_PASSWORD or add database.password to {}",
                config_path().display()
            );
        };
        let db_config = DbConfig::new(db_url).with_password(password);

        // Model credential and selection.
        let Some(api_key) = env_var("GOOGLE_API_KEY").or(model.api_key) else {
            bail!(
                "model API key not found; set GOOGLE_API_KEY or add model.api_key to {}",
                config_path().display()
            );
        };

        let default_model = match cli_model
            .map(str::to_string)
            .or_else(|| env_var("GENAI_MODEL"))
            .or(model.default)
        {
            Some(name) => name
                .trim()
                .parse::<ModelId>()
                .context("invalid default model")?,
            None => ModelId::default(),
        };

        let mut gemini = GeminiConfig::new(api_key);
        if let Some(endpoint) = env_var("SMARTPLAN_MODEL_ENDPOINT").or(model.endpoint) {
            gemini = gemini.with_endpoint(endpoint);
        }

        Ok(Self {
            db_config,
            gemini,
            default_model,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
