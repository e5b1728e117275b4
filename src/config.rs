use crate::{cli::Cli, error::AppError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Runtime configuration resolved from the command line and environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider license key, if one is configured
    pub license_key: Option<String>,

    /// Address the web server binds to
    pub host: String,
    pub port: u16,

    /// Time between two refresh attempts
    pub update_interval: Duration,

    /// Whether the first refresh runs at startup
    pub refresh_on_startup: bool,

    pub db_path: PathBuf,
    pub archive_path: PathBuf,

    /// Provider download endpoint and edition
    pub download_url: Url,
    pub edition_id: String,

    /// Timeout applied to the whole download
    pub request_timeout: Duration,
}

impl Config {
    /// Validate command-line settings and prepare the asset directories
    pub fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        if cli.update_interval == 0 {
            return Err(AppError::ConfigError(
                "Update interval must be greater than zero".to_string(),
            ));
        }

        if cli.request_timeout == 0 {
            return Err(AppError::ConfigError(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if cli.edition_id.trim().is_empty() {
            return Err(AppError::ConfigError("Edition id must not be empty".to_string()));
        }

        if cli.db_path == cli.archive_path {
            return Err(AppError::ConfigError(
                "Database and archive paths must differ".to_string(),
            ));
        }

        let download_url = Url::parse(&cli.download_url).map_err(|e| {
            AppError::ConfigError(format!("Invalid download URL {}: {}", cli.download_url, e))
        })?;

        // Blank keys are treated as missing
        let license_key = cli
            .license_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        if license_key.is_none() {
            tracing::warn!("No MaxMind license key configured, database refresh is disabled");
        }

        for path in [&cli.db_path, &cli.archive_path] {
            ensure_parent_dir(path)?;
        }

        Ok(Config {
            license_key,
            host: cli.host.clone(),
            port: cli.port,
            update_interval: cli.update_interval(),
            refresh_on_startup: cli.refresh_on_startup,
            db_path: cli.db_path.clone(),
            archive_path: cli.archive_path.clone(),
            download_url,
            edition_id: cli.edition_id.trim().to_string(),
            request_timeout: cli.request_timeout(),
        })
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), AppError> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(|e| {
        AppError::ConfigError(format!("Failed to create directory {}: {}", dir.display(), e))
    })
}
