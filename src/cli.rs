use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line interface for the GeoLite2 lookup server
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "geolite-api",
    about = "Serves IP geolocation lookups from a periodically refreshed GeoLite2 City database",
    version
)]
pub struct Cli {
    /// MaxMind license key used to download database updates
    #[clap(long, env("MAXMIND_LICENSE_KEY"), hide_env_values = true)]
    pub license_key: Option<String>,

    /// Address to bind the web server to
    #[clap(long, env("MAXMIND_HOST"), default_value = "127.0.0.1")]
    pub host: String,

    /// Port to run the web server on
    #[clap(short, long, env("MAXMIND_PORT"), default_value = "8000")]
    pub port: u16,

    /// Database refresh interval in seconds
    #[clap(long, env("MAXMIND_UPDATE_INTERVAL"), default_value = "86400")] // Default: 24 hours
    pub update_interval: u64,

    /// Location of the active GeoLite2 City database
    #[clap(long, env("MAXMIND_DB_PATH"), default_value = "assets/GeoLite2-City.mmdb")]
    pub db_path: PathBuf,

    /// Location of the last downloaded compressed archive
    #[clap(
        long,
        env("MAXMIND_ARCHIVE_PATH"),
        default_value = "assets/GeoLite2-City.tar.gz"
    )]
    pub archive_path: PathBuf,

    /// Provider download endpoint
    #[clap(
        long,
        env("MAXMIND_DOWNLOAD_URL"),
        default_value = "https://download.maxmind.com/app/geoip_download"
    )]
    pub download_url: String,

    /// Database edition to download
    #[clap(long, env("MAXMIND_EDITION_ID"), default_value = "GeoLite2-City")]
    pub edition_id: String,

    /// Timeout for the database download in seconds
    #[clap(long, env("MAXMIND_REQUEST_TIMEOUT"), default_value = "300")]
    pub request_timeout: u64,

    /// Refresh the database immediately on startup
    #[clap(
        long,
        env("MAXMIND_REFRESH_ON_STARTUP"),
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub refresh_on_startup: bool,
}

impl Cli {
    /// Get the request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Get the refresh interval as a Duration
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}
