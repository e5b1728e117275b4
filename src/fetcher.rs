use flate2::bufread::GzDecoder;
use reqwest::Client;
use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};
use tar::Archive;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::{config::Config, error::AppError, store::STAGING_PREFIX, utils::create_http_client};

/// File name suffix of the database member inside the provider archive
const DATABASE_SUFFIX: &str = ".mmdb";

/// A downloaded and extracted database that has not been promoted yet.
///
/// Both files live in a private staging directory that is removed when this
/// value is dropped.
#[derive(Debug)]
pub struct StagedDatabase {
    pub database: PathBuf,
    pub archive: PathBuf,
    pub size: u64,
    _staging: TempDir,
}

/// Downloads database archives from the provider
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    download_url: Url,
    edition_id: String,
}

impl Fetcher {
    pub fn new(client: Client, download_url: Url, edition_id: impl Into<String>) -> Self {
        Self {
            client,
            download_url,
            edition_id: edition_id.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let client = create_http_client(config.request_timeout)?;
        Ok(Self::new(
            client,
            config.download_url.clone(),
            config.edition_id.clone(),
        ))
    }

    /// Download the archive and extract its database into a staging area
    /// created under `destination`.
    ///
    /// Nothing outside the staging area is touched; on error it is removed.
    pub async fn fetch_and_stage(
        &self,
        license_key: &str,
        destination: &Path,
    ) -> Result<StagedDatabase, AppError> {
        if license_key.trim().is_empty() {
            return Err(AppError::ConfigError(
                "MaxMind license key not configured".to_string(),
            ));
        }

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(destination)?;

        let archive = staging
            .path()
            .join(format!("{}.tar.gz", self.edition_id));
        let downloaded = self.download(license_key, &archive).await?;
        tracing::debug!("Downloaded {} bytes to {}", downloaded, archive.display());

        let database = staging
            .path()
            .join(format!("{}{}", self.edition_id, DATABASE_SUFFIX));
        let (source, target) = (archive.clone(), database.clone());
        let size = tokio::task::spawn_blocking(move || extract_database(&source, &target)).await??;

        Ok(StagedDatabase {
            database,
            archive,
            size,
            _staging: staging,
        })
    }

    /// Stream the response body to `target`; returns the number of bytes written
    async fn download(&self, license_key: &str, target: &Path) -> Result<u64, AppError> {
        tracing::info!(
            "Downloading {} from {}",
            self.edition_id,
            self.download_url
        );

        let mut response = self
            .client
            .get(self.download_url.clone())
            .query(&[
                ("edition_id", self.edition_id.as_str()),
                ("suffix", "tar.gz"),
                ("license_key", license_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::from_status(response.status()));
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if written == 0 {
            return Err(AppError::DownloadError {
                status: Some(response.status().as_u16()),
                message: "provider returned an empty body".to_string(),
            });
        }

        Ok(written)
    }
}

fn malformed(err: io::Error) -> AppError {
    AppError::ArchiveFormatError(err.to_string())
}

/// Extract the single database member of a gzip tar archive into `target`
fn extract_database(archive_path: &Path, target: &Path) -> Result<u64, AppError> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut found: Option<String> = None;
    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path().map_err(malformed)?.to_path_buf();
        let is_database = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(DATABASE_SUFFIX));
        if !is_database {
            continue;
        }

        let name = path.display().to_string();
        if let Some(first) = &found {
            return Err(AppError::ArchiveFormatError(format!(
                "Archive contains more than one database: {} and {}",
                first, name
            )));
        }

        let mut out = File::create(target)?;
        io::copy(&mut entry, &mut out).map_err(malformed)?;
        out.sync_all()?;
        found = Some(name);
    }

    match found {
        Some(name) => {
            let size = std::fs::metadata(target)?.len();
            tracing::debug!("Extracted {} ({} bytes)", name, size);
            Ok(size)
        }
        None => Err(AppError::ArchiveFormatError(
            "No .mmdb file found in archive".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, spawn_provider};
    use axum::http::StatusCode;
    use std::time::Duration;

    fn fetcher_for(url: Url) -> Fetcher {
        let client = create_http_client(Duration::from_secs(5)).unwrap();
        Fetcher::new(client, url, "GeoLite2-City")
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn stages_database_and_archive() {
        let database = testutil::us_database();
        let archive = testutil::provider_archive(&database);
        let provider = spawn_provider(StatusCode::OK, archive.clone()).await;
        let dir = tempfile::tempdir().unwrap();

        let staged = fetcher_for(provider.url.clone())
            .fetch_and_stage("secret", dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&staged.database).unwrap(), database);
        assert_eq!(std::fs::read(&staged.archive).unwrap(), archive);
        assert_eq!(staged.size, database.len() as u64);
        assert!(staged.database.starts_with(dir.path()));

        let queries = provider.queries.lock().clone();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains("edition_id=GeoLite2-City"));
        assert!(queries[0].contains("suffix=tar.gz"));
        assert!(queries[0].contains("license_key=secret"));

        drop(staged);
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn non_success_status_is_download_error() {
        let provider = spawn_provider(StatusCode::FORBIDDEN, b"denied".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher_for(provider.url.clone())
            .fetch_and_stage("secret", dir.path())
            .await
            .unwrap_err();

        assert_eq!(err.download_status(), Some(403));
        assert!(!err.to_string().contains("secret"));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn archive_without_database_is_rejected() {
        let archive = testutil::tar_gz(&[("GeoLite2-City/README.txt", b"readme".as_slice())]);
        let provider = spawn_provider(StatusCode::OK, archive).await;
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher_for(provider.url.clone())
            .fetch_and_stage("secret", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ArchiveFormatError(_)));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn archive_with_two_databases_is_rejected() {
        let database = testutil::us_database();
        let archive = testutil::tar_gz(&[
            ("a/GeoLite2-City.mmdb", database.as_slice()),
            ("b/GeoLite2-City.mmdb", database.as_slice()),
        ]);
        let provider = spawn_provider(StatusCode::OK, archive).await;
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher_for(provider.url.clone())
            .fetch_and_stage("secret", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ArchiveFormatError(_)));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn body_that_is_not_gzip_is_rejected() {
        let provider = spawn_provider(StatusCode::OK, b"<html>oops</html>".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher_for(provider.url.clone())
            .fetch_and_stage("secret", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ArchiveFormatError(_)));
    }

    #[tokio::test]
    async fn missing_license_key_skips_download() {
        let provider = spawn_provider(StatusCode::OK, Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher_for(provider.url.clone())
            .fetch_and_stage("  ", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(provider.queries.lock().is_empty());
    }

    #[test]
    fn directories_ending_in_suffix_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "odd.mmdb", std::io::empty())
            .unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let archive = dir.path().join("archive.tar.gz");
        std::fs::write(&archive, bytes).unwrap();

        let err = extract_database(&archive, &dir.path().join("out.mmdb")).unwrap_err();
        assert!(matches!(err, AppError::ArchiveFormatError(_)));
    }
}
