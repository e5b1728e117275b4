use arc_swap::ArcSwapOption;
use chrono::Utc;
use maxminddb::Reader;
use parking_lot::Mutex;
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    config::Config,
    error::AppError,
    models::{DatabaseHandle, RefreshOutcome},
};

/// Name prefix of the temporary entries a refresh creates next to the
/// canonical files
pub const STAGING_PREFIX: &str = ".staging-";

/// A database that has been read into memory and is ready for lookups
pub struct LoadedDatabase {
    pub handle: DatabaseHandle,
    pub reader: Reader<Vec<u8>>,
}

/// Owns the active database and the archive it was extracted from.
///
/// New databases are promoted by renaming a fully written file over the
/// canonical path and then swapping the in-memory reader, so lookups see
/// either the previous database or the new one in full.
pub struct DatabaseStore {
    db_path: PathBuf,
    archive_path: PathBuf,
    current: ArcSwapOption<LoadedDatabase>,
    version: AtomicU64,
    last_outcome: Mutex<Option<RefreshOutcome>>,
}

impl DatabaseStore {
    /// Create an empty store; nothing is served until `replace` succeeds
    pub fn new(db_path: impl Into<PathBuf>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            archive_path: archive_path.into(),
            current: ArcSwapOption::empty(),
            version: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
        }
    }

    /// Create a store and serve the database already on disk, if any
    pub async fn open(config: &Config) -> Self {
        let store = Self::new(&config.db_path, &config.archive_path);

        // Leftovers of a refresh interrupted by a crash or kill
        let archive_dir = parent_or_current(&store.archive_path);
        sweep_staging(&store.staging_dir()).await;
        if archive_dir != store.staging_dir() {
            sweep_staging(&archive_dir).await;
        }

        match tokio::fs::try_exists(&store.db_path).await {
            Ok(true) => match load_reader(store.db_path.clone()).await {
                Ok(reader) => {
                    let handle = store.activate(reader);
                    tracing::info!(
                        "Loaded existing database {} (version {})",
                        handle.path.display(),
                        handle.version
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Existing database {} is unusable: {}",
                        store.db_path.display(),
                        e
                    );
                }
            },
            Ok(false) => {
                tracing::info!(
                    "No database at {} yet, lookups unavailable until the first refresh",
                    store.db_path.display()
                );
            }
            Err(e) => {
                tracing::warn!("Failed to check {}: {}", store.db_path.display(), e);
            }
        }

        store
    }

    pub fn is_available(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn current_handle(&self) -> Option<DatabaseHandle> {
        self.current().map(|db| db.handle.clone())
    }

    /// Snapshot of the active database; stays valid across later replacements
    pub fn current(&self) -> Option<Arc<LoadedDatabase>> {
        self.current.load_full()
    }

    /// Promote `new_file` to the active database.
    ///
    /// The file must be fully written and must live on the same filesystem as
    /// the canonical path. On failure the previous database stays active.
    pub async fn replace(&self, new_file: &Path) -> Result<DatabaseHandle, AppError> {
        let reader = load_reader(new_file.to_path_buf()).await.map_err(|e| {
            AppError::ArchiveFormatError(format!("extracted database is unreadable: {}", e))
        })?;

        tokio::fs::rename(new_file, &self.db_path)
            .await
            .map_err(|e| {
                AppError::IoError(format!(
                    "Failed to move database into {}: {}",
                    self.db_path.display(),
                    e
                ))
            })?;

        Ok(self.activate(reader))
    }

    /// Make `archive` the downloadable archive.
    ///
    /// The archive is copied next to the canonical path and renamed over it,
    /// so `archive` may live on another filesystem.
    pub async fn promote_archive(&self, archive: &Path) -> Result<(), AppError> {
        let (source, target) = (archive.to_path_buf(), self.archive_path.clone());
        tokio::task::spawn_blocking(move || copy_into_place(&source, &target))
            .await?
            .map_err(|e| {
                AppError::IoError(format!(
                    "Failed to move archive into {}: {}",
                    self.archive_path.display(),
                    e
                ))
            })
    }

    /// Location of the last successfully downloaded archive
    pub async fn archive_path(&self) -> Result<PathBuf, AppError> {
        match tokio::fs::try_exists(&self.archive_path).await {
            Ok(true) => Ok(self.archive_path.clone()),
            Ok(false) => Err(AppError::NotFound("Database archive not found".to_string())),
            Err(e) => Err(AppError::IoError(e.to_string())),
        }
    }

    /// Directory in which refresh attempts stage their downloads
    pub fn staging_dir(&self) -> PathBuf {
        parent_or_current(&self.db_path)
    }

    pub fn record_outcome(&self, outcome: RefreshOutcome) {
        *self.last_outcome.lock() = Some(outcome);
    }

    pub fn last_outcome(&self) -> Option<RefreshOutcome> {
        self.last_outcome.lock().clone()
    }

    fn activate(&self, reader: Reader<Vec<u8>>) -> DatabaseHandle {
        let handle = DatabaseHandle {
            path: self.db_path.clone(),
            loaded_at: Utc::now(),
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
        };

        self.current.store(Some(Arc::new(LoadedDatabase {
            handle: handle.clone(),
            reader,
        })));

        handle
    }
}

fn parent_or_current(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn copy_into_place(source: &Path, target: &Path) -> io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(parent_or_current(target))?;

    let mut input = File::open(source)?;
    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    staged.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Remove every staging entry left in `dir`
async fn sweep_staging(dir: &Path) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Skipping staging cleanup of {}: {}", dir.display(), e);
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }

        let path = entry.path();
        let removed = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };

        match removed {
            Ok(()) => tracing::info!("Removed stale staging entry {}", path.display()),
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

async fn load_reader(path: PathBuf) -> Result<Reader<Vec<u8>>, AppError> {
    let reader = tokio::task::spawn_blocking(move || Reader::open_readfile(path)).await??;
    Ok(reader)
}
