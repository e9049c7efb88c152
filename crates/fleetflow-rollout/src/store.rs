//! File-backed image store
//!
//! Keeps image metadata and per-app deploy history in
//! `<state_dir>/images.json`. The previous document is kept as a backup on
//! every save.

use crate::error::{Result, RolloutError};
use crate::manager::{App, ImageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STORE_VERSION: u32 = 1;
const IMAGES_FILE: &str = "images.json";
const IMAGES_BACKUP: &str = "images.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Default number of images kept per application
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Image metadata and deploy history for all applications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRegistry {
    /// Document version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Metadata indexed by image reference
    #[serde(default)]
    pub images: BTreeMap<String, ImageMetadata>,

    /// Deploy history indexed by app name
    #[serde(default)]
    pub apps: BTreeMap<String, AppImages>,
}

impl Default for ImageRegistry {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            images: BTreeMap::new(),
            apps: BTreeMap::new(),
        }
    }
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the processes `image` declares, replacing earlier metadata
    pub fn register_image(&mut self, image: impl Into<String>, processes: Vec<String>) {
        let mut processes = processes;
        processes.sort();
        processes.dedup();
        self.images.insert(
            image.into(),
            ImageMetadata {
                processes,
                registered_at: Utc::now(),
            },
        );
        self.updated_at = Utc::now();
    }

    pub fn processes(&self, image: &str) -> Option<&[String]> {
        self.images.get(image).map(|m| m.processes.as_slice())
    }

    pub fn current_image(&self, app: &str) -> Option<&str> {
        self.apps
            .get(app)
            .and_then(|a| a.history.last())
            .map(|r| r.image.as_str())
    }

    /// Append `image` to the app history, keeping at most `limit` entries
    pub fn append_image(&mut self, app: &str, image: impl Into<String>, limit: usize) {
        let entry = self.apps.entry(app.to_string()).or_default();
        entry.history.push(ImageRecord {
            image: image.into(),
            deployed_at: Utc::now(),
        });
        let limit = limit.max(1);
        if entry.history.len() > limit {
            let excess = entry.history.len() - limit;
            entry.history.drain(..excess);
        }
        self.updated_at = Utc::now();
    }

    /// Deploy history, oldest first
    pub fn history(&self, app: &str) -> &[ImageRecord] {
        self.apps
            .get(app)
            .map(|a| a.history.as_slice())
            .unwrap_or_default()
    }
}

/// Metadata of one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Declared process names, sorted
    pub processes: Vec<String>,

    pub registered_at: DateTime<Utc>,
}

/// Deploy history of one application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppImages {
    pub history: Vec<ImageRecord>,
}

/// One deployed image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image: String,
    pub deployed_at: DateTime<Utc>,
}

/// Image store persisted under a state directory
pub struct FileImageStore {
    state_dir: PathBuf,
    history_size: usize,
    write: Mutex<()>,
}

impl FileImageStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            history_size: DEFAULT_HISTORY_SIZE,
            write: Mutex::new(()),
        }
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    fn images_path(&self) -> PathBuf {
        self.state_dir.join(IMAGES_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(IMAGES_BACKUP)
    }

    /// Load the registry, empty if nothing was saved yet
    pub async fn load(&self) -> Result<ImageRegistry> {
        let stored: Option<ImageRegistry> =
            read_json(&self.images_path(), &self.backup_path()).await?;
        let registry: ImageRegistry = match stored {
            Some(registry) => registry,
            None => {
                tracing::debug!("Image registry not found, returning empty registry");
                return Ok(ImageRegistry::new());
            }
        };

        if registry.version > STORE_VERSION {
            return Err(RolloutError::StateError(format!(
                "Image registry version {} is newer than supported version {}",
                registry.version, STORE_VERSION
            )));
        }

        tracing::debug!("Loaded image registry with {} images", registry.images.len());
        Ok(registry)
    }

    /// Save the registry, keeping the previous document as backup
    pub async fn save(&self, registry: &ImageRegistry) -> Result<()> {
        write_json(&self.images_path(), &self.backup_path(), registry).await?;
        tracing::debug!("Saved image registry with {} images", registry.images.len());
        Ok(())
    }

    /// Record the processes declared by `image`
    pub async fn register_image(&self, image: &str, processes: Vec<String>) -> Result<()> {
        let _guard = self.write.lock().await;
        let mut registry = self.load().await?;
        registry.register_image(image, processes);
        self.save(&registry).await
    }

    /// Deploy history of `app`, oldest first
    pub async fn history(&self, app: &App) -> Result<Vec<ImageRecord>> {
        Ok(self.load().await?.history(app.name()).to_vec())
    }

    /// Acquire the state directory lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        StateLock::acquire(&self.state_dir).await
    }
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn current_image(&self, app: &App) -> Result<Option<String>> {
        Ok(self
            .load()
            .await?
            .current_image(app.name())
            .map(str::to_string))
    }

    async fn image_processes(&self, image: &str) -> Result<Vec<String>> {
        self.load()
            .await?
            .processes(image)
            .map(<[String]>::to_vec)
            .ok_or_else(|| RolloutError::ImageNotFound(image.to_string()))
    }

    async fn append_image(&self, app: &App, image: &str) -> Result<()> {
        let _guard = self.write.lock().await;
        let mut registry = self.load().await?;
        registry.append_image(app.name(), image, self.history_size);
        self.save(&registry).await
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state directory lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Acquire the lock in `state_dir`
    ///
    /// The lock file is created exclusively. A lock older than one hour is
    /// considered abandoned and taken over once.
    pub async fn acquire(state_dir: &Path) -> Result<Self> {
        ensure_dir(state_dir).await?;

        let lock_path = state_dir.join(LOCK_FILE);
        let content = serde_json::to_vec_pretty(&LockInfo::current())?;

        match create_exclusive(&lock_path, &content).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                clear_stale_lock(&lock_path).await?;
                create_exclusive(&lock_path, &content)
                    .await
                    .map_err(|e| match e.kind() {
                        ErrorKind::AlreadyExists => RolloutError::LockError(
                            "State lock was taken by another process".to_string(),
                        ),
                        _ => e.into(),
                    })?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!("Acquired state lock {}", lock_path.display());
        Ok(Self {
            lock_path,
            released: false,
        })
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            match fs::remove_file(&self.lock_path).await {
                Ok(()) => tracing::debug!("Released state lock"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl LockInfo {
    fn current() -> Self {
        Self {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        }
    }
}

/// Create `path` with `content`, failing if it already exists
async fn create_exclusive(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = match file.write_all(content).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = fs::remove_file(path).await;
    }
    written
}

/// Remove the lock at `lock_path` if its holder abandoned it
async fn clear_stale_lock(lock_path: &Path) -> Result<()> {
    let content = match fs::read_to_string(lock_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    // An unreadable lock is one still being written by its holder
    let lock_info: LockInfo = serde_json::from_str(&content).map_err(|_| {
        RolloutError::LockError("State lock is being acquired by another process".to_string())
    })?;

    let age = Utc::now().signed_duration_since(lock_info.acquired_at);
    if age.num_hours() < 1 {
        return Err(RolloutError::LockError(format!(
            "State is locked by {} since {}",
            lock_info.holder, lock_info.acquired_at
        )));
    }

    tracing::warn!("Removing stale lock from {}", lock_info.holder);
    match fs::remove_file(lock_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
        tracing::debug!("Created state directory: {}", dir.display());
    }
    Ok(())
}

/// Read a JSON document, `None` when neither it nor its backup exists
///
/// A missing document with a backup left behind means a save was cut short;
/// the backup is the last complete state.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path, backup: &Path) -> Result<Option<T>> {
    let source = if path.exists() {
        path
    } else if backup.exists() {
        tracing::warn!(
            "{} is missing, reading backup {}",
            path.display(),
            backup.display()
        );
        backup
    } else {
        return Ok(None);
    };
    let content = fs::read_to_string(source).await?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Write a JSON document through a temporary file, copying the existing one
/// to `backup` first
///
/// The document at `path` is only ever replaced by rename, so it is either
/// the old or the new content.
pub(crate) async fn write_json<T: Serialize>(path: &Path, backup: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        ensure_dir(dir).await?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp_path = tmp_path(path);
    fs::write(&tmp_path, content).await?;

    if path.exists() {
        fs::copy(path, backup).await?;
    }
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
