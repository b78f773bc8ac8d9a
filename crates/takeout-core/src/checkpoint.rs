use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::ProcessingConfig;
use crate::error::{Error, IoResultExt, Result};

/// Current checkpoint file format version
const CHECKPOINT_VERSION: u32 = 1;

/// Default checkpoint filename
pub const CHECKPOINT_FILENAME: &str = ".takeout-progress.json";
const CHECKPOINT_TEMP_FILENAME: &str = ".takeout-progress.tmp";

/// Where one source file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedFile {
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub shortcut: bool,
}

/// Checkpoint data stored in .takeout-progress.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub options_hash: String,
    /// Files of every entity that finished without failures
    pub placed_files: Vec<PlacedFile>,
    pub completed_entities: usize,
    pub last_stage: String,
    pub completed: bool,
}

impl Checkpoint {
    /// Create a new checkpoint for the given configuration.
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            timestamp: Utc::now(),
            options_hash: compute_options_hash(config),
            placed_files: Vec::new(),
            completed_entities: 0,
            last_stage: String::new(),
            completed: false,
        }
    }

    /// Load checkpoint from output directory.
    pub fn load(output_dir: &Path) -> Result<Option<Self>> {
        let path = output_dir.join(CHECKPOINT_FILENAME);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).with_path(&path)?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(checkpoint))
    }

    /// Save checkpoint to output directory without blocking the runtime.
    pub async fn save_async(&self, output_dir: &Path) -> Result<()> {
        let path = output_dir.join(CHECKPOINT_FILENAME);
        let temp_path = output_dir.join(CHECKPOINT_TEMP_FILENAME);
        let bytes = serde_json::to_vec_pretty(self)?;

        tokio::fs::create_dir_all(output_dir).await.with_path(output_dir)?;
        tokio::fs::write(&temp_path, bytes).await.with_path(&temp_path)?;
        tokio::fs::rename(&temp_path, &path).await.with_path(&path)
    }

    /// Save checkpoint to output directory.
    pub fn save(&self, output_dir: &Path) -> Result<()> {
        let path = output_dir.join(CHECKPOINT_FILENAME);
        let temp_path = output_dir.join(CHECKPOINT_TEMP_FILENAME);

        fs::create_dir_all(output_dir).with_path(output_dir)?;
        // Write to temp file first, then rename for atomicity
        let file = File::create(&temp_path).with_path(&temp_path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        fs::rename(&temp_path, &path).with_path(&path)
    }

    /// Delete checkpoint file from output directory.
    pub fn delete(output_dir: &Path) -> Result<()> {
        let path = output_dir.join(CHECKPOINT_FILENAME);
        if path.exists() {
            fs::remove_file(&path).with_path(&path)?;
        }
        Ok(())
    }

    /// Check if this checkpoint can be resumed with `config`.
    pub fn is_compatible(&self, config: &ProcessingConfig) -> bool {
        self.version == CHECKPOINT_VERSION
            && !self.completed
            && self.options_hash == compute_options_hash(config)
    }

    /// Record the files of one fully processed entity.
    pub fn mark_entity(&mut self, files: impl IntoIterator<Item = PlacedFile>) {
        self.placed_files.extend(files);
        self.completed_entities += 1;
        self.timestamp = Utc::now();
    }

    /// source -> placement for every recorded file.
    pub fn placed_map(&self) -> HashMap<PathBuf, PlacedFile> {
        self.placed_files
            .iter()
            .map(|f| (f.source.clone(), f.clone()))
            .collect()
    }

    /// Update the last stage marker.
    pub fn set_stage(&mut self, stage: &str) {
        self.last_stage = stage.to_string();
        self.timestamp = Utc::now();
    }

    /// Mark processing as completed.
    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.timestamp = Utc::now();
    }
}

/// Compute a hash of the options that decide where files go.
fn compute_options_hash(config: &ProcessingConfig) -> String {
    let flag = |b: bool| if b { b"1" } else { b"0" };
    let mut hasher = Sha256::new();
    hasher.update(config.album_behavior.as_str().as_bytes());
    hasher.update(format!("{:?}", config.date_division).as_bytes());
    hasher.update(flag(config.copy_mode));
    hasher.update(flag(config.keep_duplicates));
    hasher.update(flag(config.divide_partner_shared));
    hasher.update(config.input.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(config.output.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

/// Token for cooperative cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Manages checkpoint saving with throttling to reduce I/O overhead.
pub struct CheckpointSaver {
    checkpoint: Checkpoint,
    output_dir: PathBuf,
    last_save: Instant,
    entities_since_save: usize,
    min_interval: Duration,
    min_entities: usize,
}

impl CheckpointSaver {
    pub fn new(checkpoint: Checkpoint, output_dir: PathBuf) -> Self {
        Self {
            checkpoint,
            output_dir,
            last_save: Instant::now(),
            entities_since_save: 0,
            min_interval: Duration::from_secs(5),
            min_entities: 100,
        }
    }

    /// Load a compatible checkpoint from `config.output`, or start fresh.
    pub fn resume_or_new(config: &ProcessingConfig) -> Result<Self> {
        let checkpoint = match Checkpoint::load(&config.output)? {
            Some(existing) if existing.is_compatible(config) => existing,
            Some(_) => {
                warn!("Checkpoint incompatible with current options, starting fresh");
                Checkpoint::new(config)
            }
            None => Checkpoint::new(config),
        };
        Ok(Self::new(checkpoint, config.output.clone()))
    }

    /// Record a finished entity and maybe save checkpoint.
    pub async fn mark_entity(&mut self, files: impl IntoIterator<Item = PlacedFile>) {
        self.checkpoint.mark_entity(files);
        self.entities_since_save += 1;
        self.maybe_save().await;
    }

    /// Save checkpoint if enough time has passed or enough entities processed.
    async fn maybe_save(&mut self) {
        let should_save = self.last_save.elapsed() >= self.min_interval
            || self.entities_since_save >= self.min_entities;
        if should_save {
            self.force_save().await;
        }
    }

    /// Force save checkpoint to disk.
    pub async fn force_save(&mut self) {
        if let Err(e) = self.checkpoint.save_async(&self.output_dir).await {
            warn!(error = %e, "Failed to save checkpoint");
        }
        self.last_save = Instant::now();
        self.entities_since_save = 0;
    }

    /// Set the current stage.
    pub fn set_stage(&mut self, stage: &str) {
        self.checkpoint.set_stage(stage);
    }

    /// Mark as completed and delete checkpoint file.
    pub async fn mark_completed(&mut self) -> Result<()> {
        self.checkpoint.mark_completed();
        let path = self.output_dir.join(CHECKPOINT_FILENAME);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::io(&path, e)),
            _ => Ok(()),
        }
    }

    pub fn placed_map(&self) -> HashMap<PathBuf, PlacedFile> {
        self.checkpoint.placed_map()
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlbumBehavior, DateDivision};
    use tempfile::tempdir;

    fn placed(source: &str, target: &str) -> PlacedFile {
        PlacedFile {
            source: PathBuf::from(source),
            target: PathBuf::from(target),
            shortcut: false,
        }
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_checkpoint_save_load() {
        let dir = tempdir().unwrap();
        let config = ProcessingConfig::new("/in", dir.path());

        let mut checkpoint = Checkpoint::new(&config);
        checkpoint.mark_entity([placed("/in/a.jpg", "ALL_PHOTOS/2023/a.jpg")]);
        checkpoint.save(dir.path()).unwrap();

        let loaded = Checkpoint::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.version, CHECKPOINT_VERSION);
        assert_eq!(loaded.placed_files.len(), 1);
        assert_eq!(loaded.completed_entities, 1);
        assert!(loaded.is_compatible(&config));
        assert!(!loaded.completed);
        assert!(loaded.placed_map().contains_key(Path::new("/in/a.jpg")));

        Checkpoint::delete(dir.path()).unwrap();
        assert!(Checkpoint::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_options_hash_changes() {
        let base = ProcessingConfig::new("/in", "/out");
        let mut other = base.clone();
        other.album_behavior = AlbumBehavior::DuplicateCopy;
        assert_ne!(compute_options_hash(&base), compute_options_hash(&other));

        let mut other = base.clone();
        other.date_division = DateDivision::Month;
        assert_ne!(compute_options_hash(&base), compute_options_hash(&other));

        // Verbosity does not affect placement
        let mut other = base.clone();
        other.verbose = true;
        assert_eq!(compute_options_hash(&base), compute_options_hash(&other));
    }

    #[tokio::test]
    async fn test_resume_or_new() {
        let dir = tempdir().unwrap();
        let config = ProcessingConfig::new("/in", dir.path());
        let mut saver = CheckpointSaver::new(Checkpoint::new(&config), dir.path().to_path_buf());
        saver.mark_entity([placed("/in/a.jpg", "x")]).await;
        saver.force_save().await;
        assert!(!dir.path().join(CHECKPOINT_TEMP_FILENAME).exists());

        let resumed = CheckpointSaver::resume_or_new(&config).unwrap();
        assert_eq!(resumed.checkpoint().completed_entities, 1);

        let mut changed = config.clone();
        changed.copy_mode = true;
        let fresh = CheckpointSaver::resume_or_new(&changed).unwrap();
        assert_eq!(fresh.checkpoint().completed_entities, 0);

        saver.mark_completed().await.unwrap();
        assert!(!dir.path().join(CHECKPOINT_FILENAME).exists());
        // Nothing left to delete is fine
        saver.mark_completed().await.unwrap();
    }
}
