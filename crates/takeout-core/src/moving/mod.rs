//! Placement of media entities into the output tree.
//!
//! A [`MovingStrategy`] turns one entity into a list of file operations and
//! performs them through the shared [`StrategyContext`]. The
//! [`MovingOrchestrator`] drives a strategy over a whole collection.

mod duplicate_copy;
mod ignore_albums;
mod json;
mod nothing;
mod orchestrator;
mod reverse_shortcut;
mod shortcut;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;
use tracing::warn;

use crate::config::{AlbumBehavior, DateDivision, ProcessingConfig};
use crate::error::{Error, Result};
use crate::executor::FileOperationExecutor;
use crate::folder_classify::ALL_PHOTOS;
use crate::media::{FileEntry, MediaRecord};

pub use duplicate_copy::DuplicateCopyStrategy;
pub use ignore_albums::IgnoreAlbumsStrategy;
pub use json::{JsonStrategy, ALBUMS_INFO_FILENAME};
pub use nothing::NothingStrategy;
pub use orchestrator::{MovingOrchestrator, MovingSummary};
pub use reverse_shortcut::ReverseShortcutStrategy;
pub use shortcut::ShortcutStrategy;

/// Sub-folder of ALL_PHOTOS for media shared by a partner account.
pub const PARTNER_SHARED: &str = "PARTNER_SHARED";
/// Where redundant copies go when duplicates are kept.
pub const DUPLICATES_FOLDER: &str = "_Duplicates";
const UNNAMED_ALBUM: &str = "Unnamed album";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Move,
    Copy,
    Shortcut,
    /// Album membership recorded in albums-info.json instead of on disk
    JsonReference,
    Delete,
    Metadata,
    Cleanup,
    /// Synthesized for source files no operation was emitted for
    Unhandled,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Shortcut => "shortcut",
            Self::JsonReference => "json-reference",
            Self::Delete => "delete",
            Self::Metadata => "metadata",
            Self::Cleanup => "cleanup",
            Self::Unhandled => "unhandled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationStatus {
    Completed,
    Failed,
}

/// Outcome of one physical file operation.
///
/// `source` is the input file the operation is attributed to; `target` is
/// where that file is now represented in the output tree. A strategy emits
/// exactly one result per source file. Further links or copies made for the
/// same file (the primary's own album entry) ride along in `derived`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub kind: OperationKind,
    pub source: PathBuf,
    pub target: Option<PathBuf>,
    pub is_primary: bool,
    /// The target is a link rather than a real file
    pub shortcut: bool,
    pub status: OperationStatus,
    pub error: Option<String>,
    #[serde(skip)]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<OperationResult>,
}

impl OperationResult {
    pub fn success(kind: OperationKind, source: &Path, target: Option<PathBuf>, is_primary: bool) -> Self {
        Self {
            kind,
            source: source.to_path_buf(),
            target,
            is_primary,
            shortcut: kind == OperationKind::Shortcut,
            status: OperationStatus::Completed,
            error: None,
            duration: Duration::ZERO,
            derived: Vec::new(),
        }
    }

    pub fn failure(kind: OperationKind, source: &Path, is_primary: bool, error: impl fmt::Display) -> Self {
        Self {
            kind,
            source: source.to_path_buf(),
            target: None,
            is_primary,
            shortcut: false,
            status: OperationStatus::Failed,
            error: Some(error.to_string()),
            duration: Duration::ZERO,
            derived: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    /// This result followed by the ones derived from it.
    pub fn operations(&self) -> impl Iterator<Item = &OperationResult> {
        std::iter::once(self).chain(self.derived.iter())
    }

    /// Whether this operation and every derived one completed.
    pub fn all_succeeded(&self) -> bool {
        self.operations().all(OperationResult::is_success)
    }

    fn timed(self, started: Instant) -> Self {
        Self {
            duration: started.elapsed(),
            ..self
        }
    }
}

/// Free vs. needed bytes on the output volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub available: u64,
    pub required: u64,
}

/// Computes output folders for entities and albums.
#[derive(Debug, Clone)]
pub struct PathLayout {
    output: PathBuf,
    division: DateDivision,
    unknown_date_folder: String,
    divide_partner_shared: bool,
}

impl PathLayout {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            output: config.output.clone(),
            division: config.date_division,
            unknown_date_folder: config.unknown_date_folder.clone(),
            divide_partner_shared: config.divide_partner_shared,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// `<output>/ALL_PHOTOS[/PARTNER_SHARED]/<division>`
    pub fn canonical_dir(&self, entity: &MediaRecord) -> PathBuf {
        let mut dir = self.output.join(ALL_PHOTOS);
        if self.divide_partner_shared && entity.partner_shared() {
            dir.push(PARTNER_SHARED);
        }
        self.push_division(dir, entity.date_taken())
    }

    pub fn album_dir(&self, album: &str) -> PathBuf {
        self.output.join(sanitize_album_name(album))
    }

    pub fn duplicates_dir(&self, entity: &MediaRecord) -> PathBuf {
        self.push_division(self.output.join(DUPLICATES_FOLDER), entity.date_taken())
    }

    fn push_division(&self, mut dir: PathBuf, date: Option<NaiveDateTime>) -> PathBuf {
        if self.division == DateDivision::None {
            return dir;
        }
        let Some(date) = date else {
            dir.push(&self.unknown_date_folder);
            return dir;
        };
        dir.push(format!("{:04}", date.year()));
        if matches!(self.division, DateDivision::Month | DateDivision::Day) {
            dir.push(format!("{:02}", date.month()));
        }
        if self.division == DateDivision::Day {
            dir.push(format!("{:02}", date.day()));
        }
        dir
    }
}

/// Make an album name usable as a single folder name.
pub fn sanitize_album_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim_end();
    match cleaned {
        "" | "." | ".." => UNNAMED_ALBUM.to_string(),
        reserved if reserved == ALL_PHOTOS || reserved == DUPLICATES_FOLDER => format!("{reserved} (album)"),
        other => other.to_string(),
    }
}

/// Everything a strategy needs to perform operations.
pub struct StrategyContext {
    pub config: ProcessingConfig,
    pub executor: Arc<FileOperationExecutor>,
    pub layout: PathLayout,
    /// Filled in before validation for strategies that create copies
    pub disk_space: Option<DiskSpace>,
}

impl StrategyContext {
    pub fn new(config: ProcessingConfig, executor: Arc<FileOperationExecutor>) -> Self {
        let layout = PathLayout::from_config(&config);
        Self {
            config,
            executor,
            layout,
            disk_space: None,
        }
    }

    /// Checks shared by every strategy: output set, distinct from the input
    /// and writable.
    pub async fn validate_common(&self) -> Result<()> {
        let output = &self.config.output;
        if output.as_os_str().is_empty() {
            return Err(Error::Configuration("output directory is not set".to_string()));
        }
        if !self.config.input.as_os_str().is_empty() && same_location(&self.config.input, output) {
            return Err(Error::Configuration(format!(
                "output {} must differ from the input",
                output.display()
            )));
        }

        let not_writable = |e: &dyn fmt::Display| {
            Error::Configuration(format!("output {} is not writable: {e}", output.display()))
        };
        self.executor
            .ensure_directory(output)
            .await
            .map_err(|e| not_writable(&e))?;
        let probe = output.join(".takeout-write-test");
        tokio::fs::write(&probe, b"").await.map_err(|e| not_writable(&e))?;
        tokio::fs::remove_file(&probe).await.ok();
        Ok(())
    }

    /// Move (or copy, in copy mode) `source` into `dir`.
    pub async fn place(
        &self,
        source: &Path,
        dir: &Path,
        is_primary: bool,
        date: Option<NaiveDateTime>,
    ) -> OperationResult {
        let started = Instant::now();
        let copy = self.config.copy_mode;
        let kind = if copy { OperationKind::Copy } else { OperationKind::Move };
        let result = match self.executor.move_or_copy(source, dir, copy).await {
            Ok(target) => {
                self.sync_timestamp(&target, date).await;
                OperationResult::success(kind, source, Some(target), is_primary)
            }
            Err(e) => OperationResult::failure(kind, source, is_primary, e),
        };
        result.timed(started)
    }

    /// Copy an already placed file `from` into `dir`, attributed to `owner`.
    pub async fn copy_into(&self, from: &Path, dir: &Path, owner: &Path, is_primary: bool) -> OperationResult {
        let started = Instant::now();
        let result = match self.executor.copy_to(from, dir).await {
            Ok(target) => OperationResult::success(OperationKind::Copy, owner, Some(target), is_primary),
            Err(e) => OperationResult::failure(OperationKind::Copy, owner, is_primary, e),
        };
        result.timed(started)
    }

    /// Create a link to `target_file` inside `link_dir`, attributed to
    /// `owner`. With `remove_owner` the owner's source file is removed once
    /// the link exists.
    pub async fn link(
        &self,
        target_file: &Path,
        link_dir: &Path,
        owner: &Path,
        is_primary: bool,
        remove_owner: bool,
    ) -> OperationResult {
        let started = Instant::now();
        let link = match self.executor.create_shortcut(target_file, link_dir).await {
            Ok(link) => link,
            Err(e) => return OperationResult::failure(OperationKind::Shortcut, owner, is_primary, e).timed(started),
        };
        if remove_owner {
            if let Err(e) = self.remove_source(owner).await {
                let message = format!("link created at {} but source not removed: {e}", link.display());
                return OperationResult::failure(OperationKind::Shortcut, owner, is_primary, message)
                    .timed(started);
            }
        }
        OperationResult::success(OperationKind::Shortcut, owner, Some(link), is_primary).timed(started)
    }

    /// Remove `source`; its content now lives at `representative`.
    pub async fn delete(
        &self,
        kind: OperationKind,
        source: &Path,
        representative: Option<&Path>,
    ) -> OperationResult {
        let started = Instant::now();
        let result = match self.remove_source(source).await {
            Ok(()) => OperationResult::success(kind, source, representative.map(Path::to_path_buf), false),
            Err(e) => OperationResult::failure(kind, source, false, e),
        };
        result.timed(started)
    }

    /// Dispose of a redundant copy: moved under `_Duplicates/` when
    /// duplicates are kept, removed otherwise.
    pub async fn discard(&self, entity: &MediaRecord, source: &Path, representative: &Path) -> OperationResult {
        if self.config.keep_duplicates {
            let dir = self.layout.duplicates_dir(entity);
            self.place(source, &dir, false, None).await
        } else {
            self.delete(OperationKind::Delete, source, Some(representative)).await
        }
    }

    async fn remove_source(&self, source: &Path) -> Result<()> {
        if self.config.copy_mode {
            return Ok(());
        }
        self.executor.remove_file(source).await
    }

    async fn sync_timestamp(&self, file: &Path, date: Option<NaiveDateTime>) {
        let Some(date) = date.filter(|_| self.config.update_timestamps) else {
            return;
        };
        if let Err(e) = self.executor.set_timestamp(file, date).await {
            warn!(path = %file.display(), error = %e, "Could not set file timestamp");
        }
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    let resolve = |p: &Path| {
        std::fs::canonicalize(p)
            .or_else(|_| std::path::absolute(p))
            .unwrap_or_else(|_| p.to_path_buf())
    };
    resolve(a) == resolve(b)
}

/// Failures for entries left alone because the entity's main placement failed.
fn skip_entries<'a>(entries: impl IntoIterator<Item = &'a FileEntry>, kind: OperationKind) -> Vec<OperationResult> {
    entries
        .into_iter()
        .map(|e| {
            OperationResult::failure(
                kind,
                e.file.source_path(),
                false,
                "skipped because the primary file could not be placed",
            )
        })
        .collect()
}

/// Remove album folders left empty after processing.
async fn prune_empty_album_dirs(ctx: &StrategyContext, processed: &[MediaRecord]) -> Vec<OperationResult> {
    let albums: BTreeSet<&str> = processed.iter().flat_map(|r| r.album_names()).collect();
    let mut results = Vec::new();
    for album in albums {
        let dir = ctx.layout.album_dir(album);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        if matches!(entries.next_entry().await, Ok(None)) {
            let started = Instant::now();
            let result = match tokio::fs::remove_dir(&dir).await {
                Ok(()) => OperationResult::success(OperationKind::Cleanup, &dir, None, false),
                Err(e) => OperationResult::failure(OperationKind::Cleanup, &dir, false, e),
            };
            results.push(result.timed(started));
        }
    }
    results
}

/// One way of materializing albums in the output tree.
#[async_trait]
pub trait MovingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn creates_shortcuts(&self) -> bool;
    fn creates_duplicates(&self) -> bool;

    /// Checked once before any file is touched. Errors abort the run.
    async fn validate_context(&self, ctx: &StrategyContext) -> Result<()> {
        ctx.validate_common().await
    }

    /// Perform every operation for one entity, in order.
    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult>;

    /// Runs once after all entities, with their updated records.
    async fn finalize(&self, _ctx: &StrategyContext, _processed: &[MediaRecord]) -> Vec<OperationResult> {
        Vec::new()
    }
}

pub fn create_strategy(behavior: AlbumBehavior) -> Box<dyn MovingStrategy> {
    match behavior {
        AlbumBehavior::Shortcut => Box::new(ShortcutStrategy),
        AlbumBehavior::ReverseShortcut => Box::new(ReverseShortcutStrategy),
        AlbumBehavior::DuplicateCopy => Box::new(DuplicateCopyStrategy),
        AlbumBehavior::Json => Box::new(JsonStrategy),
        AlbumBehavior::Nothing => Box::new(NothingStrategy),
        AlbumBehavior::IgnoreAlbums => Box::new(IgnoreAlbumsStrategy),
    }
}
