pub mod album_json;
pub mod checkpoint;
pub mod collection;
pub mod concurrency;
pub mod config;
pub mod date;
pub mod dedup;
pub mod discover;
pub mod error;
pub mod executor;
pub mod extras;
pub mod file_record;
pub mod folder_classify;
pub mod media;
pub mod moving;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::date::DateExtractor;
use crate::error::IoResultExt;

pub use checkpoint::{CancellationToken, Checkpoint, CheckpointSaver, PlacedFile, CHECKPOINT_FILENAME};
pub use collection::{CollectionStatistics, MediaCollection};
pub use concurrency::{ConcurrencyController, ConcurrencyKind};
pub use config::{AlbumBehavior, DateDivision, ProcessingConfig};
pub use dedup::{DuplicateDetector, DuplicateSummary};
pub use error::{Error, Result};
pub use executor::FileOperationExecutor;
pub use file_record::{ClassifyRoots, DateAccuracy, DateExtractionMethod, FileRecord};
pub use media::{FileEntry, MediaRecord};
pub use moving::{MovingOrchestrator, MovingStrategy, MovingSummary, OperationKind, OperationResult};

/// Everything a run produced, for printing or `--json-summary`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessResult {
    /// Collection after deduplication and date extraction
    pub statistics: CollectionStatistics,
    pub duplicates: DuplicateSummary,
    pub duplicates_removed: usize,
    pub dates_found: usize,
    pub moving: MovingSummary,
    /// Sources of primary moves that still exist after the run
    pub leftovers: Vec<PathBuf>,
    pub skipped_extras: usize,
    pub warnings: Vec<String>,
}

/// Control options for process execution (resume, cancellation).
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Whether to resume from an existing checkpoint.
    pub resume: bool,
    /// Cancellation token for pause/cancel support.
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn check(&self) -> Result<()> {
        self.cancel_token.as_ref().map_or(Ok(()), CancellationToken::check)
    }
}

/// Type alias for progress callback: stage, current, total, message
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Throttled progress reporter, emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        let now = Instant::now();
        Self {
            inner,
            last_emit: Mutex::new(now.checked_sub(Duration::from_secs(1)).unwrap_or(now)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the whole pipeline: discover, merge duplicates, extract dates, move.
///
/// `extractors` defaults to [`date::default_extractors`]. The progress
/// callback receives the stages `scan`, `dedup`, `date` and `move`.
pub async fn process<'a>(
    mut config: ProcessingConfig,
    extractors: Option<Vec<Arc<dyn DateExtractor>>>,
    control: &ProcessControl,
    progress_callback: &'a ProgressCallback<'a>,
) -> Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);
    config.input = std::path::absolute(&config.input).with_path(&config.input)?;
    config.output = std::path::absolute(&config.output).with_path(&config.output)?;
    control.check()?;

    let controller = ConcurrencyController::new();
    let mut checkpoint_saver = if control.resume {
        CheckpointSaver::resume_or_new(&config)?
    } else {
        CheckpointSaver::new(Checkpoint::new(&config), config.output.clone())
    };

    // Stage 1: walk the export
    checkpoint_saver.set_stage("scan");
    let discovery = discover::discover(&config, Some(&tp))?;
    let mut collection = discovery.collection;
    let mut warnings = discovery.warnings;
    control.check()?;

    // Stage 2: merge byte-identical files
    checkpoint_saver.set_stage("dedup");
    let detector = DuplicateDetector::new(controller);
    let grouping = detector.group_identical(collection.records(), Some(&tp)).await;
    let duplicates = grouping.summary();
    if duplicates.read_errors > 0 {
        warnings.push(format!(
            "{} files could not be read for duplicate detection and were not merged",
            duplicates.read_errors
        ));
    }
    let duplicates_removed = detector.merge_groups(&mut collection, &grouping);
    control.check()?;

    // Stage 3: dates
    checkpoint_saver.set_stage("date");
    let extractors = extractors.unwrap_or_else(|| date::default_extractors(&config));
    let dates_found = collection.extract_dates(&extractors, &controller, Some(&tp)).await?;
    control.check()?;

    // Stage 4: materialize
    let mut orchestrator = MovingOrchestrator::from_config(config, &controller).with_checkpoint(checkpoint_saver);
    if let Some(token) = &control.cancel_token {
        orchestrator = orchestrator.with_cancel_token(token.clone());
    }
    let moving = orchestrator.move_media(&mut collection, Some(&tp)).await?;

    let leftovers = orchestrator.primary_leftovers();
    for path in &leftovers {
        warn!(path = %path.display(), "Source still present after move");
        warnings.push(format!("source still present after move: {}", path.display()));
    }
    warnings.extend(moving.error_samples.iter().cloned());

    let statistics = collection.statistics();
    info!(
        media = statistics.media_count,
        duplicates_removed,
        dates_found,
        failures = moving.failures,
        "Processing finished"
    );

    Ok(ProcessResult {
        statistics,
        duplicates,
        duplicates_removed,
        dates_found,
        moving,
        leftovers,
        skipped_extras: discovery.skipped_extras,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_throttled_progress_always_reports_completion() {
        let calls = AtomicUsize::new(0);
        let callback = |_: &str, _: u64, _: u64, _: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
        };
        let tp = ThrottledProgress::new(&callback);
        tp.report("scan", 0, 10, "");
        // Throttled: within 200ms of the previous emit
        tp.report("scan", 1, 10, "");
        tp.report("scan", 9, 10, "");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_process_end_to_end() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("Takeout/Google Photos");
        let out = dir.path().join("out");
        write(&input, "Photos from 2019/IMG_20190102_030405.jpg", b"same bytes");
        write(&input, "Trip/IMG_20190102_030405.jpg", b"same bytes");
        write(&input, "Photos from 2019/other.jpg", b"different");
        write(
            &input,
            "Photos from 2019/other.jpg.json",
            br#"{"photoTakenTime": {"timestamp": "1546300800"}}"#,
        );
        write(&input, "Photos from 2019/notes.txt", b"not media");

        let mut config = ProcessingConfig::new(&input, &out);
        config.album_behavior = AlbumBehavior::Nothing;
        let stages = Mutex::new(Vec::<String>::new());
        let callback = |stage: &str, _: u64, _: u64, _: &str| {
            let mut stages = stages.lock().unwrap();
            if !stages.iter().any(|s| s == stage) {
                stages.push(stage.to_string());
            }
        };

        let result = process(config, None, &ProcessControl::new(), &callback).await.unwrap();
        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.duplicates.duplicate_groups, 1);
        assert_eq!(result.statistics.media_count, 2);
        assert_eq!(result.dates_found, 2);
        assert_eq!(result.moving.primary_moves, 2);
        assert_eq!(result.moving.deletions, 1);
        assert_eq!(result.moving.failures, 0);
        assert!(result.leftovers.is_empty());

        assert!(out.join("ALL_PHOTOS/2019/IMG_20190102_030405.jpg").is_file());
        assert!(!input.join("Trip/IMG_20190102_030405.jpg").exists());
        assert!(input.join("Photos from 2019/notes.txt").exists());
        assert!(!out.join(CHECKPOINT_FILENAME).exists());
        assert_eq!(*stages.lock().unwrap(), vec!["scan", "dedup", "date", "move"]);
    }

    #[tokio::test]
    async fn test_process_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        write(&input, "Photos from 2020/a.jpg", b"a");
        let token = CancellationToken::new();
        token.cancel();

        let control = ProcessControl::new().with_cancel_token(token);
        let result = process(ProcessingConfig::new(&input, dir.path().join("out")), None, &control, &|_, _, _, _| {}).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(input.join("Photos from 2020/a.jpg").exists());
    }
}
