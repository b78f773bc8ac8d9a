use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::duplicate_copy::{available_space, DuplicateCopyStrategy};
use super::{create_strategy, DiskSpace, MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::checkpoint::{CancellationToken, CheckpointSaver, PlacedFile};
use crate::collection::MediaCollection;
use crate::concurrency::{ConcurrencyController, ConcurrencyKind};
use crate::config::ProcessingConfig;
use crate::error::Result;
use crate::executor::FileOperationExecutor;
use crate::media::MediaRecord;
use crate::ThrottledProgress;

const ERROR_SAMPLES: usize = 5;

/// Counters for one moving run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MovingSummary {
    pub strategy: String,
    pub entities: usize,
    /// Entities restored from a checkpoint instead of being processed
    pub resumed_entities: usize,
    pub primary_moves: usize,
    pub non_primary_moves: usize,
    pub shortcuts_created: usize,
    pub json_references: usize,
    pub deletions: usize,
    pub failures: usize,
    pub total_operations: usize,
    pub error_samples: Vec<String>,
    pub elapsed_ms: u64,
}

impl MovingSummary {
    fn record_all(&mut self, result: &OperationResult) {
        for operation in result.operations() {
            self.record(operation);
        }
    }

    fn record(&mut self, result: &OperationResult) {
        self.total_operations += 1;
        if !result.is_success() {
            self.failures += 1;
            if self.error_samples.len() < ERROR_SAMPLES {
                self.error_samples.push(format!(
                    "{} {}: {}",
                    result.kind,
                    result.source.display(),
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
            return;
        }
        match result.kind {
            OperationKind::Move | OperationKind::Copy if result.is_primary => self.primary_moves += 1,
            OperationKind::Move | OperationKind::Copy => self.non_primary_moves += 1,
            OperationKind::Shortcut => self.shortcuts_created += 1,
            OperationKind::JsonReference => self.json_references += 1,
            OperationKind::Delete => self.deletions += 1,
            OperationKind::Metadata | OperationKind::Cleanup | OperationKind::Unhandled => {}
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failures > 0
    }
}

/// Drives one [`MovingStrategy`] over a whole collection.
pub struct MovingOrchestrator {
    strategy: Box<dyn MovingStrategy>,
    context: StrategyContext,
    max_concurrent: usize,
    cancel_token: Option<CancellationToken>,
    checkpoint: Option<CheckpointSaver>,
    last_results: Vec<OperationResult>,
}

impl MovingOrchestrator {
    pub fn new(strategy: Box<dyn MovingStrategy>, context: StrategyContext, max_concurrent: usize) -> Self {
        Self {
            strategy,
            context,
            max_concurrent: max_concurrent.max(1),
            cancel_token: None,
            checkpoint: None,
            last_results: Vec::new(),
        }
    }

    /// Strategy, executor and concurrency all derived from `config`.
    pub fn from_config(config: ProcessingConfig, controller: &ConcurrencyController) -> Self {
        let executor = Arc::new(FileOperationExecutor::from_config(&config, controller));
        let strategy = create_strategy(config.album_behavior);
        let max_concurrent = if config.sequential {
            1
        } else {
            config
                .max_concurrent
                .unwrap_or_else(|| controller.for_operation(ConcurrencyKind::FileIo))
        };
        Self::new(strategy, StrategyContext::new(config, executor), max_concurrent)
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_checkpoint(mut self, saver: CheckpointSaver) -> Self {
        self.checkpoint = Some(saver);
        self
    }

    pub fn strategy(&self) -> &dyn MovingStrategy {
        self.strategy.as_ref()
    }

    pub fn context(&self) -> &StrategyContext {
        &self.context
    }

    /// Results of the last [`move_media`](Self::move_media) run, in the
    /// order they were applied.
    pub fn last_results(&self) -> &[OperationResult] {
        &self.last_results
    }

    /// Sources of primary moves that reported success but still exist.
    pub fn primary_leftovers(&self) -> Vec<PathBuf> {
        self.last_results
            .iter()
            .filter(|r| r.is_success() && r.is_primary && r.kind == OperationKind::Move)
            .filter(|r| r.source.exists())
            .map(|r| r.source.clone())
            .collect()
    }

    /// Place every entity of `collection` and record the resulting targets
    /// on its files.
    ///
    /// Per-file failures are collected in the summary. Only validation
    /// errors and cancellation abort the run.
    pub async fn move_media(
        &mut self,
        collection: &mut MediaCollection,
        progress: Option<&ThrottledProgress<'_>>,
    ) -> Result<MovingSummary> {
        let started = Instant::now();
        self.last_results.clear();
        let mut summary = MovingSummary {
            strategy: self.strategy.name().to_string(),
            entities: collection.len(),
            ..Default::default()
        };

        if self.strategy.creates_duplicates() && self.context.disk_space.is_none() {
            self.context.disk_space = available_space(self.context.layout.output()).map(|available| DiskSpace {
                available,
                required: DuplicateCopyStrategy::required_space(collection.records()),
            });
        }
        self.strategy.validate_context(&self.context).await?;
        self.context.executor.ensure_directory(self.context.layout.output()).await?;

        let pending = self.restore_completed(collection, &mut summary);
        if let Some(saver) = self.checkpoint.as_mut() {
            saver.set_stage("move");
        }

        let batch_size = if self.context.config.sequential {
            1
        } else {
            self.context.config.batch_size.max(1)
        };
        let total = pending.len() as u64;
        let mut processed = 0u64;
        info!(
            strategy = self.strategy.name(),
            entities = pending.len(),
            resumed = summary.resumed_entities,
            max_concurrent = self.max_concurrent,
            "Moving media"
        );

        for batch in pending.chunks(batch_size) {
            if let Some(token) = &self.cancel_token {
                if let Err(e) = token.check() {
                    if let Some(saver) = self.checkpoint.as_mut() {
                        saver.force_save().await;
                    }
                    info!(processed, total, "Moving cancelled");
                    return Err(e);
                }
            }

            let outcomes: Vec<(usize, Vec<OperationResult>)> = {
                let records = collection.records();
                let strategy = self.strategy.as_ref();
                let ctx = &self.context;
                stream::iter(batch.iter().copied())
                    .map(|i| async move { (i, strategy.process_media_entity(&records[i], ctx).await) })
                    .buffer_unordered(self.max_concurrent)
                    .collect()
                    .await
            };

            for (i, results) in outcomes {
                let Some(record) = collection.get(i) else {
                    continue;
                };
                let results = ensure_coverage(record, results);
                let updated = apply_results(record.clone(), &results);

                let failed = results.iter().any(|r| !r.all_succeeded());
                if !failed {
                    if let Some(saver) = self.checkpoint.as_mut() {
                        saver.mark_entity(placed_files(&updated)).await;
                    }
                }
                for result in &results {
                    result.operations().for_each(|r| self.log_result(r));
                    summary.record_all(result);
                }
                self.last_results.extend(results);
                collection.replace(i, updated);
            }

            processed += batch.len() as u64;
            if let Some(progress) = progress {
                progress.report("move", processed.saturating_sub(1), total, "Moving files");
            }
        }

        let finalized = self
            .strategy
            .finalize(&self.context, collection.records())
            .await;
        for result in &finalized {
            result.operations().for_each(|r| self.log_result(r));
            summary.record_all(result);
        }
        self.last_results.extend(finalized);

        if let Some(saver) = self.checkpoint.as_mut() {
            if summary.has_failures() {
                // Keep the checkpoint so a resumed run retries failed entities
                saver.force_save().await;
            } else {
                saver.mark_completed().await?;
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        for sample in &summary.error_samples {
            warn!(error = %sample, "Moving failure");
        }
        info!(
            primary_moves = summary.primary_moves,
            shortcuts = summary.shortcuts_created,
            deletions = summary.deletions,
            failures = summary.failures,
            elapsed_ms = summary.elapsed_ms,
            "Moving finished"
        );
        Ok(summary)
    }

    /// Apply checkpointed placements to entities finished by a previous
    /// run. Returns the indices still to process.
    fn restore_completed(&self, collection: &mut MediaCollection, summary: &mut MovingSummary) -> Vec<usize> {
        let placed: HashMap<PathBuf, PlacedFile> = self
            .checkpoint
            .as_ref()
            .map(CheckpointSaver::placed_map)
            .unwrap_or_default();
        if placed.is_empty() {
            return (0..collection.len()).collect();
        }

        let mut pending = Vec::new();
        for i in 0..collection.len() {
            let Some(record) = collection.get(i) else {
                continue;
            };
            if !record.source_paths().all(|p| placed.contains_key(p)) {
                pending.push(i);
                continue;
            }
            let restored = record.files().iter().fold(record.clone(), |acc, entry| {
                match placed.get(entry.file.source_path()) {
                    Some(f) => acc.with_file_target(&f.source, &f.target, f.shortcut),
                    None => acc,
                }
            });
            collection.replace(i, restored);
            summary.resumed_entities += 1;
        }
        debug!(resumed = summary.resumed_entities, "Restored entities from checkpoint");
        pending
    }

    fn log_result(&self, result: &OperationResult) {
        let target = result.target.as_deref().map(Path::display);
        if !result.is_success() {
            warn!(
                kind = %result.kind,
                source = %result.source.display(),
                error = result.error.as_deref().unwrap_or_default(),
                "File operation failed"
            );
        } else if self.context.config.verbose {
            info!(kind = %result.kind, source = %result.source.display(), target = ?target, "File operation");
        } else {
            debug!(kind = %result.kind, source = %result.source.display(), target = ?target, "File operation");
        }
    }
}

/// Exactly one result per source file of `entity`. Further results for an
/// already covered source are folded into its `derived` list, and a failure
/// is added for each source the strategy skipped silently.
fn ensure_coverage(entity: &MediaRecord, emitted: Vec<OperationResult>) -> Vec<OperationResult> {
    let mut results: Vec<OperationResult> = Vec::with_capacity(emitted.len());
    let mut position: HashMap<PathBuf, usize> = HashMap::new();
    for mut result in emitted {
        match position.get(&result.source) {
            Some(&i) => {
                debug!(source = %result.source.display(), kind = %result.kind, "Folding extra result for source");
                let nested = std::mem::take(&mut result.derived);
                results[i].derived.push(result);
                results[i].derived.extend(nested);
            }
            None => {
                position.insert(result.source.clone(), results.len());
                results.push(result);
            }
        }
    }

    let primary = entity.primary_file().source_path();
    let missing: Vec<PathBuf> = entity
        .source_paths()
        .filter(|p| !position.contains_key(*p))
        .map(Path::to_path_buf)
        .collect();
    for path in missing {
        warn!(source = %path.display(), "No operation emitted for file");
        results.push(OperationResult::failure(
            OperationKind::Unhandled,
            &path,
            path == primary,
            "no operation emitted by strategy for this source file",
        ));
    }
    results
}

/// The first successful result per source decides that file's target.
fn apply_results(entity: MediaRecord, results: &[OperationResult]) -> MediaRecord {
    let mut assigned: HashSet<&Path> = HashSet::new();
    results
        .iter()
        .filter(|r| r.is_success())
        .fold(entity, |record, r| match r.target.as_deref() {
            Some(target) if record.contains_path(&r.source) && assigned.insert(r.source.as_path()) => {
                record.with_file_target(&r.source, target, r.shortcut)
            }
            _ => record,
        })
}

fn placed_files(record: &MediaRecord) -> Vec<PlacedFile> {
    record
        .files()
        .iter()
        .filter_map(|e| {
            e.file.target_path().map(|target| PlacedFile {
                source: e.file.source_path().to_path_buf(),
                target: target.to_path_buf(),
                shortcut: e.file.is_shortcut(),
            })
        })
        .collect()
}
