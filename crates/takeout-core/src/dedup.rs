//! Content-based duplicate detection.
//!
//! Files are bucketed by size first. Only buckets with more than one member
//! are split further, by lowercase extension and a cheap signature over the
//! first 64 KiB, and only signature collisions pay for a full SHA-256.
//! Open file handles are capped at the `Hash` concurrency level across all
//! buckets.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Instant;

use futures::{stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collection::MediaCollection;
use crate::concurrency::{files_per_second, ConcurrencyController, ConcurrencyKind};
use crate::file_record::compare_accuracy;
use crate::media::MediaRecord;
use crate::ThrottledProgress;

const QUICK_SIGNATURE_BYTES: u64 = 64 * 1024;
const HASH_CHUNK_SIZE: usize = 1024 * 1024;
/// Number of recent batch throughputs fed to the adaptive controller.
const THROUGHPUT_WINDOW: usize = 5;

/// Records (by index) that share a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// `None` when the file could not be sized.
    pub size: Option<u64>,
    pub members: Vec<usize>,
}

impl DuplicateGroup {
    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }
}

/// Every input record lands in exactly one group. Groups with more than one
/// member are byte-identical.
#[derive(Debug, Clone, Default)]
pub struct DuplicateGrouping {
    pub groups: BTreeMap<String, DuplicateGroup>,
    /// How many quick signatures were computed.
    pub quick_signatures: usize,
    /// How many full-content hashes were computed.
    pub full_hashes: usize,
    /// Files that could not be read while comparing. They stay unmerged.
    pub read_errors: usize,
}

impl DuplicateGrouping {
    pub fn duplicate_groups(&self) -> impl Iterator<Item = (&str, &DuplicateGroup)> {
        self.groups
            .iter()
            .filter(|(_, g)| g.is_duplicate())
            .map(|(k, g)| (k.as_str(), g))
    }

    pub fn summary(&self) -> DuplicateSummary {
        let mut summary = DuplicateSummary {
            total_groups: self.groups.len(),
            read_errors: self.read_errors,
            ..Default::default()
        };
        for (_, group) in self.duplicate_groups() {
            let extra = group.members.len() - 1;
            summary.duplicate_groups += 1;
            summary.duplicate_files += extra;
            summary.wasted_bytes += group.size.unwrap_or(0) * extra as u64;
        }
        summary
    }

    fn insert_unique(&mut self, index: usize, size: Option<u64>) {
        self.groups.insert(
            unique_key(index),
            DuplicateGroup {
                size,
                members: vec![index],
            },
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateSummary {
    pub total_groups: usize,
    pub duplicate_groups: usize,
    pub duplicate_files: usize,
    pub wasted_bytes: u64,
    pub read_errors: usize,
}

#[derive(Default)]
struct Counters {
    quick_signatures: AtomicUsize,
    full_hashes: AtomicUsize,
    read_errors: AtomicUsize,
}

/// Shared state of one detection run.
struct BucketScan<'a> {
    paths: &'a [&'a Path],
    counters: Counters,
    io_slots: Semaphore,
    io_level: usize,
}

pub struct DuplicateDetector {
    controller: ConcurrencyController,
}

impl DuplicateDetector {
    pub fn new(controller: ConcurrencyController) -> Self {
        Self { controller }
    }

    /// Group `records` by the content of their primary file.
    ///
    /// I/O errors never abort detection: the affected file becomes its own
    /// single-member group and is counted in `read_errors`.
    pub async fn group_identical(
        &self,
        records: &[MediaRecord],
        progress: Option<&ThrottledProgress<'_>>,
    ) -> DuplicateGrouping {
        let paths: Vec<&Path> = records
            .iter()
            .map(|r| r.primary_file().effective_path())
            .collect();
        let level = self.controller.for_operation(ConcurrencyKind::Exif);
        let io_level = self.controller.for_operation(ConcurrencyKind::Hash);
        let mut grouping = DuplicateGrouping::default();

        // Phase 1: size buckets
        let sizes: Vec<(usize, Option<u64>)> = stream::iter(paths.iter().copied().enumerate())
            .map(|(i, path)| async move { (i, file_size(path).await) })
            .buffer_unordered(io_level)
            .collect()
            .await;
        let mut buckets: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, size) in sizes {
            match size {
                Some(size) => buckets.entry(size).or_default().push(i),
                None => {
                    grouping.insert_unique(i, None);
                    grouping.read_errors += 1;
                }
            }
        }

        let total = buckets.len() as u64;
        let mut processed = 0u64;
        let mut shared: Vec<(u64, Vec<usize>)> = Vec::new();
        for (size, mut members) in buckets {
            if let [only] = members[..] {
                grouping.insert_unique(only, Some(size));
                processed += 1;
            } else {
                members.sort_unstable();
                shared.push((size, members));
            }
        }
        debug!(
            unique = processed,
            shared = shared.len(),
            "Size bucketing finished"
        );
        if let Some(progress) = progress {
            if processed > 0 {
                progress.report("dedup", processed - 1, total, "Comparing files");
            }
        }

        // Phases 2 and 3 run per shared size bucket, in adaptive batches
        let scan = BucketScan {
            paths: &paths,
            counters: Counters::default(),
            io_slots: Semaphore::new(io_level),
            io_level,
        };
        let mut samples: VecDeque<f64> = VecDeque::with_capacity(THROUGHPUT_WINDOW + 1);
        let mut batch_size = level;
        let mut pending = shared.into_iter();
        loop {
            let batch: Vec<(u64, Vec<usize>)> = pending.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let started = Instant::now();
            let files: usize = batch.iter().map(|(_, m)| m.len()).sum();
            let results: Vec<Vec<(String, DuplicateGroup)>> = stream::iter(batch.iter())
                .map(|(size, members)| scan.split_size_bucket(*size, members))
                .buffer_unordered(batch.len())
                .collect()
                .await;
            for groups in results {
                grouping.groups.extend(groups);
            }

            processed += batch.len() as u64;
            samples.push_back(files_per_second(files, started.elapsed()));
            if samples.len() > THROUGHPUT_WINDOW {
                samples.pop_front();
            }
            batch_size = self.controller.adaptive(samples.make_contiguous(), level);
            if let Some(progress) = progress {
                progress.report("dedup", processed.saturating_sub(1), total, "Comparing files");
            }
        }

        grouping.quick_signatures = scan.counters.quick_signatures.load(AtomicOrdering::Relaxed);
        grouping.full_hashes = scan.counters.full_hashes.load(AtomicOrdering::Relaxed);
        grouping.read_errors += scan.counters.read_errors.load(AtomicOrdering::Relaxed);
        if grouping.read_errors > 0 {
            warn!(files = grouping.read_errors, "Some files could not be compared and were kept apart");
        }
        grouping
    }

    /// Group the collection and merge every duplicate group into one record.
    /// Returns how many records were removed.
    pub async fn remove_duplicates(
        &self,
        collection: &mut MediaCollection,
        progress: Option<&ThrottledProgress<'_>>,
    ) -> usize {
        let grouping = self.group_identical(collection.records(), progress).await;
        self.merge_groups(collection, &grouping)
    }

    /// Merge each duplicate group of `grouping` into its kept record.
    ///
    /// The kept record is the one with the best date accuracy, then the
    /// shortest primary path, then the earliest position. Every file of the
    /// other members is merged into it before they are removed.
    pub fn merge_groups(&self, collection: &mut MediaCollection, grouping: &DuplicateGrouping) -> usize {
        let records = collection.records();
        let mut removed: HashSet<usize> = HashSet::new();
        let mut merged: Vec<(usize, MediaRecord)> = Vec::new();

        for (key, group) in grouping.duplicate_groups() {
            let mut members = group.members.clone();
            members.sort_by(|&a, &b| keep_order(&records[a], &records[b]).then(a.cmp(&b)));
            let Some((&keep, rest)) = members.split_first() else {
                continue;
            };
            let kept = rest
                .iter()
                .fold(records[keep].clone(), |acc, &i| acc.merge_with(&records[i]));
            debug!(
                signature = key,
                kept = %kept.primary_file().source_path().display(),
                merged = rest.len(),
                "Merged duplicate group"
            );
            removed.extend(rest.iter().copied());
            merged.push((keep, kept));
        }

        for (index, record) in merged {
            collection.replace(index, record);
        }
        collection.remove_indices(&removed);

        let summary = grouping.summary();
        info!(
            groups = summary.total_groups,
            duplicate_groups = summary.duplicate_groups,
            removed = removed.len(),
            wasted_bytes = summary.wasted_bytes,
            "Duplicate removal finished"
        );
        removed.len()
    }
}

fn keep_order(a: &MediaRecord, b: &MediaRecord) -> Ordering {
    compare_accuracy(a.date_accuracy(), b.date_accuracy()).then_with(|| {
        let a_len = a.primary_file().source_path().as_os_str().len();
        let b_len = b.primary_file().source_path().as_os_str().len();
        a_len.cmp(&b_len)
    })
}

impl BucketScan<'_> {
    async fn split_size_bucket(&self, size: u64, members: &[usize]) -> Vec<(String, DuplicateGroup)> {
        let paths = self.paths;
        let mut out = Vec::new();
        let unique = |i: usize| (unique_key(i), DuplicateGroup { size: Some(size), members: vec![i] });

        let mut by_extension: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &i in members {
            by_extension.entry(extension_of(paths[i])).or_default().push(i);
        }

        for (extension, members) in by_extension {
            if let [only] = members[..] {
                out.push(unique(only));
                continue;
            }

            let signatures: Vec<(usize, io::Result<u32>)> = stream::iter(members.iter().copied())
                .map(|i| async move { (i, self.quick_signature(paths[i]).await) })
                .buffer_unordered(self.io_level)
                .collect()
                .await;
            self.counters
                .quick_signatures
                .fetch_add(members.len(), AtomicOrdering::Relaxed);

            let mut by_signature: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (i, signature) in signatures {
                match signature {
                    Ok(fnv) => by_signature
                        .entry(format!("{size}|{extension}|{fnv:08x}"))
                        .or_default()
                        .push(i),
                    Err(e) => {
                        warn!(path = %paths[i].display(), error = %e, "Cannot read file for signature");
                        self.counters.read_errors.fetch_add(1, AtomicOrdering::Relaxed);
                        out.push(unique(i));
                    }
                }
            }

            for (_, members) in by_signature {
                if let [only] = members[..] {
                    out.push(unique(only));
                    continue;
                }

                let hashes: Vec<(usize, io::Result<String>)> = stream::iter(members.iter().copied())
                    .map(|i| async move { (i, self.full_hash(paths[i]).await) })
                    .buffer_unordered(self.io_level)
                    .collect()
                    .await;
                self.counters
                    .full_hashes
                    .fetch_add(members.len(), AtomicOrdering::Relaxed);

                let mut by_hash: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                for (i, hash) in hashes {
                    match hash {
                        Ok(hash) => by_hash.entry(hash).or_default().push(i),
                        Err(e) => {
                            warn!(path = %paths[i].display(), error = %e, "Cannot hash file");
                            self.counters.read_errors.fetch_add(1, AtomicOrdering::Relaxed);
                            out.push(unique(i));
                        }
                    }
                }

                for (hash, mut members) in by_hash {
                    if let [only] = members[..] {
                        out.push(unique(only));
                    } else {
                        members.sort_unstable();
                        out.push((
                            format!("{size}|{extension}|{hash}"),
                            DuplicateGroup {
                                size: Some(size),
                                members,
                            },
                        ));
                    }
                }
            }
        }
        out
    }

    /// FNV-1a (32 bit) over up to the first 64 KiB.
    async fn quick_signature(&self, path: &Path) -> io::Result<u32> {
        let _slot = self.io_slots.acquire().await.map_err(io::Error::other)?;
        let file = File::open(path).await?;
        let mut head = Vec::with_capacity(QUICK_SIGNATURE_BYTES as usize);
        file.take(QUICK_SIGNATURE_BYTES).read_to_end(&mut head).await?;
        Ok(fnv1a32(&head))
    }

    /// SHA-256 over the complete file, read in chunks.
    async fn full_hash(&self, path: &Path) -> io::Result<String> {
        let _slot = self.io_slots.acquire().await.map_err(io::Error::other)?;
        let mut file = File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

fn unique_key(index: usize) -> String {
    format!("unique:{index}")
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        Ok(_) => {
            warn!(path = %path.display(), "Not a regular file, treating as unique");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot stat file, treating as unique");
            None
        }
    }
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0x811c_9dc5u32, |hash, &b| (hash ^ u32::from(b)).wrapping_mul(0x0100_0193))
}
