use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::concurrency::{ConcurrencyController, ConcurrencyKind};
use crate::date::{self, DateExtractor};
use crate::dedup::DuplicateDetector;
use crate::error::Result;
use crate::file_record::DateExtractionMethod;
use crate::media::MediaRecord;
use crate::ThrottledProgress;

/// Aggregate numbers about a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStatistics {
    pub media_count: usize,
    pub file_count: usize,
    pub with_date: usize,
    pub without_date: usize,
    pub with_albums: usize,
    pub album_count: usize,
    pub partner_shared: usize,
    pub by_method: BTreeMap<DateExtractionMethod, usize>,
}

/// Ordered set of media records. Order is the processing order.
#[derive(Debug, Clone, Default)]
pub struct MediaCollection {
    records: Vec<MediaRecord>,
}

impl From<Vec<MediaRecord>> for MediaCollection {
    fn from(records: Vec<MediaRecord>) -> Self {
        Self { records }
    }
}

impl MediaCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MediaRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[MediaRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaRecord> {
        self.records.iter()
    }

    pub fn push(&mut self, record: MediaRecord) {
        self.records.push(record);
    }

    /// Swap in a new version of the record at `index`.
    pub fn replace(&mut self, index: usize, record: MediaRecord) {
        if let Some(slot) = self.records.get_mut(index) {
            *slot = record;
        }
    }

    /// Replace everything, e.g. with the output of an album detector.
    pub fn replace_all(&mut self, records: Vec<MediaRecord>) {
        self.records = records;
    }

    pub fn into_records(self) -> Vec<MediaRecord> {
        self.records
    }

    /// Drop the records at `indices`, keeping the order of the rest.
    pub(crate) fn remove_indices(&mut self, indices: &HashSet<usize>) {
        if indices.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.records);
        self.records = records
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, r)| r)
            .collect();
    }

    /// Merge byte-identical records. Returns how many records were removed.
    pub async fn remove_duplicates(
        &mut self,
        detector: &DuplicateDetector,
        progress: Option<&ThrottledProgress<'_>>,
    ) -> usize {
        detector.remove_duplicates(self, progress).await
    }

    /// Fill in dates for undated records by trying `extractors` in order on
    /// each record's primary file. Returns how many records got a date.
    pub async fn extract_dates(
        &mut self,
        extractors: &[Arc<dyn DateExtractor>],
        controller: &ConcurrencyController,
        progress: Option<&ThrottledProgress<'_>>,
    ) -> Result<usize> {
        let pending: Vec<usize> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.date_taken().is_none())
            .map(|(i, _)| i)
            .collect();
        let total = pending.len() as u64;
        let batch_size = controller.for_operation(ConcurrencyKind::Exif);
        let mut found = 0;
        let mut processed = 0u64;

        for batch in pending.chunks(batch_size) {
            let tasks = batch.iter().map(|&i| {
                let path = self.records[i].primary_file().effective_path().to_path_buf();
                let extractors = extractors.to_vec();
                async move {
                    let result =
                        tokio::task::spawn_blocking(move || date::extract_first(&extractors, &path)).await;
                    (i, result)
                }
            });
            let results = join_all(tasks).await;

            // Write back only after the whole batch finished
            for (i, result) in results {
                let record = self.records[i].clone();
                let updated = match result? {
                    Some(found_date) => {
                        found += 1;
                        record.with_date(
                            Some(found_date.date),
                            Some(found_date.method.default_accuracy()),
                            found_date.method,
                        )
                    }
                    None => record.with_date(None, None, DateExtractionMethod::None),
                };
                self.records[i] = updated;
            }

            processed += batch.len() as u64;
            if let Some(progress) = progress {
                progress.report("date", processed.saturating_sub(1), total, "Extracting dates");
            }
            debug!(processed, total, "Date extraction batch finished");
        }

        info!(found, total, "Date extraction finished");
        Ok(found)
    }

    pub fn statistics(&self) -> CollectionStatistics {
        let mut stats = CollectionStatistics {
            media_count: self.records.len(),
            ..Default::default()
        };
        let mut albums: BTreeSet<&str> = BTreeSet::new();
        for r in &self.records {
            stats.file_count += r.file_count();
            if r.date_taken().is_some() {
                stats.with_date += 1;
            } else {
                stats.without_date += 1;
            }
            let names = r.album_names();
            if !names.is_empty() {
                stats.with_albums += 1;
            }
            albums.extend(names);
            if r.partner_shared() {
                stats.partner_shared += 1;
            }
            *stats.by_method.entry(r.date_extraction_method()).or_default() += 1;
        }
        stats.album_count = albums.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_record::FileRecord;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::path::Path;

    struct FixedDate(DateExtractionMethod, &'static str, NaiveDateTime);

    impl DateExtractor for FixedDate {
        fn method(&self) -> DateExtractionMethod {
            self.0
        }

        fn extract(&self, path: &Path) -> Option<NaiveDateTime> {
            path.to_string_lossy().contains(self.1).then_some(self.2)
        }
    }

    fn at(y: i32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap()
    }

    fn collection(paths: &[(&str, Option<&str>)]) -> MediaCollection {
        paths
            .iter()
            .map(|(p, album)| MediaRecord::new(album.map(String::from), FileRecord::new(*p)))
            .collect::<Vec<_>>()
            .into()
    }

    #[tokio::test]
    async fn test_extract_dates_in_priority_order() {
        let mut c = collection(&[("json/a.jpg", None), ("exif/b.jpg", None), ("none/c.jpg", None)]);
        let extractors: Vec<Arc<dyn DateExtractor>> = vec![
            Arc::new(FixedDate(DateExtractionMethod::Json, "json", at(2001))),
            Arc::new(FixedDate(DateExtractionMethod::Exif, "exif", at(2002))),
        ];
        let found = c
            .extract_dates(&extractors, &ConcurrencyController::with_cores(1), None)
            .await
            .unwrap();
        assert_eq!(found, 2);
        assert_eq!(c.records()[0].date_taken(), Some(at(2001)));
        assert_eq!(c.records()[0].date_extraction_method(), DateExtractionMethod::Json);
        assert_eq!(c.records()[1].date_extraction_method(), DateExtractionMethod::Exif);
        assert_eq!(c.records()[2].date_taken(), None);
        assert_eq!(c.records()[2].date_extraction_method(), DateExtractionMethod::None);
    }

    #[tokio::test]
    async fn test_extract_dates_skips_dated_records() {
        let dated = MediaRecord::new(None, FileRecord::new("json/a.jpg")).with_date(
            Some(at(1999)),
            Some(crate::DateAccuracy::PERFECT),
            DateExtractionMethod::Json,
        );
        let mut c = MediaCollection::from(vec![dated]);
        let extractors: Vec<Arc<dyn DateExtractor>> =
            vec![Arc::new(FixedDate(DateExtractionMethod::Guess, "json", at(2020)))];
        let found = c
            .extract_dates(&extractors, &ConcurrencyController::with_cores(1), None)
            .await
            .unwrap();
        assert_eq!(found, 0);
        assert_eq!(c.records()[0].date_taken(), Some(at(1999)));
    }

    #[test]
    fn test_statistics() {
        let mut c = collection(&[("a.jpg", None), ("Trip/b.jpg", Some("Trip")), ("Fav/c.jpg", Some("Fav"))]);
        let shared = c.records()[0].clone().with_partner_shared(true);
        c.replace(0, shared);
        let stats = c.statistics();
        assert_eq!(stats.media_count, 3);
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.without_date, 3);
        assert_eq!(stats.with_albums, 2);
        assert_eq!(stats.album_count, 2);
        assert_eq!(stats.partner_shared, 1);
        assert_eq!(stats.by_method.get(&DateExtractionMethod::None), Some(&3));
    }

    #[test]
    fn test_remove_indices_keeps_order() {
        let mut c = collection(&[("a", None), ("b", None), ("c", None), ("d", None)]);
        c.remove_indices(&HashSet::from([1, 2]));
        let paths: Vec<&Path> = c.iter().map(|r| r.primary_file().source_path()).collect();
        assert_eq!(paths, vec![Path::new("a"), Path::new("d")]);
    }
}
