use std::path::Path;

use chrono::NaiveDateTime;

use crate::file_record::{compare_accuracy, DateAccuracy, DateExtractionMethod, FileRecord};

/// A physical file together with the album it was found in (`None` for
/// year folders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub album: Option<String>,
    pub file: FileRecord,
}

/// A logical photo or video, possibly backed by several identical files.
///
/// Immutable: every `with_*` method returns a new value. `files` is never
/// empty and never holds the same source path twice.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    files: Vec<FileEntry>,
    date_taken: Option<NaiveDateTime>,
    date_accuracy: Option<DateAccuracy>,
    date_extraction_method: DateExtractionMethod,
    partner_shared: bool,
}

impl MediaRecord {
    pub fn new(album: Option<String>, file: FileRecord) -> Self {
        Self {
            files: vec![FileEntry {
                album,
                file: file.with_ranking(0),
            }],
            date_taken: None,
            date_accuracy: None,
            date_extraction_method: DateExtractionMethod::None,
            partner_shared: false,
        }
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Lowest-ranked entry; the first inserted one wins ties.
    pub fn primary_entry(&self) -> &FileEntry {
        // `files` is never empty and min_by_key keeps the first minimum
        self.files
            .iter()
            .min_by_key(|e| e.file.ranking())
            .unwrap_or(&self.files[0])
    }

    pub fn primary_file(&self) -> &FileRecord {
        &self.primary_entry().file
    }

    /// Entries other than the primary, in rank order.
    pub fn secondary_entries(&self) -> impl Iterator<Item = &FileEntry> {
        let primary = self.primary_file().source_path().to_path_buf();
        let mut rest: Vec<&FileEntry> = self
            .files
            .iter()
            .filter(|e| e.file.source_path() != primary.as_path())
            .collect();
        rest.sort_by_key(|e| e.file.ranking());
        rest.into_iter()
    }

    /// Distinct album names in insertion order.
    pub fn album_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.files.iter().filter_map(|e| e.album.as_deref()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn has_albums(&self) -> bool {
        self.files.iter().any(|e| e.album.is_some())
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.files.iter().any(|e| e.file.source_path() == path)
    }

    pub fn source_paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|e| e.file.source_path())
    }

    pub fn date_taken(&self) -> Option<NaiveDateTime> {
        self.date_taken
    }

    pub fn date_accuracy(&self) -> Option<DateAccuracy> {
        self.date_accuracy
    }

    pub fn date_extraction_method(&self) -> DateExtractionMethod {
        self.date_extraction_method
    }

    pub fn partner_shared(&self) -> bool {
        self.partner_shared
    }

    pub fn with_date(
        self,
        date_taken: Option<NaiveDateTime>,
        date_accuracy: Option<DateAccuracy>,
        method: DateExtractionMethod,
    ) -> Self {
        let files = self
            .files
            .into_iter()
            .map(|e| FileEntry {
                album: e.album,
                file: e.file.with_date_accuracy(date_accuracy),
            })
            .collect();
        Self {
            files,
            date_taken,
            date_accuracy,
            date_extraction_method: method,
            ..self
        }
    }

    /// Add a file ranked after every existing one. Known paths are ignored.
    pub fn with_file(mut self, album: Option<String>, file: FileRecord) -> Self {
        if self.contains_path(file.source_path()) {
            return self;
        }
        let ranking = self.next_ranking();
        self.files.push(FileEntry {
            album,
            file: file.with_ranking(ranking),
        });
        self
    }

    pub fn with_files(self, entries: impl IntoIterator<Item = FileEntry>) -> Self {
        entries
            .into_iter()
            .fold(self, |acc, e| acc.with_file(e.album, e.file))
    }

    /// Drop the entries belonging to `album`. If that would leave no files,
    /// the entries are kept with their album cleared instead.
    pub fn without_album(self, album: &str) -> Self {
        let (dropped, kept): (Vec<FileEntry>, Vec<FileEntry>) = self
            .files
            .iter()
            .cloned()
            .partition(|e| e.album.as_deref() == Some(album));
        if dropped.is_empty() {
            return self;
        }
        let files = if kept.is_empty() {
            dropped
                .into_iter()
                .map(|e| FileEntry {
                    album: None,
                    file: e.file,
                })
                .collect()
        } else {
            kept
        };
        Self { files, ..self }.normalized()
    }

    pub fn with_partner_shared(self, partner_shared: bool) -> Self {
        Self {
            partner_shared,
            ..self
        }
    }

    /// Record where the file at `source` ended up.
    pub fn with_file_target(self, source: &Path, target: &Path, is_shortcut: bool) -> Self {
        let files = self
            .files
            .into_iter()
            .map(|e| {
                if e.file.source_path() == source {
                    FileEntry {
                        album: e.album,
                        file: e.file.with_target(target, is_shortcut),
                    }
                } else {
                    e
                }
            })
            .collect();
        Self { files, ..self }
    }

    /// Union of both records' files keyed by source path.
    ///
    /// `self` keeps its primary and rank order; `other`'s files are appended
    /// in their own rank order. The better dated side provides the date.
    /// The result is partner-shared only if both sides are.
    pub fn merge_with(self, other: &MediaRecord) -> Self {
        let other_wins_date = compare_accuracy(other.date_accuracy, self.date_accuracy).is_lt()
            || (self.date_taken.is_none() && other.date_taken.is_some());
        let (date_taken, date_accuracy, date_extraction_method) = if other_wins_date {
            (other.date_taken, other.date_accuracy, other.date_extraction_method)
        } else {
            (self.date_taken, self.date_accuracy, self.date_extraction_method)
        };
        let partner_shared = self.partner_shared && other.partner_shared;

        let mut incoming: Vec<&FileEntry> = other.files.iter().collect();
        incoming.sort_by_key(|e| e.file.ranking());
        let merged = self.with_files(incoming.into_iter().cloned());
        Self {
            date_taken,
            date_accuracy,
            date_extraction_method,
            partner_shared,
            ..merged
        }
    }

    fn next_ranking(&self) -> u32 {
        self.files
            .iter()
            .map(|e| e.file.ranking())
            .max()
            .map_or(0, |r| r + 1)
    }

    /// Renumber rankings 0..n keeping their relative order.
    fn normalized(mut self) -> Self {
        let mut order: Vec<usize> = (0..self.files.len()).collect();
        order.sort_by_key(|&i| self.files[i].file.ranking());
        let mut files: Vec<Option<FileEntry>> = self.files.drain(..).map(Some).collect();
        for (rank, &i) in order.iter().enumerate() {
            if let Some(e) = files[i].take() {
                files[i] = Some(FileEntry {
                    album: e.album,
                    file: e.file.with_ranking(rank as u32),
                });
            }
        }
        self.files = files.into_iter().flatten().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn record(path: &str, album: Option<&str>) -> MediaRecord {
        MediaRecord::new(album.map(String::from), FileRecord::new(path))
    }

    fn date(y: i32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn test_new_record() {
        let r = record("Photos from 2020/a.jpg", None);
        assert_eq!(r.file_count(), 1);
        assert_eq!(r.primary_file().ranking(), 0);
        assert!(r.album_names().is_empty());
        assert_eq!(r.date_extraction_method(), DateExtractionMethod::None);
    }

    #[test]
    fn test_with_file_ignores_known_path() {
        let r = record("a.jpg", None)
            .with_file(Some("Trip".into()), FileRecord::new("Trip/a.jpg"))
            .with_file(Some("Other".into()), FileRecord::new("Trip/a.jpg"));
        assert_eq!(r.file_count(), 2);
        assert_eq!(r.album_names(), vec!["Trip"]);
        assert_eq!(r.files()[1].file.ranking(), 1);
    }

    #[test]
    fn test_album_names_distinct_in_order() {
        let r = record("B/a.jpg", Some("B"))
            .with_file(Some("A".into()), FileRecord::new("A/a.jpg"))
            .with_file(Some("B".into()), FileRecord::new("B/a(1).jpg"))
            .with_file(None, FileRecord::new("Photos from 2020/a.jpg"));
        assert_eq!(r.album_names(), vec!["B", "A"]);
        assert!(r.has_albums());
    }

    #[test]
    fn test_merge_keeps_all_paths() {
        let a = record("Photos from 2020/a.jpg", None);
        let b = record("Trip/a.jpg", Some("Trip")).with_file(Some("Fav".into()), FileRecord::new("Fav/a.jpg"));
        let merged = a.merge_with(&b);
        let paths: Vec<PathBuf> = merged.source_paths().map(Path::to_path_buf).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("Photos from 2020/a.jpg"),
                PathBuf::from("Trip/a.jpg"),
                PathBuf::from("Fav/a.jpg"),
            ]
        );
        assert_eq!(merged.primary_file().source_path(), Path::new("Photos from 2020/a.jpg"));
        // Merging again changes nothing
        let again = merged.clone().merge_with(&b);
        assert_eq!(again, merged);
    }

    #[test]
    fn test_merge_prefers_better_date() {
        let a = record("a.jpg", None).with_date(Some(date(2001)), Some(DateAccuracy::FAIR), DateExtractionMethod::Guess);
        let b = record("b.jpg", None).with_date(Some(date(2002)), Some(DateAccuracy::PERFECT), DateExtractionMethod::Json);
        let merged = a.clone().merge_with(&b);
        assert_eq!(merged.date_taken(), Some(date(2002)));
        assert_eq!(merged.date_extraction_method(), DateExtractionMethod::Json);

        let undated = record("c.jpg", None);
        let merged = undated.merge_with(&a);
        assert_eq!(merged.date_taken(), Some(date(2001)));
        assert_eq!(merged.date_accuracy(), Some(DateAccuracy::FAIR));
    }

    #[test]
    fn test_merge_partner_shared() {
        let shared = record("a.jpg", None).with_partner_shared(true);
        let own = record("b.jpg", None);
        assert!(!shared.clone().merge_with(&own).partner_shared());
        assert!(shared.clone().merge_with(&shared.clone().with_file(None, FileRecord::new("c.jpg"))).partner_shared());
    }

    #[test]
    fn test_without_album() {
        let r = record("Photos from 2020/a.jpg", None)
            .with_file(Some("Trip".into()), FileRecord::new("Trip/a.jpg"));
        let r = r.without_album("Trip");
        assert_eq!(r.file_count(), 1);
        assert!(r.album_names().is_empty());

        // Never empties the record
        let only = record("Trip/a.jpg", Some("Trip")).without_album("Trip");
        assert_eq!(only.file_count(), 1);
        assert_eq!(only.files()[0].album, None);
    }

    #[test]
    fn test_without_album_reranks() {
        let r = record("Trip/a.jpg", Some("Trip"))
            .with_file(None, FileRecord::new("Photos from 2020/a.jpg"))
            .without_album("Trip");
        assert_eq!(r.primary_file().source_path(), Path::new("Photos from 2020/a.jpg"));
        assert_eq!(r.primary_file().ranking(), 0);
    }

    #[test]
    fn test_with_file_target() {
        let r = record("Photos from 2020/a.jpg", None)
            .with_file(Some("Trip".into()), FileRecord::new("Trip/a.jpg"))
            .with_file_target(Path::new("Trip/a.jpg"), Path::new("out/Trip/a.jpg"), true);
        let album = &r.files()[1].file;
        assert_eq!(album.target_path(), Some(Path::new("out/Trip/a.jpg")));
        assert!(album.is_shortcut());
        assert!(r.primary_file().target_path().is_none());
    }

    #[test]
    fn test_secondary_entries() {
        let r = record("a.jpg", None)
            .with_file(Some("X".into()), FileRecord::new("X/a.jpg"))
            .with_file(Some("Y".into()), FileRecord::new("Y/a.jpg"));
        let secondary: Vec<&Path> = r.secondary_entries().map(|e| e.file.source_path()).collect();
        assert_eq!(secondary, vec![Path::new("X/a.jpg"), Path::new("Y/a.jpg")]);
    }

    #[test]
    fn test_with_date_propagates_accuracy() {
        let r = record("a.jpg", None)
            .with_file(None, FileRecord::new("b.jpg"))
            .with_date(Some(date(2010)), Some(DateAccuracy::GOOD), DateExtractionMethod::Exif);
        assert!(r.files().iter().all(|e| e.file.date_accuracy() == Some(DateAccuracy::GOOD)));
    }
}
