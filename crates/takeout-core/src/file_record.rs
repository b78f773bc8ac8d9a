use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::folder_classify;

/// How trustworthy a date is. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateAccuracy(u16);

impl DateAccuracy {
    pub const PERFECT: Self = Self(1);
    pub const GOOD: Self = Self(2);
    pub const FAIR: Self = Self(3);
    pub const POOR: Self = Self(4);
    pub const FOLDER: Self = Self(5);
    pub const UNKNOWN: Self = Self(999);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u16 {
        self.0
    }
}

/// Order two optional accuracies, best first, `None` last.
pub fn compare_accuracy(a: Option<DateAccuracy>, b: Option<DateAccuracy>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Which extractor produced an entity's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateExtractionMethod {
    Json,
    Exif,
    Guess,
    JsonTryHard,
    FolderYear,
    #[default]
    None,
}

impl DateExtractionMethod {
    pub fn default_accuracy(self) -> DateAccuracy {
        match self {
            Self::Json => DateAccuracy::PERFECT,
            Self::Exif => DateAccuracy::GOOD,
            Self::Guess => DateAccuracy::FAIR,
            Self::JsonTryHard => DateAccuracy::POOR,
            Self::FolderYear => DateAccuracy::FOLDER,
            Self::None => DateAccuracy::UNKNOWN,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Exif => "exif",
            Self::Guess => "guess",
            Self::JsonTryHard => "jsonTryHard",
            Self::FolderYear => "folderYear",
            Self::None => "none",
        }
    }
}

impl fmt::Display for DateExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roots stripped from paths before they are classified, so folders above
/// the export or the output tree never count as year folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyRoots {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl ClassifyRoots {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: Some(input.into()),
            output: Some(output.into()),
        }
    }

    fn source<'p>(&self, path: &'p Path) -> &'p Path {
        strip_root(path, self.input.as_deref())
    }

    fn target<'p>(&self, path: &'p Path) -> &'p Path {
        strip_root(path, self.output.as_deref())
    }
}

fn strip_root<'p>(path: &'p Path, root: Option<&Path>) -> &'p Path {
    root.and_then(|root| path.strip_prefix(root).ok()).unwrap_or(path)
}

/// One physical file and where it came from / went to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    source_path: PathBuf,
    target_path: Option<PathBuf>,
    roots: Arc<ClassifyRoots>,
    is_canonical: bool,
    is_shortcut: bool,
    date_accuracy: Option<DateAccuracy>,
    ranking: u32,
}

impl FileRecord {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let roots = Arc::<ClassifyRoots>::default();
        let is_canonical = compute_canonical(&source_path, None, &roots);
        Self {
            source_path,
            target_path: None,
            roots,
            is_canonical,
            is_shortcut: false,
            date_accuracy: None,
            ranking: 0,
        }
    }

    /// Create with a known target, e.g. when restoring a previous run.
    pub fn with_paths(source_path: impl Into<PathBuf>, target_path: Option<PathBuf>) -> Self {
        match target_path {
            Some(target) => Self::new(source_path).with_target(target, false),
            None => Self::new(source_path),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn target_path(&self) -> Option<&Path> {
        self.target_path.as_deref()
    }

    /// Where the file currently is: target once materialized, source before.
    pub fn effective_path(&self) -> &Path {
        self.target_path.as_deref().unwrap_or(&self.source_path)
    }

    pub fn is_canonical(&self) -> bool {
        self.is_canonical
    }

    pub fn is_shortcut(&self) -> bool {
        self.is_shortcut
    }

    pub fn date_accuracy(&self) -> Option<DateAccuracy> {
        self.date_accuracy
    }

    pub fn ranking(&self) -> u32 {
        self.ranking
    }

    /// Classify relative to `roots` from now on.
    pub fn with_roots(self, roots: Arc<ClassifyRoots>) -> Self {
        let is_canonical = compute_canonical(&self.source_path, self.target_path.as_deref(), &roots);
        Self {
            roots,
            is_canonical,
            ..self
        }
    }

    pub fn with_source(self, source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let is_canonical = compute_canonical(&source_path, self.target_path.as_deref(), &self.roots);
        Self {
            source_path,
            is_canonical,
            ..self
        }
    }

    pub fn with_target(self, target_path: impl Into<PathBuf>, is_shortcut: bool) -> Self {
        let target_path = target_path.into();
        let is_canonical = compute_canonical(&self.source_path, Some(&target_path), &self.roots);
        Self {
            target_path: Some(target_path),
            is_canonical,
            is_shortcut,
            ..self
        }
    }

    pub fn with_date_accuracy(self, date_accuracy: Option<DateAccuracy>) -> Self {
        Self {
            date_accuracy,
            ..self
        }
    }

    pub fn with_ranking(self, ranking: u32) -> Self {
        Self { ranking, ..self }
    }
}

fn compute_canonical(source: &Path, target: Option<&Path>, roots: &ClassifyRoots) -> bool {
    folder_classify::is_canonical_source(roots.source(source))
        || target.is_some_and(|t| folder_classify::is_canonical_target(roots.target(t)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_from_source() {
        let f = FileRecord::new(".../Takeout/Photos from 2020)/a.jpg");
        assert!(f.is_canonical());
        assert!(f.target_path().is_none());
        assert_eq!(f.effective_path(), Path::new(".../Takeout/Photos from 2020)/a.jpg"));
    }

    #[test]
    fn test_canonical_from_target() {
        let f = FileRecord::with_paths("x.jpg", Some(PathBuf::from("out/ALL_PHOTOS/2020/x.jpg")));
        assert!(f.is_canonical());
        assert_eq!(f.effective_path(), Path::new("out/ALL_PHOTOS/2020/x.jpg"));

        let f = FileRecord::with_paths("x.jpg", Some(PathBuf::from("out/My Album/x.jpg")));
        assert!(!f.is_canonical());
    }

    #[test]
    fn test_canonical_recomputed() {
        let f = FileRecord::new("Takeout/Google Photos/Trip/x.jpg");
        assert!(!f.is_canonical());
        let f = f.with_target("out/ALL_PHOTOS/2021/x.jpg", false);
        assert!(f.is_canonical());
        let f = f.with_target("out/Trip/x.jpg", true);
        assert!(!f.is_canonical());
        assert!(f.is_shortcut());
        let f = f.with_source("Takeout/Google Photos/Photos from 2021/x.jpg");
        assert!(f.is_canonical());
    }

    #[test]
    fn test_canonical_ignores_folders_above_roots() {
        let roots = Arc::new(ClassifyRoots::new("/data/2021/Takeout", "/backup/2021/out"));
        let album = FileRecord::new("/data/2021/Takeout/Google Photos/Trip/c.jpg");
        // Without roots the year above the export leaks in
        assert!(album.is_canonical());
        let album = album.with_roots(roots.clone());
        assert!(!album.is_canonical());
        assert!(!album.clone().with_target("/backup/2021/out/Trip/c.jpg", false).is_canonical());
        assert!(album.with_target("/backup/2021/out/ALL_PHOTOS/c.jpg", false).is_canonical());

        let year = FileRecord::new("/data/2021/Takeout/Google Photos/Photos from 2019/c.jpg").with_roots(roots);
        assert!(year.is_canonical());
    }

    #[test]
    fn test_accuracy_order() {
        assert!(DateAccuracy::PERFECT < DateAccuracy::UNKNOWN);
        assert_eq!(
            compare_accuracy(Some(DateAccuracy::GOOD), Some(DateAccuracy::PERFECT)),
            Ordering::Greater
        );
        assert_eq!(compare_accuracy(Some(DateAccuracy::UNKNOWN), None), Ordering::Less);
        assert_eq!(compare_accuracy(None, None), Ordering::Equal);
    }

    #[test]
    fn test_method_accuracy() {
        assert_eq!(DateExtractionMethod::Json.default_accuracy(), DateAccuracy::PERFECT);
        assert_eq!(DateExtractionMethod::None.default_accuracy().value(), 999);
        assert!(DateExtractionMethod::Exif.default_accuracy() < DateExtractionMethod::Guess.default_accuracy());
    }
}
