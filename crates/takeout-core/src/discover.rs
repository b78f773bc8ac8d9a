use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::collection::MediaCollection;
use crate::config::ProcessingConfig;
use crate::date::json;
use crate::error::{Error, Result};
use crate::extras;
use crate::file_record::{ClassifyRoots, FileRecord};
use crate::folder_classify;
use crate::media::MediaRecord;
use crate::ThrottledProgress;

/// Media extensions `mime_guess` does not classify as image/video.
const EXTRA_MEDIA_EXTENSIONS: &[&str] = &[
    "mts", "m2ts", "heic", "heif", "dng", "cr2", "cr3", "nef", "arw", "raf", "orf", "rw2", "mp",
];

/// Result of walking an export.
#[derive(Debug, Default)]
pub struct Discovery {
    /// One record per media file, in path order
    pub collection: MediaCollection,
    pub skipped_extras: usize,
    pub skipped_non_media: usize,
    pub warnings: Vec<String>,
}

/// Check if a file looks like a photo or video
pub fn is_media_file(path: &Path) -> bool {
    let is_typed_media = mime_guess::from_path(path)
        .first()
        .is_some_and(|m| m.type_() == mime_guess::mime::IMAGE || m.type_() == mime_guess::mime::VIDEO);
    is_typed_media
        || path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTRA_MEDIA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Walk `config.input` and build one single-file record per media file.
///
/// Files outside year folders are tagged with their album folder name.
/// JSON sidecars are not records themselves; their partner-sharing flag is
/// copied onto the media they describe. Anything below `config.output` is
/// ignored so an output folder inside the export is never re-read.
pub fn discover(config: &ProcessingConfig, progress: Option<&ThrottledProgress<'_>>) -> Result<Discovery> {
    let input = &config.input;
    if !input.is_dir() {
        return Err(Error::Configuration(format!(
            "input {} is not a directory",
            input.display()
        )));
    }

    let mut discovery = Discovery::default();
    let mut files: Vec<PathBuf> = Vec::new();
    let walker = WalkDir::new(input)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != config.output.as_path());
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                discovery.warnings.push(e.to_string());
            }
        }
    }

    let roots = Arc::new(ClassifyRoots::new(input, &config.output));
    let total = files.len() as u64;
    let mut records = Vec::new();
    for (i, path) in files.into_iter().enumerate() {
        if let Some(progress) = progress {
            progress.report("scan", i as u64, total, "Scanning export");
        }
        let is_sidecar = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_sidecar || !is_media_file(&path) {
            discovery.skipped_non_media += usize::from(!is_sidecar);
            continue;
        }
        if config.skip_extras && extras::is_extra(&path) {
            debug!(path = %path.display(), "Skipping edited variant");
            discovery.skipped_extras += 1;
            continue;
        }

        let relative = path.strip_prefix(input).unwrap_or(&path);
        let album = folder_classify::album_name_for(relative);
        let partner_shared = json::is_partner_shared(&path);
        let file = FileRecord::new(path).with_roots(Arc::clone(&roots));
        records.push(MediaRecord::new(album, file).with_partner_shared(partner_shared));
    }

    info!(
        media = records.len(),
        skipped_extras = discovery.skipped_extras,
        skipped_non_media = discovery.skipped_non_media,
        "Discovery finished"
    );
    discovery.collection = MediaCollection::from(records);
    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("a.JPG")));
        assert!(is_media_file(Path::new("clip.mp4")));
        assert!(is_media_file(Path::new("clip.MTS")));
        assert!(is_media_file(Path::new("raw.dng")));
        assert!(!is_media_file(Path::new("a.jpg.json")));
        assert!(!is_media_file(Path::new("notes.txt")));
    }

    #[test]
    fn test_discover_export() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Takeout");
        touch(&root, "Google Photos/Photos from 2020/a.jpg", "a");
        touch(&root, "Google Photos/Photos from 2020/a.jpg.json", "{}");
        touch(&root, "Google Photos/Photos from 2020/a-edited.jpg", "a2");
        touch(&root, "Google Photos/Trip/a.jpg", "a");
        touch(
            &root,
            "Google Photos/Trip/b.jpg.json",
            r#"{"googlePhotosOrigin":{"fromPartnerSharing":{}}}"#,
        );
        touch(&root, "Google Photos/Trip/b.jpg", "b");
        touch(&root, "Google Photos/Trip/metadata.txt", "x");

        let mut config = ProcessingConfig::new(&root, dir.path().join("out"));
        config.skip_extras = true;
        let found = discover(&config, None).unwrap();

        assert_eq!(found.collection.len(), 3);
        assert_eq!(found.skipped_extras, 1);
        assert_eq!(found.skipped_non_media, 1);

        let records = found.collection.records();
        assert_eq!(records[0].files()[0].album, None);
        assert!(records[0].primary_file().is_canonical());
        assert_eq!(records[1].files()[0].album.as_deref(), Some("Trip"));
        assert!(!records[1].partner_shared());
        assert!(records[2].partner_shared());
    }

    #[test]
    fn test_output_inside_input_is_skipped() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Photos from 2020/a.jpg", "a");
        touch(dir.path(), "sorted/ALL_PHOTOS/2020/a.jpg", "a");
        let config = ProcessingConfig::new(dir.path(), dir.path().join("sorted"));
        let found = discover(&config, None).unwrap();
        assert_eq!(found.collection.len(), 1);
    }

    #[test]
    fn test_year_named_folder_above_input_is_not_canonical() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("2021/Takeout");
        touch(&root, "Google Photos/Trip/c.jpg", "c");
        touch(&root, "Google Photos/Photos from 2019/d.jpg", "d");
        let config = ProcessingConfig::new(&root, dir.path().join("out"));
        let found = discover(&config, None).unwrap();

        let records = found.collection.records();
        assert_eq!(records[0].primary_file().source_path(), root.join("Google Photos/Photos from 2019/d.jpg"));
        assert!(records[0].primary_file().is_canonical());
        assert_eq!(records[1].files()[0].album.as_deref(), Some("Trip"));
        assert!(!records[1].primary_file().is_canonical());
    }

    #[test]
    fn test_missing_input() {
        let dir = tempdir().unwrap();
        let config = ProcessingConfig::new(dir.path().join("nope"), dir.path().join("out"));
        assert!(matches!(discover(&config, None), Err(Error::Configuration(_))));
    }
}
