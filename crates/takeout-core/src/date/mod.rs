//! Date extraction.
//!
//! Extractors are tried in order and the first one that yields a date wins.
//! Each extractor reports its method so the caller can derive an accuracy.

pub mod exif;
pub mod folder;
pub mod guess;
pub mod json;

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::config::ProcessingConfig;
use crate::file_record::DateExtractionMethod;

/// A source of "date taken" information for a media file.
///
/// Implementations run on blocking workers and may read the file.
pub trait DateExtractor: Send + Sync {
    fn method(&self) -> DateExtractionMethod;
    fn extract(&self, path: &Path) -> Option<NaiveDateTime>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateResult {
    pub date: NaiveDateTime,
    pub method: DateExtractionMethod,
}

/// Run `extractors` in order and return the first date found.
pub fn extract_first(extractors: &[Arc<dyn DateExtractor>], path: &Path) -> Option<DateResult> {
    extractors.iter().find_map(|extractor| {
        extractor.extract(path).map(|date| DateResult {
            date,
            method: extractor.method(),
        })
    })
}

/// Sidecar JSON, EXIF, filename guess (if enabled), sidecar JSON with
/// aggressive name matching, then the year of the containing folder.
pub fn default_extractors(config: &ProcessingConfig) -> Vec<Arc<dyn DateExtractor>> {
    let mut extractors: Vec<Arc<dyn DateExtractor>> = vec![
        Arc::new(json::JsonDateExtractor::new(false)),
        Arc::new(exif::ExifDateExtractor),
    ];
    if config.guess_from_name {
        extractors.push(Arc::new(guess::GuessDateExtractor));
    }
    extractors.push(Arc::new(json::JsonDateExtractor::new(true)));
    extractors.push(Arc::new(folder::FolderYearExtractor));
    extractors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_extractor_order() {
        let config = ProcessingConfig::default();
        let methods: Vec<_> = default_extractors(&config).iter().map(|e| e.method()).collect();
        assert_eq!(
            methods,
            vec![
                DateExtractionMethod::Json,
                DateExtractionMethod::Exif,
                DateExtractionMethod::Guess,
                DateExtractionMethod::JsonTryHard,
                DateExtractionMethod::FolderYear,
            ]
        );

        let config = ProcessingConfig {
            guess_from_name: false,
            ..ProcessingConfig::default()
        };
        assert!(!default_extractors(&config)
            .iter()
            .any(|e| e.method() == DateExtractionMethod::Guess));
    }

    #[test]
    fn test_extract_first_falls_through() {
        let extractors = default_extractors(&ProcessingConfig::default());
        let found = extract_first(&extractors, Path::new("/nowhere/Photos from 2011/IMG_20190509_154733.jpg"))
            .unwrap();
        assert_eq!(found.method, DateExtractionMethod::Guess);

        let found = extract_first(&extractors, Path::new("/nowhere/Photos from 2011/holiday.jpg")).unwrap();
        assert_eq!(found.method, DateExtractionMethod::FolderYear);

        assert!(extract_first(&extractors, Path::new("/nowhere/Trip/holiday.jpg")).is_none());
    }
}
