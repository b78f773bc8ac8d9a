use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Component, Path};

use super::DateExtractor;
use crate::file_record::DateExtractionMethod;
use crate::folder_classify::year_of_folder;

/// Last resort: January 1st of the nearest enclosing year folder.
pub struct FolderYearExtractor;

impl DateExtractor for FolderYearExtractor {
    fn method(&self) -> DateExtractionMethod {
        DateExtractionMethod::FolderYear
    }

    fn extract(&self, path: &Path) -> Option<NaiveDateTime> {
        let year = path
            .parent()?
            .components()
            .rev()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .find_map(year_of_folder)?;
        NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
    }
}
