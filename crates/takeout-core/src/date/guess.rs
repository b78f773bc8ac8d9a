use chrono::NaiveDateTime;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::DateExtractor;
use crate::file_record::DateExtractionMethod;

/// (pattern, chrono format) pairs, most specific first.
static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    const MONTH: &str = "(01|02|03|04|05|06|07|08|09|10|11|12)";
    [
        (r"(20|19|18)\d{2}MM[0-3]\d-\d{6}", "%Y%m%d-%H%M%S"),               // Screenshot_20190919-053857
        (r"(20|19|18)\d{2}MM[0-3]\d_\d{6}", "%Y%m%d_%H%M%S"),               // IMG_20190509_154733
        (r"(20|19|18)\d{2}-MM-[0-3]\d-\d{2}-\d{2}-\d{2}", "%Y-%m-%d-%H-%M-%S"), // Screenshot_2019-04-16-11-19-37
        (r"(20|19|18)\d{2}-MM-[0-3]\d-\d{6}", "%Y-%m-%d-%H%M%S"),           // signal-2020-10-26-163832
        (r"(20|19|18)\d{2}MM[0-3]\d\d{6}", "%Y%m%d%H%M%S"),                 // 00004XTR_00004_BURST20190216172030
        (r"(20|19|18)\d{2}_MM_[0-3]\d_\d{2}_\d{2}_\d{2}", "%Y_%m_%d_%H_%M_%S"), // 2016_01_30_11_49_15
    ]
    .into_iter()
    .map(|(pattern, format)| {
        let pattern = format!("(?P<date>{})", pattern.replace("MM", MONTH));
        (Regex::new(&pattern).expect("date pattern is valid"), format)
    })
    .collect()
});

/// Guess a date from patterns phone cameras and apps put in file names.
pub fn guess_date_from_filename(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    PATTERNS.iter().find_map(|(regex, format)| {
        let date = regex.captures(name)?.name("date")?.as_str();
        NaiveDateTime::parse_from_str(date, format).ok()
    })
}

pub struct GuessDateExtractor;

impl DateExtractor for GuessDateExtractor {
    fn method(&self) -> DateExtractionMethod {
        DateExtractionMethod::Guess
    }

    fn extract(&self, path: &Path) -> Option<NaiveDateTime> {
        guess_date_from_filename(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn guess(name: &str) -> Option<NaiveDateTime> {
        guess_date_from_filename(Path::new(name))
    }

    #[test]
    fn test_guess_patterns() {
        let expected = NaiveDate::from_ymd_opt(2019, 9, 19).unwrap().and_hms_opt(5, 38, 57);
        assert_eq!(guess("Screenshot_20190919-053857.jpg"), expected);
        assert!(guess("IMG_20190509_154733.jpg").is_some());
        assert!(guess("Screenshot_2019-04-16-11-19-37-232_com.jpg").is_some());
        assert!(guess("signal-2020-10-26-163832.jpg").is_some());
        assert!(guess("00004XTR_00004_BURST20190216172030.jpg").is_some());
        assert!(guess("2016_01_30_11_49_15.mp4").is_some());
        assert!(guess("random_photo.jpg").is_none());
    }

    #[test]
    fn test_invalid_calendar_date() {
        // Matches the shape but February 31st does not exist
        assert!(guess("IMG_20190231_120000.jpg").is_none());
    }

    #[test]
    fn test_directory_ignored() {
        assert!(guess("IMG_20190509_154733/photo.jpg").is_none());
    }
}
