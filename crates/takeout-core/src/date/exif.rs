use chrono::NaiveDateTime;
use exif::{In, Reader, Tag};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;

use super::DateExtractor;
use crate::file_record::DateExtractionMethod;

/// Extract the capture date from an image container.
/// EXIF datetimes have no timezone info - they are local time as-is.
pub fn extract_exif_date<R: BufRead + Seek>(reader: &mut R) -> Option<NaiveDateTime> {
    let exif = Reader::new().read_from_container(reader).ok()?;

    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
        .find_map(|field| parse_exif_datetime(&field.display_value().to_string()))
}

fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .replace('-', ":")
        .replace('/', ":")
        .replace('\\', ":")
        .replace('.', ":");

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }

    let date = chrono::NaiveDate::parse_from_str(cleaned.split(' ').next()?, "%Y:%m:%d").ok()?;
    date.and_hms_opt(0, 0, 0)
}

pub struct ExifDateExtractor;

impl DateExtractor for ExifDateExtractor {
    fn method(&self) -> DateExtractionMethod {
        DateExtractionMethod::Exif
    }

    fn extract(&self, path: &Path) -> Option<NaiveDateTime> {
        let file = File::open(path).ok()?;
        extract_exif_date(&mut BufReader::new(file))
    }
}
