//! Google Takeout JSON sidecars (`photo.jpg.json`,
//! `photo.jpg.supplemental-metadata.json`).
//!
//! Takeout mangles sidecar names in several ways: long names are cut at 51
//! characters, `(1)` counters move behind the extension and edited variants
//! share the original's sidecar. Lookup tries each transformation in turn.

use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::DateExtractor;
use crate::extras;
use crate::file_record::DateExtractionMethod;

const SIDECAR_SUFFIXES: &[&str] = &[".json", ".supplemental-metadata.json"];
const MAX_SIDECAR_NAME: usize = 51;

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d+\)\.").unwrap());
static EXTRA_REGEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<extra>-[A-Za-zÀ-ÖØ-öø-ÿ]+(\(\d\))?)\.\w+$").unwrap());
static DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d\)\.").unwrap());

/// Parse Google's JSON metadata and extract photoTakenTime
pub fn parse_google_json(json_bytes: &[u8]) -> Option<NaiveDateTime> {
    let data: Value = serde_json::from_slice(json_bytes).ok()?;
    photo_taken_time(&data)
}

fn photo_taken_time(data: &Value) -> Option<NaiveDateTime> {
    let timestamp = &data.get("photoTakenTime")?["timestamp"];
    let epoch = match timestamp {
        Value::String(s) => s.parse::<i64>().ok()?,
        other => other.as_i64()?,
    };
    // Convert UTC epoch to local naive datetime
    let utc = chrono::DateTime::from_timestamp(epoch, 0)?;
    Some(utc.with_timezone(&chrono::Local).naive_local())
}

/// Locate the sidecar for `media`. With `try_hard`, also strip trailing
/// `-something` words and `(n)` counters from the name.
pub fn find_sidecar(media: &Path, try_hard: bool) -> Option<PathBuf> {
    let dir = media.parent()?;
    let filename = media.file_name()?.to_str()?;

    let mut methods: Vec<fn(&str) -> String> = vec![
        str::to_string,
        shorten_name,
        bracket_swap,
        extras::remove_extra,
        no_extension,
    ];
    if try_hard {
        methods.push(remove_extra_regex);
        methods.push(remove_digit);
    }

    methods.iter().find_map(|method| {
        let name = method(filename);
        SIDECAR_SUFFIXES
            .iter()
            .map(|suffix| dir.join(format!("{name}{suffix}")))
            .find(|candidate| candidate.is_file())
    })
}

/// Whether the sidecar marks the media as shared by a partner account.
pub fn is_partner_shared(media: &Path) -> bool {
    read_sidecar(media, false)
        .and_then(|data| data.get("googlePhotosOrigin")?.get("fromPartnerSharing").cloned())
        .is_some_and(|v| !v.is_null())
}

fn read_sidecar(media: &Path, try_hard: bool) -> Option<Value> {
    let sidecar = find_sidecar(media, try_hard)?;
    let bytes = std::fs::read(sidecar).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Reads `photoTakenTime` from the sidecar.
pub struct JsonDateExtractor {
    try_hard: bool,
}

impl JsonDateExtractor {
    pub fn new(try_hard: bool) -> Self {
        Self { try_hard }
    }
}

impl DateExtractor for JsonDateExtractor {
    fn method(&self) -> DateExtractionMethod {
        if self.try_hard {
            DateExtractionMethod::JsonTryHard
        } else {
            DateExtractionMethod::Json
        }
    }

    fn extract(&self, path: &Path) -> Option<NaiveDateTime> {
        photo_taken_time(&read_sidecar(path, self.try_hard)?)
    }
}

fn shorten_name(filename: &str) -> String {
    let max_len = MAX_SIDECAR_NAME - ".json".len();
    if filename.len() + ".json".len() > MAX_SIDECAR_NAME {
        let mut end = max_len;
        while end > 0 && !filename.is_char_boundary(end) {
            end -= 1;
        }
        filename[..end].to_string()
    } else {
        filename.to_string()
    }
}

/// `image(1).jpg` -> `image.jpg(1)`
fn bracket_swap(filename: &str) -> String {
    if let Some(m) = BRACKET_RE.find_iter(filename).last() {
        let bracket = m.as_str().replace('.', "");
        if let Some(pos) = filename.rfind(&bracket) {
            let mut result = String::with_capacity(filename.len());
            result.push_str(&filename[..pos]);
            result.push_str(&filename[pos + bracket.len()..]);
            result.push_str(&bracket);
            return result;
        }
    }
    filename.to_string()
}

fn no_extension(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

fn remove_extra_regex(filename: &str) -> String {
    // Only when unambiguous
    if EXTRA_REGEX_RE.find_iter(filename).count() == 1 {
        if let Some(extra) = EXTRA_REGEX_RE.captures(filename).and_then(|c| c.name("extra")) {
            let mut result = filename.to_string();
            result.replace_range(extra.start()..extra.end(), "");
            return result;
        }
    }
    filename.to_string()
}

fn remove_digit(filename: &str) -> String {
    DIGIT_RE.replace_all(filename, ".").to_string()
}
