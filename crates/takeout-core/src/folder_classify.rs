use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

/// Name of the canonical store under the output directory.
pub const ALL_PHOTOS: &str = "ALL_PHOTOS";

/// Localized prefixes: "<prefix>YYYY"
const YEAR_FOLDER_PREFIXES: &[&str] = &[
    "Photos from ",      // EN
    "Fotos von ",        // DE
    "Fotos aus ",        // DE (alternate)
    "Photos de ",        // FR
    "Fotos de ",         // ES, PT, CA
    "Foto's uit ",       // NL
    "Foto dal ",         // IT
    "Foto del ",         // IT (alternate)
    "Zdjęcia z ",        // PL
    "Фото за ",          // RU
    "Фотографии за ",    // RU (alternate)
    "Fotky z ",          // CS
    "Fotografii din ",   // RO
    "Foton från ",       // SV
    "Bilder fra ",       // NO
    "Billeder fra ",     // DA
    "Valokuvat ",        // FI
    "Fényképek - ",      // HU
    "Fotoğraflar ",      // TR
];

/// Localized suffixes: "YYYY<suffix>"
const YEAR_FOLDER_SUFFIXES: &[&str] = &[
    " 年の写真",   // JA
    "年のフォト",   // JA (alternate)
    "년의 사진",    // KO
    "年的照片",     // ZH-CN
    "年的相片",     // ZH-TW
];

/// Folders at the top of an export that are containers, never albums.
const CONTAINER_FOLDERS: &[&str] = &["Takeout", "Archive", "Trash", "Bin", "Locked Folder"];

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(20|19|18)\d{2}$").unwrap());
static YEAR_MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(20|19|18)\d{2}-(0[1-9]|1[0-2])$").unwrap());
// Tolerates trailing junk after the year, e.g. "Photos from 2020)".
static PHOTOS_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Photos from (20|19|18)\d{2}(?:\D|$)").unwrap());
static YEAR_IN_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:20|19|18)\d{2})(?:\D|$)").unwrap());

/// Check if a folder name matches a Google Takeout year folder pattern
pub fn is_year_folder(name: &str) -> bool {
    if YEAR_RE.is_match(name) {
        return true;
    }
    for prefix in YEAR_FOLDER_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            if YEAR_RE.is_match(rest) {
                return true;
            }
        }
    }
    for suffix in YEAR_FOLDER_SUFFIXES {
        if let Some(rest) = name.strip_suffix(suffix) {
            if YEAR_RE.is_match(rest) {
                return true;
            }
        }
    }
    false
}

/// Year encoded in a year folder name, if `name` is one.
pub fn year_of_folder(name: &str) -> Option<i32> {
    if !is_year_folder(name) {
        return None;
    }
    YEAR_IN_NAME_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn directory_names(path: &Path) -> impl Iterator<Item = &str> {
    path.parent()
        .into_iter()
        .flat_map(|p| p.components())
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
}

/// Whether a discovered file lives in the year-based part of an export.
pub fn is_canonical_source(path: &Path) -> bool {
    directory_names(path).any(|name| PHOTOS_FROM_RE.is_match(name) || is_year_folder(name))
}

/// Whether a materialized file lives in the canonical year-based store.
pub fn is_canonical_target(path: &Path) -> bool {
    directory_names(path)
        .any(|name| name == ALL_PHOTOS || YEAR_RE.is_match(name) || YEAR_MONTH_RE.is_match(name))
}

/// Album name for a file at `relative` (relative to the export root).
///
/// Inside a `Google Photos` folder the album is the folder directly below it;
/// otherwise it is the file's parent folder. Year folders, container folders
/// and files directly at the root have no album.
pub fn album_name_for(relative: &Path) -> Option<String> {
    let parts: Vec<&str> = directory_names(relative).collect();
    let folder = match parts.iter().position(|p| is_google_photos_folder(p)) {
        Some(i) => *parts.get(i + 1)?,
        None => *parts.last()?,
    };
    if folder.is_empty() || is_year_folder(folder) || CONTAINER_FOLDERS.contains(&folder) {
        return None;
    }
    Some(folder.to_string())
}

fn is_google_photos_folder(p: &str) -> bool {
    p.starts_with("Google")
        && (p.contains("hoto")
            || p.contains("ото")
            || p.contains("フォト")
            || p.contains("照片")
            || p.contains("사진"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_folders() {
        assert!(is_year_folder("Photos from 2023"));
        assert!(is_year_folder("Fotos von 2021"));
        assert!(is_year_folder("2023 年の写真"));
        assert!(is_year_folder("2023년의 사진"));
        assert!(is_year_folder("2023年的照片"));
        assert!(is_year_folder("2019"));
        assert!(!is_year_folder("My Vacation"));
        assert!(!is_year_folder("Photos from abcd"));
    }

    #[test]
    fn test_year_of_folder() {
        assert_eq!(year_of_folder("Photos from 2019"), Some(2019));
        assert_eq!(year_of_folder("2023 年の写真"), Some(2023));
        assert_eq!(year_of_folder("2004"), Some(2004));
        assert_eq!(year_of_folder("Trip 2019"), None);
    }

    #[test]
    fn test_canonical_source() {
        assert!(is_canonical_source(Path::new("/x/Takeout/Photos from 2020)/a.jpg")));
        assert!(is_canonical_source(Path::new("Takeout/Google Photos/2018/a.jpg")));
        assert!(!is_canonical_source(Path::new("Takeout/Google Photos/Holiday/a.jpg")));
        // A year-looking file name is not a folder
        assert!(!is_canonical_source(Path::new("Takeout/2018")));
        assert!(!is_canonical_source(Path::new("Takeout/Google Photos/Trip/Photos from 2020 best.jpg")));
        assert!(!is_canonical_source(Path::new("Takeout/Old Photos from 2020/a.jpg")));
        assert!(!is_canonical_source(Path::new("Takeout/Photos from 20201/a.jpg")));
    }

    #[test]
    fn test_canonical_target() {
        assert!(is_canonical_target(Path::new("out/ALL_PHOTOS/2020/x.jpg")));
        assert!(is_canonical_target(Path::new("out/ALL_PHOTOS/x.jpg")));
        assert!(is_canonical_target(Path::new("out/2020/03/x.jpg")));
        assert!(is_canonical_target(Path::new("out/2020-03/x.jpg")));
        assert!(!is_canonical_target(Path::new("out/My Album/x.jpg")));
    }

    #[test]
    fn test_album_name_for() {
        assert_eq!(
            album_name_for(Path::new("Takeout/Google Photos/Holiday/a.jpg")).as_deref(),
            Some("Holiday")
        );
        assert_eq!(album_name_for(Path::new("Takeout/Google Photos/Photos from 2020/a.jpg")), None);
        assert_eq!(album_name_for(Path::new("Takeout/Google Photos/a.jpg")), None);
        assert_eq!(album_name_for(Path::new("Wedding/a.jpg")).as_deref(), Some("Wedding"));
        assert_eq!(album_name_for(Path::new("Takeout/a.jpg")), None);
        assert_eq!(album_name_for(Path::new("a.jpg")), None);
    }
}
