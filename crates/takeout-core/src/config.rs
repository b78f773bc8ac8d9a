use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::executor::DEFAULT_LARGE_FILE_THRESHOLD;

/// How album membership is materialized in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AlbumBehavior {
    /// Primary in ALL_PHOTOS, relative symlinks inside each album folder
    #[default]
    Shortcut,
    /// Primary inside its first album folder, symlink in ALL_PHOTOS
    ReverseShortcut,
    /// Primary in ALL_PHOTOS, real copies inside each album folder
    DuplicateCopy,
    /// Primary in ALL_PHOTOS, album membership written to albums-info.json
    Json,
    /// Primary in ALL_PHOTOS, album membership dropped
    Nothing,
    /// Only year-folder files are kept, album-only files are deleted
    IgnoreAlbums,
}

impl AlbumBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shortcut => "shortcut",
            Self::ReverseShortcut => "reverse-shortcut",
            Self::DuplicateCopy => "duplicate-copy",
            Self::Json => "json",
            Self::Nothing => "nothing",
            Self::IgnoreAlbums => "ignore-albums",
        }
    }
}

impl fmt::Display for AlbumBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Depth of the date-based folder layout under ALL_PHOTOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DateDivision {
    /// Everything in one folder
    None,
    /// YYYY/
    #[default]
    Year,
    /// YYYY/MM/
    Month,
    /// YYYY/MM/DD/
    Day,
}

/// Read-only configuration for a processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub album_behavior: AlbumBehavior,
    pub date_division: DateDivision,
    pub verbose: bool,
    /// Move redundant copies into `_Duplicates/` instead of deleting them
    pub keep_duplicates: bool,
    /// Copy instead of move; sources are never touched
    pub copy_mode: bool,
    /// Whether an ExifTool-class binary is available upstream. Informational only.
    pub exiftool_available: bool,
    /// Skip -edited, -effects and similar derivative images
    pub skip_extras: bool,
    /// Allow guessing dates from filenames
    pub guess_from_name: bool,
    /// Put partner-shared media under ALL_PHOTOS/PARTNER_SHARED
    pub divide_partner_shared: bool,
    /// Set the modification time of placed files to the date taken
    pub update_timestamps: bool,
    pub unknown_date_folder: String,
    pub large_file_threshold: u64,
    /// Process entities one at a time instead of in concurrent batches
    pub sequential: bool,
    /// Entities processed concurrently per batch; derived from CPU count when unset
    pub max_concurrent: Option<usize>,
    pub batch_size: usize,
    /// System-wide cap on in-flight file operations; derived from CPU count when unset
    pub max_file_operations: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            album_behavior: AlbumBehavior::default(),
            date_division: DateDivision::default(),
            verbose: false,
            keep_duplicates: false,
            copy_mode: false,
            exiftool_available: false,
            skip_extras: false,
            guess_from_name: true,
            divide_partner_shared: false,
            update_timestamps: true,
            unknown_date_folder: "date-unknown".to_string(),
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            sequential: false,
            max_concurrent: None,
            batch_size: 100,
            max_file_operations: None,
        }
    }
}

impl ProcessingConfig {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_path(path)?;
        Self::from_toml_str(&contents)
    }
}
