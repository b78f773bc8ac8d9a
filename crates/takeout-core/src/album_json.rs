use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::media::MediaRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumFile {
    pub filename: String,
    /// Relative to the output directory, `/`-separated
    pub output_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub files: Vec<AlbumFile>,
}

/// Contents of albums-info.json: album name -> files placed for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumsInfo {
    pub albums: BTreeMap<String, AlbumInfo>,
}

impl AlbumsInfo {
    /// Collect album membership from processed records. Each album lists
    /// the placed primary file of every entity that belongs to it.
    pub fn from_records(records: &[MediaRecord], output_dir: &Path) -> Self {
        let mut albums: BTreeMap<String, AlbumInfo> = BTreeMap::new();

        for record in records {
            let Some(dest) = record.primary_file().target_path() else {
                continue;
            };
            let filename = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let relative = dest
                .strip_prefix(output_dir)
                .unwrap_or(dest)
                .to_string_lossy()
                .replace('\\', "/");
            for album_name in record.album_names() {
                albums.entry(album_name.to_string()).or_default().files.push(AlbumFile {
                    filename: filename.clone(),
                    output_path: relative.clone(),
                });
            }
        }

        Self { albums }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await.with_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_record::FileRecord;

    #[test]
    fn test_from_records() {
        let placed = MediaRecord::new(None, FileRecord::new("in/Photos from 2019/x.jpg"))
            .with_file(Some("Trip".into()), FileRecord::new("in/Trip/x.jpg"))
            .with_file_target(Path::new("in/Photos from 2019/x.jpg"), Path::new("out/ALL_PHOTOS/2019/x(1).jpg"), false);
        let unplaced = MediaRecord::new(Some("Trip".into()), FileRecord::new("in/Trip/y.jpg"));
        let no_album = MediaRecord::new(None, FileRecord::new("in/Photos from 2019/z.jpg"))
            .with_file_target(Path::new("in/Photos from 2019/z.jpg"), Path::new("out/ALL_PHOTOS/2019/z.jpg"), false);

        let info = AlbumsInfo::from_records(&[placed, unplaced, no_album], Path::new("out"));
        assert_eq!(info.albums.len(), 1);
        assert_eq!(
            info.albums["Trip"].files,
            vec![AlbumFile {
                filename: "x(1).jpg".to_string(),
                output_path: "ALL_PHOTOS/2019/x(1).jpg".to_string(),
            }]
        );
    }
}
