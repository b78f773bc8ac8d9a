use async_trait::async_trait;

use super::{skip_entries, MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::media::{FileEntry, MediaRecord};

/// Only year-folder files are kept. Album-only media is dropped.
pub struct IgnoreAlbumsStrategy;

#[async_trait]
impl MovingStrategy for IgnoreAlbumsStrategy {
    fn name(&self) -> &'static str {
        "ignore-albums"
    }

    fn creates_shortcuts(&self) -> bool {
        false
    }

    fn creates_duplicates(&self) -> bool {
        false
    }

    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult> {
        let primary = entity.primary_entry();
        let chosen: Option<&FileEntry> = if primary.file.is_canonical() {
            Some(primary)
        } else {
            entity.secondary_entries().find(|e| e.file.is_canonical())
        };

        let Some(chosen) = chosen else {
            let mut results = Vec::with_capacity(entity.file_count());
            for entry in entity.files() {
                results.push(ctx.delete(OperationKind::Delete, entry.file.source_path(), None).await);
            }
            return results;
        };

        let chosen_source = chosen.file.source_path();
        let placed = ctx
            .place(chosen_source, &ctx.layout.canonical_dir(entity), true, entity.date_taken())
            .await;
        let others = entity.files().iter().filter(|e| e.file.source_path() != chosen_source);

        let Some(target) = placed.target.clone().filter(|_| placed.is_success()) else {
            let mut results = vec![placed];
            results.extend(skip_entries(others, OperationKind::Delete));
            return results;
        };

        let mut results = vec![placed];
        for entry in others {
            let source = entry.file.source_path();
            let result = if entry.file.is_canonical() {
                ctx.discard(entity, source, &target).await
            } else {
                ctx.delete(OperationKind::Delete, source, Some(target.as_path())).await
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::file_record::FileRecord;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_album_copies_dropped() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let entity = entity(&input, &["Trip"]);
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = IgnoreAlbumsStrategy.process_media_entity(&entity, &ctx).await;
        assert!(succeeded(&results));
        assert_eq!(results.len(), 2);
        assert!(out.join("ALL_PHOTOS/2020/a.jpg").is_file());
        assert!(!out.join("Trip").exists());
        assert!(!input.join("Trip/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_canonical_secondary_is_placed() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let album = write(&input, "Trip/b.jpg", "b");
        let year = write(&input, "Photos from 2019/b.jpg", "b");
        let entity = MediaRecord::new(Some("Trip".into()), FileRecord::new(&album))
            .with_file(None, FileRecord::new(&year));
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = IgnoreAlbumsStrategy.process_media_entity(&entity, &ctx).await;
        assert!(succeeded(&results));
        assert_eq!(results[0].source, year);
        assert!(results[0].is_primary);
        assert_eq!(results[1].source, album);
        assert_eq!(results[1].target, results[0].target);
    }

    #[tokio::test]
    async fn test_album_only_media_removed() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let album = write(&input, "Trip/c.jpg", "c");
        let entity = MediaRecord::new(Some("Trip".into()), FileRecord::new(&album));
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = IgnoreAlbumsStrategy.process_media_entity(&entity, &ctx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].kind, OperationKind::Delete);
        assert!(results[0].is_success());
        assert_eq!(results[0].target, None);
        assert!(!album.exists());
    }
}
