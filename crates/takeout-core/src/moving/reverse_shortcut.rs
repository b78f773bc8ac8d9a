use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::nothing::place_primary_only;
use super::{prune_empty_album_dirs, skip_entries, MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::media::MediaRecord;

/// Primary inside its first album, a link in ALL_PHOTOS pointing back.
/// Any further album gets a real copy.
pub struct ReverseShortcutStrategy;

#[async_trait]
impl MovingStrategy for ReverseShortcutStrategy {
    fn name(&self) -> &'static str {
        "reverse-shortcut"
    }

    fn creates_shortcuts(&self) -> bool {
        true
    }

    fn creates_duplicates(&self) -> bool {
        true
    }

    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult> {
        let primary = entity.primary_entry();
        let Some(first_album) = primary.album.as_deref().or_else(|| entity.album_names().first().copied()) else {
            return place_primary_only(entity, ctx, None).await;
        };

        let primary_source = primary.file.source_path();
        let placed = ctx
            .place(primary_source, &ctx.layout.album_dir(first_album), true, entity.date_taken())
            .await;
        let Some(target) = placed.target.clone().filter(|_| placed.is_success()) else {
            let mut results = vec![placed];
            results.extend(skip_entries(entity.secondary_entries(), OperationKind::Shortcut));
            return results;
        };

        let mut placed = placed;
        let mut materialized: HashMap<&str, PathBuf> = HashMap::from([(first_album, target.clone())]);

        // The canonical link is attributed to a year-folder copy if there is
        // one, so that copy is consumed by it
        let link_owner: Option<&Path> = entity
            .secondary_entries()
            .find(|e| e.album.is_none())
            .map(|e| e.file.source_path());
        let canonical_dir = ctx.layout.canonical_dir(entity);
        let link = match link_owner {
            Some(owner) => ctx.link(&target, &canonical_dir, owner, false, true).await,
            None => ctx.link(&target, &canonical_dir, primary_source, true, false).await,
        };
        let canonical = link.target.clone().filter(|_| link.is_success());
        let mut results = if link_owner.is_some() {
            vec![placed, link]
        } else {
            placed.derived.push(link);
            vec![placed]
        };

        for entry in entity.secondary_entries() {
            let source = entry.file.source_path();
            if Some(source) == link_owner {
                continue;
            }
            let result = match entry.album.as_deref() {
                Some(album) => match materialized.get(album) {
                    Some(existing) => ctx.delete(OperationKind::Delete, source, Some(existing.as_path())).await,
                    None => {
                        let moved = ctx
                            .place(source, &ctx.layout.album_dir(album), false, entity.date_taken())
                            .await;
                        if let Some(path) = moved.target.clone().filter(|_| moved.is_success()) {
                            materialized.insert(album, path);
                        }
                        moved
                    }
                },
                None => {
                    let representative = canonical.as_deref().unwrap_or(&target);
                    ctx.discard(entity, source, representative).await
                }
            };
            results.push(result);
        }
        results
    }

    async fn finalize(&self, ctx: &StrategyContext, processed: &[MediaRecord]) -> Vec<OperationResult> {
        prune_empty_album_dirs(ctx, processed).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::file_record::FileRecord;
    use std::fs;
    use tempfile::tempdir;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_primary_in_album_link_in_canonical() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let entity = entity(&input, &["Trip", "Best"]);
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = ReverseShortcutStrategy.process_media_entity(&entity, &ctx).await;
        assert!(succeeded(&results));
        // Primary moved with its canonical link, real file for the second
        // album, and the Trip entry deleted in favour of the moved primary
        assert_one_result_per_source(&entity, &results);
        assert_eq!(results[0].target.as_deref(), Some(out.join("Trip/a.jpg").as_path()));
        assert_eq!(results[0].derived[0].kind, OperationKind::Shortcut);
        assert!(results[0].derived[0].is_primary);

        let link = out.join("ALL_PHOTOS/2020/a.jpg");
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("../../Trip/a.jpg"));
        assert!(!fs::symlink_metadata(out.join("Best/a.jpg")).unwrap().file_type().is_symlink());
        assert!(!input.join("Trip/a.jpg").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_year_copy_owns_the_link() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let album = write(&input, "Trip/b.jpg", "b");
        let year = write(&input, "Photos from 2020/b.jpg", "b");
        let entity = MediaRecord::new(Some("Trip".into()), FileRecord::new(&album))
            .with_file(None, FileRecord::new(&year));
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = ReverseShortcutStrategy.process_media_entity(&entity, &ctx).await;
        assert!(succeeded(&results));
        assert_one_result_per_source(&entity, &results);
        assert!(results[0].derived.is_empty());
        assert_eq!(results[1].source, year);
        assert!(results[1].shortcut);
        assert!(!year.exists());
    }

    #[tokio::test]
    async fn test_without_albums_acts_like_nothing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let entity = entity(&input, &[]);
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = ReverseShortcutStrategy.process_media_entity(&entity, &ctx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target.as_deref(), Some(out.join("ALL_PHOTOS/2020/a.jpg").as_path()));
    }
}
