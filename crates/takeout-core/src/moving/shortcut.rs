use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{prune_empty_album_dirs, skip_entries, MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::media::MediaRecord;

/// Primary to ALL_PHOTOS, one relative symlink per album folder.
pub struct ShortcutStrategy;

#[async_trait]
impl MovingStrategy for ShortcutStrategy {
    fn name(&self) -> &'static str {
        "shortcut"
    }

    fn creates_shortcuts(&self) -> bool {
        true
    }

    fn creates_duplicates(&self) -> bool {
        false
    }

    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult> {
        let primary = entity.primary_entry();
        let primary_source = primary.file.source_path();
        let placed = ctx
            .place(primary_source, &ctx.layout.canonical_dir(entity), true, entity.date_taken())
            .await;

        let Some(target) = placed.target.clone().filter(|_| placed.is_success()) else {
            let mut results = vec![placed];
            results.extend(skip_entries(entity.secondary_entries(), OperationKind::Shortcut));
            return results;
        };

        let mut placed = placed;
        let mut linked: HashMap<&str, PathBuf> = HashMap::new();

        // The primary's own album still needs its link
        if let Some(album) = primary.album.as_deref() {
            let link = ctx
                .link(&target, &ctx.layout.album_dir(album), primary_source, true, false)
                .await;
            if let Some(path) = link.target.clone().filter(|_| link.is_success()) {
                linked.insert(album, path);
            }
            placed.derived.push(link);
        }
        let mut results = vec![placed];

        for entry in entity.secondary_entries() {
            let source = entry.file.source_path();
            let result = match entry.album.as_deref() {
                Some(album) => match linked.get(album) {
                    Some(existing) => {
                        // Represented by the album's existing link
                        let mut removed = ctx.delete(OperationKind::Delete, source, Some(existing.as_path())).await;
                        removed.shortcut = removed.is_success();
                        removed
                    }
                    None => {
                        let link = ctx
                            .link(&target, &ctx.layout.album_dir(album), source, false, true)
                            .await;
                        if let Some(path) = link.target.clone().filter(|_| link.is_success()) {
                            linked.insert(album, path);
                        }
                        link
                    }
                },
                None => ctx.discard(entity, source, &target).await,
            };
            results.push(result);
        }
        results
    }

    async fn finalize(&self, ctx: &StrategyContext, processed: &[MediaRecord]) -> Vec<OperationResult> {
        prune_empty_album_dirs(ctx, processed).await
    }
}
