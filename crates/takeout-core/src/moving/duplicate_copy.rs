use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sysinfo::Disks;

use super::{prune_empty_album_dirs, MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::error::{Error, Result};
use crate::media::MediaRecord;

/// Primary to ALL_PHOTOS, a real copy in every album folder.
pub struct DuplicateCopyStrategy;

impl DuplicateCopyStrategy {
    /// Bytes the album copies will take: one primary-sized file per album.
    pub fn required_space(records: &[MediaRecord]) -> u64 {
        records
            .iter()
            .filter(|r| r.has_albums())
            .map(|r| {
                let size = std::fs::metadata(r.primary_file().source_path()).map_or(0, |m| m.len());
                size * r.album_names().len() as u64
            })
            .sum()
    }
}

/// Free bytes on the volume holding `path`, if it can be determined.
pub fn available_space(path: &std::path::Path) -> Option<u64> {
    let path = std::path::absolute(path).ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

#[async_trait]
impl MovingStrategy for DuplicateCopyStrategy {
    fn name(&self) -> &'static str {
        "duplicate-copy"
    }

    fn creates_shortcuts(&self) -> bool {
        false
    }

    fn creates_duplicates(&self) -> bool {
        true
    }

    async fn validate_context(&self, ctx: &StrategyContext) -> Result<()> {
        ctx.validate_common().await?;
        if let Some(space) = ctx.disk_space {
            if space.available < space.required {
                return Err(Error::Configuration(format!(
                    "not enough disk space for album copies: {} bytes needed, {} available",
                    space.required, space.available
                )));
            }
        }
        Ok(())
    }

    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult> {
        let primary = entity.primary_entry();
        let primary_source = primary.file.source_path();
        let placed = ctx
            .place(primary_source, &ctx.layout.canonical_dir(entity), true, entity.date_taken())
            .await;
        let target = placed.target.clone().filter(|_| placed.is_success());

        let mut placed = placed;
        let mut copied: HashMap<&str, PathBuf> = HashMap::new();

        if let (Some(album), Some(target)) = (primary.album.as_deref(), target.as_ref()) {
            let copy = ctx
                .copy_into(target, &ctx.layout.album_dir(album), primary_source, true)
                .await;
            if let Some(path) = copy.target.clone().filter(|_| copy.is_success()) {
                copied.insert(album, path);
            }
            placed.derived.push(copy);
        }
        let mut results = vec![placed];

        for entry in entity.secondary_entries() {
            let source = entry.file.source_path();
            let result = match (entry.album.as_deref(), target.as_ref()) {
                (Some(album), _) => match copied.get(album) {
                    Some(existing) => ctx.delete(OperationKind::Delete, source, Some(existing.as_path())).await,
                    None => {
                        // The album entry is itself a full copy, move it in place
                        let moved = ctx
                            .place(source, &ctx.layout.album_dir(album), false, entity.date_taken())
                            .await;
                        if let Some(path) = moved.target.clone().filter(|_| moved.is_success()) {
                            copied.insert(album, path);
                        }
                        moved
                    }
                },
                (None, Some(target)) => ctx.discard(entity, source, target).await,
                (None, None) => OperationResult::failure(
                    OperationKind::Delete,
                    source,
                    false,
                    "skipped because the primary file could not be placed",
                ),
            };
            results.push(result);
        }
        results
    }

    async fn finalize(&self, ctx: &StrategyContext, processed: &[MediaRecord]) -> Vec<OperationResult> {
        prune_empty_album_dirs(ctx, processed).await
    }
}
