use async_trait::async_trait;

use super::{skip_entries, MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::media::MediaRecord;

/// Primary to ALL_PHOTOS; album copies are treated like any other duplicate.
pub struct NothingStrategy;

/// Place the primary in the canonical folder and dispose of every other
/// entry. With `album_kind`, album entries are removed under that kind
/// instead of being discarded as duplicates.
pub(super) async fn place_primary_only(
    entity: &MediaRecord,
    ctx: &StrategyContext,
    album_kind: Option<OperationKind>,
) -> Vec<OperationResult> {
    let primary = entity.primary_file();
    let dir = ctx.layout.canonical_dir(entity);
    let placed = ctx
        .place(primary.source_path(), &dir, true, entity.date_taken())
        .await;

    let Some(target) = placed.target.clone().filter(|_| placed.is_success()) else {
        let mut results = vec![placed];
        results.extend(skip_entries(entity.secondary_entries(), OperationKind::Delete));
        return results;
    };

    let mut results = vec![placed];
    for entry in entity.secondary_entries() {
        let source = entry.file.source_path();
        let result = match (entry.album.as_ref(), album_kind) {
            (Some(_), Some(kind)) => ctx.delete(kind, source, Some(target.as_path())).await,
            _ => ctx.discard(entity, source, &target).await,
        };
        results.push(result);
    }
    results
}

#[async_trait]
impl MovingStrategy for NothingStrategy {
    fn name(&self) -> &'static str {
        "nothing"
    }

    fn creates_shortcuts(&self) -> bool {
        false
    }

    fn creates_duplicates(&self) -> bool {
        false
    }

    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult> {
        place_primary_only(entity, ctx, None).await
    }
}
