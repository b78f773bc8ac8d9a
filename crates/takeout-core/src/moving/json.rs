use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;

use super::nothing::place_primary_only;
use super::{MovingStrategy, OperationKind, OperationResult, StrategyContext};
use crate::album_json::AlbumsInfo;
use crate::media::MediaRecord;

pub const ALBUMS_INFO_FILENAME: &str = "albums-info.json";

/// Primary to ALL_PHOTOS; album membership goes to albums-info.json.
pub struct JsonStrategy;

#[async_trait]
impl MovingStrategy for JsonStrategy {
    fn name(&self) -> &'static str {
        "json"
    }

    fn creates_shortcuts(&self) -> bool {
        false
    }

    fn creates_duplicates(&self) -> bool {
        false
    }

    async fn process_media_entity(&self, entity: &MediaRecord, ctx: &StrategyContext) -> Vec<OperationResult> {
        place_primary_only(entity, ctx, Some(OperationKind::JsonReference)).await
    }

    async fn finalize(&self, ctx: &StrategyContext, processed: &[MediaRecord]) -> Vec<OperationResult> {
        let started = Instant::now();
        let path = ctx.layout.output().join(ALBUMS_INFO_FILENAME);
        let info = AlbumsInfo::from_records(processed, ctx.layout.output());
        let result = match info.write(&path).await {
            Ok(()) => OperationResult::success(OperationKind::Metadata, Path::new(ALBUMS_INFO_FILENAME), Some(path), false),
            Err(e) => OperationResult::failure(OperationKind::Metadata, Path::new(ALBUMS_INFO_FILENAME), false, e),
        };
        vec![result.timed(started)]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::ProcessingConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_albums_recorded_in_json() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in");
        let out = dir.path().join("out");
        let entity = entity(&input, &["Trip", "Family"]);
        let ctx = context(ProcessingConfig::new(&input, &out));

        let results = JsonStrategy.process_media_entity(&entity, &ctx).await;
        assert!(succeeded(&results));
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].kind, OperationKind::JsonReference);
        assert_eq!(results[1].target, results[0].target);

        let placed = results[0].target.clone().unwrap();
        let processed = entity.with_file_target(&results[0].source, &placed, false);
        let finalized = JsonStrategy.finalize(&ctx, &[processed]).await;
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].kind, OperationKind::Metadata);

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(ALBUMS_INFO_FILENAME)).unwrap()).unwrap();
        assert_eq!(
            written["albums"]["Trip"]["files"][0]["output_path"],
            "ALL_PHOTOS/2020/a.jpg"
        );
        assert_eq!(written["albums"]["Family"]["files"][0]["filename"], "a.jpg");
    }
}
