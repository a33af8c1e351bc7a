//! Stage 5: fetch and normalise the planned images.

use super::Stage;
use crate::context::{ImageAsset, ImageQuery, JobContext};
use crate::errors::StageError;
use crate::registry::{StageDescriptor, REGISTRY};
use crate::services::{ImageSearch, MediaFetcher};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const TARGET_WIDTH: u32 = 800;
const TARGET_HEIGHT: u32 = 600;

/// Downloads up to `max_images` planned images with bounded concurrency,
/// letterboxing each onto a white 800x600 canvas.
///
/// Images are best-effort: per-image failures are skipped, never stage
/// failures, and the stage succeeds with whatever subset was fetched,
/// possibly none. Later stages treat an empty asset list the same as an
/// empty plan.
pub struct FetchImages {
    search: Arc<dyn ImageSearch>,
    fetcher: Arc<dyn MediaFetcher>,
    max_images: usize,
    concurrency: usize,
}

impl FetchImages {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        search: Arc<dyn ImageSearch>,
        fetcher: Arc<dyn MediaFetcher>,
        max_images: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            search,
            fetcher,
            max_images,
            concurrency,
        }
    }

    async fn fetch_one(
        &self,
        images_dir: &Path,
        query: &ImageQuery,
    ) -> Result<ImageAsset, StageError> {
        let urls = self.search.search(&query.search_query).await?;
        let url = urls
            .first()
            .ok_or_else(|| StageError::format(format!("no results for '{}'", query.search_query)))?;

        let bytes = self.fetcher.fetch(url).await?;
        let canvas = letterbox(&bytes)?;

        let digest = Sha256::digest(url.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        let path = images_dir.join(format!("{}.png", &hex[..16]));
        canvas
            .save(&path)
            .map_err(|e| StageError::filesystem(format!("could not save {}: {e}", path.display())))?;

        Ok(ImageAsset {
            slide_no: query.slide_no,
            path,
            width: TARGET_WIDTH,
            height: TARGET_HEIGHT,
            query: query.search_query.clone(),
        })
    }
}

/// Decodes `bytes` and centres the image on a white 800x600 canvas,
/// shrinking it (aspect preserved) when it is larger.
fn letterbox(bytes: &[u8]) -> Result<image::RgbImage, StageError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| StageError::format(format!("image did not decode: {e}")))?;
    let thumb = decoded.thumbnail(TARGET_WIDTH, TARGET_HEIGHT).to_rgb8();

    let mut canvas =
        image::RgbImage::from_pixel(TARGET_WIDTH, TARGET_HEIGHT, image::Rgb([255, 255, 255]));
    let x = i64::from((TARGET_WIDTH - thumb.width()) / 2);
    let y = i64::from((TARGET_HEIGHT - thumb.height()) / 2);
    image::imageops::overlay(&mut canvas, &thumb, x, y);
    Ok(canvas)
}

#[async_trait]
impl Stage for FetchImages {
    fn descriptor(&self) -> &'static StageDescriptor {
        &REGISTRY[5]
    }

    async fn execute(&self, ctx: &mut JobContext) -> Result<(), StageError> {
        if ctx.image_plan.is_empty() {
            info!(job = %ctx.job_id, "no images planned, skipping fetch");
            ctx.images = Vec::new();
            return Ok(());
        }

        let images_dir = ctx.file("images");
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|e| StageError::filesystem(format!("could not create images dir: {e}")))?;

        let entries: Vec<(usize, ImageQuery)> = ctx
            .image_plan
            .iter()
            .take(self.max_images)
            .cloned()
            .enumerate()
            .collect();
        let attempted = entries.len();

        let images_dir_ref = &images_dir;
        let mut results: Vec<(usize, Result<ImageAsset, StageError>)> = stream::iter(entries)
            .map(|(idx, query)| async move { (idx, self.fetch_one(images_dir_ref, &query).await) })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut assets = Vec::new();
        for (idx, result) in results {
            match result {
                Ok(asset) => assets.push(asset),
                Err(e) => warn!(job = %ctx.job_id, image = idx, "image fetch skipped: {e}"),
            }
        }

        info!(job = %ctx.job_id, fetched = assets.len(), attempted, "images fetched");
        ctx.images = assets;
        Ok(())
    }

    fn fallback(&self, ctx: &mut JobContext) {
        ctx.images = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::mocks::{png_bytes, MockImageSearch, MockMediaFetcher};
    use uuid::Uuid;

    fn plan(queries: &[&str]) -> Vec<ImageQuery> {
        queries
            .iter()
            .enumerate()
            .map(|(i, q)| ImageQuery {
                slide_no: (i + 1) as u32,
                search_query: (*q).to_string(),
                alt_text: String::new(),
            })
            .collect()
    }

    fn stage(search: Arc<MockImageSearch>, fetcher: Arc<MockMediaFetcher>) -> FetchImages {
        FetchImages::new(search, fetcher, 4, 4)
    }

    #[test]
    fn test_letterbox_produces_target_dimensions() {
        let canvas = letterbox(&png_bytes(1600, 900)).unwrap();
        assert_eq!(canvas.dimensions(), (TARGET_WIDTH, TARGET_HEIGHT));
        // Corners stay white after centring.
        assert_eq!(canvas.get_pixel(0, 0), &image::Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_rejects_garbage() {
        let err = letterbox(b"not an image").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
    }

    #[tokio::test]
    async fn test_fetches_planned_images() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());
        ctx.image_plan = plan(&["bridge diagram", "girder photo"]);

        let search = Arc::new(MockImageSearch::new());
        let fetcher = Arc::new(MockMediaFetcher::new());

        stage(search, fetcher).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.images.len(), 2);
        assert_eq!(ctx.images[0].slide_no, 1);
        assert!(ctx.images[0].path.exists());
        assert_eq!(ctx.images[0].width, TARGET_WIDTH);
    }

    #[tokio::test]
    async fn test_empty_plan_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());

        let search = Arc::new(MockImageSearch::new());
        let fetcher = Arc::new(MockMediaFetcher::new());
        stage(search.clone(), fetcher)
            .execute(&mut ctx)
            .await
            .unwrap();

        assert!(ctx.images.is_empty());
        assert_eq!(search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_failures_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());
        ctx.image_plan = plan(&["good", "bad"]);

        let search = Arc::new(MockImageSearch::new());
        search.fail_query("bad", StageError::network("dns"));
        let fetcher = Arc::new(MockMediaFetcher::new());

        stage(search, fetcher).execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.images.len(), 1);
    }

    #[tokio::test]
    async fn test_every_fetch_failing_still_succeeds_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());
        ctx.image_plan = plan(&["first", "second"]);

        let search = Arc::new(MockImageSearch::new());
        search.fail_query("first", StageError::quota("429"));
        search.fail_query("second", StageError::network("dns"));
        let fetcher = Arc::new(MockMediaFetcher::new());

        stage(search, fetcher).execute(&mut ctx).await.unwrap();
        assert!(ctx.images.is_empty());
    }

    #[tokio::test]
    async fn test_respects_max_images() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = JobContext::new(Uuid::new_v4(), "# Doc", tmp.path());
        ctx.image_plan = plan(&["a", "b", "c", "d", "e", "f"]);

        let search = Arc::new(MockImageSearch::new());
        let fetcher = Arc::new(MockMediaFetcher::new());
        FetchImages::new(search, fetcher, 4, 2)
            .execute(&mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.images.len(), 4);
    }
}
