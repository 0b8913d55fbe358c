// src/pipeline/coordinator.rs
use crate::errors::LumenError;
use crate::events::{ProgressEvent, ProgressReporter};
use crate::models::{DerivedFields, GeneratedImage, RawImage};
use crate::pipeline::retry::RetryingInvoker;
use crate::services::GenerationService;
use crate::services::generation_service::ImageRequest;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;

/// Drafts are always produced four at a time.
pub const DRAFT_BATCH_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Four independent requests, each delivered as soon as it completes.
    ///
    /// A draft set is four concurrent service calls with `count = 1`, never
    /// one call with `count = 4`. The request's own `count` is ignored.
    Incremental,
    /// One request for `count` images, optionally curated by the service.
    Batch,
}

#[derive(Clone)]
pub struct ImageGenerationCoordinator {
    service: Arc<dyn GenerationService>,
    invoker: RetryingInvoker,
}

impl ImageGenerationCoordinator {
    pub fn new(service: Arc<dyn GenerationService>, invoker: RetryingInvoker) -> Self {
        Self { service, invoker }
    }

    pub async fn generate(
        &self,
        request: ImageRequest,
        mode: DeliveryMode,
        derived: DerivedFields,
        progress: &ProgressReporter,
    ) -> Result<Vec<GeneratedImage>, LumenError> {
        let start = Instant::now();
        let images = match mode {
            DeliveryMode::Incremental => self.generate_drafts(&request, &derived, progress).await?,
            DeliveryMode::Batch => self.generate_batch(&request, &derived).await?,
        };
        info!(
            "Generated {} image(s) ({:?}, quality={}) in {}ms",
            images.len(),
            mode,
            request.quality.as_str(),
            start.elapsed().as_millis()
        );
        Ok(images)
    }

    async fn generate_drafts(
        &self,
        request: &ImageRequest,
        derived: &DerivedFields,
        progress: &ProgressReporter,
    ) -> Result<Vec<GeneratedImage>, LumenError> {
        let single = ImageRequest {
            count: 1,
            curated: false,
            ..request.clone()
        };

        let mut pending: FuturesUnordered<_> = (0..DRAFT_BATCH_SIZE)
            .map(|index| {
                let single = &single;
                async move {
                    let raw = self
                        .invoker
                        .invoke("generate_draft", || self.service.generate_images(single))
                        .await?;
                    let first = raw.into_iter().next().ok_or_else(|| {
                        LumenError::GenerationFailure(format!("draft {} returned no image", index))
                    })?;
                    Ok::<_, LumenError>((index, first))
                }
            })
            .collect();

        let mut slots: Vec<Option<GeneratedImage>> = vec![None; DRAFT_BATCH_SIZE];
        // Any failed draft fails the batch; unfinished requests are dropped.
        while let Some(result) = pending.next().await {
            let (index, raw) = result?;
            let image = Self::build_image(raw, &request.prompt, derived)?;
            debug!("Draft {} of {} ready", index + 1, DRAFT_BATCH_SIZE);
            progress.emit(ProgressEvent::DraftReady {
                index,
                total: DRAFT_BATCH_SIZE,
                image: image.clone(),
            });
            slots[index] = Some(image);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    async fn generate_batch(
        &self,
        request: &ImageRequest,
        derived: &DerivedFields,
    ) -> Result<Vec<GeneratedImage>, LumenError> {
        let count = request.count.clamp(1, 4);
        let request = ImageRequest {
            count,
            ..request.clone()
        };

        let raw = self
            .invoker
            .invoke("generate_images", || self.service.generate_images(&request))
            .await?;

        if raw.is_empty() {
            return Err(LumenError::GenerationFailure(
                "the generation service returned no images".to_string(),
            ));
        }

        raw.into_iter()
            .take(count as usize)
            .map(|r| Self::build_image(r, &request.prompt, derived))
            .collect()
    }

    fn build_image(
        raw: RawImage,
        prompt: &str,
        derived: &DerivedFields,
    ) -> Result<GeneratedImage, LumenError> {
        if raw.data.is_empty() || raw.mime_type.is_empty() {
            return Err(LumenError::GenerationFailure(
                "the generation service returned an empty image".to_string(),
            ));
        }
        Ok(GeneratedImage::from_raw(raw, prompt).with_derived(derived.clone()))
    }
}
