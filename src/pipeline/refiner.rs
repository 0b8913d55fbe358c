// src/pipeline/refiner.rs
use crate::catalog::RefinerPreset;
use crate::errors::LumenError;
use crate::models::GeneratedImage;
use crate::pipeline::retry::RetryingInvoker;
use crate::services::RefinementService;
use crate::services::refinement_service::REFINED_MIME_TYPE;
use futures_util::future::try_join_all;
use log::info;
use std::sync::Arc;

#[derive(Clone)]
pub struct RefinementPostProcessor {
    service: Arc<dyn RefinementService>,
    invoker: RetryingInvoker,
}

impl RefinementPostProcessor {
    pub fn new(service: Arc<dyn RefinementService>, invoker: RetryingInvoker) -> Self {
        Self { service, invoker }
    }

    /// Refines each image on its own. Order and count are preserved; one
    /// failure fails the whole batch.
    pub async fn refine(
        &self,
        images: &[GeneratedImage],
        preset: RefinerPreset,
    ) -> Result<Vec<GeneratedImage>, LumenError> {
        info!("Refining {} image(s) with preset {}", images.len(), preset.as_str());

        try_join_all(images.iter().map(|image| async move {
            let data = self
                .invoker
                .invoke("refine", || self.service.refine(&image.data, preset))
                .await?;
            Ok::<_, LumenError>(image.with_payload(data, REFINED_MIME_TYPE))
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRefiner, image_with_text};

    #[tokio::test]
    async fn preserves_order_prompt_and_derived_fields() {
        let fake = Arc::new(FakeRefiner::new());
        let refiner = RefinementPostProcessor::new(fake.clone(), RetryingInvoker::default());
        let mut first = image_with_text(Some("Hello"));
        first.mime_type = "image/jpeg".into();
        let second = image_with_text(None);

        let refined = refiner
            .refine(&[first.clone(), second.clone()], RefinerPreset::Cinematic)
            .await
            .unwrap();

        assert_eq!(refined.len(), 2);
        assert_eq!(refined[0].final_text.as_deref(), Some("Hello"));
        assert_eq!(refined[0].prompt, first.prompt);
        assert!(refined.iter().all(|i| i.mime_type == "image/png"));
        assert_eq!(fake.calls(), vec![RefinerPreset::Cinematic; 2]);
    }

    #[tokio::test]
    async fn single_failure_fails_batch() {
        let fake = Arc::new(FakeRefiner::new());
        fake.fail_next();
        let refiner = RefinementPostProcessor::new(fake, RetryingInvoker::default());

        let result = refiner
            .refine(&[image_with_text(None), image_with_text(None)], RefinerPreset::Soft)
            .await;
        assert!(matches!(result, Err(LumenError::Refinement(_))));
    }
}
