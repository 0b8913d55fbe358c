// src/pipeline/analyzer.rs
use crate::errors::LumenError;
use crate::models::AnalysisOutcome;
use crate::pipeline::retry::RetryingInvoker;
use crate::services::GenerationService;
use log::info;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct PromptAnalyzer {
    service: Arc<dyn GenerationService>,
    invoker: RetryingInvoker,
}

impl PromptAnalyzer {
    pub fn new(service: Arc<dyn GenerationService>, invoker: RetryingInvoker) -> Self {
        Self { service, invoker }
    }

    /// One external call. With `process_text` off the call still runs but any
    /// detected text is dropped.
    pub async fn analyze(
        &self,
        prompt: &str,
        process_text: bool,
    ) -> Result<AnalysisOutcome, LumenError> {
        let start = Instant::now();

        let mut outcome = self
            .invoker
            .invoke("analyze_prompt", || {
                self.service.analyze_prompt(prompt, process_text)
            })
            .await?;

        if !process_text {
            outcome.text_info.clear();
        }

        info!(
            "Analyzed prompt in {}ms: subject={}, {} text element(s)",
            start.elapsed().as_millis(),
            outcome.analysis.subject.primary,
            outcome.text_info.len()
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGenerationService, text_info};

    #[tokio::test]
    async fn text_is_dropped_when_processing_disabled() {
        let fake = Arc::new(FakeGenerationService::new());
        fake.set_detected_text(vec![text_info("SALE")]);
        let analyzer = PromptAnalyzer::new(fake.clone(), RetryingInvoker::default());

        let with_text = analyzer.analyze("a shop sign", true).await.unwrap();
        assert_eq!(with_text.primary_text(), Some("SALE"));

        let without = analyzer.analyze("a shop sign", false).await.unwrap();
        assert!(without.text_info.is_empty());
        assert_eq!(fake.analyze_calls(), 2);
    }
}
