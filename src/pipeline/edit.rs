// src/pipeline/edit.rs
use crate::errors::LumenError;
use crate::events::ProgressReporter;
use crate::models::{DerivedFields, GeneratedImage, QualityLevel, TextStyleIntent};
use crate::pipeline::analyzer::PromptAnalyzer;
use crate::pipeline::coordinator::{DeliveryMode, ImageGenerationCoordinator};
use crate::pipeline::enhancer::negative_prompt;
use crate::pipeline::retry::RetryingInvoker;
use crate::services::GenerationService;
use crate::services::generation_service::ImageRequest;
use log::info;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditIntent {
    /// Does not touch rendered text.
    Visual,
    /// Adds, changes or rewrites text.
    Text,
    /// Asks for all text to be removed.
    TextRemoval,
}

/// Decides whether an edit instruction is about rendered text.
pub trait EditIntentClassifier: Send + Sync {
    fn classify(&self, instruction: &str) -> EditIntent;
}

/// Substring heuristic over a fixed keyword list.
///
/// Cheap and predictable, but it is not language understanding: "add sparkles"
/// counts as a text edit because it contains "add", and "erase the caption"
/// does not. A text classification only means re-analysis decides the text;
/// it never invents text on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordEditClassifier;

const TEXT_EDIT_KEYWORDS: &[&str] = &["add", "change", "write", "remove", "no text"];
const REMOVAL_PHRASES: &[&str] = &["remove text", "no text"];

impl EditIntentClassifier for KeywordEditClassifier {
    fn classify(&self, instruction: &str) -> EditIntent {
        let lowered = instruction.to_lowercase();
        if !TEXT_EDIT_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            return EditIntent::Visual;
        }
        if REMOVAL_PHRASES.iter().any(|p| lowered.contains(p)) {
            EditIntent::TextRemoval
        } else {
            EditIntent::Text
        }
    }
}

/// Session parameters an edit needs besides the focused image.
#[derive(Debug, Clone)]
pub struct EditContext {
    pub style_key: String,
    pub aspect_ratio: String,
    pub process_text: bool,
}

#[derive(Clone)]
pub struct IterativeEditController {
    service: Arc<dyn GenerationService>,
    invoker: RetryingInvoker,
    analyzer: PromptAnalyzer,
    coordinator: ImageGenerationCoordinator,
    classifier: Arc<dyn EditIntentClassifier>,
}

impl IterativeEditController {
    pub fn new(
        service: Arc<dyn GenerationService>,
        invoker: RetryingInvoker,
        analyzer: PromptAnalyzer,
        coordinator: ImageGenerationCoordinator,
        classifier: Arc<dyn EditIntentClassifier>,
    ) -> Self {
        Self {
            service,
            invoker,
            analyzer,
            coordinator,
            classifier,
        }
    }

    pub async fn edit(
        &self,
        focused: &GeneratedImage,
        instruction: &str,
        intent: TextStyleIntent,
        context: &EditContext,
    ) -> Result<GeneratedImage, LumenError> {
        let classified = self.classifier.classify(instruction);
        info!("Editing image {} ({:?}): {}", focused.id, classified, instruction);

        let mut final_text = focused.final_text.clone();
        if classified == EditIntent::TextRemoval {
            final_text = Some(String::new());
        }

        let prompt = self
            .invoker
            .invoke("rewrite_for_edit", || {
                self.service
                    .rewrite_for_edit(&focused.prompt, instruction, intent)
            })
            .await?;

        // Fresh text info keeps the negative prompt in step with the new prompt.
        let reanalysis = self.analyzer.analyze(&prompt, context.process_text).await?;
        if let Some(text) = reanalysis.primary_text() {
            final_text = Some(text.to_string());
        }

        let negative = negative_prompt(
            &reanalysis.analysis,
            &reanalysis.text_info,
            &context.style_key,
        );

        let request = ImageRequest {
            prompt: prompt.clone(),
            text_info: reanalysis.text_info,
            reference_image: Some(focused.as_reference()),
            aspect_ratio: context.aspect_ratio.clone(),
            negative_prompt: Some(negative),
            count: 1,
            curated: false,
            quality: QualityLevel::Draft,
        };
        let derived = DerivedFields {
            final_text,
            final_background: focused.final_background.clone(),
            text_style_intent: Some(intent),
        };

        self.coordinator
            .generate(request, DeliveryMode::Batch, derived, &ProgressReporter::none())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LumenError::EditFailure("no image returned for the edit".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGenerationService, image_with_text, text_info};

    fn controller(fake: Arc<FakeGenerationService>) -> IterativeEditController {
        let invoker = RetryingInvoker::default();
        IterativeEditController::new(
            fake.clone(),
            invoker.clone(),
            PromptAnalyzer::new(fake.clone(), invoker.clone()),
            ImageGenerationCoordinator::new(fake, invoker),
            Arc::new(KeywordEditClassifier),
        )
    }

    fn context() -> EditContext {
        EditContext {
            style_key: "auto".into(),
            aspect_ratio: "1:1".into(),
            process_text: true,
        }
    }

    #[test]
    fn keyword_classifier_cases() {
        let c = KeywordEditClassifier;
        assert_eq!(c.classify("Remove text please"), EditIntent::TextRemoval);
        assert_eq!(c.classify("no text at all"), EditIntent::TextRemoval);
        assert_eq!(c.classify("WRITE 'Sale' on the sign"), EditIntent::Text);
        assert_eq!(c.classify("change the background to a beach"), EditIntent::Text);
        assert_eq!(c.classify("make it darker"), EditIntent::Visual);
    }

    #[tokio::test]
    async fn remove_text_clears_final_text() {
        let fake = Arc::new(FakeGenerationService::new());
        let edited = controller(fake)
            .edit(&image_with_text(Some("Hello")), "remove text please", TextStyleIntent::Subtle, &context())
            .await
            .unwrap();
        assert_eq!(edited.final_text.as_deref(), Some(""));
        assert_eq!(edited.text_style_intent, Some(TextStyleIntent::Subtle));
    }

    #[tokio::test]
    async fn background_change_keeps_text() {
        let fake = Arc::new(FakeGenerationService::new());
        let focused = image_with_text(Some("Hello"));
        let edited = controller(fake)
            .edit(&focused, "change the background to a beach", TextStyleIntent::Bold, &context())
            .await
            .unwrap();
        assert_eq!(edited.final_text.as_deref(), Some("Hello"));
        assert_eq!(edited.final_background, focused.final_background);
        assert_ne!(edited.id, focused.id);
    }

    #[tokio::test]
    async fn reanalysed_text_wins() {
        let fake = Arc::new(FakeGenerationService::new());
        fake.set_detected_text(vec![text_info("World")]);
        let edited = controller(fake)
            .edit(&image_with_text(Some("Hello")), "write World instead", TextStyleIntent::Bold, &context())
            .await
            .unwrap();
        assert_eq!(edited.final_text.as_deref(), Some("World"));
    }

    #[tokio::test]
    async fn edit_makes_two_text_calls_and_one_draft_request_with_reference() {
        let fake = Arc::new(FakeGenerationService::new());
        controller(fake.clone())
            .edit(&image_with_text(None), "add sparkles around it", TextStyleIntent::Integrated, &context())
            .await
            .unwrap();

        assert_eq!(fake.rewrite_calls(), 1);
        assert_eq!(fake.analyze_calls(), 1);
        let calls = fake.generate_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].count, 1);
        assert_eq!(calls[0].quality, QualityLevel::Draft);
        assert!(calls[0].has_reference);
        assert!(calls[0].negative_prompt.is_some());
    }
}
