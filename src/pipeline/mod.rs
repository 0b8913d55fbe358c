// src/pipeline/mod.rs
pub mod analyzer;
pub mod coordinator;
pub mod edit;
pub mod enhancer;
pub mod feedback;
pub mod refiner;
pub mod retry;
pub mod state_machine;

use crate::services::{GenerationService, RefinementService};
use std::sync::Arc;

pub use analyzer::PromptAnalyzer;
pub use coordinator::{DeliveryMode, ImageGenerationCoordinator};
pub use edit::{EditIntentClassifier, IterativeEditController, KeywordEditClassifier};
pub use enhancer::StyleEnhancer;
pub use feedback::FeedbackSink;
pub use refiner::RefinementPostProcessor;
pub use retry::{RetryPolicy, RetryingInvoker};
pub use state_machine::{GenerateRequest, GenerationOutcome, GenerationStateMachine};

/// The pipeline stages wired to their collaborators. Shared by every session.
pub struct Pipeline {
    pub analyzer: PromptAnalyzer,
    pub enhancer: StyleEnhancer,
    pub coordinator: ImageGenerationCoordinator,
    pub refiner: RefinementPostProcessor,
    pub editor: IterativeEditController,
    pub service: Arc<dyn GenerationService>,
    pub invoker: RetryingInvoker,
    pub feedback: Arc<dyn FeedbackSink>,
}

impl Pipeline {
    pub fn new(
        service: Arc<dyn GenerationService>,
        refinement: Arc<dyn RefinementService>,
        feedback: Arc<dyn FeedbackSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self::with_classifier(service, refinement, feedback, policy, Arc::new(KeywordEditClassifier))
    }

    pub fn with_classifier(
        service: Arc<dyn GenerationService>,
        refinement: Arc<dyn RefinementService>,
        feedback: Arc<dyn FeedbackSink>,
        policy: RetryPolicy,
        classifier: Arc<dyn EditIntentClassifier>,
    ) -> Self {
        let invoker = RetryingInvoker::new(policy);
        let analyzer = PromptAnalyzer::new(service.clone(), invoker.clone());
        let coordinator = ImageGenerationCoordinator::new(service.clone(), invoker.clone());
        let editor = IterativeEditController::new(
            service.clone(),
            invoker.clone(),
            analyzer.clone(),
            coordinator.clone(),
            classifier,
        );

        Self {
            enhancer: StyleEnhancer::new(service.clone(), invoker.clone()),
            refiner: RefinementPostProcessor::new(refinement, invoker.clone()),
            analyzer,
            coordinator,
            editor,
            service,
            invoker,
            feedback,
        }
    }
}
