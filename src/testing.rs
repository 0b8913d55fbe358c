// src/testing.rs
//! In-memory collaborators shared by the unit tests.
use crate::catalog::RefinerPreset;
use crate::errors::LumenError;
use crate::models::*;
use crate::pipeline::feedback::FeedbackSink;
use crate::pipeline::{GenerateRequest, GenerationStateMachine, Pipeline, RetryPolicy};
use crate::services::RefinementService;
use crate::services::generation_service::{EnhanceRequest, GenerationService, ImageRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub const FAKE_IMAGE: &[u8] = b"fake-png";

#[derive(Debug, Clone)]
pub struct GenerateCall {
    pub prompt: String,
    pub count: u8,
    pub curated: bool,
    pub quality: QualityLevel,
    pub has_reference: bool,
    pub negative_prompt: Option<String>,
}

/// Scriptable generation service. Every call is recorded.
#[derive(Default)]
pub struct FakeGenerationService {
    detected_text: Mutex<Vec<DetectedTextInfo>>,
    analyze_failures: Mutex<VecDeque<LumenError>>,
    generate_failures: Mutex<VecDeque<LumenError>>,
    no_images: AtomicBool,
    analyze_calls: AtomicUsize,
    rewrite_calls: AtomicUsize,
    enhance_calls: Mutex<Vec<(String, QualityLevel)>>,
    generate_calls: Mutex<Vec<GenerateCall>>,
    gates: Mutex<Vec<(String, Arc<Semaphore>)>>,
}

impl FakeGenerationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_detected_text(&self, text: Vec<DetectedTextInfo>) {
        *self.detected_text.lock().unwrap() = text;
    }

    pub fn fail_analyze_with(&self, err: LumenError) {
        self.analyze_failures.lock().unwrap().push_back(err);
    }

    /// Each queued error is returned by one generate call, in order.
    pub fn fail_generate_with(&self, errors: Vec<LumenError>) {
        self.generate_failures.lock().unwrap().extend(errors);
    }

    pub fn return_no_images(&self) {
        self.no_images.store(true, Ordering::SeqCst);
    }

    /// Generate calls whose prompt contains `fragment` wait for a permit.
    pub fn gate_generation(&self, fragment: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .push((fragment.to_string(), gate.clone()));
        gate
    }

    pub async fn wait_for_generate_calls(&self, n: usize) {
        while self.generate_calls.lock().unwrap().len() < n {
            tokio::task::yield_now().await;
        }
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn rewrite_calls(&self) -> usize {
        self.rewrite_calls.load(Ordering::SeqCst)
    }

    pub fn enhance_calls(&self) -> Vec<(String, QualityLevel)> {
        self.enhance_calls.lock().unwrap().clone()
    }

    pub fn generate_calls(&self) -> Vec<GenerateCall> {
        self.generate_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for FakeGenerationService {
    async fn analyze_prompt(
        &self,
        prompt: &str,
        _process_text: bool,
    ) -> Result<AnalysisOutcome, LumenError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.analyze_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let subject = prompt.split_whitespace().last().unwrap_or("subject");
        Ok(AnalysisOutcome {
            text_info: self.detected_text.lock().unwrap().clone(),
            analysis: analysis(subject),
        })
    }

    async fn enhance_prompt(&self, request: &EnhanceRequest) -> Result<String, LumenError> {
        self.enhance_calls
            .lock()
            .unwrap()
            .push((request.style_key.clone(), request.quality));
        Ok(format!("enhanced: {}", request.prompt))
    }

    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<RawImage>, LumenError> {
        self.generate_calls.lock().unwrap().push(GenerateCall {
            prompt: request.prompt.clone(),
            count: request.count,
            curated: request.curated,
            quality: request.quality,
            has_reference: request.reference_image.is_some(),
            negative_prompt: request.negative_prompt.clone(),
        });

        let gate = self
            .gates
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| request.prompt.contains(fragment.as_str()))
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| LumenError::GenerationFailure(e.to_string()))?;
        }

        if let Some(err) = self.generate_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.no_images.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        Ok((0..request.count)
            .map(|i| RawImage {
                data: FAKE_IMAGE.to_vec(),
                mime_type: "image/png".to_string(),
                scores: request.curated.then(|| QualityScores {
                    composition: 8.0,
                    detail: 8.0,
                    lighting: 8.0,
                    color: 8.0,
                    overall: 8.0 - f32::from(i),
                }),
            })
            .collect())
    }

    async fn describe_image(&self, _data: &[u8], _mime_type: &str) -> Result<String, LumenError> {
        Ok("a lighthouse on a cliff at dusk".to_string())
    }

    async fn rewrite_for_edit(
        &self,
        base_prompt: &str,
        instruction: &str,
        _intent: TextStyleIntent,
    ) -> Result<String, LumenError> {
        self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} | {}", base_prompt, instruction))
    }
}

#[derive(Default)]
pub struct FakeRefiner {
    calls: Mutex<Vec<RefinerPreset>>,
    fail_next: AtomicBool,
}

impl FakeRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RefinerPreset> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RefinementService for FakeRefiner {
    async fn refine(&self, data: &[u8], preset: RefinerPreset) -> Result<Vec<u8>, LumenError> {
        self.calls.lock().unwrap().push(preset);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LumenError::Refinement("refiner unavailable".to_string()));
        }
        Ok([b"refined:".as_slice(), data].concat())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<QualityFeedbackRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wait_for_records(&self, n: usize) -> Vec<QualityFeedbackRecord> {
        loop {
            {
                let records = self.records.lock().unwrap();
                if records.len() >= n {
                    return records.clone();
                }
            }
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl FeedbackSink for RecordingSink {
    async fn record(&self, record: QualityFeedbackRecord) -> Result<(), LumenError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

pub fn machine(
    service: Arc<FakeGenerationService>,
    refiner: Arc<FakeRefiner>,
    settings: SessionSettings,
) -> Arc<GenerationStateMachine> {
    let pipeline = Pipeline::new(
        service,
        refiner,
        Arc::new(RecordingSink::new()),
        RetryPolicy::default(),
    );
    Arc::new(GenerationStateMachine::new(Arc::new(pipeline), settings))
}

pub fn prompt(text: &str) -> GenerateRequest {
    GenerateRequest {
        prompt: text.to_string(),
        quick_remix: false,
    }
}

/// Standard quality, one variation, no refinement.
pub fn final_settings() -> SessionSettings {
    SessionSettings {
        quality: QualityLevel::Standard,
        flags: GenerationFlags {
            enable_refiner: false,
            ..GenerationFlags::default()
        },
        ..SessionSettings::default()
    }
}

pub fn rate_limited() -> LumenError {
    LumenError::RateLimited { retry_after: None }
}

pub fn analysis(subject: &str) -> PromptAnalysis {
    PromptAnalysis {
        subject: SubjectInfo {
            primary: subject.to_string(),
            secondary: Vec::new(),
        },
        mood: MoodInfo {
            primary: "calm".to_string(),
            secondary: vec!["quiet".to_string()],
        },
        lighting: LightingInfo {
            scenario: "golden hour".to_string(),
        },
        environment: EnvironmentInfo {
            environment_type: "outdoor".to_string(),
            details: "snowy forest clearing".to_string(),
        },
        style_intent: "natural photo".to_string(),
    }
}

pub fn text_info(text: &str) -> DetectedTextInfo {
    DetectedTextInfo {
        text: text.to_string(),
        placement: "centered on the sign".to_string(),
        font_style: "bold sans-serif".to_string(),
        font_size: "large".to_string(),
        physical_properties: PhysicalProperties {
            material: "painted wood".to_string(),
            lighting_interaction: "catches the warm light".to_string(),
            surface_texture: "weathered".to_string(),
            environmental_interaction: "light snow on the letters".to_string(),
            perspective_and_depth: "slightly angled".to_string(),
        },
    }
}

pub fn image_with_text(text: Option<&str>) -> GeneratedImage {
    GeneratedImage {
        id: Uuid::new_v4(),
        data: FAKE_IMAGE.to_vec(),
        mime_type: "image/png".to_string(),
        prompt: "a wooden sign in a snowy forest".to_string(),
        final_text: text.map(str::to_string),
        final_background: Some("snowy forest clearing".to_string()),
        text_style_intent: Some(TextStyleIntent::Integrated),
        scores: None,
        created_at: Utc::now(),
    }
}

pub fn metadata() -> GenerationMetadata {
    GenerationMetadata {
        analysis: analysis("fox"),
        style_key: "auto".to_string(),
        quality: QualityLevel::Draft,
        refiner_preset: None,
        flags: GenerationFlags::default(),
    }
}
