// src/models.rs
use crate::catalog::RefinerPreset;
use crate::errors::LumenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serializes image payloads as base64 strings instead of JSON byte arrays.
mod b64 {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    #[default]
    Draft,
    Standard,
    Premium,
    Ultra,
}

impl QualityLevel {
    pub fn is_draft(self) -> bool {
        self == QualityLevel::Draft
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityLevel::Draft => "draft",
            QualityLevel::Standard => "standard",
            QualityLevel::Premium => "premium",
            QualityLevel::Ultra => "ultra",
        }
    }
}

/// Coarse directive for how rendered text should look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextStyleIntent {
    Subtle,
    #[default]
    Integrated,
    Bold,
    Cinematic,
}

impl TextStyleIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            TextStyleIntent::Subtle => "subtle",
            TextStyleIntent::Integrated => "integrated",
            TextStyleIntent::Bold => "bold",
            TextStyleIntent::Cinematic => "cinematic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    pub mime_type: String,
}

// Prompt analysis. Every field is required; a response missing one fails to parse.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub primary: String,
    pub secondary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodInfo {
    pub primary: String,
    pub secondary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingInfo {
    pub scenario: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    #[serde(rename = "type")]
    pub environment_type: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub subject: SubjectInfo,
    pub mood: MoodInfo,
    pub lighting: LightingInfo,
    pub environment: EnvironmentInfo,
    pub style_intent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalProperties {
    pub material: String,
    pub lighting_interaction: String,
    pub surface_texture: String,
    pub environmental_interaction: String,
    pub perspective_and_depth: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedTextInfo {
    pub text: String,
    pub placement: String,
    pub font_style: String,
    pub font_size: String,
    pub physical_properties: PhysicalProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    #[serde(default)]
    pub text_info: Vec<DetectedTextInfo>,
    pub analysis: PromptAnalysis,
}

impl AnalysisOutcome {
    /// First non-empty detected text, if any.
    pub fn primary_text(&self) -> Option<&str> {
        self.text_info
            .iter()
            .map(|t| t.text.trim())
            .find(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub composition: f32,
    pub detail: f32,
    pub lighting: f32,
    pub color: f32,
    pub overall: f32,
}

/// Image bytes as returned by the generation service, before the pipeline
/// attaches prompt and derived fields.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub scores: Option<QualityScores>,
}

/// Fields derived from analysis or edits that travel with an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedFields {
    pub final_text: Option<String>,
    pub final_background: Option<String>,
    pub text_style_intent: Option<TextStyleIntent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: Uuid,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub prompt: String,
    pub final_text: Option<String>,
    pub final_background: Option<String>,
    pub text_style_intent: Option<TextStyleIntent>,
    pub scores: Option<QualityScores>,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn from_raw(raw: RawImage, prompt: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            data: raw.data,
            mime_type: raw.mime_type,
            prompt: prompt.to_string(),
            final_text: None,
            final_background: None,
            text_style_intent: None,
            scores: raw.scores,
            created_at: Utc::now(),
        }
    }

    /// A new image with a replaced payload; prompt, derived fields and scores carry over.
    pub fn with_payload(&self, data: Vec<u8>, mime_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            mime_type: mime_type.to_string(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn with_derived(mut self, derived: DerivedFields) -> Self {
        self.final_text = derived.final_text;
        self.final_background = derived.final_background;
        self.text_style_intent = derived.text_style_intent;
        self
    }

    pub fn derived(&self) -> DerivedFields {
        DerivedFields {
            final_text: self.final_text.clone(),
            final_background: self.final_background.clone(),
            text_style_intent: self.text_style_intent,
        }
    }

    pub fn as_reference(&self) -> ReferenceImage {
        ReferenceImage {
            data: self.data.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationFlags {
    pub enable_refiner: bool,
    pub use_curated_selection: bool,
    pub process_text: bool,
}

impl Default for GenerationFlags {
    fn default() -> Self {
        Self {
            enable_refiner: true,
            use_curated_selection: false,
            process_text: true,
        }
    }
}

/// Optional composition choices layered on top of the chosen style.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionOverrides {
    pub camera_angle: Option<String>,
    pub lighting: Option<String>,
    pub material: Option<String>,
}

impl CompositionOverrides {
    pub fn is_empty(&self) -> bool {
        self.camera_angle.is_none() && self.lighting.is_none() && self.material.is_none()
    }

    fn validate(&self) -> Result<(), LumenError> {
        use crate::catalog;

        let unknown = |name: &str, key: &str| {
            LumenError::Validation(format!("Unknown {}: {}", name, key))
        };
        if let Some(key) = &self.camera_angle {
            catalog::camera_angle(key).ok_or_else(|| unknown("camera angle", key))?;
        }
        if let Some(key) = &self.lighting {
            catalog::lighting(key).ok_or_else(|| unknown("lighting", key))?;
        }
        if let Some(key) = &self.material {
            catalog::material(key).ok_or_else(|| unknown("material", key))?;
        }
        Ok(())
    }
}

/// Missing fields fall back to their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub style_key: String,
    pub quality: QualityLevel,
    pub aspect_ratio: String,
    pub variation_count: u8,
    pub flags: GenerationFlags,
    pub text_style_intent: TextStyleIntent,
    pub composition: Option<CompositionOverrides>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            style_key: "auto".to_string(),
            quality: QualityLevel::Draft,
            aspect_ratio: "1:1".to_string(),
            variation_count: 1,
            flags: GenerationFlags::default(),
            text_style_intent: TextStyleIntent::default(),
            composition: None,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), LumenError> {
        if !(1..=4).contains(&self.variation_count) {
            return Err(LumenError::Validation(format!(
                "variation_count must be between 1 and 4, got {}",
                self.variation_count
            )));
        }
        if crate::catalog::style(&self.style_key).is_none() {
            return Err(LumenError::Validation(format!(
                "Unknown style: {}",
                self.style_key
            )));
        }
        if crate::catalog::aspect_ratio(&self.aspect_ratio).is_none() {
            return Err(LumenError::Validation(format!(
                "Unknown aspect ratio: {}",
                self.aspect_ratio
            )));
        }
        if let Some(composition) = &self.composition {
            composition.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyKind {
    Preview,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Analyzing,
    DraftGenerating,
    FinalGenerating,
    Ready { kind: ReadyKind },
    Editing { resume: ReadyKind },
}

impl LifecycleState {
    pub fn ready_kind(self) -> Option<ReadyKind> {
        match self {
            LifecycleState::Ready { kind } => Some(kind),
            _ => None,
        }
    }
}

/// Snapshot of the inputs that produced the current image list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub analysis: PromptAnalysis,
    pub style_key: String,
    pub quality: QualityLevel,
    pub refiner_preset: Option<RefinerPreset>,
    pub flags: GenerationFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFeedbackRecord {
    pub id: Uuid,
    pub prompt: String,
    pub rating: u8,
    pub automated_score: Option<f32>,
    pub metadata: GenerationMetadata,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GenerationSession {
    pub id: Uuid,
    pub prompt: String,
    pub settings: SessionSettings,
    pub reference_image: Option<ReferenceImage>,
    pub state: LifecycleState,
    pub images: Vec<GeneratedImage>,
    pub selected_index: Option<usize>,
    pub epoch: u64,
    /// Epoch owned by the operation currently in flight.
    pub in_flight: Option<u64>,
    pub credentials_ready: bool,
    pub last_analysis: Option<AnalysisOutcome>,
    pub last_metadata: Option<GenerationMetadata>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationSession {
    pub fn new(settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prompt: String::new(),
            settings,
            reference_image: None,
            state: LifecycleState::Idle,
            images: Vec::new(),
            selected_index: None,
            epoch: 0,
            in_flight: None,
            credentials_ready: true,
            last_analysis: None,
            last_metadata: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn focused_image(&self) -> Option<&GeneratedImage> {
        self.selected_index.and_then(|i| self.images.get(i))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            prompt: self.prompt.clone(),
            settings: self.settings.clone(),
            has_reference_image: self.reference_image.is_some(),
            state: self.state,
            images: self.images.iter().map(ImageSummary::from).collect(),
            selected_index: self.selected_index,
            epoch: self.epoch,
            busy: self.in_flight.is_some(),
            credentials_ready: self.credentials_ready,
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub id: Uuid,
    pub mime_type: String,
    pub size: usize,
    pub prompt: String,
    pub final_text: Option<String>,
    pub final_background: Option<String>,
    pub text_style_intent: Option<TextStyleIntent>,
    pub scores: Option<QualityScores>,
}

impl From<&GeneratedImage> for ImageSummary {
    fn from(image: &GeneratedImage) -> Self {
        Self {
            id: image.id,
            mime_type: image.mime_type.clone(),
            size: image.data.len(),
            prompt: image.prompt.clone(),
            final_text: image.final_text.clone(),
            final_background: image.final_background.clone(),
            text_style_intent: image.text_style_intent,
            scores: image.scores,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub prompt: String,
    pub settings: SessionSettings,
    pub has_reference_image: bool,
    pub state: LifecycleState,
    pub images: Vec<ImageSummary>,
    pub selected_index: Option<usize>,
    pub epoch: u64,
    pub busy: bool,
    pub credentials_ready: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
