// src/services/generation_service.rs
use crate::errors::LumenError;
use crate::models::*;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::warn;
use reqwest::{Client, Response, StatusCode, multipart};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EnhanceRequest {
    pub prompt: String,
    pub analysis: PromptAnalysis,
    pub text_info: Vec<DetectedTextInfo>,
    pub style_key: String,
    pub quality: QualityLevel,
    pub overrides: Option<CompositionOverrides>,
    pub reference_image: Option<ReferenceImage>,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub text_info: Vec<DetectedTextInfo>,
    pub reference_image: Option<ReferenceImage>,
    pub aspect_ratio: String,
    pub negative_prompt: Option<String>,
    pub count: u8,
    pub curated: bool,
    pub quality: QualityLevel,
}

/// The external generative service. Implementations report rate limiting as
/// `LumenError::RateLimited` and rejected credentials as `PermissionDenied`.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn analyze_prompt(
        &self,
        prompt: &str,
        process_text: bool,
    ) -> Result<AnalysisOutcome, LumenError>;

    async fn enhance_prompt(&self, request: &EnhanceRequest) -> Result<String, LumenError>;

    /// When `request.curated` is set, the service draws a larger candidate
    /// pool and returns only its top `count` picks.
    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<RawImage>, LumenError>;

    async fn describe_image(&self, data: &[u8], mime_type: &str) -> Result<String, LumenError>;

    async fn rewrite_for_edit(
        &self,
        base_prompt: &str,
        instruction: &str,
        intent: TextStyleIntent,
    ) -> Result<String, LumenError>;
}

pub struct HttpGenerationService {
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    client: Client,
}

const MAX_CANDIDATE_POOL: u8 = 8;

#[derive(Deserialize)]
struct CandidateScore {
    index: usize,
    composition: f32,
    detail: f32,
    lighting: f32,
    color: f32,
    overall: f32,
}

#[derive(Deserialize)]
struct CandidateScores {
    scores: Vec<CandidateScore>,
}

impl HttpGenerationService {
    pub fn new(api_key: String, base_url: String, text_model: String, image_model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            text_model,
            image_model,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Maps HTTP failures onto the typed error taxonomy.
    async fn check_status(response: Response) -> Result<Response, LumenError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LumenError::RateLimited { retry_after });
        }

        let error_text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(LumenError::PermissionDenied(error_text))
            }
            _ => Err(LumenError::LLM(format!("HTTP {}: {}", status, error_text))),
        }
    }

    async fn chat(&self, messages: Value, json_mode: bool) -> Result<String, LumenError> {
        let mut body = json!({
            "model": self.text_model,
            "messages": messages,
            "max_tokens": 4096,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LumenError::LLM(format!("Chat request failed: {}", e)))?;

        let result: Value = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LumenError::LLM(format!("Failed to parse chat response: {}", e)))?;

        result["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LumenError::LLM("No content in chat response".to_string()))
    }

    fn data_url(data: &[u8], mime_type: &str) -> String {
        format!(
            "data:{};base64,{}",
            mime_type,
            general_purpose::STANDARD.encode(data)
        )
    }

    fn size_for(aspect_ratio: &str) -> &'static str {
        match aspect_ratio {
            "16:9" | "4:3" => "1536x1024",
            "9:16" | "3:4" => "1024x1536",
            _ => "1024x1024",
        }
    }

    fn quality_for(quality: QualityLevel) -> &'static str {
        match quality {
            QualityLevel::Draft => "low",
            QualityLevel::Standard => "medium",
            QualityLevel::Premium | QualityLevel::Ultra => "high",
        }
    }

    fn full_prompt(request: &ImageRequest) -> String {
        let mut prompt = request.prompt.clone();
        for info in &request.text_info {
            if !info.text.trim().is_empty() {
                prompt.push_str(&format!(
                    "\n\nRender the text \"{}\" {} in a {} {} style.",
                    info.text, info.placement, info.font_size, info.font_style
                ));
            }
        }
        if let Some(negative) = request.negative_prompt.as_deref().filter(|n| !n.is_empty()) {
            prompt.push_str(&format!("\n\nAvoid: {}", negative));
        }
        prompt
    }

    async fn request_pixels(&self, request: &ImageRequest, n: u8) -> Result<Vec<RawImage>, LumenError> {
        let prompt = Self::full_prompt(request);
        let size = Self::size_for(&request.aspect_ratio);
        let quality = Self::quality_for(request.quality);

        let response = match &request.reference_image {
            Some(reference) => {
                let part = multipart::Part::bytes(reference.data.clone())
                    .file_name("reference")
                    .mime_str(&reference.mime_type)
                    .map_err(|e| LumenError::LLM(format!("Invalid reference mime type: {}", e)))?;
                let form = multipart::Form::new()
                    .text("model", self.image_model.clone())
                    .text("prompt", prompt)
                    .text("n", n.to_string())
                    .text("size", size)
                    .text("quality", quality)
                    .part("image", part);
                self.client
                    .post(self.url("/images/edits"))
                    .bearer_auth(&self.api_key)
                    .multipart(form)
                    .send()
                    .await
            }
            None => {
                self.client
                    .post(self.url("/images/generations"))
                    .bearer_auth(&self.api_key)
                    .json(&json!({
                        "model": self.image_model,
                        "prompt": prompt,
                        "n": n,
                        "size": size,
                        "quality": quality,
                    }))
                    .send()
                    .await
            }
        }
        .map_err(|e| LumenError::LLM(format!("Image generation request failed: {}", e)))?;

        let result: Value = Self::check_status(response).await?.json().await.map_err(|e| {
            LumenError::LLM(format!("Failed to parse generation response: {}", e))
        })?;

        result["data"]
            .as_array()
            .map(|items| items.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|item| item["b64_json"].as_str())
            .map(|b64| {
                let data = general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| LumenError::LLM(format!("Failed to decode image: {}", e)))?;
                Ok(RawImage {
                    data,
                    mime_type: "image/png".to_string(),
                    scores: None,
                })
            })
            .collect()
    }

    /// Scores every candidate with a vision call and keeps the best `keep`.
    async fn curate(&self, candidates: Vec<RawImage>, keep: usize) -> Result<Vec<RawImage>, LumenError> {
        let mut content = vec![json!({
            "type": "text",
            "text": "Score each image from 0 to 10 for composition, detail, lighting, color and overall quality. \
                     Return JSON: {\"scores\": [{\"index\": 0, \"composition\": 0, \"detail\": 0, \"lighting\": 0, \"color\": 0, \"overall\": 0}]}"
        })];
        for candidate in &candidates {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": Self::data_url(&candidate.data, &candidate.mime_type) }
            }));
        }

        let reply = self
            .chat(json!([{ "role": "user", "content": content }]), true)
            .await?;

        Self::select_curated(candidates, &reply, keep)
    }

    /// Best-scored candidates first. Slots the scorer left empty are filled
    /// from the remaining pool in order, so `keep` images come back whenever
    /// the pool holds that many.
    fn select_curated(
        candidates: Vec<RawImage>,
        reply: &str,
        keep: usize,
    ) -> Result<Vec<RawImage>, LumenError> {
        let mut scored: Vec<CandidateScore> = serde_json::from_str::<CandidateScores>(reply)
            .map_err(|e| LumenError::LLM(format!("Failed to parse curation scores: {}", e)))?
            .scores
            .into_iter()
            .filter(|s| s.index < candidates.len())
            .collect();
        scored.sort_by(|a, b| b.overall.total_cmp(&a.overall));

        let mut pool: Vec<Option<RawImage>> = candidates.into_iter().map(Some).collect();
        let mut selected: Vec<RawImage> = Vec::with_capacity(keep);
        for s in scored {
            if selected.len() == keep {
                break;
            }
            if let Some(mut image) = pool[s.index].take() {
                image.scores = Some(QualityScores {
                    composition: s.composition,
                    detail: s.detail,
                    lighting: s.lighting,
                    color: s.color,
                    overall: s.overall,
                });
                selected.push(image);
            }
        }

        let missing = keep - selected.len();
        if missing > 0 {
            warn!("Curation scored too few candidates, filling {} slot(s) unscored", missing);
            selected.extend(pool.into_iter().flatten().take(missing));
        }
        Ok(selected)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn analyze_prompt(
        &self,
        prompt: &str,
        process_text: bool,
    ) -> Result<AnalysisOutcome, LumenError> {
        let text_rule = if process_text {
            "List every piece of text the image should literally render in text_info \
             (text, placement, fontStyle, fontSize, physicalProperties {material, lightingInteraction, \
             surfaceTexture, environmentalInteraction, perspectiveAndDepth})."
        } else {
            "Return an empty text_info array."
        };
        let instruction = format!(
            "Analyze this image prompt for generation. {}\n\
             Return JSON: {{\"text_info\": [...], \"analysis\": {{\"subject\": {{\"primary\": \"\", \"secondary\": []}}, \
             \"mood\": {{\"primary\": \"\", \"secondary\": []}}, \"lighting\": {{\"scenario\": \"\"}}, \
             \"environment\": {{\"type\": \"\", \"details\": \"\"}}, \"style_intent\": \"\"}}}}\n\nPrompt: {}",
            text_rule, prompt
        );

        let reply = self
            .chat(json!([{ "role": "user", "content": instruction }]), true)
            .await?;

        serde_json::from_str(&reply)
            .map_err(|e| LumenError::LLM(format!("Failed to parse analysis JSON: {}", e)))
    }

    async fn enhance_prompt(&self, request: &EnhanceRequest) -> Result<String, LumenError> {
        let mut instruction = format!(
            "Rewrite this prompt into a detailed image generation prompt.\n\
             Style: {}\nQuality tier: {}\nAnalysis: {}\nText to render: {}\nPrompt: {}",
            request.style_key,
            request.quality.as_str(),
            serde_json::to_string(&request.analysis)?,
            serde_json::to_string(&request.text_info)?,
            request.prompt
        );
        if let Some(overrides) = request.overrides.as_ref().filter(|o| !o.is_empty()) {
            instruction.push_str(&format!(
                "\nComposition: {}",
                serde_json::to_string(overrides)?
            ));
        }
        instruction.push_str("\nReply with the prompt only.");

        let mut content = vec![json!({ "type": "text", "text": instruction })];
        if let Some(reference) = &request.reference_image {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": Self::data_url(&reference.data, &reference.mime_type) }
            }));
        }

        self.chat(json!([{ "role": "user", "content": content }]), false)
            .await
    }

    async fn generate_images(&self, request: &ImageRequest) -> Result<Vec<RawImage>, LumenError> {
        let keep = request.count.max(1);
        if !request.curated {
            return self.request_pixels(request, keep).await;
        }

        let pool = keep.saturating_mul(2).min(MAX_CANDIDATE_POOL);
        let candidates = self.request_pixels(request, pool).await?;
        if candidates.len() <= keep as usize {
            return Ok(candidates);
        }
        self.curate(candidates, keep as usize).await
    }

    async fn describe_image(&self, data: &[u8], mime_type: &str) -> Result<String, LumenError> {
        let content = json!([
            {
                "type": "text",
                "text": "Describe this image as a single detailed prompt that would recreate it. Reply with the prompt only."
            },
            {
                "type": "image_url",
                "image_url": { "url": Self::data_url(data, mime_type) }
            }
        ]);
        self.chat(json!([{ "role": "user", "content": content }]), false)
            .await
    }

    async fn rewrite_for_edit(
        &self,
        base_prompt: &str,
        instruction: &str,
        intent: TextStyleIntent,
    ) -> Result<String, LumenError> {
        let message = format!(
            "Apply this edit to the image prompt and return the full updated prompt only.\n\
             Text style: {}\nEdit: {}\nPrompt: {}",
            intent.as_str(),
            instruction,
            base_prompt
        );
        self.chat(json!([{ "role": "user", "content": message }]), false)
            .await
    }
}
