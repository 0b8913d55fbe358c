// src/pipeline/enhancer.rs
use crate::catalog::{self, RefinerPreset};
use crate::errors::LumenError;
use crate::models::{DetectedTextInfo, PromptAnalysis};
use crate::pipeline::retry::RetryingInvoker;
use crate::services::GenerationService;
use crate::services::generation_service::EnhanceRequest;
use log::{info, warn};
use std::sync::Arc;

const BASE_NEGATIVE: &[&str] = &["blurry", "low quality", "distorted", "deformed", "jpeg artifacts"];
const NO_TEXT_NEGATIVE: &[&str] = &["text", "letters", "words", "captions", "watermark", "signature", "logo"];
const WITH_TEXT_NEGATIVE: &[&str] = &["misspelled text", "garbled letters", "extra text", "watermark"];
const PHOTO_NEGATIVE: &[&str] = &["cartoon", "illustration", "painting", "cgi"];
const ILLUSTRATION_NEGATIVE: &[&str] = &["photograph", "film grain"];

#[derive(Clone)]
pub struct StyleEnhancer {
    service: Arc<dyn GenerationService>,
    invoker: RetryingInvoker,
}

impl StyleEnhancer {
    pub fn new(service: Arc<dyn GenerationService>, invoker: RetryingInvoker) -> Self {
        Self { service, invoker }
    }

    pub async fn enhance(&self, request: &EnhanceRequest) -> Result<String, LumenError> {
        let enhanced = self
            .invoker
            .invoke("enhance_prompt", || self.service.enhance_prompt(request))
            .await?;

        if enhanced.trim().is_empty() {
            warn!("Enhancer returned an empty prompt, using the raw prompt");
            return Ok(request.prompt.clone());
        }

        info!(
            "Enhanced prompt for style={} quality={}",
            request.style_key,
            request.quality.as_str()
        );
        Ok(enhanced)
    }
}

/// Local steering terms. Suppresses lettering when no text is intended.
pub fn negative_prompt(
    analysis: &PromptAnalysis,
    text_info: &[DetectedTextInfo],
    style_key: &str,
) -> String {
    let mut terms: Vec<String> = BASE_NEGATIVE.iter().map(|s| s.to_string()).collect();

    let wants_text = text_info.iter().any(|t| !t.text.trim().is_empty());
    let text_terms = if wants_text { WITH_TEXT_NEGATIVE } else { NO_TEXT_NEGATIVE };
    terms.extend(text_terms.iter().map(|s| s.to_string()));

    if catalog::is_photorealistic(style_key) {
        terms.extend(PHOTO_NEGATIVE.iter().map(|s| s.to_string()));
    } else if style_key != "auto" {
        terms.extend(ILLUSTRATION_NEGATIVE.iter().map(|s| s.to_string()));
    }

    let subject = analysis.subject.primary.trim();
    if !subject.is_empty() {
        terms.push(format!("duplicate {}", subject));
    }

    terms.join(", ")
}

/// Preset for the refinement pass, or `None` when refinement is off.
pub fn refiner_preset(style_key: &str, enable_refiner: bool) -> Option<RefinerPreset> {
    if !enable_refiner {
        return None;
    }
    Some(if style_key == "cinematic" {
        RefinerPreset::Cinematic
    } else if catalog::is_photorealistic(style_key) {
        RefinerPreset::Photorealistic
    } else if style_key != "auto" {
        RefinerPreset::Artistic
    } else {
        RefinerPreset::Photorealistic
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{analysis, text_info};

    #[test]
    fn cinematic_always_maps_to_cinematic() {
        assert_eq!(refiner_preset("cinematic", true), Some(RefinerPreset::Cinematic));
    }

    #[test]
    fn preset_rules_in_order() {
        assert_eq!(refiner_preset("portrait", true), Some(RefinerPreset::Photorealistic));
        assert_eq!(refiner_preset("anime", true), Some(RefinerPreset::Artistic));
        assert_eq!(refiner_preset("auto", true), Some(RefinerPreset::Photorealistic));
        assert_eq!(refiner_preset("auto", false), None);
    }

    #[test]
    fn negative_prompt_suppresses_text_when_none_intended() {
        let neg = negative_prompt(&analysis("fox"), &[], "auto");
        assert!(neg.contains("watermark"));
        assert!(neg.contains("letters"));
        assert!(neg.contains("duplicate fox"));
    }

    #[test]
    fn negative_prompt_allows_intended_text() {
        let neg = negative_prompt(&analysis("sign"), &[text_info("OPEN")], "photorealistic");
        assert!(!neg.split(", ").any(|t| t == "letters"));
        assert!(neg.contains("garbled letters"));
        assert!(neg.contains("cartoon"));
    }

    #[test]
    fn blank_text_counts_as_no_text() {
        let neg = negative_prompt(&analysis("fox"), &[text_info("  ")], "anime");
        assert!(neg.split(", ").any(|t| t == "letters"));
        assert!(neg.contains("photograph"));
    }
}
