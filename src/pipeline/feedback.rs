// src/pipeline/feedback.rs
use crate::errors::LumenError;
use crate::models::{GeneratedImage, GenerationMetadata, QualityFeedbackRecord};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Append-only store for user ratings, consumed by adaptive tuning.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn record(&self, record: QualityFeedbackRecord) -> Result<(), LumenError>;
}

pub fn build_record(
    image: &GeneratedImage,
    rating: u8,
    metadata: &GenerationMetadata,
) -> Result<QualityFeedbackRecord, LumenError> {
    if !(1..=5).contains(&rating) {
        return Err(LumenError::Validation(format!(
            "rating must be between 1 and 5, got {}",
            rating
        )));
    }

    Ok(QualityFeedbackRecord {
        id: Uuid::new_v4(),
        prompt: image.prompt.clone(),
        rating,
        automated_score: image.scores.map(|s| s.overall),
        metadata: metadata.clone(),
        recorded_at: Utc::now(),
    })
}

/// Hands the record to the sink without waiting; failures are logged only.
pub fn emit(sink: Arc<dyn FeedbackSink>, record: QualityFeedbackRecord) {
    tokio::spawn(async move {
        let id = record.id;
        match sink.record(record).await {
            Ok(()) => info!("Recorded quality feedback {}", id),
            Err(e) => warn!("Failed to record quality feedback {}: {}", id, e),
        }
    });
}
