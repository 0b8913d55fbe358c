// src/services/redis_service.rs
use crate::errors::LumenError;
use crate::models::QualityFeedbackRecord;
use crate::pipeline::feedback::FeedbackSink;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};

const FEEDBACK_LIST_KEY: &str = "feedback:records";

pub struct RedisService {
    client: Client,
}

impl RedisService {
    pub async fn new(redis_url: &str) -> Result<Self, LumenError> {
        let client = Client::open(redis_url)?;

        // Test connection
        let mut conn = client.get_async_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;

        Ok(Self { client })
    }

    pub async fn store_feedback(&self, record: &QualityFeedbackRecord) -> Result<(), LumenError> {
        let mut conn = self.client.get_async_connection().await?;

        let value = serde_json::to_string(record)?;
        conn.rpush::<_, _, ()>(FEEDBACK_LIST_KEY, value).await?;

        // Running totals per style for adaptive tuning
        let stats_key = format!("feedback:style:{}", record.metadata.style_key);
        conn.hincr::<_, _, _, ()>(&stats_key, "count", 1).await?;
        conn.hincr::<_, _, _, ()>(&stats_key, "rating_total", record.rating as i64)
            .await?;

        Ok(())
    }

    pub async fn recent_feedback(
        &self,
        limit: isize,
    ) -> Result<Vec<QualityFeedbackRecord>, LumenError> {
        let mut conn = self.client.get_async_connection().await?;

        let values: Vec<String> = conn.lrange(FEEDBACK_LIST_KEY, -limit.max(1), -1).await?;
        values
            .iter()
            .map(|v| serde_json::from_str(v).map_err(LumenError::from))
            .collect()
    }
}

#[async_trait]
impl FeedbackSink for RedisService {
    async fn record(&self, record: QualityFeedbackRecord) -> Result<(), LumenError> {
        self.store_feedback(&record).await
    }
}
