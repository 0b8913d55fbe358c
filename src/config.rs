// src/config.rs
use crate::pipeline::RetryPolicy;
use anyhow::{Context, Result, bail};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub redis_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub text_model: String,
    pub image_model: String,
    pub retry: RetryPolicy,
    /// Uploaded reference images are downscaled to fit this box.
    pub max_upload_dimension: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let openai_api_key = match lookup("OPENAI_API_KEY") {
            Some(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY must be set"),
        };

        let defaults = RetryPolicy::default();
        let max_retries = parse_or(&lookup, "LUMEN_MAX_RETRIES", defaults.max_retries)?;
        let initial_delay_ms = parse_or(
            &lookup,
            "LUMEN_INITIAL_DELAY_MS",
            defaults.initial_delay.as_millis() as u64,
        )?;

        Ok(Self {
            bind_addr: lookup("LUMEN_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            openai_api_key,
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            text_model: lookup("LUMEN_TEXT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            image_model: lookup("LUMEN_IMAGE_MODEL").unwrap_or_else(|| "gpt-image-1".to_string()),
            retry: RetryPolicy {
                max_retries: max_retries.max(1),
                initial_delay: Duration::from_millis(initial_delay_ms),
                ..defaults
            },
            max_upload_dimension: parse_or(&lookup, "LUMEN_MAX_UPLOAD_DIM", 2048)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn api_key_is_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("OPENAI_API_KEY", " ")])).is_err());
    }

    #[test]
    fn defaults_match_the_retry_policy() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_upload_dimension, 2048);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LUMEN_MAX_RETRIES", "3"),
            ("LUMEN_INITIAL_DELAY_MS", "250"),
            ("OPENAI_BASE_URL", "http://localhost:9000/v1"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.openai_base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LUMEN_MAX_UPLOAD_DIM", "huge"),
        ]));
        assert!(result.is_err());
    }
}
