// src/services/mod.rs
pub mod generation_service;
pub mod image_processor;
pub mod redis_service;
pub mod refinement_service;

pub use generation_service::{GenerationService, HttpGenerationService};
pub use image_processor::ImageProcessor;
pub use redis_service::RedisService;
pub use refinement_service::{ImageRefiner, RefinementService};
