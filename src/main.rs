// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

mod catalog;
mod config;
mod errors;
mod events;
mod handlers;
mod models;
mod pipeline;
mod services;
mod sessions;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::handlers::*;
use crate::pipeline::Pipeline;
use crate::services::{HttpGenerationService, ImageProcessor, ImageRefiner, RedisService};
use crate::sessions::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionRegistry>,
    redis_service: Arc<RedisService>,
    image_processor: Arc<ImageProcessor>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Lumen service...");
    let config = Config::from_env()?;

    // Initialize services
    let redis_service = Arc::new(
        RedisService::new(&config.redis_url)
            .await
            .with_context(|| format!("failed to connect to redis at {}", config.redis_url))?,
    );
    let generation_service = Arc::new(HttpGenerationService::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.text_model.clone(),
        config.image_model.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        generation_service,
        Arc::new(ImageRefiner::new()),
        redis_service.clone(),
        config.retry,
    ));

    let app_state = AppState {
        sessions: Arc::new(SessionRegistry::new(pipeline)),
        redis_service,
        image_processor: Arc::new(ImageProcessor::new(config.max_upload_dimension)),
    };

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/sessions", web::post().to(create_session))
                    .route("/sessions/{id}", web::get().to(get_session))
                    .route("/sessions/{id}", web::delete().to(delete_session))
                    .route("/sessions/{id}/settings", web::put().to(update_settings))
                    .route("/sessions/{id}/generate", web::post().to(generate))
                    .route("/sessions/{id}/enhance", web::post().to(enhance))
                    .route("/sessions/{id}/edit", web::post().to(edit))
                    .route("/sessions/{id}/focus", web::post().to(focus))
                    .route("/sessions/{id}/reset", web::post().to(reset))
                    .route("/sessions/{id}/credentials", web::post().to(restore_credentials))
                    .route("/sessions/{id}/feedback", web::post().to(submit_feedback))
                    .route("/sessions/{id}/reference", web::post().to(upload_reference))
                    .route("/sessions/{id}/reference", web::delete().to(clear_reference))
                    .route("/sessions/{id}/describe", web::post().to(describe_image))
                    .route("/sessions/{id}/images/{index}", web::get().to(get_image))
                    .route("/catalog", web::get().to(get_catalog))
                    .route("/feedback/recent", web::get().to(recent_feedback)),
            )
            .route("/health", web::get().to(health_check))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}

async fn health_check(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "lumen",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": data.sessions.len()
    }))
}
