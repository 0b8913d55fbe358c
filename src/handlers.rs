// src/handlers.rs
use crate::events::{ProgressEvent, ProgressReporter};
use crate::models::{QualityLevel, SessionSettings, TextStyleIntent};
use crate::pipeline::{GenerateRequest, GenerationStateMachine};
use crate::{AppState, catalog, errors::LumenError};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::Bytes;
use futures_util::{TryStreamExt, stream};
use log::debug;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Default, Deserialize)]
pub struct EnhanceBody {
    #[serde(default)]
    pub quality: Option<QualityLevel>,
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub instruction: String,
    #[serde(default)]
    pub text_style_intent: Option<TextStyleIntent>,
}

#[derive(Debug, Deserialize)]
pub struct FocusBody {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub index: usize,
    pub rating: u8,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<isize>,
}

pub async fn create_session(
    data: web::Data<AppState>,
    body: Option<web::Json<SessionSettings>>,
) -> Result<HttpResponse, Error> {
    let settings = body.map(|b| b.into_inner()).unwrap_or_default();
    let machine = data.sessions.create(settings)?;
    Ok(HttpResponse::Created().json(machine.snapshot()))
}

pub async fn get_session(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(machine.snapshot()))
}

pub async fn delete_session(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    data.sessions.remove(&path.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn update_settings(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<SessionSettings>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let snapshot = machine.configure(body.into_inner())?;
    Ok(HttpResponse::Ok().json(snapshot))
}

pub async fn generate(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<GenerateRequest>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let request = body.into_inner();
    Ok(stream_progress(machine, move |machine, progress| async move {
        machine.generate(request, &progress).await
    }))
}

pub async fn enhance(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: Option<web::Json<EnhanceBody>>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let quality = body.and_then(|b| b.into_inner().quality);
    Ok(stream_progress(machine, move |machine, progress| async move {
        machine.enhance(quality, &progress).await
    }))
}

pub async fn edit(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<EditBody>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let EditBody {
        instruction,
        text_style_intent,
    } = body.into_inner();
    Ok(stream_progress(machine, move |machine, progress| async move {
        machine
            .edit_focused(&instruction, text_style_intent, &progress)
            .await
    }))
}

pub async fn focus(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<FocusBody>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let snapshot = machine.focus(body.index)?;
    Ok(HttpResponse::Ok().json(snapshot))
}

pub async fn reset(path: web::Path<Uuid>, data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(machine.reset()))
}

pub async fn restore_credentials(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(machine.restore_credentials()))
}

pub async fn submit_feedback(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    body: web::Json<FeedbackBody>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let record = machine.submit_feedback(body.index, body.rating)?;
    Ok(HttpResponse::Accepted().json(record))
}

pub async fn upload_reference(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let upload = read_upload(payload).await?;
    let reference = data.image_processor.prepare_reference(&upload)?;
    let size = reference.data.len();
    let mime_type = reference.mime_type.clone();
    machine.set_reference_image(Some(reference))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "session_id": machine.id(),
        "mime_type": mime_type,
        "size": size
    })))
}

pub async fn clear_reference(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    machine.set_reference_image(None)?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn describe_image(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let machine = data.sessions.get(&path.into_inner())?;
    let upload = read_upload(payload).await?;
    let reference = data.image_processor.prepare_reference(&upload)?;
    let prompt = machine.prompt_from_image(reference).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "prompt": prompt })))
}

pub async fn get_image(
    path: web::Path<(Uuid, usize)>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (session_id, index) = path.into_inner();
    let machine = data.sessions.get(&session_id)?;
    let image = machine
        .image(index)
        .ok_or_else(|| LumenError::NotFound(format!("image {}", index)))?;

    Ok(HttpResponse::Ok()
        .content_type(image.mime_type)
        .body(image.data))
}

pub async fn get_catalog() -> HttpResponse {
    HttpResponse::Ok().json(catalog::describe())
}

pub async fn recent_feedback(
    data: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> Result<HttpResponse, Error> {
    let records = data
        .redis_service
        .recent_feedback(query.limit.unwrap_or(20))
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

/// Runs `operation` in the background and streams its progress events.
/// The stream ends when the operation drops its reporter.
fn stream_progress<F, Fut>(machine: Arc<GenerationStateMachine>, operation: F) -> HttpResponse
where
    F: FnOnce(Arc<GenerationStateMachine>, ProgressReporter) -> Fut + 'static,
    Fut: Future<Output = Result<crate::pipeline::GenerationOutcome, LumenError>> + 'static,
{
    let (progress, rx) = ProgressReporter::channel();
    actix_web::rt::spawn(async move {
        if let Err(e) = operation(machine, progress).await {
            debug!("Streamed operation ended with error: {}", e);
        }
    });

    HttpResponse::Ok().content_type(NDJSON).streaming(ndjson(rx))
}

fn ndjson(
    rx: UnboundedReceiver<ProgressEvent>,
) -> impl futures_util::Stream<Item = Result<Bytes, LumenError>> {
    stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let line = serde_json::to_vec(&event).map(|mut line| {
            line.push(b'\n');
            Bytes::from(line)
        });
        Some((line.map_err(LumenError::from), rx))
    })
}

/// Collects the first file field of a multipart upload.
async fn read_upload(mut payload: Multipart) -> Result<Vec<u8>, Error> {
    while let Some(mut field) = payload.try_next().await? {
        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            image_data.extend_from_slice(&chunk);
        }
        if !image_data.is_empty() {
            return Ok(image_data);
        }
    }
    Err(LumenError::Validation("No image uploaded".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LifecycleState;
    use crate::testing::{FakeGenerationService, FakeRefiner, machine, prompt};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn progress_stream_is_newline_delimited_json() {
        let fake = Arc::new(FakeGenerationService::new());
        let machine = machine(fake, Arc::new(FakeRefiner::new()), SessionSettings::default());
        let (progress, rx) = ProgressReporter::channel();

        machine.generate(prompt("a red fox"), &progress).await.unwrap();
        drop(progress);

        let lines: Vec<Bytes> = ndjson(rx).map(|line| line.unwrap()).collect().await;
        let events: Vec<serde_json::Value> = lines
            .iter()
            .map(|line| {
                assert_eq!(line.last(), Some(&b'\n'));
                serde_json::from_slice(line).unwrap()
            })
            .collect();

        assert_eq!(events[0]["event"], "state_changed");
        assert_eq!(events[0]["state"]["state"], "analyzing");
        assert_eq!(
            events.iter().filter(|e| e["event"] == "draft_ready").count(),
            4
        );
        let last = events.last().unwrap();
        assert_eq!(last["event"], "completed");
        assert_eq!(
            serde_json::to_value(LifecycleState::Ready {
                kind: crate::models::ReadyKind::Preview
            })
            .unwrap(),
            last["session"]["state"]
        );
    }

    #[tokio::test]
    async fn refused_operation_still_ends_with_a_terminal_event() {
        let fake = Arc::new(FakeGenerationService::new());
        let machine = machine(fake, Arc::new(FakeRefiner::new()), SessionSettings::default());
        let (progress, rx) = ProgressReporter::channel();

        assert!(machine.enhance(None, &progress).await.is_err());
        drop(progress);

        let lines: Vec<Bytes> = ndjson(rx).map(|line| line.unwrap()).collect().await;
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_slice(&lines[0]).unwrap();
        assert_eq!(event["event"], "failed");
        assert_eq!(event["kind"], "invalid_state");
    }
}
