// src/pipeline/state_machine.rs
use crate::errors::LumenError;
use crate::events::{ProgressEvent, ProgressReporter};
use crate::models::*;
use crate::pipeline::Pipeline;
use crate::pipeline::coordinator::{DRAFT_BATCH_SIZE, DeliveryMode};
use crate::pipeline::edit::EditContext;
use crate::pipeline::enhancer::{negative_prompt, refiner_preset};
use crate::pipeline::feedback;
use crate::services::generation_service::{EnhanceRequest, ImageRequest};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Take the draft path regardless of the selected quality.
    #[serde(default)]
    pub quick_remix: bool,
}

#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed(Vec<GeneratedImage>),
    /// Another operation was in flight; nothing was changed.
    Rejected,
    /// The session moved on to a newer epoch; results were dropped.
    Superseded,
}

struct FinalInputs {
    prompt: String,
    analysis: AnalysisOutcome,
    reference_image: Option<ReferenceImage>,
    carried: Option<DerivedFields>,
    quality_override: Option<QualityLevel>,
}

struct StartedEdit {
    epoch: u64,
    index: usize,
    focused: GeneratedImage,
    resume: ReadyKind,
    intent: TextStyleIntent,
    context: EditContext,
}

/// The final pipeline never runs at draft quality.
pub fn resolve_final_quality(
    quality_override: Option<QualityLevel>,
    selected: QualityLevel,
) -> QualityLevel {
    match quality_override {
        Some(q) if !q.is_draft() => q,
        _ if !selected.is_draft() => selected,
        _ => QualityLevel::Standard,
    }
}

/// Owns one session and is the only code that mutates it.
pub struct GenerationStateMachine {
    pipeline: Arc<Pipeline>,
    session: Mutex<GenerationSession>,
}

/// Releases the in-flight slot, unless a reset already handed it to someone else.
struct OperationGuard<'a> {
    machine: &'a GenerationStateMachine,
    epoch: u64,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut session = self.machine.lock();
        if session.in_flight == Some(self.epoch) {
            session.in_flight = None;
        }
    }
}

impl GenerationStateMachine {
    pub fn new(pipeline: Arc<Pipeline>, settings: SessionSettings) -> Self {
        Self {
            pipeline,
            session: Mutex::new(GenerationSession::new(settings)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GenerationSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.lock().id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn image(&self, index: usize) -> Option<GeneratedImage> {
        self.lock().images.get(index).cloned()
    }

    pub fn configure(&self, settings: SessionSettings) -> Result<SessionSnapshot, LumenError> {
        settings.validate()?;
        let mut session = self.lock();
        if session.in_flight.is_some() {
            return Err(LumenError::Busy);
        }
        session.settings = settings;
        session.updated_at = Utc::now();
        Ok(session.snapshot())
    }

    pub fn set_reference_image(&self, reference: Option<ReferenceImage>) -> Result<(), LumenError> {
        let mut session = self.lock();
        if session.in_flight.is_some() {
            return Err(LumenError::Busy);
        }
        session.reference_image = reference;
        session.updated_at = Utc::now();
        Ok(())
    }

    pub fn focus(&self, index: usize) -> Result<SessionSnapshot, LumenError> {
        let mut session = self.lock();
        if session.in_flight.is_some() {
            return Err(LumenError::Busy);
        }
        if session.state.ready_kind().is_none() {
            return Err(LumenError::InvalidState(format!(
                "cannot focus an image while {:?}",
                session.state
            )));
        }
        if index >= session.images.len() {
            return Err(LumenError::NotFound(format!("image {}", index)));
        }
        session.selected_index = Some(index);
        session.updated_at = Utc::now();
        Ok(session.snapshot())
    }

    /// Starts a new epoch with an empty image list. Anything still in flight
    /// will be dropped when it completes.
    pub fn reset(&self) -> SessionSnapshot {
        let mut session = self.lock();
        session.epoch += 1;
        session.in_flight = None;
        session.state = LifecycleState::Idle;
        session.images.clear();
        session.selected_index = None;
        session.last_analysis = None;
        session.last_metadata = None;
        session.last_error = None;
        session.updated_at = Utc::now();
        info!("Session {} reset to epoch {}", session.id, session.epoch);
        session.snapshot()
    }

    pub fn restore_credentials(&self) -> SessionSnapshot {
        let mut session = self.lock();
        session.credentials_ready = true;
        session.updated_at = Utc::now();
        session.snapshot()
    }

    pub async fn generate(
        &self,
        request: GenerateRequest,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        let Some((epoch, settings, reference)) = self
            .start_generate(&request)
            .map_err(|e| refuse(e, progress))?
        else {
            return Ok(rejected(progress));
        };
        let _guard = OperationGuard {
            machine: self,
            epoch,
        };

        self.transition(epoch, LifecycleState::Analyzing, progress);
        let result = self
            .run_generate(epoch, &request, &settings, reference, progress)
            .await;
        self.conclude(epoch, result, LifecycleState::Idle, progress)
    }

    /// Re-runs the focused image through the final pipeline, using it as the
    /// compositional reference.
    pub async fn enhance(
        &self,
        quality_override: Option<QualityLevel>,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        let Some((epoch, settings, focused, analysis, resume)) =
            self.start_enhance().map_err(|e| refuse(e, progress))?
        else {
            return Ok(rejected(progress));
        };
        let _guard = OperationGuard {
            machine: self,
            epoch,
        };

        let inputs = FinalInputs {
            prompt: focused.prompt.clone(),
            analysis: carry_text(analysis, &focused),
            reference_image: Some(focused.as_reference()),
            carried: Some(focused.derived()),
            quality_override,
        };
        let result = self.run_final(epoch, inputs, &settings, progress).await;
        // The previous images are still committed, so a failure leaves them usable.
        self.conclude(epoch, result, LifecycleState::Ready { kind: resume }, progress)
    }

    /// Replaces only the focused image with an edited draft.
    pub async fn edit_focused(
        &self,
        instruction: &str,
        intent: Option<TextStyleIntent>,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        let Some(edit) = self
            .start_edit(instruction, intent)
            .map_err(|e| refuse(e, progress))?
        else {
            return Ok(rejected(progress));
        };
        let StartedEdit {
            epoch,
            index,
            focused,
            resume,
            intent,
            context,
        } = edit;
        let _guard = OperationGuard {
            machine: self,
            epoch,
        };
        progress.emit(ProgressEvent::StateChanged {
            state: LifecycleState::Editing { resume },
        });

        let result = self
            .pipeline
            .editor
            .edit(&focused, instruction, intent, &context)
            .await;

        match result {
            Ok(image) => {
                let outcome = self.commit_edit(epoch, index, image, resume, progress);
                self.conclude(epoch, Ok(outcome), LifecycleState::Ready { kind: resume }, progress)
            }
            Err(e) => {
                let e = match e {
                    LumenError::PermissionDenied(_)
                    | LumenError::ServiceBusy
                    | LumenError::CredentialsRequired => e,
                    other => LumenError::EditFailure(other.to_string()),
                };
                self.fail(epoch, e, LifecycleState::Ready { kind: resume }, progress)
            }
        }
    }

    /// Builds a feedback record for one of the current images and hands it
    /// to the sink without waiting.
    pub fn submit_feedback(
        &self,
        index: usize,
        rating: u8,
    ) -> Result<QualityFeedbackRecord, LumenError> {
        let record = {
            let session = self.lock();
            let image = session
                .images
                .get(index)
                .ok_or_else(|| LumenError::NotFound(format!("image {}", index)))?;
            let metadata = session.last_metadata.as_ref().ok_or_else(|| {
                LumenError::InvalidState("no generation to rate".to_string())
            })?;
            feedback::build_record(image, rating, metadata)?
        };
        feedback::emit(self.pipeline.feedback.clone(), record.clone());
        Ok(record)
    }

    /// Reverse-prompts an uploaded image and keeps it as the session reference.
    pub async fn prompt_from_image(&self, reference: ReferenceImage) -> Result<String, LumenError> {
        let epoch = {
            let mut session = self.lock();
            if session.in_flight.is_some() {
                return Err(LumenError::Busy);
            }
            if !session.credentials_ready {
                return Err(LumenError::CredentialsRequired);
            }
            session.in_flight = Some(session.epoch);
            session.epoch
        };
        let _guard = OperationGuard {
            machine: self,
            epoch,
        };

        let result = self
            .pipeline
            .invoker
            .invoke("describe_image", || {
                self.pipeline
                    .service
                    .describe_image(&reference.data, &reference.mime_type)
            })
            .await;

        let mut session = self.lock();
        match result {
            Ok(prompt) => {
                if session.epoch == epoch {
                    session.prompt = prompt.clone();
                    session.reference_image = Some(reference);
                    session.updated_at = Utc::now();
                }
                Ok(prompt)
            }
            Err(e) => {
                if matches!(e, LumenError::PermissionDenied(_)) {
                    session.credentials_ready = false;
                }
                session.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    // The start_* methods check preconditions and claim the in-flight slot in
    // one critical section. `Ok(None)` means another operation holds it.

    fn start_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<Option<(u64, SessionSettings, Option<ReferenceImage>)>, LumenError> {
        if request.prompt.trim().is_empty() {
            return Err(LumenError::Validation("prompt must not be empty".to_string()));
        }
        let mut session = self.lock();
        if session.in_flight.is_some() {
            info!("Session {}: generate rejected, operation in flight", session.id);
            return Ok(None);
        }
        if !session.credentials_ready {
            return Err(LumenError::CredentialsRequired);
        }
        session.epoch += 1;
        session.in_flight = Some(session.epoch);
        session.prompt = request.prompt.clone();
        session.last_error = None;
        Ok(Some((
            session.epoch,
            session.settings.clone(),
            session.reference_image.clone(),
        )))
    }

    #[allow(clippy::type_complexity)]
    fn start_enhance(
        &self,
    ) -> Result<
        Option<(u64, SessionSettings, GeneratedImage, AnalysisOutcome, ReadyKind)>,
        LumenError,
    > {
        let mut session = self.lock();
        if session.in_flight.is_some() {
            return Ok(None);
        }
        if !session.credentials_ready {
            return Err(LumenError::CredentialsRequired);
        }
        let resume = session.state.ready_kind().ok_or_else(|| {
            LumenError::InvalidState(format!("cannot enhance while {:?}", session.state))
        })?;
        let focused = session
            .focused_image()
            .cloned()
            .ok_or(LumenError::NoFocusedImage)?;
        let analysis = session.last_analysis.clone().ok_or_else(|| {
            LumenError::InvalidState("no analysis for the current images".to_string())
        })?;
        session.epoch += 1;
        session.in_flight = Some(session.epoch);
        session.last_error = None;
        Ok(Some((
            session.epoch,
            session.settings.clone(),
            focused,
            analysis,
            resume,
        )))
    }

    /// Edits keep the current epoch so a reset still supersedes them.
    fn start_edit(
        &self,
        instruction: &str,
        intent: Option<TextStyleIntent>,
    ) -> Result<Option<StartedEdit>, LumenError> {
        if instruction.trim().is_empty() {
            return Err(LumenError::Validation("instruction must not be empty".to_string()));
        }
        let mut session = self.lock();
        if session.in_flight.is_some() {
            return Ok(None);
        }
        if !session.credentials_ready {
            return Err(LumenError::CredentialsRequired);
        }
        let resume = session.state.ready_kind().ok_or_else(|| {
            LumenError::InvalidState(format!("cannot edit while {:?}", session.state))
        })?;
        let index = session.selected_index.ok_or(LumenError::NoFocusedImage)?;
        let focused = session
            .images
            .get(index)
            .cloned()
            .ok_or(LumenError::NoFocusedImage)?;
        let intent = intent
            .or(focused.text_style_intent)
            .unwrap_or(session.settings.text_style_intent);
        let context = EditContext {
            style_key: session.settings.style_key.clone(),
            aspect_ratio: session.settings.aspect_ratio.clone(),
            process_text: session.settings.flags.process_text,
        };
        session.in_flight = Some(session.epoch);
        session.state = LifecycleState::Editing { resume };
        session.last_error = None;
        Ok(Some(StartedEdit {
            epoch: session.epoch,
            index,
            focused,
            resume,
            intent,
            context,
        }))
    }

    async fn run_generate(
        &self,
        epoch: u64,
        request: &GenerateRequest,
        settings: &SessionSettings,
        reference: Option<ReferenceImage>,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        let analysis = self
            .pipeline
            .analyzer
            .analyze(&request.prompt, settings.flags.process_text)
            .await?;
        if !self.is_current(epoch) {
            return Ok(GenerationOutcome::Superseded);
        }

        if settings.quality.is_draft() || request.quick_remix {
            self.run_draft(epoch, &request.prompt, analysis, settings, reference, progress)
                .await
        } else {
            let inputs = FinalInputs {
                prompt: request.prompt.clone(),
                analysis,
                reference_image: reference,
                carried: None,
                quality_override: None,
            };
            self.run_final(epoch, inputs, settings, progress).await
        }
    }

    async fn run_draft(
        &self,
        epoch: u64,
        prompt: &str,
        analysis: AnalysisOutcome,
        settings: &SessionSettings,
        reference: Option<ReferenceImage>,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        self.transition(epoch, LifecycleState::DraftGenerating, progress);

        let enhanced = self
            .pipeline
            .enhancer
            .enhance(&EnhanceRequest {
                prompt: prompt.to_string(),
                analysis: analysis.analysis.clone(),
                text_info: analysis.text_info.clone(),
                style_key: settings.style_key.clone(),
                quality: QualityLevel::Draft,
                overrides: settings.composition.clone(),
                reference_image: reference.clone(),
            })
            .await?;
        if !self.is_current(epoch) {
            return Ok(GenerationOutcome::Superseded);
        }

        let request = ImageRequest {
            prompt: enhanced,
            text_info: analysis.text_info.clone(),
            reference_image: reference,
            aspect_ratio: settings.aspect_ratio.clone(),
            negative_prompt: Some(negative_prompt(
                &analysis.analysis,
                &analysis.text_info,
                &settings.style_key,
            )),
            count: DRAFT_BATCH_SIZE as u8,
            curated: false,
            quality: QualityLevel::Draft,
        };
        let derived = derived_from(&analysis, settings.text_style_intent);
        let images = self
            .pipeline
            .coordinator
            .generate(request, DeliveryMode::Incremental, derived, progress)
            .await?;

        let metadata = GenerationMetadata {
            analysis: analysis.analysis.clone(),
            style_key: settings.style_key.clone(),
            quality: QualityLevel::Draft,
            refiner_preset: None,
            flags: settings.flags,
        };
        Ok(self.commit(epoch, images, ReadyKind::Preview, analysis, metadata, progress))
    }

    async fn run_final(
        &self,
        epoch: u64,
        inputs: FinalInputs,
        settings: &SessionSettings,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        let quality = resolve_final_quality(inputs.quality_override, settings.quality);
        self.transition(epoch, LifecycleState::FinalGenerating, progress);

        let FinalInputs {
            prompt,
            analysis,
            reference_image,
            carried,
            ..
        } = inputs;

        let enhanced = self
            .pipeline
            .enhancer
            .enhance(&EnhanceRequest {
                prompt,
                analysis: analysis.analysis.clone(),
                text_info: analysis.text_info.clone(),
                style_key: settings.style_key.clone(),
                quality,
                overrides: settings.composition.clone(),
                reference_image: reference_image.clone(),
            })
            .await?;
        if !self.is_current(epoch) {
            return Ok(GenerationOutcome::Superseded);
        }

        let request = ImageRequest {
            prompt: enhanced,
            text_info: analysis.text_info.clone(),
            reference_image,
            aspect_ratio: settings.aspect_ratio.clone(),
            negative_prompt: Some(negative_prompt(
                &analysis.analysis,
                &analysis.text_info,
                &settings.style_key,
            )),
            count: settings.variation_count,
            curated: settings.flags.use_curated_selection,
            quality,
        };
        let derived =
            carried.unwrap_or_else(|| derived_from(&analysis, settings.text_style_intent));
        let images = self
            .pipeline
            .coordinator
            .generate(request, DeliveryMode::Batch, derived, progress)
            .await?;
        if !self.is_current(epoch) {
            return Ok(GenerationOutcome::Superseded);
        }

        let preset = refiner_preset(&settings.style_key, settings.flags.enable_refiner);
        let images = match preset {
            Some(preset) => {
                progress.emit(ProgressEvent::Refining {
                    preset,
                    count: images.len(),
                });
                self.pipeline.refiner.refine(&images, preset).await?
            }
            None => images,
        };

        let metadata = GenerationMetadata {
            analysis: analysis.analysis.clone(),
            style_key: settings.style_key.clone(),
            quality,
            refiner_preset: preset,
            flags: settings.flags,
        };
        Ok(self.commit(epoch, images, ReadyKind::Final, analysis, metadata, progress))
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    fn transition(&self, epoch: u64, state: LifecycleState, progress: &ProgressReporter) {
        {
            let mut session = self.lock();
            if session.epoch != epoch {
                return;
            }
            session.state = state;
            session.updated_at = Utc::now();
        }
        progress.emit(ProgressEvent::StateChanged { state });
    }

    fn commit(
        &self,
        epoch: u64,
        images: Vec<GeneratedImage>,
        kind: ReadyKind,
        analysis: AnalysisOutcome,
        metadata: GenerationMetadata,
        progress: &ProgressReporter,
    ) -> GenerationOutcome {
        let snapshot = {
            let mut session = self.lock();
            if session.epoch != epoch {
                debug!(
                    "Session {}: dropping results of epoch {} (now {})",
                    session.id, epoch, session.epoch
                );
                return GenerationOutcome::Superseded;
            }
            session.images = images.clone();
            session.selected_index = None;
            session.state = LifecycleState::Ready { kind };
            session.last_analysis = Some(analysis);
            session.last_metadata = Some(metadata);
            session.updated_at = Utc::now();
            info!(
                "Session {}: {} image(s) ready ({:?}) at epoch {}",
                session.id,
                images.len(),
                kind,
                epoch
            );
            session.snapshot()
        };
        progress.emit(ProgressEvent::StateChanged {
            state: snapshot.state,
        });
        progress.emit(ProgressEvent::Completed { session: snapshot });
        GenerationOutcome::Completed(images)
    }

    fn commit_edit(
        &self,
        epoch: u64,
        index: usize,
        image: GeneratedImage,
        resume: ReadyKind,
        progress: &ProgressReporter,
    ) -> GenerationOutcome {
        let snapshot = {
            let mut session = self.lock();
            if session.epoch != epoch {
                debug!("Session {}: dropping stale edit", session.id);
                return GenerationOutcome::Superseded;
            }
            if let Some(slot) = session.images.get_mut(index) {
                *slot = image.clone();
            }
            session.state = LifecycleState::Ready { kind: resume };
            session.updated_at = Utc::now();
            session.snapshot()
        };
        progress.emit(ProgressEvent::StateChanged {
            state: snapshot.state,
        });
        progress.emit(ProgressEvent::Completed { session: snapshot });
        GenerationOutcome::Completed(vec![image])
    }

    fn conclude(
        &self,
        epoch: u64,
        result: Result<GenerationOutcome, LumenError>,
        on_failure: LifecycleState,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        match result {
            Ok(GenerationOutcome::Superseded) => {
                progress.emit(ProgressEvent::Superseded { epoch });
                Ok(GenerationOutcome::Superseded)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => self.fail(epoch, e, on_failure, progress),
        }
    }

    /// Single place where pipeline errors become user-visible.
    fn fail(
        &self,
        epoch: u64,
        err: LumenError,
        restore: LifecycleState,
        progress: &ProgressReporter,
    ) -> Result<GenerationOutcome, LumenError> {
        {
            let mut session = self.lock();
            if session.epoch != epoch {
                debug!(
                    "Session {}: ignoring failure of stale epoch {}: {}",
                    session.id, epoch, err
                );
                drop(session);
                progress.emit(ProgressEvent::Superseded { epoch });
                return Ok(GenerationOutcome::Superseded);
            }
            error!("Session {}: {}", session.id, err);
            if matches!(err, LumenError::PermissionDenied(_)) {
                warn!("Session {}: credentials revoked", session.id);
                session.credentials_ready = false;
            }
            session.state = restore;
            session.last_error = Some(err.to_string());
            session.updated_at = Utc::now();
        }
        progress.emit(ProgressEvent::StateChanged { state: restore });
        progress.emit(ProgressEvent::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        Err(err)
    }
}

fn rejected(progress: &ProgressReporter) -> GenerationOutcome {
    progress.emit(ProgressEvent::Rejected {
        reason: LumenError::Busy.to_string(),
    });
    GenerationOutcome::Rejected
}

/// Reports an operation that never started.
fn refuse(err: LumenError, progress: &ProgressReporter) -> LumenError {
    info!("Operation refused: {}", err);
    progress.emit(ProgressEvent::Failed {
        kind: err.kind().to_string(),
        message: err.to_string(),
    });
    err
}

fn derived_from(analysis: &AnalysisOutcome, intent: TextStyleIntent) -> DerivedFields {
    let background = analysis.analysis.environment.details.trim();
    DerivedFields {
        final_text: analysis.primary_text().map(str::to_string),
        final_background: (!background.is_empty()).then(|| background.to_string()),
        text_style_intent: Some(intent),
    }
}

/// Aligns the analysis text with what the focused image actually shows.
fn carry_text(mut analysis: AnalysisOutcome, focused: &GeneratedImage) -> AnalysisOutcome {
    match focused.final_text.as_deref() {
        Some("") => analysis.text_info.clear(),
        Some(text) => match analysis.text_info.first_mut() {
            Some(first) => first.text = text.to_string(),
            None => analysis.text_info.push(DetectedTextInfo {
                text: text.to_string(),
                placement: "as in the reference image".to_string(),
                font_style: "as in the reference image".to_string(),
                font_size: "as in the reference image".to_string(),
                physical_properties: PhysicalProperties {
                    material: "as in the reference image".to_string(),
                    lighting_interaction: "matches scene lighting".to_string(),
                    surface_texture: "as in the reference image".to_string(),
                    environmental_interaction: "as in the reference image".to_string(),
                    perspective_and_depth: "as in the reference image".to_string(),
                },
            }),
        },
        None => {}
    }
    analysis
}
