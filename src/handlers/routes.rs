// API route handlers for the transcription router
//
// HTTP stand-in for the chat bot: accepts uploads, enqueues them and lets clients poll
// job state, collect results and read what the chat would show.

use actix_multipart::Multipart;
use actix_web::{delete, get, post, web, HttpResponse};
use log::{error, info, warn};
use serde::Serialize;
use std::time::Duration;

use crate::app::AppContext;
use crate::delivery::MessageSink;
use crate::error::HandlerError;
use crate::file_utils::cleanup_folder;
use crate::handlers::form::extract_form_data;
use crate::models::{
    StatusResponse, SuccessResponse, TranscriptionContext, TranscriptionRequest, TranscriptionResponse,
};
use crate::queue_manager::JobStatus;

/// Shown in the chat while the request waits and runs
const STATUS_TEXT: &str = "Recording received, transcribing...";

/// Handler for transcription requests
///
/// Saves the upload, measures its decoded duration and enqueues it. Returns 202 with the
/// job id and queue position, or 200 with the result when `sync=true`.
#[post("/transcription")]
pub async fn transcribe(form: Multipart, app: web::Data<AppContext>) -> Result<HttpResponse, HandlerError> {
    let (params, upload) = extract_form_data(form, &app.config.handler).await?;
    app.metrics.record_upload_size(upload.size).await;
    let folder = upload.paths.folder.clone();

    let duration = match app.audio.probe_duration(&upload.paths.audio_file).await {
        Ok(duration) => duration,
        Err(e) => {
            warn!("Rejecting upload {}: {}", upload.paths.id, e);
            cleanup_folder(&folder).await;
            return Err(e.into());
        }
    };

    let mut context = TranscriptionContext::new(duration).with_priority(params.priority);
    if let Some(language) = &params.language {
        context = context.with_language(language.as_str());
    }
    if let Some(provider) = &params.provider {
        context = context.with_provider_preference(provider.as_str());
    }

    let mut request = TranscriptionRequest::new(params.user_id.as_str(), upload.paths.audio_file.clone(), context);
    request.id = upload.paths.id.clone();
    request.job_folder = Some(folder.clone());

    let status_message = match app.sink.send(&request.chat_id, STATUS_TEXT).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Could not post status message for {}: {}", request.id, e);
            None
        }
    };
    request.status_message_id = status_message;

    let job_id = request.id.clone();
    let chat_id = request.chat_id.clone();
    let position = match app.queue.enqueue(request).await {
        Ok(position) => position,
        Err(e) => {
            error!("Failed to add job {} to queue: {}", job_id, e);
            cleanup_folder(&folder).await;
            let error = HandlerError::from(e);
            if let Some(id) = status_message {
                if let Err(e) = app.sink.edit(&chat_id, id, &error.to_string()).await {
                    warn!("Could not update status message for {}: {}", job_id, e);
                }
            }
            return Err(error);
        }
    };

    if params.sync {
        info!("Job {} using synchronous mode", job_id);
        let timeout = Duration::from_secs(app.config.handler.sync_request_timeout);
        let processed = app.queue.wait_for(&job_id, timeout).await?;
        info!("Synchronous job {} completed", job_id);
        return Ok(HttpResponse::Ok().json(processed));
    }

    let estimated_wait_seconds = app.queue.get_estimated_wait_time(&job_id).await.unwrap_or(0.0);
    Ok(HttpResponse::Accepted().json(TranscriptionResponse {
        status_url: format!("/transcription/{}", job_id),
        job_id,
        queue_position: position,
        estimated_wait_seconds,
    }))
}

/// Handler for transcription status requests
#[get("/transcription/{job_id}")]
pub async fn transcription_status(
    job_id: web::Path<String>,
    app: web::Data<AppContext>,
) -> Result<HttpResponse, HandlerError> {
    let job_id = job_id.into_inner();
    let status = app.queue.get_job_status(&job_id).await?;
    let (queue_position, estimated_wait_seconds) = if status == JobStatus::Queued {
        (
            app.queue.get_job_position(&job_id).await?,
            Some(app.queue.get_estimated_wait_time(&job_id).await?),
        )
    } else {
        (None, None)
    };

    Ok(HttpResponse::Ok().json(StatusResponse {
        status,
        queue_position,
        estimated_wait_seconds,
    }))
}

/// Handler for completed transcription results. The result is forgotten once delivered.
#[get("/transcription/{job_id}/result")]
pub async fn transcription_result(
    job_id: web::Path<String>,
    app: web::Data<AppContext>,
) -> Result<HttpResponse, HandlerError> {
    let processed = app.queue.take_result(&job_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(processed))
}

/// Handler for canceling a queued transcription job
#[delete("/transcription/{job_id}")]
pub async fn cancel_transcription(
    job_id: web::Path<String>,
    app: web::Data<AppContext>,
) -> Result<HttpResponse, HandlerError> {
    let job_id = job_id.into_inner();
    app.queue.cancel_job(&job_id).await?;
    info!("Successfully canceled job: {}", job_id);
    Ok(HttpResponse::Ok().json(SuccessResponse {
        success: true,
        message: "Job canceled successfully".to_string(),
    }))
}

/// Service status: routing setup, provider readiness and queue state
#[get("/status")]
pub async fn api_status(app: web::Data<AppContext>) -> Result<HttpResponse, HandlerError> {
    #[derive(Serialize)]
    struct ApiStatusResponse {
        strategy: &'static str,
        providers: Vec<ProviderState>,
        refinement_enabled: bool,
        chunking_enabled: bool,
        queue: QueueStatus,
    }

    #[derive(Serialize)]
    struct ProviderState {
        name: String,
        model: String,
        ready: bool,
    }

    #[derive(Serialize)]
    struct QueueStatus {
        queued_jobs: usize,
        processing_jobs: usize,
        max_queue_size: usize,
        max_concurrent: usize,
    }

    let mut providers = Vec::new();
    for name in app.registry.names() {
        if let Some(provider) = app.registry.get(&name) {
            providers.push(ProviderState {
                model: provider.default_model().to_string(),
                ready: provider.is_initialized().await,
                name,
            });
        }
    }

    Ok(HttpResponse::Ok().json(ApiStatusResponse {
        strategy: app.router.strategy_name(),
        providers,
        refinement_enabled: app.refiner.is_some(),
        chunking_enabled: app.config.chunking.enabled,
        queue: QueueStatus {
            queued_jobs: app.queue.get_queue_depth().await,
            processing_jobs: app.queue.processing_count().await,
            max_queue_size: app.config.queue.max_queue_size,
            max_concurrent: app.config.queue.max_concurrent,
        },
    }))
}

/// Messages posted to a chat, in order
#[get("/chats/{chat_id}/messages")]
pub async fn chat_messages(chat_id: web::Path<String>, app: web::Data<AppContext>) -> HttpResponse {
    HttpResponse::Ok().json(app.sink.messages(&chat_id.into_inner()))
}

/// Metrics in the exporter's text format
#[get("/metrics")]
pub async fn metrics_endpoint(app: web::Data<AppContext>) -> Result<HttpResponse, HandlerError> {
    let body = app.metrics.export().await.map_err(HandlerError::Metrics)?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Register every route on an actix service config
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(transcribe)
        .service(transcription_result)
        .service(transcription_status)
        .service(cancel_transcription)
        .service(api_status)
        .service(chat_messages)
        .service(metrics_endpoint);
}
