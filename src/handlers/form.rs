// Form data processing for the transcription endpoint
//
// Parses the multipart upload: text parameters and the audio file, which is streamed to a
// per-request folder without being buffered in memory.

use actix_multipart::{Field, Multipart};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use tokio::io::AsyncWriteExt;

use crate::config::{parse_bool, HandlerConfig, JobPaths};
use crate::error::HandlerError;
use crate::file_utils::{audio_extension, cleanup_folder, generate_unique_job_paths};
use crate::models::Priority;

/// Parameters of one upload
#[derive(Debug, Clone)]
pub struct UploadParams {
    /// Chat the transcript is delivered to
    pub user_id: String,
    pub language: Option<String>,
    pub priority: Priority,
    pub provider: Option<String>,
    pub sync: bool,
}

/// Audio written to disk by `extract_form_data`
#[derive(Debug)]
pub struct SavedUpload {
    pub paths: JobPaths,
    pub size: u64,
}

async fn read_text_field(field: &mut Field, name: &str) -> Result<String, HandlerError> {
    let mut value = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| HandlerError::form_error(format!("Error reading field {}: {}", name, e)))?;
        value.extend_from_slice(&chunk);
    }
    String::from_utf8(value)
        .map(|v| v.trim().to_string())
        .map_err(|_| HandlerError::form_error(format!("Field {} is not valid UTF-8", name)))
}

/// Stream the file field into a new job folder, enforcing the upload limit
async fn save_audio_field(field: &mut Field, config: &HandlerConfig) -> Result<SavedUpload, HandlerError> {
    let file_name = field
        .content_disposition()
        .and_then(|cd| cd.get_filename().map(str::to_string));
    let extension = audio_extension(file_name.as_deref());
    let paths = generate_unique_job_paths(&config.temp_dir, &extension)
        .await
        .map_err(|e| {
            error!("Failed to create job folder: {}", e);
            HandlerError::FileError(e)
        })?;

    match write_stream(field, &paths, config.upload_limit).await {
        Ok(size) => {
            info!("Saved audio file: {} ({} bytes)", paths.audio_file.display(), size);
            Ok(SavedUpload { paths, size })
        }
        Err(e) => {
            cleanup_folder(&paths.folder).await;
            Err(e)
        }
    }
}

async fn write_stream(field: &mut Field, paths: &JobPaths, limit: u64) -> Result<u64, HandlerError> {
    let mut file = tokio::fs::File::create(&paths.audio_file).await?;
    let mut total: u64 = 0;
    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| HandlerError::form_error(format!("Error processing file upload: {}", e)))?;
        total += data.len() as u64;
        if total > limit {
            return Err(HandlerError::FileTooLarge { limit });
        }
        file.write_all(&data).await?;
    }
    file.flush().await?;
    Ok(total)
}

/// Extract the parameters and the saved audio from a transcription request
pub async fn extract_form_data(
    mut form: Multipart,
    config: &HandlerConfig,
) -> Result<(UploadParams, SavedUpload), HandlerError> {
    let mut params = UploadParams {
        user_id: "anonymous".to_string(),
        language: None,
        priority: Priority::Normal,
        provider: None,
        sync: config.default_sync_mode,
    };
    let mut upload: Option<SavedUpload> = None;

    config.ensure_temp_dir().map_err(|e| {
        error!("Failed to create main tmp directory: {}", e);
        HandlerError::FileError(e)
    })?;

    let result: Result<(), HandlerError> = async {
        while let Some(mut field) = form
            .try_next()
            .await
            .map_err(|e| HandlerError::form_error(e.to_string()))?
        {
            let field_name = field
                .content_disposition()
                .and_then(|cd| cd.get_name().map(str::to_string))
                .unwrap_or_default();

            match field_name.as_str() {
                "audio" | "file" => {
                    if upload.is_some() {
                        return Err(HandlerError::form_error("Only one audio file per request"));
                    }
                    upload = Some(save_audio_field(&mut field, config).await?);
                }
                "user_id" | "language" | "priority" | "provider" | "sync" => {
                    let value = read_text_field(&mut field, &field_name).await?;
                    if value.is_empty() {
                        continue;
                    }
                    match field_name.as_str() {
                        "user_id" => params.user_id = value,
                        "language" => params.language = Some(value.to_lowercase()),
                        "priority" => {
                            params.priority = value
                                .parse()
                                .map_err(|e: String| HandlerError::form_error(e))?;
                        }
                        "provider" => params.provider = Some(value.to_lowercase()),
                        _ => params.sync = parse_bool(&value).unwrap_or(params.sync),
                    }
                }
                _ => {
                    // Skip unknown fields
                    while field.next().await.is_some() {}
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        if let Some(saved) = &upload {
            cleanup_folder(&saved.paths.folder).await;
        }
        return Err(e);
    }

    let upload = upload.ok_or(HandlerError::NoAudioFile)?;
    Ok((params, upload))
}
