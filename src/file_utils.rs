// File utilities for the transcription router
//
// Per-request upload folders: creation, extension handling and removal once the
// request is finished or cancelled.

use log::{debug, error};
use std::io;
use std::path::Path;
use uuid::Uuid;

use crate::config::JobPaths;

/// Extensions accepted for uploaded audio; anything else is stored as `.bin` and left to ffmpeg
const KNOWN_EXTENSIONS: [&str; 10] = ["ogg", "oga", "opus", "mp3", "wav", "m4a", "mp4", "webm", "flac", "aac"];

/// Create a unique folder under `base_dir` and the audio path inside it
///
/// # Errors
///
/// Returns an IO error if directory creation fails
pub async fn generate_unique_job_paths(base_dir: &str, extension: &str) -> io::Result<JobPaths> {
    let id = Uuid::new_v4().to_string();
    let folder = Path::new(base_dir).join(&id);
    tokio::fs::create_dir_all(&folder).await?;
    let audio_file = folder.join(format!("audio.{}", extension));

    Ok(JobPaths {
        folder,
        audio_file,
        id,
    })
}

/// Lowercase extension of an uploaded file name when it is a known audio container
pub fn audio_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "bin".to_string())
}

/// Clean up a folder and its contents. Errors are logged, not returned.
pub async fn cleanup_folder(folder_path: &Path) {
    match tokio::fs::remove_dir_all(folder_path).await {
        Ok(()) => debug!("Removed folder {}", folder_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to clean up folder {}: {}", folder_path.display(), e),
    }
}

/// Reads a text file into a string
pub async fn read_text_file(path: &Path) -> io::Result<String> {
    tokio::fs::read_to_string(path).await
}
