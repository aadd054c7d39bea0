// Audio tooling
//
// Thin async wrappers around ffmpeg/ffprobe: probing the real decoded duration,
// converting to 16 kHz mono WAV and cutting segments. Every subprocess runs with
// kill_on_drop and a timeout, so a hung ffmpeg never blocks a worker.

use async_trait::async_trait;
use log::{debug, warn};
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::chunking::{ChunkSpan, SegmentExtractor};
use crate::config::AudioConfig;
use crate::providers::ProviderError;

/// Handles to the ffmpeg binaries plus the subprocess timeout
#[derive(Debug, Clone)]
pub struct AudioTools {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl AudioTools {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            timeout: Duration::from_secs(config.subprocess_timeout_secs),
        }
    }

    /// Duration of the decoded audio stream in seconds.
    ///
    /// Decodes the whole stream through ffmpeg's null muxer and reads the last reported
    /// `time=`; container headers (notably WebM/OGG from messengers) are often wrong.
    /// Falls back to ffprobe's container duration only when decoding reports nothing.
    pub async fn probe_duration(&self, path: &Path) -> Result<f64, ProviderError> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-i")
            .arg(path)
            .args(["-vn", "-f", "null", "-"]);

        let output = self.run(command, &self.ffmpeg).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_ffmpeg_failure(&stderr));
        }

        if let Some(duration) = parse_ffmpeg_time(&stderr) {
            debug!("Decoded duration of {:?}: {:.2}s", path, duration);
            return Ok(duration);
        }

        warn!(
            "ffmpeg reported no decoded time for {:?}, falling back to container duration",
            path
        );
        self.probe_container_duration(path).await
    }

    async fn probe_container_duration(&self, path: &Path) -> Result<f64, ProviderError> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path);

        let output = self.run(command, &self.ffprobe).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(classify_ffmpeg_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| ProviderError::UnsupportedFormat(format!("no duration in {:?}", path)))
    }

    /// Convert any input to 16 kHz mono 16-bit PCM WAV
    pub async fn convert_to_wav(&self, input: &Path, output: &Path) -> Result<(), ProviderError> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-hide_banner", "-nostdin", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
            .arg(output);
        self.run_checked(command).await
    }

    /// Cut `[start, start + duration)` out of `input`. The output codec follows the
    /// extension of `output`.
    pub async fn extract_segment(
        &self,
        input: &Path,
        start: f64,
        duration: f64,
        output: &Path,
    ) -> Result<(), ProviderError> {
        let mut command = Command::new(&self.ffmpeg);
        // -ss before -i seeks on the input instead of decoding up to the start point
        command
            .args(["-hide_banner", "-nostdin", "-y", "-ss"])
            .arg(format!("{:.3}", start))
            .arg("-t")
            .arg(format!("{:.3}", duration))
            .arg("-i")
            .arg(input)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-b:a", "64k"])
            .arg(output);
        self.run_checked(command).await
    }

    async fn run_checked(&self, command: Command) -> Result<(), ProviderError> {
        let output = self.run(command, &self.ffmpeg).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_ffmpeg_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn run(&self, mut command: Command, program: &str) -> Result<Output, ProviderError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProviderError::Unknown(format!("{} not found in PATH", program)),
            _ => ProviderError::Unknown(format!("failed to start {}: {}", program, e)),
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ProviderError::Unknown(format!("{} failed: {}", program, e))),
            Err(_) => {
                warn!("{} exceeded {}s and was killed", program, self.timeout.as_secs());
                Err(ProviderError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl SegmentExtractor for AudioTools {
    async fn extract(&self, source: &Path, span: &ChunkSpan, dest: &Path) -> Result<(), ProviderError> {
        self.extract_segment(source, span.start, span.duration, dest).await
    }
}

/// Last `time=HH:MM:SS.xx` progress value in ffmpeg's stderr, in seconds
pub fn parse_ffmpeg_time(stderr: &str) -> Option<f64> {
    stderr
        .rmatch_indices("time=")
        .filter_map(|(idx, marker)| {
            let value = stderr[idx + marker.len()..].split_whitespace().next()?;
            parse_timestamp(value)
        })
        .next()
}

fn parse_timestamp(value: &str) -> Option<f64> {
    let mut seconds = 0.0;
    for part in value.split(':') {
        seconds = seconds * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(seconds)
}

fn classify_ffmpeg_failure(stderr: &str) -> ProviderError {
    let lowered = stderr.to_lowercase();
    let tail: String = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("ffmpeg failed")
        .trim()
        .to_string();

    if lowered.contains("invalid data found")
        || lowered.contains("does not contain any stream")
        || lowered.contains("could not find codec")
        || lowered.contains("moov atom not found")
    {
        ProviderError::UnsupportedFormat(tail)
    } else {
        ProviderError::Unknown(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffmpeg_time_takes_last_value() {
        let stderr = "Input #0, ogg, from 'voice.ogg':\n  Duration: 00:00:01.00, start: 0\n\
                      size=N/A time=00:00:30.50 bitrate=N/A speed=600x\n\
                      size=N/A time=00:01:02.25 bitrate=N/A speed=612x\n";
        assert_eq!(parse_ffmpeg_time(stderr), Some(62.25));
    }

    #[test]
    fn test_parse_ffmpeg_time_skips_unparsable() {
        let stderr = "size=N/A time=00:00:10.00 bitrate=N/A\nsize=N/A time=N/A bitrate=N/A\n";
        assert_eq!(parse_ffmpeg_time(stderr), Some(10.0));
        assert_eq!(parse_ffmpeg_time("no progress here"), None);
    }

    #[test]
    fn test_parse_long_timestamp() {
        assert_eq!(parse_timestamp("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_timestamp("bad"), None);
    }

    #[test]
    fn test_classify_ffmpeg_failure() {
        let error = classify_ffmpeg_failure("[ogg] broken\nvoice.ogg: Invalid data found when processing input\n");
        assert!(matches!(error, ProviderError::UnsupportedFormat(msg) if msg.contains("Invalid data")));

        let error = classify_ffmpeg_failure("Disk quota exceeded\n");
        assert!(matches!(error, ProviderError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let tools = AudioTools {
            ffmpeg: "/nonexistent/ffmpeg-binary".into(),
            ffprobe: "/nonexistent/ffprobe-binary".into(),
            timeout: Duration::from_secs(5),
        };
        let error = tools.probe_duration(Path::new("voice.ogg")).await.unwrap_err();
        assert!(matches!(error, ProviderError::Unknown(msg) if msg.contains("not found")));
    }
}
