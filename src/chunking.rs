// Audio chunking
//
// Splits long audio into overlapping windows, transcribes each window and reassembles
// the text in chunk order. Used by providers whose backend has a duration or upload
// ceiling.

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;

use crate::providers::ProviderError;

/// Container of chunk files (selects the ffmpeg encoder)
const CHUNK_EXTENSION: &str = "mp3";

/// One window of the source audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSpan {
    /// 0-based chunk index
    pub index: usize,
    /// Start offset in seconds
    pub start: f64,
    /// Window length in seconds
    pub duration: f64,
}

impl ChunkSpan {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Plan windows of `chunk_size` seconds where consecutive windows share `overlap` seconds.
///
/// Window k starts at `k * (chunk_size - overlap)`; the last one is cut at `total`.
/// Audio no longer than one window yields a single span covering everything.
pub fn plan_chunks(total: f64, chunk_size: f64, overlap: f64) -> Vec<ChunkSpan> {
    if total <= 0.0 || chunk_size <= 0.0 {
        return Vec::new();
    }
    let overlap = if overlap >= 0.0 && overlap < chunk_size { overlap } else { 0.0 };
    let step = chunk_size - overlap;

    let mut spans = Vec::new();
    let mut index = 0;
    loop {
        let start = index as f64 * step;
        let end = (start + chunk_size).min(total);
        spans.push(ChunkSpan {
            index,
            start,
            duration: end - start,
        });
        if end >= total - 1e-6 {
            break;
        }
        index += 1;
    }
    spans
}

/// Writes one span of the source audio to a file
#[async_trait]
pub trait SegmentExtractor: Send + Sync {
    async fn extract(&self, source: &Path, span: &ChunkSpan, dest: &Path) -> Result<(), ProviderError>;
}

/// Transcribes one chunk file, optionally primed with the tail of the previous chunk
#[async_trait]
pub trait ChunkTranscriber: Send + Sync {
    async fn transcribe_chunk(&self, chunk_path: &Path, prompt: Option<&str>) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChunkMode {
    /// At most `max_concurrent` chunks in flight, no context between chunks
    Parallel { max_concurrent: usize },
    /// One chunk at a time, each primed with the last `context_chars` of the previous text
    Sequential { context_chars: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingOutcome {
    /// Reassembled text, chunk texts joined by single spaces
    pub text: String,
    /// Number of chunks processed
    pub chunks: usize,
    /// 0-based indices of chunks replaced by a failure marker
    pub failed_chunks: Vec<usize>,
}

/// Marker inserted in place of a chunk that failed twice
pub fn failure_marker(index: usize, total: usize) -> String {
    format!("[part {}/{}: transcription failed]", index + 1, total)
}

/// Last `max_chars` characters of `text`, starting on a word boundary
pub fn context_suffix(text: &str, max_chars: usize) -> &str {
    let text = text.trim();
    if max_chars == 0 {
        return "";
    }
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(char_count - max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let tail = &text[start..];
    // Drop the partial word at the cut, unless the tail is one single word
    let cut_mid_word = !text[..start].ends_with(char::is_whitespace);
    match tail.find(char::is_whitespace) {
        Some(space) if cut_mid_word => tail[space..].trim_start(),
        _ => tail,
    }
}

/// One chunked run over a source file
pub struct ChunkedTranscription<'a> {
    extractor: &'a dyn SegmentExtractor,
    transcriber: &'a dyn ChunkTranscriber,
    workdir_root: Option<PathBuf>,
}

impl<'a> ChunkedTranscription<'a> {
    pub fn new(extractor: &'a dyn SegmentExtractor, transcriber: &'a dyn ChunkTranscriber) -> Self {
        Self {
            extractor,
            transcriber,
            workdir_root: None,
        }
    }

    /// Parent directory of the temporary chunk folder (system temp dir by default)
    pub fn with_workdir_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.workdir_root = Some(root.into());
        self
    }

    /// Transcribe every span and reassemble. A failing chunk is retried once without
    /// context and then replaced by a marker. Fails only when every chunk failed.
    /// Chunk files live in a temporary folder removed on every exit path.
    pub async fn run(
        &self,
        source: &Path,
        spans: &[ChunkSpan],
        mode: ChunkMode,
    ) -> Result<ChunkingOutcome, ProviderError> {
        let builder_result = match &self.workdir_root {
            Some(root) => tempfile::Builder::new().prefix("chunks-").tempdir_in(root),
            None => tempfile::Builder::new().prefix("chunks-").tempdir(),
        };
        let workdir = builder_result
            .map_err(|e| ProviderError::Unknown(format!("cannot create chunk folder: {}", e)))?;

        let total = spans.len();
        info!("Transcribing {:?} in {} chunks ({:?})", source, total, mode);

        let results: Vec<Result<String, ProviderError>> = match mode {
            ChunkMode::Parallel { max_concurrent } => {
                let semaphore = Semaphore::new(max_concurrent.max(1));
                let semaphore = &semaphore;
                let dir = workdir.path();
                join_all(spans.iter().map(|span| async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| ProviderError::Unknown(e.to_string()))?;
                    self.process_chunk(source, span, dir, None, total).await
                }))
                .await
            }
            ChunkMode::Sequential { context_chars } => {
                let mut results = Vec::with_capacity(total);
                let mut previous: Option<String> = None;
                for span in spans {
                    let prompt = previous
                        .as_deref()
                        .map(|text| context_suffix(text, context_chars))
                        .filter(|prompt| !prompt.is_empty());
                    let result = self
                        .process_chunk(source, span, workdir.path(), prompt, total)
                        .await;
                    if let Ok(text) = &result {
                        previous = Some(text.clone());
                    }
                    results.push(result);
                }
                results
            }
        };

        if let Err(e) = workdir.close() {
            warn!("Failed to remove chunk folder: {}", e);
        }

        assemble(results)
    }

    async fn process_chunk(
        &self,
        source: &Path,
        span: &ChunkSpan,
        dir: &Path,
        prompt: Option<&str>,
        total: usize,
    ) -> Result<String, ProviderError> {
        let path = dir.join(format!("chunk_{:04}.{}", span.index, CHUNK_EXTENSION));

        let result = async {
            self.extractor.extract(source, span, &path).await?;
            match self.transcriber.transcribe_chunk(&path, prompt).await {
                Ok(text) => Ok(text),
                Err(first) => {
                    warn!(
                        "Chunk {}/{} failed ({}), retrying without context",
                        span.index + 1,
                        total,
                        first
                    );
                    self.transcriber.transcribe_chunk(&path, None).await
                }
            }
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove chunk file {:?}: {}", path, e);
            }
        }
        result
    }
}

fn assemble(results: Vec<Result<String, ProviderError>>) -> Result<ChunkingOutcome, ProviderError> {
    let total = results.len();
    let mut parts = Vec::with_capacity(total);
    let mut failed_chunks = Vec::new();
    let mut last_error = None;

    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
            Err(e) => {
                warn!("Chunk {}/{} failed permanently: {}", index + 1, total, e);
                failed_chunks.push(index);
                parts.push(failure_marker(index, total));
                last_error = Some(e);
            }
        }
    }

    if total > 0 && failed_chunks.len() == total {
        if let Some(error) = last_error {
            return Err(error);
        }
    }

    Ok(ChunkingOutcome {
        text: parts.join(" "),
        chunks: total,
        failed_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writes the chunk index into the chunk file
    struct IndexExtractor;

    #[async_trait]
    impl SegmentExtractor for IndexExtractor {
        async fn extract(&self, _source: &Path, span: &ChunkSpan, dest: &Path) -> Result<(), ProviderError> {
            tokio::fs::write(dest, span.index.to_string())
                .await
                .map_err(|e| ProviderError::Unknown(e.to_string()))
        }
    }

    /// Returns "text{index}", later chunks finish first; fails chunks listed in `always_fail`
    /// and fails the first attempt of chunks listed in `fail_once`.
    #[derive(Default)]
    struct ScriptedTranscriber {
        always_fail: Vec<usize>,
        fail_once: Vec<usize>,
        attempts: Mutex<Vec<(usize, Option<String>)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ChunkTranscriber for ScriptedTranscriber {
        async fn transcribe_chunk(&self, chunk_path: &Path, prompt: Option<&str>) -> Result<String, ProviderError> {
            let index: usize = tokio::fs::read_to_string(chunk_path)
                .await
                .map_err(|e| ProviderError::Unknown(e.to_string()))?
                .parse()
                .map_err(|_| ProviderError::Unknown("bad chunk".into()))?;

            let previous_attempts = {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.iter().filter(|(i, _)| *i == index).count();
                attempts.push((index, prompt.map(str::to_string)));
                count
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40 - 10 * (index as u64 % 4))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.always_fail.contains(&index) {
                return Err(ProviderError::Network("connection reset".into()));
            }
            if self.fail_once.contains(&index) && previous_attempts == 0 {
                return Err(ProviderError::Timeout(1));
            }
            Ok(format!("text{}", index))
        }
    }

    #[test]
    fn test_plan_chunks_with_overlap() {
        let spans = plan_chunks(1800.0, 1200.0, 2.0);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], ChunkSpan { index: 0, start: 0.0, duration: 1200.0 });
        assert_eq!(spans[1].start, 1198.0);
        assert!((spans[1].end() - 1800.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_chunks_edge_cases() {
        assert_eq!(plan_chunks(300.0, 1200.0, 2.0).len(), 1);
        assert_eq!(plan_chunks(1200.0, 1200.0, 2.0).len(), 1);
        assert!(plan_chunks(0.0, 1200.0, 2.0).is_empty());

        let spans = plan_chunks(3000.0, 1000.0, 0.0);
        assert_eq!(spans.iter().map(|s| s.start).collect::<Vec<_>>(), vec![0.0, 1000.0, 2000.0]);

        // Full coverage: every point of the audio is inside some span
        let spans = plan_chunks(4321.0, 600.0, 5.0);
        for pair in spans.windows(2) {
            assert!(pair[1].start <= pair[0].end());
        }
        assert!((spans.last().unwrap().end() - 4321.0).abs() < 1e-9);
    }

    #[test]
    fn test_context_suffix_word_boundary() {
        assert_eq!(context_suffix("short text", 200), "short text");
        assert_eq!(context_suffix("alpha beta gamma", 8), "gamma");
        assert_eq!(context_suffix("alpha beta gamma", 6), "gamma");
        assert_eq!(context_suffix("привет мир всем", 8), "мир всем");
        assert_eq!(context_suffix("привет мир всем", 6), "всем");
        assert_eq!(context_suffix("anything", 0), "");
    }

    #[tokio::test]
    async fn test_parallel_reassembles_in_chunk_order() {
        let transcriber = ScriptedTranscriber::default();
        let runner = ChunkedTranscription::new(&IndexExtractor, &transcriber);
        let spans = plan_chunks(4000.0, 1000.0, 0.0);

        let outcome = runner
            .run(Path::new("source.ogg"), &spans, ChunkMode::Parallel { max_concurrent: 2 })
            .await
            .unwrap();

        assert_eq!(outcome.text, "text0 text1 text2 text3");
        assert_eq!(outcome.chunks, 4);
        assert!(outcome.failed_chunks.is_empty());
        assert!(transcriber.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated() {
        let transcriber = ScriptedTranscriber {
            always_fail: vec![1],
            ..Default::default()
        };
        let root = tempfile::tempdir().unwrap();
        let runner = ChunkedTranscription::new(&IndexExtractor, &transcriber).with_workdir_root(root.path());
        let spans = plan_chunks(3000.0, 1000.0, 0.0);

        let outcome = runner
            .run(Path::new("source.ogg"), &spans, ChunkMode::Parallel { max_concurrent: 3 })
            .await
            .unwrap();

        assert_eq!(outcome.text, "text0 [part 2/3: transcription failed] text2");
        assert_eq!(outcome.failed_chunks, vec![1]);
        // One retry for the failing chunk
        let attempts = transcriber.attempts.lock().unwrap();
        assert_eq!(attempts.iter().filter(|(i, _)| *i == 1).count(), 2);
        // Temporary chunk folder is gone
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_sequential_passes_context_and_retries_without_it() {
        let transcriber = ScriptedTranscriber {
            fail_once: vec![2],
            ..Default::default()
        };
        let runner = ChunkedTranscription::new(&IndexExtractor, &transcriber);
        let spans = plan_chunks(3000.0, 1000.0, 0.0);

        let outcome = runner
            .run(Path::new("source.ogg"), &spans, ChunkMode::Sequential { context_chars: 200 })
            .await
            .unwrap();

        assert_eq!(outcome.text, "text0 text1 text2");
        let attempts = transcriber.attempts.lock().unwrap();
        assert_eq!(
            *attempts,
            vec![
                (0, None),
                (1, Some("text0".to_string())),
                (2, Some("text1".to_string())),
                (2, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_an_error() {
        let transcriber = ScriptedTranscriber {
            always_fail: vec![0, 1],
            ..Default::default()
        };
        let runner = ChunkedTranscription::new(&IndexExtractor, &transcriber);
        let spans = plan_chunks(2000.0, 1000.0, 0.0);

        let error = runner
            .run(Path::new("source.ogg"), &spans, ChunkMode::Parallel { max_concurrent: 2 })
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::Network(_)));
    }

    #[test]
    fn test_assemble_skips_empty_chunks() {
        let outcome = assemble(vec![Ok("a ".into()), Ok("  ".into()), Ok("b".into())]).unwrap();
        assert_eq!(outcome.text, "a b");
    }
}
