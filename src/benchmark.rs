// Benchmark reports
//
// Side-by-side comparison of several provider/model targets on the same audio:
// speed, realtime factor and a word-level quality proxy. Reports are logged and
// optionally written to disk as plain-text tables.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::RoutingConfig;
use crate::file_utils::read_text_file;
use crate::models::TranscriptionResult;
use crate::providers::ProviderError;
use crate::strategies::ProviderSelection;

/// Where reports go and what they are scored against
#[derive(Debug, Clone, Default)]
pub struct BenchmarkConfig {
    pub report_dir: Option<PathBuf>,
    /// Ground-truth transcript; without it targets are scored against the first success
    pub reference_text: Option<String>,
}

impl BenchmarkConfig {
    pub async fn from_routing(config: &RoutingConfig) -> Self {
        let reference_text = match &config.benchmark_reference_file {
            Some(path) => match read_text_file(path).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Cannot read benchmark reference {}: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };
        Self {
            report_dir: config.benchmark_report_dir.clone(),
            reference_text,
        }
    }
}

/// What the quality column is measured against
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum QualityBaseline {
    Reference,
    FirstSuccess(String),
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkEntry {
    pub target: String,
    pub processing_time: Option<f64>,
    pub realtime_factor: Option<f64>,
    pub word_count: Option<usize>,
    /// 1 - WER against the baseline, floored at 0
    pub quality: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub created_at: DateTime<Utc>,
    pub audio_duration: f64,
    pub baseline: QualityBaseline,
    pub entries: Vec<BenchmarkEntry>,
}

impl BenchmarkReport {
    pub fn build(
        audio_duration: f64,
        runs: &[(ProviderSelection, Result<TranscriptionResult, ProviderError>)],
        reference_text: Option<&str>,
    ) -> Self {
        let first_success = runs
            .iter()
            .find_map(|(selection, run)| run.as_ref().ok().map(|r| (selection, r.text.as_str())));

        let (baseline, baseline_text) = match (reference_text, first_success) {
            (Some(reference), _) => (QualityBaseline::Reference, Some(reference)),
            (None, Some((selection, text))) => (QualityBaseline::FirstSuccess(selection.to_string()), Some(text)),
            (None, None) => (QualityBaseline::Unavailable, None),
        };

        let entries = runs
            .iter()
            .map(|(selection, run)| match run {
                Ok(result) => BenchmarkEntry {
                    target: selection.to_string(),
                    processing_time: Some(result.processing_time),
                    realtime_factor: Some(result.realtime_factor),
                    word_count: Some(result.text.split_whitespace().count()),
                    quality: baseline_text.map(|base| (1.0 - word_error_rate(base, &result.text)).max(0.0)),
                    error: None,
                },
                Err(e) => BenchmarkEntry {
                    target: selection.to_string(),
                    processing_time: None,
                    realtime_factor: None,
                    word_count: None,
                    quality: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();

        Self {
            created_at: Utc::now(),
            audio_duration,
            baseline,
            entries,
        }
    }

    pub fn render_table(&self) -> String {
        let baseline = match &self.baseline {
            QualityBaseline::Reference => "reference transcript".to_string(),
            QualityBaseline::FirstSuccess(target) => format!("agreement with {}", target),
            QualityBaseline::Unavailable => "n/a".to_string(),
        };
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Benchmark {} | audio {:.1}s | quality: {}",
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.audio_duration,
            baseline
        );
        let _ = writeln!(
            out,
            "{:<36} {:>10} {:>8} {:>8} {:>8}  {}",
            "target", "time(s)", "rtf", "words", "quality", "error"
        );
        for entry in &self.entries {
            let num = |v: Option<f64>, precision: usize| {
                v.map(|v| format!("{:.*}", precision, v)).unwrap_or_else(|| "-".into())
            };
            let _ = writeln!(
                out,
                "{:<36} {:>10} {:>8} {:>8} {:>8}  {}",
                entry.target,
                num(entry.processing_time, 2),
                num(entry.realtime_factor, 3),
                entry.word_count.map(|w| w.to_string()).unwrap_or_else(|| "-".into()),
                num(entry.quality, 3),
                entry.error.as_deref().unwrap_or("")
            );
        }
        out
    }

    /// Write the table to `dir/benchmark_<timestamp>.txt` with the raw report next to it
    /// as `.json`. Returns the table path.
    pub async fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let stem = format!("benchmark_{}", self.created_at.format("%Y%m%d_%H%M%S%.3f"));
        let path = dir.join(format!("{}.txt", stem));
        tokio::fs::write(&path, self.render_table()).await?;

        let json = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        tokio::fs::write(dir.join(format!("{}.json", stem)), json).await?;
        info!("Benchmark report written to {}", path.display());
        Ok(path)
    }
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Word error rate of `hypothesis` against `reference` (case and punctuation insensitive)
pub fn word_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let reference = words(reference);
    let hypothesis = words(hypothesis);
    if reference.is_empty() {
        return if hypothesis.is_empty() { 0.0 } else { 1.0 };
    }

    // Single-row edit distance over words
    let mut row: Vec<usize> = (0..=hypothesis.len()).collect();
    for (i, ref_word) in reference.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, hyp_word) in hypothesis.iter().enumerate() {
            let substitution = diagonal + usize::from(ref_word != hyp_word);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[hypothesis.len()] as f64 / reference.len() as f64
}
