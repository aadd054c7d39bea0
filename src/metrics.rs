//! Metrics for the transcription router
//!
//! Pluggable exporter behind a small facade. The Prometheus exporter creates metric
//! vectors lazily on first use; the null exporter discards everything.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics exporter trait for pluggable monitoring systems
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    /// Increment a counter metric
    async fn increment(&self, name: &str, labels: &[(&str, &str)]);

    /// Set a gauge metric value
    async fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Observe a value in a histogram metric
    async fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Export metrics in the format expected by the monitoring system
    async fn export(&self) -> Result<Vec<u8>, String>;
}

/// Prometheus implementation of MetricsExporter
pub struct PrometheusExporter {
    registry: Registry,
    counters: DashMap<String, CounterVec>,
    gauges: DashMap<String, GaugeVec>,
    histograms: DashMap<String, HistogramVec>,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    fn counter(&self, name: &str, label_names: &[&str]) -> Option<CounterVec> {
        if let Some(counter) = self.counters.get(name) {
            return Some(counter.clone());
        }
        let counter = CounterVec::new(Opts::new(name, "Counter metric"), label_names)
            .map_err(|e| warn!("Cannot create counter {}: {}", name, e))
            .ok()?;
        if let Err(e) = self.registry.register(Box::new(counter.clone())) {
            warn!("Failed to register counter metric {}: {}", name, e);
        }
        Some(self.counters.entry(name.to_string()).or_insert(counter).clone())
    }

    fn gauge(&self, name: &str, label_names: &[&str]) -> Option<GaugeVec> {
        if let Some(gauge) = self.gauges.get(name) {
            return Some(gauge.clone());
        }
        let gauge = GaugeVec::new(Opts::new(name, "Gauge metric"), label_names)
            .map_err(|e| warn!("Cannot create gauge {}: {}", name, e))
            .ok()?;
        if let Err(e) = self.registry.register(Box::new(gauge.clone())) {
            warn!("Failed to register gauge metric {}: {}", name, e);
        }
        Some(self.gauges.entry(name.to_string()).or_insert(gauge).clone())
    }

    fn histogram(&self, name: &str, label_names: &[&str]) -> Option<HistogramVec> {
        if let Some(histogram) = self.histograms.get(name) {
            return Some(histogram.clone());
        }
        let histogram = HistogramVec::new(HistogramOpts::new(name, "Histogram metric"), label_names)
            .map_err(|e| warn!("Cannot create histogram {}: {}", name, e))
            .ok()?;
        if let Err(e) = self.registry.register(Box::new(histogram.clone())) {
            warn!("Failed to register histogram metric {}: {}", name, e);
        }
        Some(self.histograms.entry(name.to_string()).or_insert(histogram).clone())
    }

    fn split_labels<'a>(labels: &'a [(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
        labels.iter().map(|(k, v)| (*k, *v)).unzip()
    }
}

#[async_trait]
impl MetricsExporter for PrometheusExporter {
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let (names, values) = Self::split_labels(labels);
        if let Some(counter) = self.counter(name, &names) {
            match counter.get_metric_with_label_values(&values) {
                Ok(metric) => metric.inc(),
                Err(e) => warn!("Counter {} rejected labels {:?}: {}", name, labels, e),
            }
        }
    }

    async fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let (names, values) = Self::split_labels(labels);
        if let Some(gauge) = self.gauge(name, &names) {
            match gauge.get_metric_with_label_values(&values) {
                Ok(metric) => metric.set(value),
                Err(e) => warn!("Gauge {} rejected labels {:?}: {}", name, labels, e),
            }
        }
    }

    async fn observe_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let (names, values) = Self::split_labels(labels);
        if let Some(histogram) = self.histogram(name, &names) {
            match histogram.get_metric_with_label_values(&values) {
                Ok(metric) => metric.observe(value),
                Err(e) => warn!("Histogram {} rejected labels {:?}: {}", name, labels, e),
            }
        }
    }

    async fn export(&self) -> Result<Vec<u8>, String> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;
        Ok(buffer)
    }
}

/// Null exporter for testing or when metrics are disabled
pub struct NullExporter;

#[async_trait]
impl MetricsExporter for NullExporter {
    async fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}

    async fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    async fn observe_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    async fn export(&self) -> Result<Vec<u8>, String> {
        Ok(vec![])
    }
}

/// Metrics facade for the application
#[derive(Clone)]
pub struct Metrics {
    exporter: Arc<dyn MetricsExporter>,
}

impl Metrics {
    pub fn new(exporter: Arc<dyn MetricsExporter>) -> Self {
        Self { exporter }
    }

    /// Facade over the null exporter
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullExporter))
    }

    /// Export metrics in the format expected by the monitoring system
    pub async fn export(&self) -> Result<Vec<u8>, String> {
        self.exporter.export().await
    }

    pub async fn record_request_enqueued(&self, priority: &str) {
        self.exporter
            .increment("transcription_requests_total", &[("priority", priority)])
            .await;
    }

    /// Admission refused ("queue_full", "too_long", "closed")
    pub async fn record_request_rejected(&self, reason: &str) {
        self.exporter
            .increment("transcription_rejections_total", &[("reason", reason)])
            .await;
    }

    pub async fn set_queue_depth(&self, depth: usize) {
        self.exporter.set_gauge("queue_depth", depth as f64, &[]).await;
    }

    pub async fn set_jobs_processing(&self, count: usize) {
        self.exporter.set_gauge("jobs_processing", count as f64, &[]).await;
    }

    /// One provider call
    pub async fn record_transcription(
        &self,
        provider: &str,
        model: &str,
        status: &str,
        processing_time: f64,
        audio_duration: f64,
    ) {
        let labels = [("provider", provider), ("model", model), ("status", status)];
        self.exporter.increment("provider_calls_total", &labels).await;
        self.exporter
            .observe_histogram("provider_processing_seconds", processing_time, &labels)
            .await;
        if status == "success" && audio_duration > 0.0 {
            self.exporter
                .observe_histogram(
                    "provider_realtime_factor",
                    processing_time / audio_duration,
                    &[("provider", provider), ("model", model)],
                )
                .await;
        }
    }

    pub async fn record_fallback(&self, from: &str, to: &str) {
        self.exporter
            .increment("provider_fallbacks_total", &[("from", from), ("to", to)])
            .await;
    }

    /// Refinement outcome ("refined", "fallback_to_draft")
    pub async fn record_refinement(&self, outcome: &str, duration: f64) {
        self.exporter
            .increment("refinements_total", &[("outcome", outcome)])
            .await;
        self.exporter
            .observe_histogram("refinement_duration_seconds", duration, &[("outcome", outcome)])
            .await;
    }

    /// Job leaving the queue ("completed", "failed", "cancelled", "panicked")
    pub async fn record_job_finished(&self, status: &str, duration: f64) {
        self.exporter
            .increment("jobs_finished_total", &[("status", status)])
            .await;
        self.exporter
            .observe_histogram("job_duration_seconds", duration, &[("status", status)])
            .await;
    }

    pub async fn record_upload_size(&self, size_bytes: u64) {
        self.exporter
            .observe_histogram("upload_size_bytes", size_bytes as f64, &[])
            .await;
    }
}

/// Factory function to create metrics exporter based on configuration
pub fn create_metrics_exporter(exporter_type: &str) -> Arc<dyn MetricsExporter> {
    match exporter_type.to_lowercase().as_str() {
        "prometheus" => {
            debug!("Initializing Prometheus metrics exporter");
            Arc::new(PrometheusExporter::new())
        }
        "none" | "disabled" => {
            debug!("Metrics disabled, using null exporter");
            Arc::new(NullExporter)
        }
        _ => {
            warn!(
                "Unknown metrics exporter type '{}', using null exporter",
                exporter_type
            );
            Arc::new(NullExporter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prometheus_export_contains_recorded_metrics() {
        let metrics = Metrics::new(create_metrics_exporter("prometheus"));
        metrics.record_request_enqueued("normal").await;
        metrics.record_request_enqueued("normal").await;
        metrics.set_queue_depth(3).await;
        metrics
            .record_transcription("local", "base", "success", 5.0, 10.0)
            .await;

        let text = String::from_utf8(metrics.export().await.unwrap()).unwrap();
        assert!(text.contains("transcription_requests_total{priority=\"normal\"} 2"));
        assert!(text.contains("queue_depth 3"));
        assert!(text.contains("provider_realtime_factor"));
    }

    #[tokio::test]
    async fn test_inconsistent_labels_do_not_panic() {
        let exporter = PrometheusExporter::new();
        exporter.increment("mixed_total", &[("a", "1")]).await;
        exporter.increment("mixed_total", &[("a", "1"), ("b", "2")]).await;
        let text = String::from_utf8(exporter.export().await.unwrap()).unwrap();
        assert!(text.contains("mixed_total{a=\"1\"} 1"));
    }

    #[tokio::test]
    async fn test_null_exporter_exports_nothing() {
        let metrics = Metrics::disabled();
        metrics.record_fallback("openai", "local").await;
        assert!(metrics.export().await.unwrap().is_empty());
        assert!(create_metrics_exporter("influx").export().await.unwrap().is_empty());
    }
}
