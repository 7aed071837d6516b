// gemflows — Step completion telemetry
//
// Reporting never blocks or fails a run. Sinks that send in the background
// are drained with `flush` before the process exits.

use crate::config::TelemetryConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

pub const DEFAULT_POSTHOG_ENDPOINT: &str = "https://us.i.posthog.com";

/// Receives one event per successfully completed step.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    fn step_completed(&self, workflow_name: &str, step_id: &str, step_type: &str, duration_ms: u64);

    /// Wait up to `timeout` for events still being delivered.
    async fn flush(&self, _timeout: Duration) {}
}

// ---------------------------------------------------------------------------
// Tracing sink
// ---------------------------------------------------------------------------

/// Logs completions through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    fn step_completed(&self, workflow_name: &str, step_id: &str, step_type: &str, duration_ms: u64) {
        tracing::info!(
            workflow = %workflow_name,
            step = %step_id,
            step_type = %step_type,
            duration_ms = duration_ms,
            "step_completed"
        );
    }
}

// ---------------------------------------------------------------------------
// PostHog sink
// ---------------------------------------------------------------------------

/// Sends `step_completed` captures to PostHog. Each capture is posted from a
/// tracked task, so a tokio runtime must be running; `flush` waits for them.
pub struct PostHogSink {
    client: Client,
    tracker: TaskTracker,
    api_key: String,
    capture_url: String,
    distinct_id: String,
    user_machine: String,
}

impl PostHogSink {
    pub fn new(api_key: String, endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = if endpoint.is_empty() {
            DEFAULT_POSTHOG_ENDPOINT
        } else {
            endpoint
        };
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            tracker: TaskTracker::new(),
            api_key,
            capture_url: format!("{}/capture/", endpoint.trim_end_matches('/')),
            distinct_id: host_name(),
            user_machine: format!("architecture_{}", std::env::consts::ARCH),
        })
    }

    fn payload(
        &self,
        workflow_name: &str,
        step_id: &str,
        step_type: &str,
        duration_ms: u64,
    ) -> serde_json::Value {
        json!({
            "api_key": self.api_key,
            "event": "step_completed",
            "distinct_id": self.distinct_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "properties": {
                "workflow_name": workflow_name,
                "step_id": step_id,
                "step_type": step_type,
                "duration_ms": duration_ms,
                "user_machine": self.user_machine,
            }
        })
    }
}

#[async_trait]
impl TelemetrySink for PostHogSink {
    fn step_completed(&self, workflow_name: &str, step_id: &str, step_type: &str, duration_ms: u64) {
        let body = self.payload(workflow_name, step_id, step_type, duration_ms);
        let client = self.client.clone();
        let url = self.capture_url.clone();

        self.tracker.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::debug!(status = %resp.status(), "PostHog capture rejected");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "PostHog capture failed"),
            }
        });
    }

    async fn flush(&self, timeout: Duration) {
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            tracing::debug!(
                pending = self.tracker.len(),
                "PostHog captures still pending at shutdown"
            );
        }
        self.tracker.reopen();
    }
}

fn host_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the configured sink: PostHog when an API key is set, otherwise the
/// tracing sink when event logging is enabled, otherwise none.
pub fn from_config(cfg: &TelemetryConfig) -> Option<Arc<dyn TelemetrySink>> {
    if !cfg.posthog_api_key.is_empty() {
        match PostHogSink::new(cfg.posthog_api_key.clone(), &cfg.posthog_endpoint) {
            Ok(sink) => return Some(Arc::new(sink)),
            Err(e) => tracing::warn!("Failed to set up PostHog telemetry: {}", e),
        }
    }
    if cfg.log_events {
        return Some(Arc::new(TracingSink));
    }
    None
}
