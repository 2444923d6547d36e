use async_trait::async_trait;
use tracing::info;
use watchpost_core::Job;
use watchpost_store::Run;
use watchpost_worker::{Notify, NotifyError};

/// Fallback notifier: difference alerts land in the log.
pub struct LogNotifier;

#[async_trait]
impl Notify for LogNotifier {
    async fn notify(&self, channel: &str, job: &Job, run: &Run) -> Result<(), NotifyError> {
        info!(
            channel,
            job_id = %job.id,
            run_id = %run.id,
            url = %job.url,
            diff_pct = run.diff_pct,
            "difference detected"
        );
        Ok(())
    }
}

/// POSTs difference alerts to a configured webhook as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn notify(&self, channel: &str, job: &Job, run: &Run) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "event": "difference",
            "channel": channel,
            "job_id": job.id.as_str(),
            "url": job.url,
            "run_id": run.id,
            "diff_pct": run.diff_pct,
            "screenshot_ref": run.screenshot_ref.as_ref().map(|a| a.as_str()),
            "diff_ref": run.diff_ref.as_ref().map(|a| a.as_str()),
            "started_at": run.started_at,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "webhook returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
