use async_trait::async_trait;
use tracing::debug;
use watchpost_core::CaptureParams;
use watchpost_worker::{Capture, CaptureError, CaptureOutput, Compare, CompareError, CompareOutput};

/// Plain HTTP capture: fetches the page body instead of rendering a
/// screenshot. Good enough to exercise the engine end to end; swap in a
/// browser-backed implementation for real visual monitoring.
pub struct HttpCapture {
    client: reqwest::Client,
}

impl HttpCapture {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capture for HttpCapture {
    async fn capture(
        &self,
        url: &str,
        params: &CaptureParams,
    ) -> Result<CaptureOutput, CaptureError> {
        if let Some(ms) = params.wait_ms {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
        if let Some(ref action) = params.pre_action {
            debug!(action = %action, "pre-capture actions need a browser capture, ignoring");
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CaptureError::Navigation(e.to_string()))?;

        let status = resp.status();
        let mut page_errors = Vec::new();
        if status.is_client_error() || status.is_server_error() {
            page_errors.push(format!("HTTP {status}"));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| CaptureError::Navigation(e.to_string()))?;

        Ok(CaptureOutput {
            screenshot: body.to_vec(),
            page_errors,
        })
    }
}

/// Byte-identity compare: 0.0 for identical captures, 100.0 otherwise.
/// A stand-in for a pixel-level diff; deterministic by construction.
pub struct ByteCompare;

#[async_trait]
impl Compare for ByteCompare {
    async fn compare(
        &self,
        screenshot: &[u8],
        baseline: &[u8],
    ) -> Result<CompareOutput, CompareError> {
        let diff_pct = if screenshot == baseline { 0.0 } else { 100.0 };
        Ok(CompareOutput {
            diff_pct,
            diff_image: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_bytes_diff_zero_every_time() {
        let cmp = ByteCompare;
        for _ in 0..2 {
            let out = cmp.compare(b"same", b"same").await.unwrap();
            assert_eq!(out.diff_pct, 0.0);
            assert!(out.diff_image.is_none());
        }
    }

    #[tokio::test]
    async fn different_bytes_diff_full() {
        let cmp = ByteCompare;
        let out = cmp.compare(b"one", b"two").await.unwrap();
        assert_eq!(out.diff_pct, 100.0);
    }
}
