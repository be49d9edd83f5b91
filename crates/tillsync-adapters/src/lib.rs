//! Data-source contracts for the sync pipeline, plus the two bundled
//! implementations: the vendor HTTP export endpoint and a local export-file
//! source for offline runs and tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tillsync_core::{business_today, SalesRecord};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "tillsync-adapters";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("export request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("export endpoint returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not decode export payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("could not read export file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Data-source contract consumed by the orchestrator. May return an empty set
/// (no data for the period) or fail on irrecoverable fetch errors.
#[async_trait]
pub trait SalesSource: Send + Sync {
    /// Fetch today's transactions (business timezone).
    async fn fetch_daily(&self) -> Result<Vec<SalesRecord>, SourceError>;

    /// Fetch transactions for an inclusive date range. The vendor holds one
    /// authenticated session with server-side date-picker state, so callers
    /// must not issue concurrent fetches.
    async fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SalesRecord>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Retry budget for one export fetch. One retry per chunk is the documented
/// ceiling; anything more is a caller concern.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExportPayload {
    #[serde(default)]
    rows: Vec<SalesRecord>,
}

#[derive(Debug, Clone)]
pub struct HttpExportConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub utc_offset_hours: i32,
    pub backoff: BackoffPolicy,
}

impl Default for HttpExportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
            utc_offset_hours: 7,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// `SalesSource` backed by the vendor's transaction-export HTTP endpoint.
#[derive(Debug)]
pub struct HttpExportSource {
    client: reqwest::Client,
    config: HttpExportConfig,
}

impl HttpExportSource {
    pub fn new(config: HttpExportConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn export_url(&self) -> String {
        format!(
            "{}/transactions/export",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn fetch_with_retry(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SalesRecord>, SourceError> {
        let url = self.export_url();
        let mut attempt = 0;

        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[("start_date", start.to_string()), ("end_date", end.to_string())]);
            if let Some(key) = &self.config.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let payload: ExportPayload = resp.json().await?;
                        info!(%start, %end, rows = payload.rows.len(), "fetched export rows");
                        return Ok(payload.rows);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        warn!(%start, %end, status = status.as_u16(), attempt, "retrying export fetch");
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        warn!(%start, %end, attempt, "retrying export fetch after request error");
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl SalesSource for HttpExportSource {
    async fn fetch_daily(&self) -> Result<Vec<SalesRecord>, SourceError> {
        let today = business_today(self.config.utc_offset_hours);
        self.fetch_with_retry(today, today).await
    }

    async fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SalesRecord>, SourceError> {
        self.fetch_with_retry(start, end).await
    }
}

/// `SalesSource` backed by JSON export files on disk, one per fetched range:
/// `<dir>/sales_<start>_<end>.json` containing `{"rows": [...]}`. A missing
/// file means no data for the period, not an error.
#[derive(Debug, Clone)]
pub struct ExportFileSource {
    dir: PathBuf,
    utc_offset_hours: i32,
}

impl ExportFileSource {
    pub fn new(dir: impl Into<PathBuf>, utc_offset_hours: i32) -> Self {
        Self {
            dir: dir.into(),
            utc_offset_hours,
        }
    }

    pub fn export_path(&self, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.dir.join(format!("sales_{start}_{end}.json"))
    }

    fn load(&self, path: &Path) -> Result<Vec<SalesRecord>, SourceError> {
        if !path.exists() {
            warn!(path = %path.display(), "no export file for period");
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let payload: ExportPayload = serde_json::from_str(&text)?;
        Ok(payload.rows)
    }
}

#[async_trait]
impl SalesSource for ExportFileSource {
    async fn fetch_daily(&self) -> Result<Vec<SalesRecord>, SourceError> {
        let today = business_today(self.utc_offset_hours);
        self.load(&self.export_path(today, today))
    }

    async fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SalesRecord>, SourceError> {
        self.load(&self.export_path(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn file_source_parses_export_rows() {
        let dir = tempdir().expect("tempdir");
        let source = ExportFileSource::new(dir.path(), 7);
        let path = source.export_path(d(2025, 5, 1), d(2025, 5, 31));
        std::fs::write(
            &path,
            r#"{
                "rows": [
                    {
                        "date": "2025-05-09 14:30:00",
                        "receipt_number": "R-1001",
                        "payment_method": "Cash",
                        "product_name": "Green Tea",
                        "quantity": "2",
                        "total_amount": "120"
                    }
                ]
            }"#,
        )
        .expect("write export");

        let rows = source
            .fetch_range(d(2025, 5, 1), d(2025, 5, 31))
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receipt_number, "R-1001");
        assert_eq!(rows[0].business_date(), Some(d(2025, 5, 9)));
        assert_eq!(rows[0].tab, "");
    }

    #[tokio::test]
    async fn file_source_missing_file_is_empty_not_error() {
        let dir = tempdir().expect("tempdir");
        let source = ExportFileSource::new(dir.path(), 7);
        let rows = source
            .fetch_range(d(2025, 1, 1), d(2025, 1, 31))
            .await
            .expect("fetch");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn file_source_rejects_malformed_payload() {
        let dir = tempdir().expect("tempdir");
        let source = ExportFileSource::new(dir.path(), 7);
        let path = source.export_path(d(2025, 2, 1), d(2025, 2, 28));
        std::fs::write(&path, "{not json").expect("write export");
        let err = source
            .fetch_range(d(2025, 2, 1), d(2025, 2, 28))
            .await
            .expect_err("should fail");
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn retry_budget_is_one_attempt_by_default() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }
}
