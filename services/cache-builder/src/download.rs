//! Fetching monthly archive files and handing them to the ingester.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use ingestion::{candidate_urls, IngestOptions, Ingester, IngestionResult};
use timelines_common::time::first_day_of_next_month;

/// HTTP settings for archive downloads.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Downloads one month of averaged flux data and ingests it.
pub struct MonthDownloader {
    client: Client,
    ingester: Ingester,
}

impl MonthDownloader {
    pub fn new(config: DownloadConfig, ingester: Ingester) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, ingester })
    }

    /// Fetch the month starting at `month` and store its samples.
    ///
    /// Satellites are tried in order; the first file served with `200 OK`
    /// is used.
    #[instrument(skip(self), fields(month = %month.format("%Y-%m")))]
    pub async fn download_month(&self, month: DateTime<Utc>) -> Result<IngestionResult> {
        let (url, data) = self.fetch_first(&candidate_urls(&month)).await?;
        info!(url = %url, bytes = data.len(), "Downloaded monthly file");

        let options = IngestOptions {
            start: month,
            end: first_day_of_next_month(&month),
            ..Default::default()
        };
        let result = self.ingester.ingest_bytes(&data, &url, &options).await?;
        Ok(result)
    }

    async fn fetch_first(&self, urls: &[String]) -> Result<(String, Bytes)> {
        for url in urls {
            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Request failed, trying next satellite");
                    continue;
                }
            };

            match response.status() {
                StatusCode::OK => {
                    let data = response
                        .bytes()
                        .await
                        .with_context(|| format!("Failed to read body of {}", url))?;
                    return Ok((url.clone(), data));
                }
                status => debug!(url = %url, status = %status, "Not available"),
            }
        }

        Err(anyhow!("No satellite serves this month ({} URLs tried)", urls.len()))
    }
}

/// Parse `YYYY-MM` into the first instant of that month.
pub fn parse_month(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{}', expected YYYY-MM", s))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("Invalid month '{}'", s))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
