//! Remote archive access.
//!
//! [`ArchiveClient`] is the seam between the download orchestrator and the
//! network. [`CdsClient`] talks to the Copernicus Climate Data Store
//! retrieve API: submit a job, poll until it finishes, stream the result
//! asset to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::ArchiveError;
use crate::planner::RequestDescriptor;

/// Retrieves the artifact described by a request.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Fetch `request` into `target`, creating or truncating it.
    ///
    /// [`ArchiveError::Service`] is retryable; [`ArchiveError::ClientInit`]
    /// means no further request can succeed.
    async fn retrieve(&self, request: &RequestDescriptor, target: &Path)
        -> Result<(), ArchiveError>;
}

/// CDS endpoint and API key.
#[derive(Debug, Clone, PartialEq)]
pub struct CdsCredentials {
    pub url: String,
    pub key: String,
}

impl CdsCredentials {
    /// `CDSAPI_URL`/`CDSAPI_KEY`, falling back to `~/.cdsapirc`.
    pub fn from_environment() -> Result<Self, ArchiveError> {
        if let (Ok(url), Ok(key)) = (std::env::var("CDSAPI_URL"), std::env::var("CDSAPI_KEY")) {
            return Ok(Self { url, key });
        }

        let rc_path = std::env::var("CDSAPI_RC")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".cdsapirc")))
            .map_err(|_| {
                ArchiveError::ClientInit("CDSAPI_URL/CDSAPI_KEY not set and no home directory".to_string())
            })?;

        let content = std::fs::read_to_string(&rc_path).map_err(|e| {
            ArchiveError::ClientInit(format!(
                "CDSAPI_URL/CDSAPI_KEY not set and {} unreadable: {}",
                rc_path.display(),
                e
            ))
        })?;

        Self::parse_rc(&content).ok_or_else(|| {
            ArchiveError::ClientInit(format!("{} lacks url or key", rc_path.display()))
        })
    }

    /// Parse `url: ...` / `key: ...` lines of a `.cdsapirc` file.
    pub fn parse_rc(content: &str) -> Option<Self> {
        let mut url = None;
        let mut key = None;
        for line in content.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match name.trim() {
                "url" => url = Some(value.trim().to_string()),
                "key" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }
        Some(Self {
            url: url.filter(|u| !u.is_empty())?,
            key: key.filter(|k| !k.is_empty())?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

/// Climate Data Store client.
pub struct CdsClient {
    client: Client,
    credentials: CdsCredentials,
    poll_interval: Duration,
    max_wait: Duration,
}

impl CdsClient {
    pub fn new(credentials: CdsCredentials) -> Result<Self, ArchiveError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(3600))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ArchiveError::ClientInit(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(12 * 3600),
        })
    }

    /// Client configured from the environment or `~/.cdsapirc`.
    pub fn from_environment() -> Result<Self, ArchiveError> {
        let client = Self::new(CdsCredentials::from_environment()?)?;
        info!(url = %client.credentials.url, "CDS API client initialized");
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/retrieve/v1/{}", self.credentials.url.trim_end_matches('/'), path)
    }

    async fn check(response: Response) -> Result<Response, ArchiveError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(ArchiveError::ClientInit(format!("CDS rejected credentials: {}", body)))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ArchiveError::Service(format!("HTTP {}: {}", status, body)))
            }
        }
    }

    async fn submit(&self, request: &RequestDescriptor) -> Result<JobStatus, ArchiveError> {
        let url = self.endpoint(&format!("processes/{}/execution", request.dataset));
        let response = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.credentials.key)
            .json(&serde_json::json!({ "inputs": request.to_cds_body() }))
            .send()
            .await
            .map_err(|e| ArchiveError::Service(format!("Submit failed: {}", e)))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ArchiveError::Service(format!("Invalid submit response: {}", e)))
    }

    async fn wait_for_result(&self, mut job: JobStatus) -> Result<String, ArchiveError> {
        let started = tokio::time::Instant::now();
        loop {
            match job.status.as_str() {
                "successful" => break,
                "failed" | "rejected" | "dismissed" => {
                    return Err(ArchiveError::Service(format!(
                        "Job {} ended with status {}",
                        job.job_id, job.status
                    )));
                }
                _ => {}
            }
            if started.elapsed() > self.max_wait {
                return Err(ArchiveError::Service(format!(
                    "Job {} still {} after {:?}",
                    job.job_id, job.status, self.max_wait
                )));
            }

            debug!(job_id = %job.job_id, status = %job.status, "Waiting for CDS job");
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(self.endpoint(&format!("jobs/{}", job.job_id)))
                .header("PRIVATE-TOKEN", &self.credentials.key)
                .send()
                .await
                .map_err(|e| ArchiveError::Service(format!("Status poll failed: {}", e)))?;
            job = Self::check(response)
                .await?
                .json()
                .await
                .map_err(|e| ArchiveError::Service(format!("Invalid status response: {}", e)))?;
        }

        let response = self
            .client
            .get(self.endpoint(&format!("jobs/{}/results", job.job_id)))
            .header("PRIVATE-TOKEN", &self.credentials.key)
            .send()
            .await
            .map_err(|e| ArchiveError::Service(format!("Results request failed: {}", e)))?;
        let results: JobResults = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ArchiveError::Service(format!("Invalid results response: {}", e)))?;

        Ok(results.asset.value.href)
    }

    /// Stream the asset body to `target`.
    async fn download_asset(&self, href: &str, target: &Path) -> Result<u64, ArchiveError> {
        let response = self
            .client
            .get(href)
            .send()
            .await
            .map_err(|e| ArchiveError::Service(format!("Asset request failed: {}", e)))?;
        let response = Self::check(response).await?;

        let io_error = |e: std::io::Error| {
            ArchiveError::Service(format!("Error writing {}: {}", target.display(), e))
        };
        let mut file = File::create(target).await.map_err(io_error)?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ArchiveError::Service(format!("Error reading response chunk: {}", e)))?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        Ok(written)
    }
}

#[async_trait]
impl ArchiveClient for CdsClient {
    #[instrument(skip(self, request, target), fields(period = %request.period))]
    async fn retrieve(
        &self,
        request: &RequestDescriptor,
        target: &Path,
    ) -> Result<(), ArchiveError> {
        let job = self.submit(request).await?;
        info!(job_id = %job.job_id, "Submitted CDS request");

        let href = self.wait_for_result(job).await?;
        let bytes = self.download_asset(&href, target).await?;

        info!(bytes, path = %target.display(), "Retrieved CDS result");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rc() {
        let rc = "url: https://cds.climate.copernicus.eu/api\nkey: abcd-1234\n";
        let credentials = CdsCredentials::parse_rc(rc).unwrap();
        assert_eq!(credentials.url, "https://cds.climate.copernicus.eu/api");
        assert_eq!(credentials.key, "abcd-1234");
    }

    #[test]
    fn test_parse_rc_missing_key() {
        assert!(CdsCredentials::parse_rc("url: https://example.org/api\n").is_none());
        assert!(CdsCredentials::parse_rc("url: https://example.org/api\nkey:\n").is_none());
    }

    #[test]
    fn test_endpoint() {
        let client = CdsClient::new(CdsCredentials {
            url: "https://cds.example.org/api/".to_string(),
            key: "k".to_string(),
        })
        .unwrap();
        assert_eq!(
            client.endpoint("jobs/42"),
            "https://cds.example.org/api/retrieve/v1/jobs/42"
        );
    }

    #[test]
    fn test_job_status_deserialize() {
        let job: JobStatus =
            serde_json::from_str(r#"{"jobID": "abc", "status": "accepted", "type": "process"}"#).unwrap();
        assert_eq!(job.job_id, "abc");
        assert_eq!(job.status, "accepted");

        let results: JobResults =
            serde_json::from_str(r#"{"asset": {"value": {"href": "https://x/y.grib", "type": "application/x-grib"}}}"#)
                .unwrap();
        assert_eq!(results.asset.value.href, "https://x/y.grib");
    }
}
