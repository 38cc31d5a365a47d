//! History lookup: find prior results that can stand in for a job.

use async_trait::async_trait;
use jobgraph_core::{Error, HistoryIndex, Job, JobDigest, Replacement, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct LookupResponse {
    reference: String,
}

/// Client for an HTTP history index.
///
/// `GET {base}/{digest}` answers 200 with `{"reference": "..."}` when a prior
/// result exists and 404 when it does not. Anything else is a service error.
pub struct HttpHistoryIndex {
    base: Url,
    client: reqwest::Client,
}

impl HttpHistoryIndex {
    pub fn new(base: Url, timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("jobgraph/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { base, client })
    }

    fn lookup_url(&self, digest: &JobDigest) -> String {
        format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            digest.as_str()
        )
    }
}

/// Turn one index response into a lookup result.
fn interpret(job: &Job, status: StatusCode, body: &str) -> Result<Option<Replacement>> {
    let failure = |message: String| Error::PredicateService {
        predicate: "history",
        job: job.id.clone(),
        message,
    };
    match status {
        StatusCode::OK => {
            let response: LookupResponse = serde_json::from_str(body)
                .map_err(|e| failure(format!("malformed index response: {}", e)))?;
            Ok(Some(Replacement {
                job_id: job.id.clone(),
                reference: response.reference,
            }))
        }
        StatusCode::NOT_FOUND => Ok(None),
        other => Err(failure(format!("index answered {}", other))),
    }
}

#[async_trait]
impl HistoryIndex for HttpHistoryIndex {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn lookup(&self, job: &Job, digest: &JobDigest) -> Result<Option<Replacement>> {
        let url = self.lookup_url(digest);
        debug!(job = %job.id, url = %url, "Querying history index");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::PredicateService {
                predicate: self.name(),
                job: job.id.clone(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| Error::PredicateService {
            predicate: self.name(),
            job: job.id.clone(),
            message: e.to_string(),
        })?;
        interpret(job, status, &body)
    }
}

/// A fixed index read from JSON, for offline replays.
///
/// The document maps either a digest or a job id to a reference. Digests are
/// tried first, so a digest entry wins over a job id entry.
#[derive(Debug, Clone, Default)]
pub struct StaticHistoryIndex {
    entries: BTreeMap<String, String>,
}

impl StaticHistoryIndex {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[async_trait]
impl HistoryIndex for StaticHistoryIndex {
    fn name(&self) -> &'static str {
        "static-history"
    }

    async fn lookup(&self, job: &Job, digest: &JobDigest) -> Result<Option<Replacement>> {
        let reference = self
            .entries
            .get(digest.as_str())
            .or_else(|| self.entries.get(job.id.as_str()));
        Ok(reference.map(|reference| Replacement {
            job_id: job.id.clone(),
            reference: reference.clone(),
        }))
    }
}

/// An index that never has anything.
pub struct NoHistory;

#[async_trait]
impl HistoryIndex for NoHistory {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn lookup(&self, _job: &Job, _digest: &JobDigest) -> Result<Option<Replacement>> {
        Ok(None)
    }
}
