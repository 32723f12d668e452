//! HTTP-backed source and generator collaborators.
//!
//! Both upstreams speak JSON over POST. Transport and decode failures map
//! to `InputUnavailable` (sources) or `GenerationFailed` (generator) so the
//! coordinator can report them without persisting anything.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use smry_core::error::{Error, Result};
use smry_core::models::{Category, SourceRecord, SummaryRequest};
use smry_core::providers::{
    GeneratedSummary, GeneratorSource, SourceProvider, SummaryGenerator,
};

pub struct HttpSourceProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSourceProvider {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_records<B: Serialize>(&self, path: &str, body: &B) -> Result<Vec<SourceRecord>> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::InputUnavailable(format!("source provider at {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::InputUnavailable(format!(
                "source provider at {url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::InputUnavailable(format!("source provider response: {e}")))
    }
}

#[derive(Serialize)]
struct FetchBody<'a> {
    category: Option<Category>,
    source_ids: &'a [String],
}

#[derive(Serialize)]
struct QueryBody<'a> {
    category: Option<Category>,
    query_params: &'a serde_json::Value,
    date_range_start: Option<DateTime<Utc>>,
    date_range_end: Option<DateTime<Utc>>,
}

#[async_trait]
impl SourceProvider for HttpSourceProvider {
    async fn fetch_records(
        &self,
        category: Option<Category>,
        source_ids: &[String],
    ) -> Result<Vec<SourceRecord>> {
        self.post_records(
            "/records/fetch",
            &FetchBody {
                category,
                source_ids,
            },
        )
        .await
    }

    async fn query_records(
        &self,
        category: Option<Category>,
        query_params: &serde_json::Value,
        date_range_start: Option<DateTime<Utc>>,
        date_range_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceRecord>> {
        self.post_records(
            "/records/query",
            &QueryBody {
                category,
                query_params,
                date_range_start,
                date_range_end,
            },
        )
        .await
    }
}

pub struct HttpSummaryGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSummaryGenerator {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    request: &'a SummaryRequest,
    source: &'a GeneratorSource,
}

#[async_trait]
impl SummaryGenerator for HttpSummaryGenerator {
    async fn generate(
        &self,
        request: &SummaryRequest,
        source: &GeneratorSource,
    ) -> Result<GeneratedSummary> {
        let url = format!("{}/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&GenerateBody { request, source })
            .send()
            .await
            .map_err(|e| Error::GenerationFailed(format!("generator at {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::GenerationFailed(format!(
                "generator at {url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::GenerationFailed(format!("generator response: {e}")))
    }
}
