//! Collaborator interfaces consumed by the cache coordinator.
//!
//! Ingestion pipelines and the LLM live outside this crate; the coordinator
//! only sees them through these traits. The API binary wires HTTP-backed
//! implementations, tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Category, SourceRecord, SummaryRequest};

/// Provides the current content of raw source records.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch specific records by id. Missing ids are simply absent from the
    /// result; the fingerprint engine turns gaps into `InputUnavailable`.
    async fn fetch_records(
        &self,
        category: Option<Category>,
        source_ids: &[String],
    ) -> Result<Vec<SourceRecord>>;

    /// Enumerate all records matching the query parameters and date range,
    /// for bulk/group requests that carry no explicit id list.
    async fn query_records(
        &self,
        category: Option<Category>,
        query_params: &serde_json::Value,
        date_range_start: Option<DateTime<Utc>>,
        date_range_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceRecord>>;
}

/// Input handed to the generator: either raw records or the child summaries
/// a roll-up composes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSource {
    Records { records: Vec<SourceRecord> },
    Summaries { summaries: Vec<ChildSummary> },
}

/// A child summary's contribution to a composed roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildSummary {
    pub id: Uuid,
    pub summary_type: String,
    pub summary: String,
    pub metadata: serde_json::Value,
}

/// Generator output: the summary text plus derived display statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSummary {
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The external summary generator. Treated as a black box: slow,
/// rate-limited, occasionally unavailable. Failures surface as
/// `GenerationFailed` and never persist partial state.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &SummaryRequest,
        source: &GeneratorSource,
    ) -> Result<GeneratedSummary>;
}
