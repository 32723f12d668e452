//! Domain models for cached summaries and their hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::canonical_json;

/// Depth classification of a summary in the roll-up hierarchy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    Individual,
    Group,
    Global,
}

impl std::fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HierarchyLevel::Individual => write!(f, "individual"),
            HierarchyLevel::Group => write!(f, "group"),
            HierarchyLevel::Global => write!(f, "global"),
        }
    }
}

impl HierarchyLevel {
    /// Parse from the stored text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "individual" => Some(HierarchyLevel::Individual),
            "group" => Some(HierarchyLevel::Group),
            "global" => Some(HierarchyLevel::Global),
            _ => None,
        }
    }
}

/// Source system a summary describes. Nullable on legacy rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Zendesk,
    Jira,
    Salesforce,
    System,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Zendesk => write!(f, "zendesk"),
            Category::Jira => write!(f, "jira"),
            Category::Salesforce => write!(f, "salesforce"),
            Category::System => write!(f, "system"),
        }
    }
}

impl Category {
    /// Parse from the stored text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zendesk" => Some(Category::Zendesk),
            "jira" => Some(Category::Jira),
            "salesforce" => Some(Category::Salesforce),
            "system" => Some(Category::System),
            _ => None,
        }
    }
}

/// Whether a summary was generated from raw source records or composed from
/// other summaries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    RawData,
    ExistingSummaries,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::RawData => write!(f, "raw_data"),
            SourceType::ExistingSummaries => write!(f, "existing_summaries"),
        }
    }
}

impl SourceType {
    /// Parse from the stored text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw_data" => Some(SourceType::RawData),
            "existing_summaries" => Some(SourceType::ExistingSummaries),
            _ => None,
        }
    }
}

/// Classification of a parent/child composition edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Aggregation,
    TimePeriod,
    Subset,
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipType::Aggregation => write!(f, "aggregation"),
            RelationshipType::TimePeriod => write!(f, "time_period"),
            RelationshipType::Subset => write!(f, "subset"),
        }
    }
}

impl RelationshipType {
    /// Parse from the stored text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aggregation" => Some(RelationshipType::Aggregation),
            "time_period" => Some(RelationshipType::TimePeriod),
            "subset" => Some(RelationshipType::Subset),
            _ => None,
        }
    }
}

/// A cached, generated natural-language summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub summary_type: String,
    pub hierarchy_level: HierarchyLevel,
    pub category: Option<Category>,
    pub source_type: SourceType,
    pub source_ids: Option<Vec<String>>,
    pub source_summary_ids: Option<Vec<Uuid>>,
    pub query_params: serde_json::Value,
    pub date_range_start: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
    pub summary: String,
    pub metadata: serde_json::Value,
    pub hash_signature: String,
    pub last_generated_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub is_valid: bool,
}

impl Summary {
    /// The cache key identifying this summary's logical request slot.
    pub fn cache_key(&self) -> String {
        cache_key(
            &self.summary_type,
            &self.query_params,
            self.date_range_start,
            self.date_range_end,
        )
    }

    /// Reconstruct the request that would produce this summary, used when
    /// recursively refreshing children of a composed summary.
    pub fn to_request(&self) -> SummaryRequest {
        SummaryRequest {
            summary_type: self.summary_type.clone(),
            hierarchy_level: self.hierarchy_level,
            category: self.category,
            source_type: self.source_type,
            source_ids: self.source_ids.clone(),
            source_summary_ids: self.source_summary_ids.clone(),
            query_params: self.query_params.clone(),
            date_range_start: self.date_range_start,
            date_range_end: self.date_range_end,
        }
    }
}

/// A directed edge in the summary hierarchy (child is summarized into parent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRelationship {
    pub parent_summary_id: Uuid,
    pub child_summary_id: Uuid,
    pub relationship_type: RelationshipType,
}

/// A request for a summary, identifying a unique cache slot plus the inputs
/// needed to (re)generate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub summary_type: String,
    pub hierarchy_level: HierarchyLevel,
    #[serde(default)]
    pub category: Option<Category>,
    pub source_type: SourceType,
    #[serde(default)]
    pub source_ids: Option<Vec<String>>,
    #[serde(default)]
    pub source_summary_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub query_params: serde_json::Value,
    #[serde(default)]
    pub date_range_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_range_end: Option<DateTime<Utc>>,
}

impl SummaryRequest {
    /// The cache key for this request.
    pub fn cache_key(&self) -> String {
        cache_key(
            &self.summary_type,
            &self.query_params,
            self.date_range_start,
            self.date_range_end,
        )
    }
}

/// Canonical text form of the `(summary_type, query_params, date_range)`
/// tuple. SQLite UNIQUE constraints treat NULLs as distinct, so this
/// materialized key carries the uniqueness invariant instead of the raw
/// columns.
pub fn cache_key(
    summary_type: &str,
    query_params: &serde_json::Value,
    date_range_start: Option<DateTime<Utc>>,
    date_range_end: Option<DateTime<Utc>>,
) -> String {
    let start = date_range_start.map_or_else(|| "-".to_string(), |dt| dt.timestamp().to_string());
    let end = date_range_end.map_or_else(|| "-".to_string(), |dt| dt.timestamp().to_string());
    format!(
        "{summary_type}|{}|{start}|{end}",
        canonical_json(query_params)
    )
}

/// Current content of a raw source record, as returned by a source data
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub content: serde_json::Value,
}

/// A node in a materialized hierarchy tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryNode {
    #[serde(flatten)]
    pub summary: Summary,
    pub children: Vec<ChildGroup>,
}

/// Children of a tree node, grouped by relationship type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildGroup {
    pub relationship_type: RelationshipType,
    pub nodes: Vec<SummaryNode>,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
