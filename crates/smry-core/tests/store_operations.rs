//! Integration tests for summary store operations.

use chrono::{Duration, Utc};
use smry_core::Database;
use smry_core::db::ListSummariesOptions;
use smry_core::error::Error;
use smry_core::hierarchy::TreeFilter;
use smry_core::models::{
    Category, HierarchyLevel, RelationshipType, SourceType, Summary,
};
use uuid::Uuid;

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("smry-test-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

fn ticket_summary(summary_type: &str, params: serde_json::Value) -> Summary {
    let now = Utc::now();
    Summary {
        id: Uuid::new_v4(),
        summary_type: summary_type.to_string(),
        hierarchy_level: HierarchyLevel::Individual,
        category: Some(Category::Zendesk),
        source_type: SourceType::RawData,
        source_ids: Some(vec!["1001".to_string()]),
        source_summary_ids: None,
        query_params: params,
        date_range_start: None,
        date_range_end: None,
        summary: "Customer reports login failures.".to_string(),
        metadata: serde_json::json!({"status": "Open"}),
        hash_signature: "sig-1".to_string(),
        last_generated_at: now,
        last_verified_at: now,
        is_valid: true,
    }
}

// ============================================================================
// Upsert & Key Uniqueness
// ============================================================================

#[tokio::test]
async fn upsert_creates_new_summary() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let summary = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    let stored = db.upsert_summary(&summary).await.expect("upsert");

    assert_eq!(stored.id, summary.id);
    assert_eq!(stored.summary, summary.summary);
    assert_eq!(stored.source_ids, summary.source_ids);
    assert!(stored.is_valid);
    assert_eq!(db.count_summaries().await.expect("count"), 1);
}

#[tokio::test]
async fn upsert_same_key_updates_in_place() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let v1 = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    let stored_v1 = db.upsert_summary(&v1).await.expect("upsert v1");

    let mut v2 = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    v2.summary = "Updated text".to_string();
    v2.hash_signature = "sig-2".to_string();
    let stored_v2 = db.upsert_summary(&v2).await.expect("upsert v2");

    // Same cache key: one row, original id preserved.
    assert_eq!(db.count_summaries().await.expect("count"), 1);
    assert_eq!(stored_v2.id, stored_v1.id);
    assert_eq!(stored_v2.summary, "Updated text");
    assert_eq!(stored_v2.hash_signature, "sig-2");
}

#[tokio::test]
async fn upsert_with_null_date_range_is_still_unique() {
    // SQLite UNIQUE treats NULLs as distinct; the materialized cache_key
    // column must not.
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let a = ticket_summary("ticket", serde_json::json!({"ticket_id": "7"}));
    let b = ticket_summary("ticket", serde_json::json!({"ticket_id": "7"}));
    db.upsert_summary(&a).await.expect("upsert a");
    db.upsert_summary(&b).await.expect("upsert b");

    assert_eq!(db.count_summaries().await.expect("count"), 1);
}

#[tokio::test]
async fn different_query_params_occupy_different_slots() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    db.upsert_summary(&ticket_summary(
        "ticket",
        serde_json::json!({"ticket_id": "1"}),
    ))
    .await
    .expect("upsert");
    db.upsert_summary(&ticket_summary(
        "ticket",
        serde_json::json!({"ticket_id": "2"}),
    ))
    .await
    .expect("upsert");

    assert_eq!(db.count_summaries().await.expect("count"), 2);
}

#[tokio::test]
async fn get_summary_by_key_finds_slot() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let summary = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    db.upsert_summary(&summary).await.expect("upsert");

    let fetched = db
        .get_summary_by_key(&summary.cache_key())
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(fetched.id, summary.id);

    let missing = db
        .get_summary_by_key("ticket|{\"ticket_id\":\"9999\"}|-|-")
        .await
        .expect("get");
    assert!(missing.is_none());
}

// ============================================================================
// Validity & Verification
// ============================================================================

#[tokio::test]
async fn mark_invalid_retires_summary() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let summary = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    let stored = db.upsert_summary(&summary).await.expect("upsert");

    db.mark_invalid(stored.id).await.expect("mark invalid");

    let fetched = db
        .get_summary(stored.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(!fetched.is_valid);
}

#[tokio::test]
async fn mark_invalid_missing_summary_is_not_found() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let err = db.mark_invalid(Uuid::new_v4()).await.expect_err("missing");
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn touch_verified_updates_timestamp_without_content() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let mut summary = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    summary.last_verified_at = Utc::now() - Duration::hours(2);
    let stored = db.upsert_summary(&summary).await.expect("upsert");

    db.touch_verified(stored.id).await.expect("touch");

    let fetched = db
        .get_summary(stored.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(fetched.last_verified_at > stored.last_verified_at);
    assert_eq!(fetched.summary, stored.summary);
    assert_eq!(fetched.hash_signature, stored.hash_signature);
}

// ============================================================================
// Listing & Source Membership
// ============================================================================

#[tokio::test]
async fn list_summaries_with_filters() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let mut individual = ticket_summary("ticket", serde_json::json!({"ticket_id": "1"}));
    individual.source_ids = Some(vec!["1".to_string()]);
    db.upsert_summary(&individual).await.expect("upsert");

    let mut group = ticket_summary("multi_ticket", serde_json::json!({"status": "Open"}));
    group.hierarchy_level = HierarchyLevel::Group;
    group.category = Some(Category::Jira);
    group.is_valid = false;
    db.upsert_summary(&group).await.expect("upsert");

    let by_type = db
        .list_summaries(ListSummariesOptions {
            summary_type: Some("ticket".to_string()),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].summary_type, "ticket");

    let valid_only = db
        .list_summaries(ListSummariesOptions {
            is_valid: Some(true),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(valid_only.len(), 1);

    let groups = db
        .list_summaries(ListSummariesOptions {
            hierarchy_level: Some(HierarchyLevel::Group),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(groups.len(), 1);

    let jira = db
        .list_summaries(ListSummariesOptions {
            category: Some(Category::Jira),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(jira.len(), 1);
}

#[tokio::test]
async fn list_summaries_by_date_overlap() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let now = Utc::now();

    let mut january = ticket_summary("multi_ticket", serde_json::json!({"month": "jan"}));
    january.date_range_start = Some(now - Duration::days(60));
    january.date_range_end = Some(now - Duration::days(30));
    db.upsert_summary(&january).await.expect("upsert");

    let mut recent = ticket_summary("multi_ticket", serde_json::json!({"month": "now"}));
    recent.date_range_start = Some(now - Duration::days(7));
    recent.date_range_end = Some(now);
    db.upsert_summary(&recent).await.expect("upsert");

    let overlapping = db
        .list_summaries(ListSummariesOptions {
            overlaps_start: Some(now - Duration::days(10)),
            overlaps_end: Some(now),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(overlapping.len(), 1);
    assert_eq!(overlapping[0].query_params["month"], "now");
}

#[tokio::test]
async fn find_and_invalidate_by_source_membership() {
    let db = Database::open(&temp_db_path()).await.expect("open db");

    let mut with_1001 = ticket_summary("multi_ticket", serde_json::json!({"status": "Open"}));
    with_1001.source_ids = Some(vec!["1001".to_string(), "1002".to_string()]);
    db.upsert_summary(&with_1001).await.expect("upsert");

    let mut without = ticket_summary("multi_ticket", serde_json::json!({"status": "Closed"}));
    without.source_ids = Some(vec!["2001".to_string()]);
    db.upsert_summary(&without).await.expect("upsert");

    let containing = db.find_by_source_id("1001").await.expect("find");
    assert_eq!(containing.len(), 1);

    let invalidated = db.invalidate_by_source("1001").await.expect("invalidate");
    assert_eq!(invalidated, 1);

    let still_valid = db
        .list_summaries(ListSummariesOptions {
            is_valid: Some(true),
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(still_valid.len(), 1);
    assert_eq!(still_valid[0].query_params["status"], "Closed");

    // Idempotent: nothing valid left to invalidate.
    let again = db.invalidate_by_source("1001").await.expect("invalidate");
    assert_eq!(again, 0);
}

// ============================================================================
// Relationships
// ============================================================================

async fn stored_pair(db: &Database) -> (Summary, Summary) {
    let mut parent = ticket_summary("multi_ticket", serde_json::json!({"status": "Open"}));
    parent.hierarchy_level = HierarchyLevel::Group;
    parent.source_type = SourceType::ExistingSummaries;
    parent.source_ids = None;
    let parent = db.upsert_summary(&parent).await.expect("upsert parent");

    let child = ticket_summary("ticket", serde_json::json!({"ticket_id": "1001"}));
    let child = db.upsert_summary(&child).await.expect("upsert child");
    (parent, child)
}

#[tokio::test]
async fn add_relationship_links_parent_and_child() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let (parent, child) = stored_pair(&db).await;

    db.add_relationship(parent.id, child.id, RelationshipType::Aggregation)
        .await
        .expect("add edge");

    let children = db.children_of(parent.id).await.expect("children");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, child.id);

    let ancestors = db.ancestors_of(child.id).await.expect("ancestors");
    assert_eq!(ancestors.len(), 1);
    assert_eq!(ancestors[0].id, parent.id);
}

#[tokio::test]
async fn add_relationship_rejects_duplicate_edge() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let (parent, child) = stored_pair(&db).await;

    db.add_relationship(parent.id, child.id, RelationshipType::Aggregation)
        .await
        .expect("add edge");
    let err = db
        .add_relationship(parent.id, child.id, RelationshipType::Aggregation)
        .await
        .expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateEdge { .. }));
}

#[tokio::test]
async fn add_relationship_rejects_cycle() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let (parent, child) = stored_pair(&db).await;

    db.add_relationship(parent.id, child.id, RelationshipType::Aggregation)
        .await
        .expect("add edge");
    let err = db
        .add_relationship(child.id, parent.id, RelationshipType::Aggregation)
        .await
        .expect_err("cycle");
    assert!(matches!(err, Error::CycleDetected(_)));

    // The failed edge must not have been written.
    assert!(db.children_of(child.id).await.expect("children").is_empty());
}

#[tokio::test]
async fn delete_summary_cascades_relationships() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let (parent, child) = stored_pair(&db).await;

    let mut other = ticket_summary("ticket", serde_json::json!({"ticket_id": "1002"}));
    other.source_ids = Some(vec!["1002".to_string()]);
    let other = db.upsert_summary(&other).await.expect("upsert other");

    db.add_relationship(parent.id, child.id, RelationshipType::Aggregation)
        .await
        .expect("edge 1");
    db.add_relationship(parent.id, other.id, RelationshipType::Aggregation)
        .await
        .expect("edge 2");

    db.delete_summary(child.id).await.expect("delete");

    assert!(db.get_summary(child.id).await.expect("get").is_none());
    // Edges referencing the deleted child are gone, unrelated edges remain.
    let edges = db.list_relationships().await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].child_summary_id, other.id);
    // Source membership rows cascade too.
    assert!(db.find_by_source_id("1001").await.expect("find").is_empty());
}

#[tokio::test]
async fn delete_missing_summary_is_not_found() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let err = db
        .delete_summary(Uuid::new_v4())
        .await
        .expect_err("missing");
    assert!(matches!(err, Error::NotFound(_)));
}

// ============================================================================
// Tree Materialization
// ============================================================================

#[tokio::test]
async fn materialize_tree_builds_forest_from_store() {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    let (parent, child) = stored_pair(&db).await;

    db.add_relationship(parent.id, child.id, RelationshipType::Aggregation)
        .await
        .expect("edge");

    let forest = db
        .materialize_tree(&TreeFilter::default())
        .await
        .expect("tree");
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].summary.id, parent.id);
    assert_eq!(forest[0].children.len(), 1);
    assert_eq!(forest[0].children[0].nodes[0].summary.id, child.id);
}

// ============================================================================
// Database Lifecycle
// ============================================================================

#[tokio::test]
async fn database_creates_parent_directories() {
    let mut path = std::env::temp_dir();
    path.push(format!("smry-nested/{}/test.db", Uuid::new_v4()));

    let db = Database::open(&path).await.expect("open");
    assert!(path.exists());
    db.close().await;
}

#[tokio::test]
async fn reopen_does_not_reapply_migrations() {
    let path = temp_db_path();
    {
        let db = Database::open(&path).await.expect("open");
        db.upsert_summary(&ticket_summary(
            "ticket",
            serde_json::json!({"ticket_id": "1"}),
        ))
        .await
        .expect("upsert");
        db.close().await;
    }

    let db = Database::open(&path).await.expect("reopen");
    assert_eq!(db.count_summaries().await.expect("count"), 1);
}
