//! Database operations for smry.

use crate::error::{Error, Result};
use crate::hierarchy::{self, HierarchyGraph, TreeFilter};
use crate::models::*;
use crate::schema::{MIGRATIONS, SCHEMA};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Database handle for smry.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema and apply pending migrations.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        for migration in MIGRATIONS {
            let applied: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?")
                    .bind(migration.version)
                    .fetch_optional(&self.pool)
                    .await?;
            if applied.is_some() {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(migration.version)
                .bind(migration.name)
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(
                "Applied schema migration {} ({})",
                migration.version,
                migration.name
            );
        }
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Summaries
    // =========================================================================

    /// Insert a summary or, on cache-key collision, update the existing row
    /// in place. A single conflict-aware statement, so two concurrent
    /// regenerations of the same key can never leave duplicate rows.
    ///
    /// Returns the stored row; on collision the original id is kept.
    pub async fn upsert_summary(&self, summary: &Summary) -> Result<Summary> {
        let cache_key = summary.cache_key();
        let source_ids_json = match &summary.source_ids {
            Some(ids) => Some(serde_json::to_string(ids)?),
            None => None,
        };
        let source_summary_ids_json = match &summary.source_summary_ids {
            Some(ids) => Some(serde_json::to_string(ids)?),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO summaries (
                id, summary_type, hierarchy_level, category, source_type,
                source_ids, source_summary_ids, query_params,
                date_range_start, date_range_end, summary, metadata,
                hash_signature, last_generated_at, last_verified_at,
                is_valid, cache_key
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                hierarchy_level = excluded.hierarchy_level,
                category = excluded.category,
                source_type = excluded.source_type,
                source_ids = excluded.source_ids,
                source_summary_ids = excluded.source_summary_ids,
                summary = excluded.summary,
                metadata = excluded.metadata,
                hash_signature = excluded.hash_signature,
                last_generated_at = excluded.last_generated_at,
                last_verified_at = excluded.last_verified_at,
                is_valid = excluded.is_valid
            "#,
        )
        .bind(summary.id.to_string())
        .bind(&summary.summary_type)
        .bind(summary.hierarchy_level.to_string())
        .bind(summary.category.map(|c| c.to_string()))
        .bind(summary.source_type.to_string())
        .bind(&source_ids_json)
        .bind(&source_summary_ids_json)
        .bind(summary.query_params.to_string())
        .bind(summary.date_range_start.map(|dt| dt.timestamp()))
        .bind(summary.date_range_end.map(|dt| dt.timestamp()))
        .bind(&summary.summary)
        .bind(summary.metadata.to_string())
        .bind(&summary.hash_signature)
        .bind(summary.last_generated_at.timestamp())
        .bind(summary.last_verified_at.timestamp())
        .bind(summary.is_valid)
        .bind(&cache_key)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM summaries WHERE cache_key = ?")
            .bind(&cache_key)
            .fetch_one(&mut *tx)
            .await?;
        let stored = summary_from_row(&row)?;

        // Keep the source-membership side table in step with source_ids.
        sqlx::query("DELETE FROM summary_sources WHERE summary_id = ?")
            .bind(stored.id.to_string())
            .execute(&mut *tx)
            .await?;
        if let Some(ids) = &stored.source_ids {
            for source_id in ids {
                sqlx::query(
                    "INSERT OR IGNORE INTO summary_sources (summary_id, source_id) VALUES (?, ?)",
                )
                .bind(stored.id.to_string())
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(stored)
    }

    /// Get a summary by id.
    pub async fn get_summary(&self, id: Uuid) -> Result<Option<Summary>> {
        let row = sqlx::query("SELECT * FROM summaries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(summary_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Look up the summary occupying a cache-key slot.
    pub async fn get_summary_by_key(&self, cache_key: &str) -> Result<Option<Summary>> {
        let row = sqlx::query("SELECT * FROM summaries WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(summary_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Mark a summary as known-stale. It will not be served until
    /// regenerated.
    pub async fn mark_invalid(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE summaries SET is_valid = 0, last_verified_at = ? WHERE id = ?")
                .bind(Utc::now().timestamp())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("summary '{id}'")));
        }
        Ok(())
    }

    /// Record a freshness check that confirmed no change. Content untouched.
    pub async fn touch_verified(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE summaries SET last_verified_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("summary '{id}'")));
        }
        Ok(())
    }

    /// Delete a summary. Relationship edges and source-membership rows on
    /// either side cascade with it.
    pub async fn delete_summary(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM summaries WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("summary '{id}'")));
        }
        Ok(())
    }

    /// List summaries with optional filters.
    pub async fn list_summaries(&self, opts: ListSummariesOptions) -> Result<Vec<Summary>> {
        let mut sql = String::from("SELECT * FROM summaries WHERE 1=1");

        if opts.summary_type.is_some() {
            sql.push_str(" AND summary_type = ?");
        }
        if opts.is_valid.is_some() {
            sql.push_str(" AND is_valid = ?");
        }
        if opts.hierarchy_level.is_some() {
            sql.push_str(" AND hierarchy_level = ?");
        }
        if opts.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        // Date-range overlap: NULL bounds are treated as unbounded.
        if opts.overlaps_start.is_some() {
            sql.push_str(" AND (date_range_end IS NULL OR date_range_end >= ?)");
        }
        if opts.overlaps_end.is_some() {
            sql.push_str(" AND (date_range_start IS NULL OR date_range_start <= ?)");
        }

        sql.push_str(" ORDER BY last_generated_at DESC");

        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);

        if let Some(ref summary_type) = opts.summary_type {
            query = query.bind(summary_type);
        }
        if let Some(is_valid) = opts.is_valid {
            query = query.bind(is_valid);
        }
        if let Some(level) = opts.hierarchy_level {
            query = query.bind(level.to_string());
        }
        if let Some(category) = opts.category {
            query = query.bind(category.to_string());
        }
        if let Some(start) = opts.overlaps_start {
            query = query.bind(start.timestamp());
        }
        if let Some(end) = opts.overlaps_end {
            query = query.bind(end.timestamp());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(summary_from_row(&row)?);
        }
        Ok(summaries)
    }

    /// Get summary count.
    pub async fn count_summaries(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM summaries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Find every summary whose source set contains a given record id.
    pub async fn find_by_source_id(&self, source_id: &str) -> Result<Vec<Summary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*
            FROM summaries s
            JOIN summary_sources ss ON ss.summary_id = s.id
            WHERE ss.source_id = ?
            ORDER BY s.last_generated_at DESC
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(summary_from_row(&row)?);
        }
        Ok(summaries)
    }

    /// Bulk-invalidate every valid summary whose source set contains the
    /// given record id. Returns the number of summaries invalidated.
    pub async fn invalidate_by_source(&self, source_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE summaries
            SET is_valid = 0, last_verified_at = ?
            WHERE is_valid = 1
            AND id IN (SELECT summary_id FROM summary_sources WHERE source_id = ?)
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        let invalidated = result.rows_affected();
        if invalidated > 0 {
            tracing::info!("Invalidated {invalidated} summaries containing source {source_id}");
        }
        Ok(invalidated)
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Add a parent -> child hierarchy edge.
    ///
    /// Fails with `CycleDetected` if the edge would make the parent its own
    /// ancestor (checked before any write) and `DuplicateEdge` if the pair
    /// already exists.
    pub async fn add_relationship(
        &self,
        parent: Uuid,
        child: Uuid,
        relationship_type: RelationshipType,
    ) -> Result<()> {
        let graph = self.load_graph().await?;
        if graph.would_cycle(parent, child) {
            return Err(Error::CycleDetected(format!(
                "edge {parent} -> {child} would make {parent} its own ancestor"
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO summary_relationships (
                parent_summary_id, child_summary_id, relationship_type
            ) VALUES (?, ?, ?)
            ON CONFLICT(parent_summary_id, child_summary_id) DO NOTHING
            "#,
        )
        .bind(parent.to_string())
        .bind(child.to_string())
        .bind(relationship_type.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::DuplicateEdge { parent, child });
        }
        Ok(())
    }

    /// All relationship edges.
    pub async fn list_relationships(&self) -> Result<Vec<SummaryRelationship>> {
        let rows = sqlx::query(
            "SELECT * FROM summary_relationships ORDER BY parent_summary_id, child_summary_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(relationship_from_row(&row)?);
        }
        Ok(edges)
    }

    /// Direct children of a summary.
    pub async fn children_of(&self, parent: Uuid) -> Result<Vec<Summary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*
            FROM summaries s
            JOIN summary_relationships r ON r.child_summary_id = s.id
            WHERE r.parent_summary_id = ?
            ORDER BY s.id
            "#,
        )
        .bind(parent.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(summary_from_row(&row)?);
        }
        Ok(summaries)
    }

    /// Ancestors of a summary, from immediate parents up to the roots.
    pub async fn ancestors_of(&self, child: Uuid) -> Result<Vec<Summary>> {
        let graph = self.load_graph().await?;
        let mut out = Vec::new();
        for id in graph.ancestors(child) {
            if let Some(summary) = self.get_summary(id).await? {
                out.push(summary);
            }
        }
        Ok(out)
    }

    /// Load the full hierarchy graph into memory.
    pub async fn load_graph(&self) -> Result<HierarchyGraph> {
        let edges = self.list_relationships().await?;
        Ok(HierarchyGraph::from_edges(&edges))
    }

    /// Materialize the hierarchy as a forest of trees.
    pub async fn materialize_tree(&self, filter: &TreeFilter) -> Result<Vec<SummaryNode>> {
        let summaries = self.list_summaries(ListSummariesOptions::default()).await?;
        let edges = self.list_relationships().await?;
        Ok(hierarchy::materialize_tree(&summaries, &edges, filter))
    }
}

/// Filters for listing summaries.
#[derive(Debug, Clone, Default)]
pub struct ListSummariesOptions {
    pub summary_type: Option<String>,
    pub is_valid: Option<bool>,
    pub hierarchy_level: Option<HierarchyLevel>,
    pub category: Option<Category>,
    pub overlaps_start: Option<chrono::DateTime<Utc>>,
    pub overlaps_end: Option<chrono::DateTime<Utc>>,
    pub limit: Option<i64>,
}

fn summary_from_row(row: &SqliteRow) -> Result<Summary> {
    let level_text: String = row.get("hierarchy_level");
    let hierarchy_level = HierarchyLevel::parse(&level_text)
        .ok_or_else(|| Error::Other(format!("invalid hierarchy_level '{level_text}'")))?;

    let category = row
        .get::<Option<String>, _>("category")
        .map(|text| {
            Category::parse(&text).ok_or_else(|| Error::Other(format!("invalid category '{text}'")))
        })
        .transpose()?;

    let source_type_text: String = row.get("source_type");
    let source_type = SourceType::parse(&source_type_text)
        .ok_or_else(|| Error::Other(format!("invalid source_type '{source_type_text}'")))?;

    let source_ids = row
        .get::<Option<String>, _>("source_ids")
        .map(|s| serde_json::from_str::<Vec<String>>(&s))
        .transpose()?;
    let source_summary_ids = row
        .get::<Option<String>, _>("source_summary_ids")
        .map(|s| serde_json::from_str::<Vec<Uuid>>(&s))
        .transpose()?;

    Ok(Summary {
        id: Uuid::parse_str(row.get::<&str, _>("id")).unwrap_or_default(),
        summary_type: row.get("summary_type"),
        hierarchy_level,
        category,
        source_type,
        source_ids,
        source_summary_ids,
        query_params: row
            .get::<Option<String>, _>("query_params")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        date_range_start: row
            .get::<Option<i64>, _>("date_range_start")
            .map(timestamp_utc),
        date_range_end: row
            .get::<Option<i64>, _>("date_range_end")
            .map(timestamp_utc),
        summary: row.get("summary"),
        metadata: row
            .get::<Option<String>, _>("metadata")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        hash_signature: row.get("hash_signature"),
        last_generated_at: timestamp_utc(row.get("last_generated_at")),
        last_verified_at: timestamp_utc(row.get("last_verified_at")),
        is_valid: row.get("is_valid"),
    })
}

fn relationship_from_row(row: &SqliteRow) -> Result<SummaryRelationship> {
    let type_text: String = row.get("relationship_type");
    let relationship_type = RelationshipType::parse(&type_text)
        .ok_or_else(|| Error::Other(format!("invalid relationship_type '{type_text}'")))?;

    Ok(SummaryRelationship {
        parent_summary_id: Uuid::parse_str(row.get::<&str, _>("parent_summary_id"))
            .unwrap_or_default(),
        child_summary_id: Uuid::parse_str(row.get::<&str, _>("child_summary_id"))
            .unwrap_or_default(),
        relationship_type,
    })
}

fn timestamp_utc(ts: i64) -> chrono::DateTime<Utc> {
    chrono::DateTime::from_timestamp(ts, 0)
        .unwrap_or_default()
        .with_timezone(&Utc)
}
