//! Database schema for smry.
//!
//! The schema is a single versioned baseline plus a forward-only migration
//! list. Each migration runs at most once, tracked in `schema_migrations`.

/// SQL schema for the schema migrations tracking table.
pub const SCHEMA: &str = r#"
-- Schema migration tracking table
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);
"#;

/// A forward-only schema migration.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Ordered migration list. Append-only: never edit an applied migration.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "baseline",
    sql: r#"
CREATE TABLE summaries (
    id TEXT PRIMARY KEY,
    summary_type TEXT NOT NULL,
    hierarchy_level TEXT NOT NULL
        CHECK (hierarchy_level IN ('individual', 'group', 'global')),
    category TEXT
        CHECK (category IN ('zendesk', 'jira', 'salesforce', 'system')),
    source_type TEXT NOT NULL
        CHECK (source_type IN ('raw_data', 'existing_summaries')),
    source_ids JSON,
    source_summary_ids JSON,
    query_params JSON NOT NULL DEFAULT '{}',
    date_range_start INTEGER,
    date_range_end INTEGER,
    summary TEXT NOT NULL,
    metadata JSON NOT NULL DEFAULT '{}',
    hash_signature TEXT NOT NULL,
    last_generated_at INTEGER NOT NULL,
    last_verified_at INTEGER NOT NULL,
    is_valid INTEGER NOT NULL DEFAULT 1,
    -- Canonical (summary_type, query_params, date_range) tuple. SQLite UNIQUE
    -- treats NULL date bounds as distinct, so uniqueness lives here.
    cache_key TEXT NOT NULL UNIQUE
);

CREATE INDEX idx_summaries_type ON summaries (summary_type);
CREATE INDEX idx_summaries_type_range
    ON summaries (summary_type, date_range_start, date_range_end);
CREATE INDEX idx_summaries_valid ON summaries (is_valid);
CREATE INDEX idx_summaries_level ON summaries (hierarchy_level);
CREATE INDEX idx_summaries_category ON summaries (category);

CREATE TABLE summary_relationships (
    parent_summary_id TEXT NOT NULL
        REFERENCES summaries (id) ON DELETE CASCADE,
    child_summary_id TEXT NOT NULL
        REFERENCES summaries (id) ON DELETE CASCADE,
    relationship_type TEXT NOT NULL
        CHECK (relationship_type IN ('aggregation', 'time_period', 'subset')),
    PRIMARY KEY (parent_summary_id, child_summary_id)
);

CREATE INDEX idx_relationships_child ON summary_relationships (child_summary_id);

-- Source-id set membership (SQLite has no GIN index over JSON arrays).
CREATE TABLE summary_sources (
    summary_id TEXT NOT NULL
        REFERENCES summaries (id) ON DELETE CASCADE,
    source_id TEXT NOT NULL,
    PRIMARY KEY (summary_id, source_id)
);

CREATE INDEX idx_summary_sources_source ON summary_sources (source_id);
"#,
}];
