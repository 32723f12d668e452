//! Cache coordination: hit / stale / miss decisions and regeneration.
//!
//! The coordinator is the only writer of summary rows. Readers verify
//! freshness by recomputing the fingerprint over current source data;
//! regeneration happens under a per-key claim so the (expensive,
//! rate-limited) generator runs at most once per cache key at a time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::VerifyTtlConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::models::{RelationshipType, SourceRecord, SourceType, Summary, SummaryRequest};
use crate::providers::{ChildSummary, GeneratorSource, SourceProvider, SummaryGenerator};

/// Upper bound on recursive composition depth. The persisted-edge cycle
/// check rejects genuine cycles; this bounds pathological request chains.
const MAX_COMPOSE_DEPTH: usize = 8;

/// Per-cache-key claims. A claim is held for the duration of
/// fetch + generate + upsert and released on drop, including failure and
/// cancellation paths.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

/// Orchestrates summary lookup, staleness verification, and regeneration.
pub struct Coordinator {
    db: Arc<Database>,
    sources: Arc<dyn SourceProvider>,
    generator: Arc<dyn SummaryGenerator>,
    verify_ttl: VerifyTtlConfig,
    locks: KeyLocks,
}

impl Coordinator {
    pub fn new(
        db: Arc<Database>,
        sources: Arc<dyn SourceProvider>,
        generator: Arc<dyn SummaryGenerator>,
    ) -> Self {
        Self {
            db,
            sources,
            generator,
            verify_ttl: VerifyTtlConfig::default(),
            locks: KeyLocks::default(),
        }
    }

    /// Skip fingerprint re-verification for summaries verified within the
    /// given TTLs. The default (all zero) verifies on every read.
    pub fn with_verify_ttl(mut self, verify_ttl: VerifyTtlConfig) -> Self {
        self.verify_ttl = verify_ttl;
        self
    }

    /// Return the cached summary for this request, regenerating it first if
    /// it is missing, explicitly invalidated, or stale against current
    /// source data. The boolean reports whether the generator ran.
    pub async fn get_or_generate(
        &self,
        request: &SummaryRequest,
        force_regenerate: bool,
    ) -> Result<(Summary, bool)> {
        self.resolve(request.clone(), force_regenerate, 0).await
    }

    // Recursion through composed summaries requires boxing the future.
    fn resolve(
        &self,
        request: SummaryRequest,
        force_regenerate: bool,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(Summary, bool)>> + Send + '_>> {
        Box::pin(async move {
            if depth > MAX_COMPOSE_DEPTH {
                return Err(Error::CycleDetected(format!(
                    "composition depth exceeds {MAX_COMPOSE_DEPTH} resolving '{}'",
                    request.summary_type
                )));
            }

            let key = request.cache_key();

            // Freshness reads are cheap and never take the generation claim.
            if !force_regenerate {
                if let Some(existing) = self.db.get_summary_by_key(&key).await? {
                    if existing.is_valid {
                        if self.within_ttl(&existing) {
                            return Ok((existing, false));
                        }
                        if self.verify(&request, &existing).await? {
                            self.db.touch_verified(existing.id).await?;
                            tracing::debug!("summary {} verified fresh", existing.id);
                            return Ok((existing, false));
                        }
                        tracing::info!(
                            "summary {} stale for '{}', regenerating",
                            existing.id,
                            request.summary_type
                        );
                    } else {
                        // An explicitly invalidated summary is never served,
                        // whatever its fingerprint says.
                        tracing::info!(
                            "summary {} invalidated, regenerating",
                            existing.id
                        );
                    }
                }
            }

            let _claim = self.locks.acquire(&key).await;

            // Whoever held the claim may have refreshed this slot while we
            // waited; re-read before invoking the generator.
            if !force_regenerate {
                if let Some(existing) = self.db.get_summary_by_key(&key).await? {
                    if existing.is_valid
                        && (self.within_ttl(&existing) || self.verify(&request, &existing).await?)
                    {
                        return Ok((existing, false));
                    }
                }
            }

            let stored = self.generate(&request, depth).await?;
            Ok((stored, true))
        })
    }

    /// Recompute the fingerprint over current source data and compare it to
    /// the stored signature. No side effects beyond provider reads.
    async fn verify(&self, request: &SummaryRequest, existing: &Summary) -> Result<bool> {
        let current = match request.source_type {
            SourceType::RawData => {
                let records = self.fetch_raw(request).await?;
                fingerprint::fingerprint_sources(
                    request.source_ids.as_deref(),
                    &records,
                    &request.query_params,
                    request.date_range_start,
                    request.date_range_end,
                )?
            }
            SourceType::ExistingSummaries => {
                let child_ids = request
                    .source_summary_ids
                    .clone()
                    .or_else(|| existing.source_summary_ids.clone())
                    .unwrap_or_default();
                let pairs = self.child_signatures(&child_ids).await?;
                fingerprint::fingerprint_children(
                    &pairs,
                    &request.query_params,
                    request.date_range_start,
                    request.date_range_end,
                )
            }
        };
        Ok(current == existing.hash_signature)
    }

    /// The generation path. Runs with the per-key claim held; a failure at
    /// any point persists nothing, so a retry re-enters cleanly from MISS.
    async fn generate(&self, request: &SummaryRequest, depth: usize) -> Result<Summary> {
        let (generator_source, source_ids, source_summary_ids, hash_signature, children) =
            match request.source_type {
                SourceType::RawData => {
                    let records = self.fetch_raw(request).await?;
                    let hash_signature = fingerprint::fingerprint_sources(
                        request.source_ids.as_deref(),
                        &records,
                        &request.query_params,
                        request.date_range_start,
                        request.date_range_end,
                    )?;
                    // Store the effective id set, enumerated or explicit.
                    let mut ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
                    ids.sort();
                    (
                        GeneratorSource::Records { records },
                        Some(ids),
                        None,
                        hash_signature,
                        Vec::new(),
                    )
                }
                SourceType::ExistingSummaries => {
                    let children = self.resolve_children(request, depth).await?;
                    let pairs: Vec<(Uuid, String)> = children
                        .iter()
                        .map(|c| (c.id, c.hash_signature.clone()))
                        .collect();
                    let hash_signature = fingerprint::fingerprint_children(
                        &pairs,
                        &request.query_params,
                        request.date_range_start,
                        request.date_range_end,
                    );
                    let summaries = children
                        .iter()
                        .map(|c| ChildSummary {
                            id: c.id,
                            summary_type: c.summary_type.clone(),
                            summary: c.summary.clone(),
                            metadata: c.metadata.clone(),
                        })
                        .collect();
                    let ids = children.iter().map(|c| c.id).collect();
                    (
                        GeneratorSource::Summaries { summaries },
                        None,
                        Some(ids),
                        hash_signature,
                        children,
                    )
                }
            };

        let generated = self.generator.generate(request, &generator_source).await?;
        let now = Utc::now();

        let summary = Summary {
            id: Uuid::new_v4(),
            summary_type: request.summary_type.clone(),
            hierarchy_level: request.hierarchy_level,
            category: request.category,
            source_type: request.source_type,
            source_ids,
            source_summary_ids,
            query_params: request.query_params.clone(),
            date_range_start: request.date_range_start,
            date_range_end: request.date_range_end,
            summary: generated.text,
            metadata: generated.metadata,
            hash_signature,
            last_generated_at: now,
            last_verified_at: now,
            is_valid: true,
        };

        let stored = self.db.upsert_summary(&summary).await?;
        tracing::info!(
            "Generated summary {} for '{}'",
            stored.id,
            stored.summary_type
        );

        // Register parent -> child edges. Re-registering is a no-op.
        for child in &children {
            match self
                .db
                .add_relationship(stored.id, child.id, RelationshipType::Aggregation)
                .await
            {
                Ok(()) | Err(Error::DuplicateEdge { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(stored)
    }

    /// Refresh every child of a composed request, rejecting compositions
    /// that would close a persisted hierarchy cycle before recursing.
    async fn resolve_children(
        &self,
        request: &SummaryRequest,
        depth: usize,
    ) -> Result<Vec<Summary>> {
        let child_ids = request
            .source_summary_ids
            .clone()
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| {
                Error::InputUnavailable(format!(
                    "composed request '{}' carries no source_summary_ids",
                    request.summary_type
                ))
            })?;

        if let Some(parent) = self.db.get_summary_by_key(&request.cache_key()).await? {
            let graph = self.db.load_graph().await?;
            for child in &child_ids {
                if graph.would_cycle(parent.id, *child) {
                    return Err(Error::CycleDetected(format!(
                        "summary {child} is an ancestor of {}",
                        parent.id
                    )));
                }
            }
        }

        let mut refreshed = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            let child_row = self.db.get_summary(child_id).await?.ok_or_else(|| {
                Error::InputUnavailable(format!("child summary {child_id} not found"))
            })?;
            let (child, _) = self.resolve(child_row.to_request(), false, depth + 1).await?;
            refreshed.push(child);
        }
        Ok(refreshed)
    }

    async fn fetch_raw(&self, request: &SummaryRequest) -> Result<Vec<SourceRecord>> {
        match &request.source_ids {
            Some(ids) => self.sources.fetch_records(request.category, ids).await,
            None => {
                self.sources
                    .query_records(
                        request.category,
                        &request.query_params,
                        request.date_range_start,
                        request.date_range_end,
                    )
                    .await
            }
        }
    }

    async fn child_signatures(&self, child_ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
        let mut pairs = Vec::with_capacity(child_ids.len());
        for id in child_ids {
            let child = self.db.get_summary(*id).await?.ok_or_else(|| {
                Error::InputUnavailable(format!("child summary {id} missing"))
            })?;
            pairs.push((child.id, child.hash_signature));
        }
        Ok(pairs)
    }

    fn within_ttl(&self, summary: &Summary) -> bool {
        let ttl_secs = self.verify_ttl.for_level(summary.hierarchy_level);
        if ttl_secs == 0 {
            return false;
        }
        let ttl = chrono::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        Utc::now().signed_duration_since(summary.last_verified_at) < ttl
    }
}
