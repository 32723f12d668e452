use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use clap::{Args, Parser};
use log::info;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use smry_core::db::ListSummariesOptions;
use smry_core::hierarchy::TreeFilter;
use smry_core::models::{
    Category, HierarchyLevel, SourceType, Summary, SummaryNode, SummaryRequest,
};
use smry_core::{Config, Coordinator, Database, Error};

mod collaborators;

use collaborators::{HttpSourceProvider, HttpSummaryGenerator};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn try_main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config_path = cli
        .common
        .config
        .unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    let generator_endpoint = config
        .generator_endpoint
        .as_deref()
        .context("generator_endpoint is not set in the config file")?;
    let source_endpoint = config
        .source_endpoint
        .as_deref()
        .context("source_endpoint is not set in the config file")?;

    let db = Arc::new(Database::open(&config.database).await?);
    let sources = Arc::new(HttpSourceProvider::new(
        source_endpoint,
        config.generator_timeout_secs,
    )?);
    let generator = Arc::new(HttpSummaryGenerator::new(
        generator_endpoint,
        config.generator_timeout_secs,
    )?);
    let coordinator = Arc::new(
        Coordinator::new(db.clone(), sources, generator)
            .with_verify_ttl(config.verify_ttl.clone()),
    );

    let state = AppState {
        config: Arc::new(config),
        db,
        coordinator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/summary", get(get_summary))
        .route("/summaries", get(list_summaries))
        .route("/hierarchy", get(get_hierarchy))
        .route("/summary/{id}", delete(delete_summary))
        .route("/summary/{id}/invalidate", post(invalidate_summary))
        .route("/sources/{source_id}/invalidate", post(invalidate_source))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.common.port));
    info!("Starting API server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP API server for the summary cache")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,
}

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    db: Arc<Database>,
    coordinator: Arc<Coordinator>,
}

#[derive(Serialize)]
struct ApiError {
    error: String,
    kind: &'static str,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn error_response(err: Error) -> (StatusCode, Json<ApiError>) {
    let (status, kind) = match &err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::InputUnavailable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "input_unavailable"),
        Error::GenerationFailed(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
        Error::CycleDetected(_) => (StatusCode::CONFLICT, "cycle_detected"),
        Error::DuplicateEdge { .. } => (StatusCode::CONFLICT, "duplicate_edge"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ApiError {
            error: err.to_string(),
            kind,
        }),
    )
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: message.into(),
            kind: "bad_request",
        }),
    )
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json((*state.config).clone())
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    summary_type: String,
    hierarchy_level: String,
    category: Option<String>,
    source_type: Option<String>,
    /// Comma-separated record ids.
    source_ids: Option<String>,
    /// Comma-separated child summary ids.
    source_summary_ids: Option<String>,
    /// JSON-encoded query parameter object.
    query_params: Option<String>,
    date_range_start: Option<chrono::DateTime<chrono::Utc>>,
    date_range_end: Option<chrono::DateTime<chrono::Utc>>,
    force_regenerate: Option<bool>,
}

#[derive(Serialize)]
struct SummaryResponse {
    #[serde(flatten)]
    summary: Summary,
    was_regenerated: bool,
}

fn parse_request(params: &SummaryQuery) -> std::result::Result<SummaryRequest, (StatusCode, Json<ApiError>)> {
    let hierarchy_level = HierarchyLevel::parse(&params.hierarchy_level)
        .ok_or_else(|| bad_request(format!("unknown hierarchy_level '{}'", params.hierarchy_level)))?;
    let category = match &params.category {
        Some(raw) => Some(
            Category::parse(raw).ok_or_else(|| bad_request(format!("unknown category '{raw}'")))?,
        ),
        None => None,
    };
    let source_type = match params.source_type.as_deref() {
        Some(raw) => SourceType::parse(raw)
            .ok_or_else(|| bad_request(format!("unknown source_type '{raw}'")))?,
        None => SourceType::RawData,
    };
    let source_ids = params.source_ids.as_ref().map(|raw| {
        raw.split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>()
    });
    let source_summary_ids = match &params.source_summary_ids {
        Some(raw) => {
            let mut ids = Vec::new();
            for part in raw.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let id = Uuid::parse_str(part)
                    .map_err(|_| bad_request(format!("invalid summary id '{part}'")))?;
                ids.push(id);
            }
            Some(ids)
        }
        None => None,
    };
    let query_params = match &params.query_params {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| bad_request(format!("query_params is not valid JSON: {e}")))?,
        None => serde_json::Value::Null,
    };

    Ok(SummaryRequest {
        summary_type: params.summary_type.clone(),
        hierarchy_level,
        category,
        source_type,
        source_ids,
        source_summary_ids,
        query_params,
        date_range_start: params.date_range_start,
        date_range_end: params.date_range_end,
    })
}

async fn get_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryQuery>,
) -> ApiResult<SummaryResponse> {
    let request = parse_request(&params)?;
    let force = params.force_regenerate.unwrap_or(false);
    let (summary, was_regenerated) = state
        .coordinator
        .get_or_generate(&request, force)
        .await
        .map_err(error_response)?;
    Ok(Json(SummaryResponse {
        summary,
        was_regenerated,
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    summary_type: Option<String>,
    is_valid: Option<bool>,
    hierarchy_level: Option<String>,
    category: Option<String>,
    overlaps_start: Option<chrono::DateTime<chrono::Utc>>,
    overlaps_end: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<i64>,
}

async fn list_summaries(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Vec<Summary>> {
    let hierarchy_level = match params.hierarchy_level.as_deref() {
        Some(raw) => Some(
            HierarchyLevel::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown hierarchy_level '{raw}'")))?,
        ),
        None => None,
    };
    let category = match params.category.as_deref() {
        Some(raw) => Some(
            Category::parse(raw).ok_or_else(|| bad_request(format!("unknown category '{raw}'")))?,
        ),
        None => None,
    };

    let summaries = state
        .db
        .list_summaries(ListSummariesOptions {
            summary_type: params.summary_type,
            is_valid: params.is_valid,
            hierarchy_level,
            category,
            overlaps_start: params.overlaps_start,
            overlaps_end: params.overlaps_end,
            limit: params.limit,
        })
        .await
        .map_err(error_response)?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
struct HierarchyQuery {
    hierarchy_level: Option<String>,
    category: Option<String>,
}

async fn get_hierarchy(
    State(state): State<AppState>,
    Query(params): Query<HierarchyQuery>,
) -> ApiResult<Vec<SummaryNode>> {
    let hierarchy_level = match params.hierarchy_level.as_deref() {
        Some(raw) => Some(
            HierarchyLevel::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown hierarchy_level '{raw}'")))?,
        ),
        None => None,
    };
    let category = match params.category.as_deref() {
        Some(raw) => Some(
            Category::parse(raw).ok_or_else(|| bad_request(format!("unknown category '{raw}'")))?,
        ),
        None => None,
    };

    let forest = state
        .db
        .materialize_tree(&TreeFilter {
            hierarchy_level,
            category,
        })
        .await
        .map_err(error_response)?;
    Ok(Json(forest))
}

#[derive(Serialize)]
struct InvalidateResponse {
    invalidated: u64,
}

async fn invalidate_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<InvalidateResponse> {
    state.db.mark_invalid(id).await.map_err(error_response)?;
    Ok(Json(InvalidateResponse { invalidated: 1 }))
}

async fn invalidate_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<InvalidateResponse> {
    let invalidated = state
        .db
        .invalidate_by_source(&source_id)
        .await
        .map_err(error_response)?;
    Ok(Json(InvalidateResponse { invalidated }))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: Uuid,
}

async fn delete_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<DeleteResponse> {
    state.db.delete_summary(id).await.map_err(error_response)?;
    Ok(Json(DeleteResponse { deleted: id }))
}
