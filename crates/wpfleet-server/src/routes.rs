// ── Routes ──
//
// Handlers stay thin: parse, call the controller, render. Start, stop and
// delete answer once the command is accepted; completion shows up in the
// next list or on `/api/sites/changes`.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use wpfleet_api::{ApiSite, CommandAck, CreateSiteRequest, SiteChanges, SiteEnvelope, SiteList};
use wpfleet_core::{CoreError, Site, SiteId, Ticket};

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound for the change long-poll window.
pub const MAX_WAIT_SECS: u64 = 60;
const DEFAULT_WAIT_SECS: u64 = 25;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/version", get(version))
        .route("/api/sites", get(list_sites).post(create_site))
        .route("/api/sites/changes", get(site_changes))
        .route("/api/sites/{id}", get(get_site).delete(delete_site))
        .route("/api/sites/{id}/start", post(start_site))
        .route("/api/sites/{id}/stop", post(stop_site))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn wire(sites: &[Site]) -> Vec<ApiSite> {
    sites.iter().map(ApiSite::from).collect()
}

fn ack(message: String, ticket: &Ticket) -> Json<CommandAck> {
    Json(CommandAck {
        message: Some(message),
        site: Some(ApiSite::from(ticket.site())),
    })
}

// ── Service endpoints ───────────────────────────────────────────────

async fn root() -> Json<Value> {
    Json(json!({ "message": "wpfleet site API" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn version() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

// ── Sites ───────────────────────────────────────────────────────────

async fn list_sites(State(state): State<AppState>) -> Json<SiteList> {
    let (version, sites) = state.registry().list_versioned().await;
    Json(SiteList {
        sites: wire(&sites),
        version: Some(version),
    })
}

async fn create_site(
    State(state): State<AppState>,
    payload: Result<Json<CreateSiteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SiteEnvelope>), ApiError> {
    let Json(request) = payload.map_err(|e| CoreError::validation(e.body_text()))?;
    let ticket = state
        .controller()
        .create(&request.name, &request.description)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SiteEnvelope {
            message: Some("Site created successfully".into()),
            site: ApiSite::from(ticket.site()),
        }),
    ))
}

async fn get_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SiteEnvelope>, ApiError> {
    let site = state.registry().get(&SiteId::new(id)).await?;
    Ok(Json(SiteEnvelope {
        message: None,
        site: ApiSite::from(&site),
    }))
}

async fn start_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandAck>, ApiError> {
    let id = SiteId::new(id);
    let ticket = state.controller().start(&id).await?;
    let message = if ticket.is_pending() {
        format!("Site {id} start initiated")
    } else {
        format!("Site {id} is already running")
    };
    Ok(ack(message, &ticket))
}

async fn stop_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandAck>, ApiError> {
    let id = SiteId::new(id);
    let ticket = state.controller().stop(&id).await?;
    let message = if ticket.is_pending() {
        format!("Site {id} stop initiated")
    } else {
        format!("Site {id} is not running")
    };
    Ok(ack(message, &ticket))
}

async fn delete_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CommandAck>, ApiError> {
    let id = SiteId::new(id);
    let ticket = state.controller().delete(&id).await?;
    Ok(ack(format!("Site {id} deletion initiated"), &ticket))
}

// ── Change long-poll ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    #[serde(default)]
    since: u64,
    wait: Option<u64>,
}

async fn site_changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Json<SiteChanges> {
    let wait = query.wait.unwrap_or(DEFAULT_WAIT_SECS).min(MAX_WAIT_SECS);
    let (version, sites) = state
        .registry()
        .changes_until(
            query.since,
            Duration::from_secs(wait),
            state.stopping().cancelled(),
        )
        .await;
    Json(SiteChanges {
        version,
        sites: wire(&sites),
    })
}
