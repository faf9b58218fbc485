use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use utoipa::OpenApi;

use crate::auth::{validate_sync_token, ClinicIdentity};
use crate::claims::{parse_lead_id, ClaimCoordinator, PROFILE_CLINIC_NAME};
use crate::config::Config;
use crate::errors::AppError;
use crate::ingestion::{IngestionReport, Ingestor};
use crate::models::{
    Clinic, ClinicUpdate, ClaimRequest, ClaimResponse, DashboardStats, LeadFilter, LeadListQuery,
    LeadMetadata, LeadTier, LeadView, ReservationResponse,
};
use crate::openapi::ApiDoc;
use crate::store::LeadStore;

/// Shared state for every handler.
pub struct AppState {
    pub store: Arc<dyn LeadStore>,
    pub config: Config,
    pub ingestor: Arc<Ingestor>,
    pub claims: ClaimCoordinator,
}

impl AppState {
    pub fn new(store: Arc<dyn LeadStore>, config: Config, ingestor: Arc<Ingestor>) -> Self {
        let claims = ClaimCoordinator::new(store.clone(), config.lock_ttl());
        Self {
            store,
            config,
            ingestor,
            claims,
        }
    }
}

/// Every route except `/health`. Callers add rate limiting and state.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.json", get(serve_openapi_spec))
        .route("/api/v1/sync", post(sync_feed).get(sync_feed))
        .route("/api/v1/leads", get(list_leads))
        .route("/api/v1/leads/:id", get(get_lead))
        .route("/api/v1/leads/:id/metadata", get(get_lead_metadata))
        .route(
            "/api/v1/leads/:id/reserve",
            post(reserve_lead).delete(release_lead),
        )
        .route("/api/v1/claim-lead", post(claim_lead))
        .route("/api/v1/profile", get(get_profile).put(update_profile))
        .route("/api/v1/stats", get(get_stats))
}

/// Full application router without rate limiting.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// GET /health
///
/// Liveness probe. Does not touch the database.
#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-marketplace-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/sync
///
/// Runs one ingestion cycle right away and returns its report. Also answers
/// GET for older schedulers that only issue GETs.
#[utoipa::path(
    post,
    path = "/api/v1/sync",
    responses(
        (status = 200, description = "Cycle finished", body = IngestionReport),
        (status = 401, description = "Bad or missing X-Sync-Token"),
        (status = 502, description = "Feed unavailable")
    )
)]
pub async fn sync_feed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<IngestionReport>, AppError> {
    validate_sync_token(&headers, state.config.sync_trigger_token.as_deref())?;

    tracing::info!("Manual sync requested");
    let report = state.ingestor.run_cycle().await?;

    Ok(Json(report))
}

/// `None` means "my-leads" for a clinic that has no record yet.
fn parse_filter(
    raw: Option<&str>,
    viewer: Option<uuid::Uuid>,
) -> Result<Option<LeadFilter>, AppError> {
    match raw.map(str::trim).unwrap_or("all") {
        "" | "all" => Ok(Some(LeadFilter::All)),
        "my-leads" => Ok(viewer.map(LeadFilter::ClaimedBy)),
        tier => Ok(Some(LeadFilter::Tier(tier.parse::<LeadTier>()?))),
    }
}

/// GET /api/v1/leads?filter=all|warm|hot|platinum|my-leads
///
/// Newest first. Contact fields are masked except on leads the caller bought.
#[utoipa::path(
    get,
    path = "/api/v1/leads",
    params(("filter" = Option<String>, Query, description = "all, warm, hot, platinum or my-leads")),
    responses((status = 200, body = [LeadView], description = "OK"), (status = 401, description = "Missing or invalid identity"))
)]
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Query(query): Query<LeadListQuery>,
) -> Result<Json<Vec<LeadView>>, AppError> {
    let viewer = state.claims.viewer_id(&identity).await?;

    // A clinic with no record yet cannot own any leads.
    let Some(filter) = parse_filter(query.filter.as_deref(), viewer)? else {
        return Ok(Json(Vec::new()));
    };

    let now = Utc::now();
    let leads = state
        .store
        .list_leads(filter)
        .await?
        .iter()
        .map(|record| LeadView::for_viewer(record, viewer, now))
        .collect::<Vec<_>>();

    tracing::debug!("Listed {} leads for {}", leads.len(), identity.external_id);
    Ok(Json(leads))
}

/// GET /api/v1/leads/:id
#[utoipa::path(
    get,
    path = "/api/v1/leads/{id}",
    params(("id" = String, Path, description = "Lead id")),
    responses((status = 200, body = LeadView, description = "OK"), (status = 404, description = "Lead not found"))
)]
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Path(id): Path<String>,
) -> Result<Json<LeadView>, AppError> {
    let lead_id = parse_lead_id(&id)?;
    let viewer = state.claims.viewer_id(&identity).await?;

    let record = state
        .store
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;

    Ok(Json(LeadView::for_viewer(&record, viewer, Utc::now())))
}

/// GET /api/v1/leads/:id/metadata
///
/// Private call transcript and summary. Only the clinic holding the claim.
#[utoipa::path(
    get,
    path = "/api/v1/leads/{id}/metadata",
    params(("id" = String, Path, description = "Lead id")),
    responses((status = 200, body = LeadMetadata, description = "OK"), (status = 403, description = "Lead belongs to another clinic"), (status = 404, description = "Lead not found"))
)]
pub async fn get_lead_metadata(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Path(id): Path<String>,
) -> Result<Json<LeadMetadata>, AppError> {
    let lead_id = parse_lead_id(&id)?;
    let viewer = state.claims.viewer_id(&identity).await?;

    let record = state
        .store
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;

    if viewer.is_none() || record.owner() != viewer {
        return Err(AppError::Forbidden(
            "Call details are only available to the clinic that claimed this lead".to_string(),
        ));
    }

    let metadata = state
        .store
        .lead_metadata(lead_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Lead metadata not found".to_string()))?;

    Ok(Json(metadata))
}

/// POST /api/v1/leads/:id/reserve
///
/// Holds the lead for the caller while they decide. The hold expires on its own.
#[utoipa::path(
    post,
    path = "/api/v1/leads/{id}/reserve",
    params(("id" = String, Path, description = "Lead id")),
    responses((status = 200, body = ReservationResponse, description = "OK"), (status = 400, description = "Invalid request or lead unavailable"), (status = 404, description = "Lead not found"))
)]
pub async fn reserve_lead(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, AppError> {
    let lead_id = parse_lead_id(&id)?;
    let lock = state.claims.reserve(lead_id, &identity).await?;

    Ok(Json(ReservationResponse {
        lead_id,
        status: crate::models::LeadStatus::BeingClaimed,
        expires_at: lock.expires_at,
    }))
}

/// DELETE /api/v1/leads/:id/reserve
#[utoipa::path(
    delete,
    path = "/api/v1/leads/{id}/reserve",
    params(("id" = String, Path, description = "Lead id")),
    responses((status = 204, description = "Reservation released"), (status = 400, description = "Invalid request or lead unavailable"), (status = 404, description = "Lead not found"))
)]
pub async fn release_lead(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let lead_id = parse_lead_id(&id)?;
    state.claims.release(lead_id, &identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/claim-lead
///
/// Buys the lead for the caller. Exactly one clinic can ever succeed per lead.
#[utoipa::path(
    post,
    path = "/api/v1/claim-lead",
    request_body = ClaimRequest,
    responses(
        (status = 200, body = ClaimResponse, description = "OK"),
        (status = 400, description = "Missing id or lead no longer available"),
        (status = 401, description = "Missing or invalid identity"),
        (status = 404, description = "Lead not found")
    )
)]
pub async fn claim_lead(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, AppError> {
    let lead_id = parse_lead_id(&request.lead_id)?;

    tracing::info!("Claim requested for lead {} by {}", lead_id, identity.external_id);
    let outcome = state.claims.claim(lead_id, &identity).await?;

    Ok(Json(ClaimResponse {
        success: true,
        clinic_id: outcome.clinic_id,
        claim_id: outcome.claim.id,
        pricing: outcome.breakdown.into(),
    }))
}

/// GET /api/v1/profile
///
/// The caller's clinic, created with defaults on first visit.
#[utoipa::path(get, path = "/api/v1/profile", responses((status = 200, body = Clinic, description = "OK"), (status = 401, description = "Missing or invalid identity")))]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
) -> Result<Json<Clinic>, AppError> {
    let clinic = state
        .claims
        .resolve_clinic(&identity, PROFILE_CLINIC_NAME)
        .await?;
    Ok(Json(clinic))
}

/// PUT /api/v1/profile
#[utoipa::path(
    put,
    path = "/api/v1/profile",
    request_body = ClinicUpdate,
    responses((status = 200, body = Clinic, description = "OK"), (status = 400, description = "Invalid profile field"), (status = 401, description = "Missing or invalid identity"))
)]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    identity: ClinicIdentity,
    Json(update): Json<ClinicUpdate>,
) -> Result<Json<Clinic>, AppError> {
    update.validate()?;

    let clinic = state
        .claims
        .resolve_clinic(&identity, PROFILE_CLINIC_NAME)
        .await?;
    let updated = state.store.update_clinic(clinic.id, update).await?;

    tracing::info!("Clinic {} profile updated", updated.id);
    Ok(Json(updated))
}

/// GET /api/v1/stats
#[utoipa::path(get, path = "/api/v1/stats", responses((status = 200, body = DashboardStats, description = "OK"), (status = 401, description = "Missing or invalid identity")))]
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    _identity: ClinicIdentity,
) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(state.store.dashboard_stats(Utc::now()).await?))
}

/// Serves the generated OpenAPI document.
async fn serve_openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Serves the Swagger UI HTML page, pointed at `/api-docs/openapi.json`.
async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Lead Marketplace API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}
