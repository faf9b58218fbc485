use utoipa::OpenApi;

use crate::handlers;
use crate::ingestion::{IngestionReport, RowError, RowStage};
use crate::models::{
    ClaimRequest, ClaimResponse, Clinic, ClinicUpdate, DashboardStats, LeadMetadata, LeadStatus,
    LeadTier, LeadView, PhotoView, PriceBreakdownView, ReservationResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lead Marketplace API",
        description = "Call feed ingestion and exclusive lead claiming for subscribing clinics."
    ),
    paths(
        handlers::health,
        handlers::sync_feed,
        handlers::list_leads,
        handlers::get_lead,
        handlers::get_lead_metadata,
        handlers::reserve_lead,
        handlers::release_lead,
        handlers::claim_lead,
        handlers::get_profile,
        handlers::update_profile,
        handlers::get_stats,
    ),
    components(schemas(
        LeadTier,
        LeadStatus,
        LeadView,
        PhotoView,
        LeadMetadata,
        Clinic,
        ClinicUpdate,
        ClaimRequest,
        ClaimResponse,
        PriceBreakdownView,
        ReservationResponse,
        DashboardStats,
        IngestionReport,
        RowError,
        RowStage,
    ))
)]
pub struct ApiDoc;
