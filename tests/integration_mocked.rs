/// Integration tests with a mocked feed server
/// Exercises ingestion cycles and the HTTP API against the in-memory store
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lead_marketplace_api::config::{Config, PricingConfig};
use lead_marketplace_api::errors::AppError;
use lead_marketplace_api::feed_client::FeedClient;
use lead_marketplace_api::handlers::{self, AppState};
use lead_marketplace_api::ingestion::{Ingestor, RowStage};
use lead_marketplace_api::models::{
    Clinic, ClinicUpdate, DashboardStats, LeadClaim, LeadFilter, LeadLock, LeadMetadata,
    LeadRecord, LeadStatus, LeadTier, NewClinic, NewLead, NewLeadMetadata,
};
use lead_marketplace_api::poller;
use lead_marketplace_api::store::{InsertOutcome, LeadStore, MemoryStore};

const HEADER: &str = "timestamp,direction,to_number,from_number,transcript,summary\n";

fn feed_body() -> String {
    format!(
        "{}{}{}{}",
        HEADER,
        "2024-01-15T10:00:00Z,inbound,+16040000000,(604) 555-0101,\"Hi, my name is Sarah. I'd like the premium package.\",\"Premium package, ready to book\"\n",
        "2024-01-15T11:00:00Z,inbound,+16040000000,250-555-0102,I'm interested in a consultation,\n",
        "2024-01-15T12:00:00Z,inbound,+16040000000,555-0103,too short,ignored\n",
    )
}

/// Delegates to a `MemoryStore` but fails every insert for one phone.
struct FailingInsertStore {
    inner: Arc<MemoryStore>,
    failing_phone: String,
}

#[async_trait]
impl LeadStore for FailingInsertStore {
    async fn phone_exists(&self, phone: &str) -> Result<bool, AppError> {
        self.inner.phone_exists(phone).await
    }

    async fn insert_lead(
        &self,
        lead: NewLead,
        photo_url: String,
        metadata: NewLeadMetadata,
    ) -> Result<InsertOutcome, AppError> {
        if lead.phone == self.failing_phone {
            return Err(AppError::Persistence("connection reset".to_string()));
        }
        self.inner.insert_lead(lead, photo_url, metadata).await
    }

    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, AppError> {
        self.inner.get_lead(lead_id).await
    }

    async fn list_leads(&self, filter: LeadFilter) -> Result<Vec<LeadRecord>, AppError> {
        self.inner.list_leads(filter).await
    }

    async fn lead_metadata(&self, lead_id: Uuid) -> Result<Option<LeadMetadata>, AppError> {
        self.inner.lead_metadata(lead_id).await
    }

    async fn find_clinic(&self, external_id: &str) -> Result<Option<Clinic>, AppError> {
        self.inner.find_clinic(external_id).await
    }

    async fn upsert_clinic(&self, clinic: NewClinic) -> Result<Clinic, AppError> {
        self.inner.upsert_clinic(clinic).await
    }

    async fn update_clinic(
        &self,
        clinic_id: Uuid,
        update: ClinicUpdate,
    ) -> Result<Clinic, AppError> {
        self.inner.update_clinic(clinic_id, update).await
    }

    async fn claim_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        pricing: &PricingConfig,
        now: DateTime<Utc>,
    ) -> Result<LeadClaim, AppError> {
        self.inner.claim_lead(lead_id, clinic_id, pricing, now).await
    }

    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        clinic_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeadLock, AppError> {
        self.inner.reserve_lead(lead_id, clinic_id, expires_at, now).await
    }

    async fn release_lead(&self, lead_id: Uuid, clinic_id: Uuid) -> Result<bool, AppError> {
        self.inner.release_lead(lead_id, clinic_id).await
    }

    async fn dashboard_stats(&self, now: DateTime<Utc>) -> Result<DashboardStats, AppError> {
        self.inner.dashboard_stats(now).await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }
}

/// Helper function to create test config
fn create_test_config(feed_url: String) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 0,
        feed_url,
        sync_interval_secs: 0,
        initial_sync_delay_secs: 0,
        feed_timeout_secs: 5,
        lead_lock_ttl_secs: 120,
        gateway_shared_secret: None,
        sync_trigger_token: None,
    }
}

async fn mock_feed(body: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

fn ingestor_for(store: Arc<MemoryStore>, url: String) -> Ingestor {
    let feed = FeedClient::new(url, Duration::from_secs(5)).unwrap();
    Ingestor::new(store, feed)
}

fn app_for(store: Arc<MemoryStore>, config: Config) -> axum::Router {
    let feed = FeedClient::new(config.feed_url.clone(), config.feed_timeout()).unwrap();
    let ingestor = Arc::new(Ingestor::new(store.clone(), feed));
    handlers::router(Arc::new(AppState::new(store, config, ingestor)))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, identity: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(id) = identity {
        builder = builder.header("x-clinic-identity", id);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, identity: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-clinic-identity", identity)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_feed_row_becomes_platinum_lead() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let ingestor = ingestor_for(store.clone(), format!("{}/feed.csv", server.uri()));

    let report = ingestor.run_cycle().await.unwrap();

    assert_eq!(report.rows_seen, 2);
    assert_eq!(report.rows_rejected, 1);
    assert_eq!(report.created, 2);
    assert_eq!(report.errored, 0);
    assert_eq!(
        report.rows_seen,
        report.created + report.skipped_as_duplicate + report.errored
    );
    assert_eq!(report.feed_sha256.len(), 64);

    let leads = store.list_leads(LeadFilter::Tier(LeadTier::Platinum)).await.unwrap();
    assert_eq!(leads.len(), 1);
    let lead = &leads[0].lead;
    assert_eq!(lead.status, LeadStatus::Available);
    assert_eq!(lead.price_cents, 7500);
    assert_eq!(lead.city.as_deref(), Some("Vancouver"));
    assert_eq!(lead.region.as_deref(), Some("Metro Vancouver"));
    assert_eq!(lead.phone.as_deref(), Some("6045550101"));
    assert_eq!(lead.name.as_deref(), Some("Sarah"));
    assert_eq!(leads[0].photos.len(), 1);

    let victoria = store.list_leads(LeadFilter::Tier(LeadTier::Hot)).await.unwrap();
    assert_eq!(victoria.len(), 1);
    assert_eq!(victoria[0].lead.city.as_deref(), Some("Victoria"));
    assert_eq!(
        victoria[0].lead.summary.as_deref(),
        Some("Phone inquiry about services")
    );
}

#[tokio::test]
async fn test_fully_quoted_row_becomes_platinum_lead() {
    let body = format!(
        "{}{}",
        HEADER,
        "\"2024-01-01T00:00:00Z\",\"inbound\",\"6045550000\",\"6041234567\",\"client wants urgent luxury treatment\",\"Call about premium package\"\n",
    );
    let server = mock_feed(body).await;
    let store = Arc::new(MemoryStore::new());
    let ingestor = ingestor_for(store.clone(), format!("{}/feed.csv", server.uri()));

    let report = ingestor.run_cycle().await.unwrap();
    assert_eq!(report.rows_seen, 1);
    assert_eq!(report.created, 1);

    let leads = store.list_leads(LeadFilter::All).await.unwrap();
    assert_eq!(leads.len(), 1);
    let lead = &leads[0].lead;
    assert_eq!(lead.tier, LeadTier::Platinum);
    assert_eq!(lead.status, LeadStatus::Available);
    assert_eq!(lead.price_cents, 7500);
    assert_eq!(lead.city.as_deref(), Some("Vancouver"));
    assert_eq!(lead.region.as_deref(), Some("Metro Vancouver"));
    assert_eq!(lead.phone.as_deref(), Some("6041234567"));
    assert_eq!(lead.summary.as_deref(), Some("Call about premium package"));
}

#[tokio::test]
async fn test_row_persist_failure_does_not_abort_cycle() {
    let body = format!(
        "{}{}{}{}",
        HEADER,
        "2024-01-15T10:00:00Z,inbound,6040000000,6045550101,interested,Wants info\n",
        "2024-01-15T11:00:00Z,inbound,6040000000,6045550102,ready to book,Wants a slot\n",
        "2024-01-15T12:00:00Z,inbound,6040000000,2505550103,premium please,Premium\n",
    );
    let server = mock_feed(body).await;
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(FailingInsertStore {
        inner: inner.clone(),
        failing_phone: "6045550102".to_string(),
    });
    let feed = FeedClient::new(format!("{}/feed.csv", server.uri()), Duration::from_secs(5)).unwrap();
    let ingestor = Ingestor::new(store, feed);

    let report = ingestor.run_cycle().await.unwrap();

    assert_eq!(report.rows_seen, 3);
    assert_eq!(report.created, report.rows_seen - 1);
    assert_eq!(report.skipped_as_duplicate, 0);
    assert_eq!(report.errored, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].stage, RowStage::Persist);
    assert_eq!(report.errors[0].line, 3);
    assert_eq!(report.errors[0].phone, "6045550102");

    assert_eq!(inner.lead_count().await, 2);
    assert!(inner.phone_exists("6045550101").await.unwrap());
    assert!(!inner.phone_exists("6045550102").await.unwrap());
    assert!(inner.phone_exists("2505550103").await.unwrap());
}

#[tokio::test]
async fn test_second_cycle_creates_nothing() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let ingestor = ingestor_for(store.clone(), format!("{}/feed.csv", server.uri()));

    let first = ingestor.run_cycle().await.unwrap();
    let second = ingestor.run_cycle().await.unwrap();

    assert_eq!(first.created, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped_as_duplicate, 2);
    assert_eq!(first.feed_sha256, second.feed_sha256);
    assert_eq!(store.lead_count().await, 2);
}

#[tokio::test]
async fn test_separate_ingestors_share_store_dedup() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let url = format!("{}/feed.csv", server.uri());

    // Fresh caches, so dedup has to come from the store.
    let a = ingestor_for(store.clone(), url.clone());
    let b = ingestor_for(store.clone(), url);
    let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());

    assert_eq!(ra.unwrap().created + rb.unwrap().created, 2);
    assert_eq!(store.lead_count().await, 2);
}

#[tokio::test]
async fn test_feed_failure_aborts_without_writes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.csv"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let ingestor = ingestor_for(store.clone(), format!("{}/feed.csv", server.uri()));

    let err = ingestor.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        lead_marketplace_api::errors::AppError::UpstreamFetch(_)
    ));
    assert_eq!(store.lead_count().await, 0);
}

#[tokio::test]
async fn test_sync_endpoint_returns_report() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store.clone(), create_test_config(format!("{}/feed.csv", server.uri())));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["created"], 2);
    assert_eq!(report["rows_rejected"], 1);
}

#[tokio::test]
async fn test_sync_endpoint_requires_token_when_configured() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let mut config = create_test_config(format!("{}/feed.csv", server.uri()));
    config.sync_trigger_token = Some("trigger".to_string());
    let app = app_for(store.clone(), config);

    let denied = app
        .clone()
        .oneshot(get("/api/v1/sync", None))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(store.lead_count().await, 0);

    let allowed = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/sync")
                .header("x-sync-token", "trigger")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sync_endpoint_maps_feed_failure_to_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store, create_test_config(format!("{}/feed.csv", server.uri())));

    let response = app.oneshot(get("/api/v1/sync", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"], "Feed unavailable");
}

#[tokio::test]
async fn test_claim_flow_over_http() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store.clone(), create_test_config(format!("{}/feed.csv", server.uri())));
    ingestor_for(store.clone(), format!("{}/feed.csv", server.uri()))
        .run_cycle()
        .await
        .unwrap();

    let lead_id = store.list_leads(LeadFilter::Tier(LeadTier::Platinum)).await.unwrap()[0]
        .lead
        .id;

    // Before the claim everything personal is masked.
    let before = app
        .clone()
        .oneshot(get(&format!("/api/v1/leads/{}", lead_id), Some("clinic_a")))
        .await
        .unwrap();
    assert_eq!(before.status(), StatusCode::OK);
    let view = body_json(before).await;
    assert_eq!(view["phone"], "604-***-****");
    assert_eq!(view["contact_visible"], false);
    assert!(view["photos"][0]["url"].is_null());

    let claimed = app
        .clone()
        .oneshot(post_json(
            "/api/v1/claim-lead",
            "clinic_a",
            serde_json::json!({ "lead_id": lead_id }),
        ))
        .await
        .unwrap();
    assert_eq!(claimed.status(), StatusCode::OK);
    let body = body_json(claimed).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["pricing"]["amount_cents"], 7500);
    assert_eq!(body["pricing"]["total_cents"], 7500);

    // The buyer now sees contact details and call metadata.
    let mine = body_json(
        app.clone()
            .oneshot(get(&format!("/api/v1/leads/{}", lead_id), Some("clinic_a")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(mine["phone"], "6045550101");
    assert_eq!(mine["status"], "claimed");
    assert!(mine["photos"][0]["url"].is_string());

    let metadata = app
        .clone()
        .oneshot(get(
            &format!("/api/v1/leads/{}/metadata", lead_id),
            Some("clinic_a"),
        ))
        .await
        .unwrap();
    assert_eq!(metadata.status(), StatusCode::OK);
    assert_eq!(body_json(metadata).await["call_direction"], "inbound");

    // Nobody else does.
    let theirs = body_json(
        app.clone()
            .oneshot(get(&format!("/api/v1/leads/{}", lead_id), Some("clinic_b")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(theirs["contact_visible"], false);

    let forbidden = app
        .clone()
        .oneshot(get(
            &format!("/api/v1/leads/{}/metadata", lead_id),
            Some("clinic_b"),
        ))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    // Second claim is rejected.
    let again = app
        .clone()
        .oneshot(post_json(
            "/api/v1/claim-lead",
            "clinic_b",
            serde_json::json!({ "lead_id": lead_id }),
        ))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(again).await["error"],
        "Lead is no longer available"
    );

    // my-leads only lists the buyer's leads.
    let mine = body_json(
        app.clone()
            .oneshot(get("/api/v1/leads?filter=my-leads", Some("clinic_a")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let theirs = body_json(
        app.oneshot(get("/api/v1/leads?filter=my-leads", Some("clinic_b")))
            .await
            .unwrap(),
    )
    .await;
    assert!(theirs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_claim_request_validation() {
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store, create_test_config("http://localhost/feed.csv".into()));

    let missing_identity = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/claim-lead")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing_identity.status(), StatusCode::UNAUTHORIZED);

    let missing_id = app
        .clone()
        .oneshot(post_json("/api/v1/claim-lead", "clinic_a", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(missing_id.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(missing_id).await["error"], "Lead ID required");

    let unknown = app
        .oneshot(post_json(
            "/api/v1/claim-lead",
            "clinic_a",
            serde_json::json!({ "lead_id": uuid::Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_profile_lazy_create_and_update() {
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store, create_test_config("http://localhost/feed.csv".into()));

    let created = body_json(
        app.clone()
            .oneshot(get("/api/v1/profile", Some("clinic_a")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(created["clinic_name"], "My Clinic");

    let updated = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/profile")
                .header("content-type", "application/json")
                .header("x-clinic-identity", "clinic_a")
                .body(Body::from(
                    serde_json::json!({ "clinic_name": "Harbour Dental", "location": "Vancouver" })
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = body_json(updated).await;
    assert_eq!(updated["clinic_name"], "Harbour Dental");
    assert_eq!(updated["id"], created["id"]);

    let fetched = body_json(
        app.oneshot(get("/api/v1/profile", Some("clinic_a")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(fetched["location"], "Vancouver");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store.clone(), create_test_config(format!("{}/feed.csv", server.uri())));
    ingestor_for(store.clone(), format!("{}/feed.csv", server.uri()))
        .run_cycle()
        .await
        .unwrap();

    let stats = body_json(
        app.oneshot(get("/api/v1/stats", Some("clinic_a")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(stats["new_leads_24h"], 2);
    assert_eq!(stats["available_now"], 2);
    assert_eq!(stats["total_revenue_cents"], 0);
}

#[tokio::test]
async fn test_health_and_openapi() {
    let store = Arc::new(MemoryStore::new());
    let app = app_for(store, create_test_config("http://localhost/feed.csv".into()));

    let health = app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let doc = body_json(
        app.oneshot(get("/api-docs/openapi.json", None))
            .await
            .unwrap(),
    )
    .await;
    assert!(doc["paths"]["/api/v1/claim-lead"].is_object());
}

#[tokio::test]
async fn test_poller_runs_first_cycle_and_stops() {
    let server = mock_feed(feed_body()).await;
    let store = Arc::new(MemoryStore::new());
    let ingestor = Arc::new(ingestor_for(
        store.clone(),
        format!("{}/feed.csv", server.uri()),
    ));
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(poller::run(
        ingestor,
        Duration::from_millis(10),
        Duration::from_secs(3600),
        rx,
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.lead_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("poller should ingest the feed");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller should stop")
        .unwrap();
}
