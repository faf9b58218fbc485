//! Run a single ingestion cycle against the configured feed and database,
//! then print the report as JSON.

use std::sync::Arc;

use lead_marketplace_api::config::Config;
use lead_marketplace_api::db::Database;
use lead_marketplace_api::feed_client::FeedClient;
use lead_marketplace_api::ingestion::Ingestor;
use lead_marketplace_api::store::{LeadStore, PgLeadStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_marketplace_api=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;

    let store: Arc<dyn LeadStore> = Arc::new(PgLeadStore::new(db.pool));
    let feed = FeedClient::new(config.feed_url.clone(), config.feed_timeout())?;
    let ingestor = Ingestor::new(store, feed);

    let report = ingestor.run_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.errored > 0 {
        anyhow::bail!("{} rows failed to ingest", report.errored);
    }

    Ok(())
}
