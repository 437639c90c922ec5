//! Usher - adviser allocation gateway

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usher::allocation::{Allocator, AllocatorConfig, ChatWebhookNotifier};
use usher::config::Args;
use usher::crm::HttpCrmClient;
use usher::hr::{HttpHrClient, StaticTokenProvider};
use usher::server::{self, AppState};
use usher::store::{MongoClient, Store, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("usher={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Usher - Adviser Allocation Gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("CRM: {}", args.crm_base_url);
    info!("HR: {}", args.hr_base_url);
    info!("Horizon: {} weeks", args.horizon_weeks);
    info!("======================================");

    let call_timeout = Duration::from_secs(args.call_timeout_secs);
    let list_timeout = Duration::from_secs(args.list_timeout_secs);

    // CRM client; dev mode tolerates a missing token for local poking
    let crm_token = args
        .crm_token
        .clone()
        .unwrap_or_else(|| "dev-only-placeholder-token".to_string());
    let crm = Arc::new(
        HttpCrmClient::new(&args.crm_base_url, &crm_token, call_timeout, list_timeout)
            .map_err(|e| anyhow::anyhow!("CRM client init failed: {}", e))?,
    );

    // HR client is optional: without it, leave comes from the synced store
    let hr = match args.hr_token {
        Some(ref token) => {
            let tokens = Box::new(StaticTokenProvider::new(token.clone()));
            match HttpHrClient::new(&args.hr_base_url, tokens, list_timeout) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn usher::hr::HrApi>),
                Err(e) => {
                    warn!("HR client init failed, using synced leave records: {}", e);
                    None
                }
            }
        }
        None => {
            info!("HR_TOKEN not set; leave comes from synced records");
            None
        }
    };

    // Connect to MongoDB (optional in dev mode)
    let store_config = StoreConfig {
        call_timeout,
        list_timeout,
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
    };
    let store = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Arc::new(Store::with_mongo(client, crm.clone(), hr, store_config))
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, memory-only store): {}", e);
                Arc::new(Store::memory(crm.clone(), hr, store_config))
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let notifier = Arc::new(ChatWebhookNotifier::new(
        args.chat_webhook_url.clone(),
        call_timeout,
    ));
    if args.chat_webhook_url.is_some() {
        info!("Allocation alerts enabled via chat webhook");
    }

    let allocator = Arc::new(Allocator::new(
        Arc::clone(&store),
        crm,
        notifier,
        AllocatorConfig {
            horizon_weeks: args.horizon_weeks,
            outer_deadline: Duration::from_secs(args.allocation_timeout_secs),
            call_timeout,
        },
    ));

    let state = Arc::new(AppState::new(args, store, allocator));
    server::run(state).await?;

    Ok(())
}
