//! WAF Protection Service
//!
//! Main entry point: loads configuration, builds the compiled rule
//! snapshot, and starts the web server that inspects inbound requests.

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::info;
use std::sync::{Arc, RwLock};

use waf_protection_service::api::{self, ApiState};
use waf_protection_service::config;
use waf_protection_service::core::{build_snapshot, ReputationStore};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting WAF Protection Service...");

    // Load configuration
    let config = Arc::new(config::load_config()?);

    // Merge and compile the rule artifacts; a broken rule set is fatal.
    let snapshot = Arc::new(build_snapshot(&config)?);

    let store = Arc::new(ReputationStore::new(config.dynamic_block.max_tracked_ips));
    let sink = api::open_sink(&config)?;

    let state = web::Data::new(ApiState {
        snapshot: RwLock::new(snapshot),
        store,
        config: config.clone(),
        sink,
    });

    // Start HTTP server
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    Ok(())
}
