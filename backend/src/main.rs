//! # Campaign Pacing Backend Service
//!
//! This is the main entry point for the service that runs sponsored
//! listing campaigns for a services marketplace. It provides:
//!
//! - REST API for campaign management, delivery and event ingestion
//! - WebSocket connections pushing budget alerts to campaign owners
//! - A background monitor for daily resets, expiry and billing
//! - Optional PostgreSQL persistence with write-behind snapshots
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  REST API   │  │  WebSocket  │  │   Background Services   │  │
//! │  │  (Actix)    │  │  Server     │  │  • Campaign Monitor     │  │
//! │  │             │  │             │  │  • Event Forwarder      │  │
//! │  │  /campaigns │  │  /ws/owner  │  │                         │  │
//! │  │  /events    │  │             │  │                         │  │
//! │  │  /delivery  │  │             │  │                         │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! │         │                ▲                     │                 │
//! │         └────────────────┼─────────────────────┘                 │
//! │                          │                                       │
//! │  ┌───────────────────────┴───────────────────────────────────┐  │
//! │  │                    CAMPAIGN MANAGER                        │  │
//! │  │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌─────────┐ │  │
//! │  │  │Lifecycle   │ │BudgetLedger│ │Pacing +    │ │Metrics +│ │  │
//! │  │  │            │ │            │ │Auction     │ │Alerts   │ │  │
//! │  │  └────────────┘ └────────────┘ └────────────┘ └─────────┘ │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                          │                                       │
//! │                   ┌──────┴──────┐                                │
//! │                   │  PostgreSQL │ (optional)                     │
//! │                   └─────────────┘                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Copy `.env.example` to `.env` and configure
//! 2. Optionally set `DATABASE_URL`; migrations run at startup
//! 3. Start the server: `cargo run`
//!
//! Without `DATABASE_URL` the engine runs in memory only.

use std::io;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod models;
mod services;
mod utils;
mod websocket;

use config::AppConfig;
use db::{queries, Database};
use services::{CampaignManager, CampaignMonitor, EventSink, LoggingBillingProcessor};
use websocket::WsRegistry;

/// Application state shared across all handlers.
///
/// The manager owns every engine component; handlers never touch the
/// ledger or lifecycle directly.
pub struct AppState {
    /// Campaign engine
    pub manager: Arc<CampaignManager>,

    /// PostgreSQL pool, when `DATABASE_URL` is set
    pub db: Option<Database>,

    /// Application configuration
    pub config: AppConfig,

    /// WebSocket connection registry for real-time updates
    pub ws_registry: WsRegistry,
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Connects the database (if configured) and restores state
/// 3. Builds the campaign engine
/// 4. Starts the event forwarder and campaign monitor
/// 5. Launches the HTTP server
#[actix_web::main]
async fn main() -> io::Result<()> {
    // =========================================
    // STEP 1: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    // =========================================
    // STEP 2: Initialize Logging
    // =========================================
    // RUST_LOG overrides the default, e.g. RUST_LOG=campaign_pacing_backend=debug
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("🚀 Starting Campaign Pacing Backend Service");

    let config = AppConfig::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    info!("📋 Configuration loaded");
    info!("   Pace factor: {}", config.pace_factor);
    info!("   Min bid: {}", config.min_bid);
    info!(
        "   Alert thresholds: {} / {}",
        config.alert_warning_ratio, config.alert_critical_ratio
    );

    // =========================================
    // STEP 3: Initialize Database (optional)
    // =========================================
    let db = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            info!("🗄️  Database connected");

            db.run_migrations()
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            info!("📦 Database migrations complete");
            Some(db)
        }
        None => {
            warn!("DATABASE_URL not set; running in memory only");
            None
        }
    };

    // =========================================
    // STEP 4: Initialize Campaign Engine
    // =========================================
    let (events, event_rx) = EventSink::channel();
    let manager = Arc::new(CampaignManager::new(
        config.clone(),
        events,
        Arc::new(LoggingBillingProcessor),
    ));

    if let Some(db) = &db {
        let snapshot = queries::load_snapshot(db.pool())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        manager.import(snapshot);
    }

    info!("🔧 Campaign engine initialized");

    // =========================================
    // STEP 5: Initialize WebSocket Registry
    // =========================================
    let ws_registry = WsRegistry::new();
    info!("🔌 WebSocket registry initialized");

    // =========================================
    // STEP 6: Create Application State
    // =========================================
    let app_state = Arc::new(AppState {
        manager: manager.clone(),
        db: db.clone(),
        config: config.clone(),
        ws_registry: ws_registry.clone(),
    });

    // =========================================
    // STEP 7: Start Background Services
    // =========================================
    tokio::spawn(websocket::forward_engine_events(
        event_rx,
        manager.clone(),
        ws_registry.clone(),
        db.clone(),
    ));

    info!("📨 Event forwarder started");

    let monitor = CampaignMonitor::new(manager.clone(), db.clone(), config.clone());
    tokio::spawn(async move {
        monitor.start().await;
    });

    info!("👁️  Campaign monitor started");

    // =========================================
    // STEP 8: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))

            // Add logging middleware
            .wrap(middleware::Logger::default())

            // Configure API routes
            .configure(api::configure_routes)

            // Configure WebSocket routes
            .configure(websocket::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
