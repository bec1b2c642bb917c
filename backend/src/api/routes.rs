//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                    GET - Health check
/// ├── /campaigns                 POST - Create, GET - List
/// │   └── /{id}                  GET - Read, PUT - Update
/// │       ├── /activate          POST
/// │       ├── /pause             POST
/// │       ├── /resume            POST
/// │       ├── /history           GET
/// │       ├── /alerts            GET
/// │       ├── /metrics           GET
/// │       └── /charges           GET
/// ├── /delivery-opportunity      POST - Run an auction
/// ├── /events
/// │   ├── /click                 POST
/// │   ├── /lead                  POST
/// │   └── /refund                POST
/// ├── /attribution/revenue       POST
/// └── /billing/webhook           POST
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))

        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        // Campaign management
        .service(
            web::scope("/campaigns")
                .route("", web::post().to(handlers::create_campaign))
                .route("", web::get().to(handlers::list_campaigns))
                .route("/{id}", web::get().to(handlers::get_campaign))
                .route("/{id}", web::put().to(handlers::update_campaign))

                // Lifecycle actions
                .route("/{id}/activate", web::post().to(handlers::activate_campaign))
                .route("/{id}/pause", web::post().to(handlers::pause_campaign))
                .route("/{id}/resume", web::post().to(handlers::resume_campaign))

                // Read models
                .route("/{id}/history", web::get().to(handlers::get_history))
                .route("/{id}/alerts", web::get().to(handlers::get_alerts))
                .route("/{id}/metrics", web::get().to(handlers::get_metrics))
                .route("/{id}/charges", web::get().to(handlers::get_charges)),
        )

        // Placement
        .route(
            "/delivery-opportunity",
            web::post().to(handlers::delivery_opportunity),
        )

        // Event ingestion
        .service(
            web::scope("/events")
                .route("/click", web::post().to(handlers::record_click))
                .route("/lead", web::post().to(handlers::record_lead))
                .route("/refund", web::post().to(handlers::refund_click)),
        )
        .route(
            "/attribution/revenue",
            web::post().to(handlers::attribute_revenue),
        )

        // Billing processor callback
        .route("/billing/webhook", web::post().to(handlers::billing_webhook));
}
