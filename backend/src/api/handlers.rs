//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Validates input
//! 3. Calls the `CampaignManager`
//! 4. Returns a formatted response
//!
//! ## Error Handling
//!
//! All errors are returned as JSON with a stable code:
//!
//! | Code | Status | Meaning |
//! |------|--------|---------|
//! | `VALIDATION_ERROR` | 400 | Malformed input |
//! | `INVALID_TARGETING` | 400 | Activation without cities or budget |
//! | `BILLING_ERROR` | 400 | Webhook for an unknown or mismatched charge |
//! | `CAMPAIGN_NOT_FOUND` | 404 | No such campaign |
//! | `INSUFFICIENT_BUDGET` | 409 | Spend rejected by cap or pacing |
//! | `INVALID_TRANSITION` | 409 | Illegal or blocked lifecycle move |
//! | `CAMPAIGN_NOT_DELIVERABLE` | 409 | Campaign status cannot be charged |

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    ApiResponse, BillingWebhookRequest, CampaignPatch, CampaignResponse, ClickEventRequest,
    CreateCampaignRequest, DeliveryOpportunityRequest, DeliveryResponse, HealthResponse,
    LeadEventRequest, ListCampaignsQuery, MetricsQuery, RefundRequest, RevenueAttributionRequest,
    TimestampQuery,
};
use crate::services::CampaignError;
use crate::AppState;

fn resolve_time(timestamp: Option<DateTime<Utc>>) -> DateTime<Utc> {
    timestamp.unwrap_or_else(Utc::now)
}

/// Translate a service error into the API envelope.
fn error_response(e: &CampaignError) -> HttpResponse {
    let (status, code) = match e {
        CampaignError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        CampaignError::InvalidTargeting(_) => (StatusCode::BAD_REQUEST, "INVALID_TARGETING"),
        CampaignError::Billing(_) => (StatusCode::BAD_REQUEST, "BILLING_ERROR"),
        CampaignError::CampaignNotFound(_) => (StatusCode::NOT_FOUND, "CAMPAIGN_NOT_FOUND"),
        CampaignError::InsufficientBudget { .. } => (StatusCode::CONFLICT, "INSUFFICIENT_BUDGET"),
        CampaignError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        CampaignError::NotDeliverable { .. } => (StatusCode::CONFLICT, "CAMPAIGN_NOT_DELIVERABLE"),
    };

    HttpResponse::build(status).json(ApiResponse::<()>::error(code, &e.to_string()))
}

fn respond<T: serde::Serialize>(result: Result<T, CampaignError>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => error_response(&e),
    }
}

// ==========================================
// SERVICE INFO
// ==========================================

/// API information endpoint (root).
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let info = json!({
        "name": "Campaign Pacing API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Budget ledger, delivery pacing and auction for sponsored listings",
        "pacing": {
            "paceFactor": state.config.pace_factor,
            "minBid": state.config.min_bid,
            "minBidIncrement": state.config.min_bid_increment
        },
        "endpoints": {
            "health": { "method": "GET", "path": "/health" },
            "campaigns": {
                "create": { "method": "POST", "path": "/campaigns" },
                "list": { "method": "GET", "path": "/campaigns?owner={owner}" },
                "get": { "method": "GET", "path": "/campaigns/{id}" },
                "update": { "method": "PUT", "path": "/campaigns/{id}" },
                "activate": { "method": "POST", "path": "/campaigns/{id}/activate" },
                "pause": { "method": "POST", "path": "/campaigns/{id}/pause" },
                "resume": { "method": "POST", "path": "/campaigns/{id}/resume" },
                "history": { "method": "GET", "path": "/campaigns/{id}/history" },
                "alerts": { "method": "GET", "path": "/campaigns/{id}/alerts" },
                "metrics": { "method": "GET", "path": "/campaigns/{id}/metrics" },
                "charges": { "method": "GET", "path": "/campaigns/{id}/charges" }
            },
            "delivery": { "method": "POST", "path": "/delivery-opportunity" },
            "events": {
                "click": { "method": "POST", "path": "/events/click" },
                "lead": { "method": "POST", "path": "/events/lead" },
                "refund": { "method": "POST", "path": "/events/refund" }
            },
            "attribution": { "method": "POST", "path": "/attribution/revenue" },
            "billing": { "method": "POST", "path": "/billing/webhook" },
            "websocket": { "method": "GET", "path": "/ws/{owner}" }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "campaigns": 12,
///         "database": "disabled",
///         "version": "0.1.0",
///         "timestamp": "2026-10-18T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let database = match &state.db {
        None => "disabled",
        Some(db) => match db.health_check().await {
            Ok(()) => "connected",
            Err(e) => {
                warn!("Database health check failed: {}", e);
                "unreachable"
            }
        },
    };
    let healthy = database != "unreachable";

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        campaigns: state.manager.campaign_count(),
        database: database.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ==========================================
// CAMPAIGNS
// ==========================================

/// Create a campaign in DRAFT.
///
/// ## Endpoint
///
/// `POST /campaigns`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/campaigns \
///   -H "Content-Type: application/json" \
///   -d '{
///     "ownerId": "provider-42",
///     "serviceId": "svc-plumbing",
///     "adType": "TOP_LIST",
///     "budget": 2000,
///     "budgetType": "DAILY",
///     "bidAmount": 150,
///     "startDate": "2026-10-01",
///     "endDate": "2026-10-31",
///     "cities": ["Miami"]
///   }'
/// ```
///
/// `?timestamp=` sets the creation time, which anchors the campaign's
/// first local day.
pub async fn create_campaign(
    state: web::Data<Arc<AppState>>,
    query: web::Query<TimestampQuery>,
    body: web::Json<CreateCampaignRequest>,
) -> HttpResponse {
    info!("Create campaign request for owner {}", body.owner_id);
    let now = resolve_time(query.timestamp);

    let result = body
        .into_inner()
        .into_draft()
        .map_err(CampaignError::from)
        .and_then(|draft| state.manager.create_campaign(draft, now))
        .and_then(|campaign| state.manager.get_campaign(campaign.id, now));

    match result {
        Ok(overview) => HttpResponse::Created().json(ApiResponse::success(CampaignResponse::from(overview))),
        Err(e) => error_response(&e),
    }
}

/// `GET /campaigns?owner=`
pub async fn list_campaigns(
    state: web::Data<Arc<AppState>>,
    query: web::Query<ListCampaignsQuery>,
) -> HttpResponse {
    let result = state
        .manager
        .list_campaigns(query.owner.as_deref(), resolve_time(query.timestamp))
        .map(|list| list.into_iter().map(CampaignResponse::from).collect::<Vec<_>>());
    respond(result)
}

/// `GET /campaigns/{id}`
pub async fn get_campaign(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<TimestampQuery>,
) -> HttpResponse {
    let now = resolve_time(query.timestamp);
    respond(
        state
            .manager
            .get_campaign(path.into_inner(), now)
            .map(CampaignResponse::from),
    )
}

/// Partial update.
///
/// ## Endpoint
///
/// `PUT /campaigns/{id}`
///
/// Budget changes are only accepted while the campaign is DRAFT or PAUSED.
pub async fn update_campaign(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<TimestampQuery>,
    body: web::Json<CampaignPatch>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    let now = resolve_time(query.timestamp);
    respond(
        state
            .manager
            .update_campaign(campaign_id, body.into_inner(), now)
            .and_then(|c| state.manager.get_campaign(c.id, now))
            .map(CampaignResponse::from),
    )
}

/// `POST /campaigns/{id}/activate`
pub async fn activate_campaign(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<TimestampQuery>,
) -> HttpResponse {
    respond(state.manager.activate(path.into_inner(), resolve_time(query.timestamp)))
}

/// `POST /campaigns/{id}/pause`
pub async fn pause_campaign(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<TimestampQuery>,
) -> HttpResponse {
    respond(state.manager.pause(path.into_inner(), resolve_time(query.timestamp)))
}

/// `POST /campaigns/{id}/resume`
pub async fn resume_campaign(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<TimestampQuery>,
) -> HttpResponse {
    respond(state.manager.resume(path.into_inner(), resolve_time(query.timestamp)))
}

/// `GET /campaigns/{id}/history`
pub async fn get_history(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    respond(state.manager.history(path.into_inner()))
}

/// `GET /campaigns/{id}/alerts`
pub async fn get_alerts(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    respond(state.manager.alerts(path.into_inner()))
}

/// Metric rollups.
///
/// ## Endpoint
///
/// `GET /campaigns/{id}/metrics?granularity=daily|weekly|monthly&from=&to=`
pub async fn get_metrics(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<MetricsQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    respond(
        state
            .manager
            .metrics_rollup(path.into_inner(), query.granularity, query.from, query.to),
    )
}

/// `GET /campaigns/{id}/charges`
pub async fn get_charges(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    respond(state.manager.charges(path.into_inner()))
}

// ==========================================
// DELIVERY & EVENTS
// ==========================================

/// Run a delivery opportunity and return the winners.
///
/// ## Endpoint
///
/// `POST /delivery-opportunity`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "city": "Miami",
///         "adType": "TOP_LIST",
///         "winners": [
///             { "campaignId": "...", "adType": "TOP_LIST", "effectiveBid": 150, "ctr": 0.031 }
///         ],
///         "timestamp": "2026-10-18T12:00:00Z"
///     }
/// }
/// ```
pub async fn delivery_opportunity(
    state: web::Data<Arc<AppState>>,
    body: web::Json<DeliveryOpportunityRequest>,
) -> HttpResponse {
    let opportunity = match body.into_inner().into_opportunity(Utc::now()) {
        Ok(o) => o,
        Err(e) => return error_response(&e.into()),
    };

    let winners = state.manager.deliver(&opportunity);
    debug!(
        "Delivery in {} ({}): {} winners",
        opportunity.city,
        opportunity.ad_type,
        winners.len()
    );

    HttpResponse::Ok().json(ApiResponse::success(DeliveryResponse {
        city: opportunity.city,
        ad_type: opportunity.ad_type,
        winners,
        timestamp: opportunity.timestamp,
    }))
}

/// Charge a click.
///
/// ## Endpoint
///
/// `POST /events/click`
///
/// A rejected click answers `409 INSUFFICIENT_BUDGET`; the placement
/// layer should treat the campaign as ineligible.
pub async fn record_click(
    state: web::Data<Arc<AppState>>,
    body: web::Json<ClickEventRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    respond(
        state
            .manager
            .record_click(body.campaign_id, body.cost, resolve_time(body.timestamp)),
    )
}

/// `POST /events/lead`
pub async fn record_lead(
    state: web::Data<Arc<AppState>>,
    body: web::Json<LeadEventRequest>,
) -> HttpResponse {
    respond(
        state
            .manager
            .record_lead(body.campaign_id, resolve_time(body.timestamp)),
    )
}

/// `POST /events/refund`
pub async fn refund_click(
    state: web::Data<Arc<AppState>>,
    body: web::Json<RefundRequest>,
) -> HttpResponse {
    info!("Refund of {} for campaign {}", body.amount, body.campaign_id);
    respond(
        state
            .manager
            .refund_click(body.campaign_id, body.amount, resolve_time(body.timestamp)),
    )
}

/// `POST /attribution/revenue`
pub async fn attribute_revenue(
    state: web::Data<Arc<AppState>>,
    body: web::Json<RevenueAttributionRequest>,
) -> HttpResponse {
    respond(
        state
            .manager
            .attribute_revenue(body.campaign_id, body.amount, resolve_time(body.timestamp)),
    )
}

/// Billing processor webhook.
///
/// ## Endpoint
///
/// `POST /billing/webhook`
pub async fn billing_webhook(
    state: web::Data<Arc<AppState>>,
    body: web::Json<BillingWebhookRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    info!(
        "Billing webhook for charge {}: {:?}",
        body.charge_id, body.status
    );
    respond(state.manager.handle_billing_webhook(
        body.charge_id,
        body.campaign_id,
        body.status,
        body.reason,
        resolve_time(body.timestamp),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::AppConfig;
    use crate::services::{CampaignManager, EventSink, LoggingBillingProcessor};
    use crate::websocket::WsRegistry;
    use actix_web::{test, App};
    use serde_json::Value;

    const NOON: &str = "2026-10-18T12:00:00Z";

    fn app_state() -> Arc<AppState> {
        let config = AppConfig::default();
        Arc::new(AppState {
            manager: Arc::new(CampaignManager::new(
                config.clone(),
                EventSink::detached(),
                Arc::new(LoggingBillingProcessor),
            )),
            db: None,
            config,
            ws_registry: WsRegistry::new(),
        })
    }

    fn campaign_body(budget_type: &str, budget: i64, bid: i64) -> Value {
        json!({
            "ownerId": "provider-1",
            "serviceId": "svc-plumbing",
            "adType": "TOP_LIST",
            "budget": budget,
            "budgetType": budget_type,
            "bidAmount": bid,
            "startDate": "2026-10-01",
            "endDate": "2026-10-31",
            "cities": ["Miami"]
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(configure_routes),
            )
            .await
        };
    }

    macro_rules! create_active {
        ($app:expr, $body:expr) => {{
            let req = test::TestRequest::post()
                .uri(&format!("/campaigns?timestamp={}", NOON))
                .set_json($body)
                .to_request();
            let resp: Value = test::call_and_read_body_json(&$app, req).await;
            let id = resp["data"]["id"].as_str().unwrap().to_string();

            let req = test::TestRequest::post()
                .uri(&format!("/campaigns/{}/activate?timestamp={}", id, NOON))
                .to_request();
            let resp = test::call_service(&$app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            id
        }};
    }

    #[actix_web::test]
    async fn test_api_info_lists_pacing_settings() {
        let app = app!(app_state());
        let req = test::TestRequest::get().uri("/").to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["data"]["pacing"]["minBid"], 50);
        assert_eq!(resp["data"]["pacing"]["paceFactor"], 1.15);
    }

    #[actix_web::test]
    async fn test_health_reports_memory_mode() {
        let app = app!(app_state());
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["success"], true);
        assert_eq!(resp["data"]["database"], "disabled");
        assert_eq!(resp["data"]["campaigns"], 0);
    }

    #[actix_web::test]
    async fn test_create_returns_draft() {
        let app = app!(app_state());
        let req = test::TestRequest::post()
            .uri("/campaigns")
            .set_json(campaign_body("DAILY", 2_000, 150))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["status"], "DRAFT");
        assert_eq!(body["data"]["budgetState"]["remaining"], 2_000);
        assert_eq!(body["data"]["budgetState"]["formattedBudget"], "20.00");
    }

    #[actix_web::test]
    async fn test_create_uses_request_timestamp() {
        let app = app!(app_state());
        let req = test::TestRequest::post()
            .uri("/campaigns?timestamp=2026-10-05T09:30:00Z")
            .set_json(campaign_body("DAILY", 2_000, 150))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["data"]["createdAt"], "2026-10-05T09:30:00Z");
        assert_eq!(body["data"]["budgetState"]["lastResetDate"], "2026-10-05");

        let id = body["data"]["id"].as_str().unwrap();
        let req = test::TestRequest::put()
            .uri(&format!("/campaigns/{}?timestamp=2026-10-06T08:00:00Z", id))
            .set_json(json!({ "budget": 3_000 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["updatedAt"], "2026-10-06T08:00:00Z");
        assert_eq!(body["data"]["budgetState"]["lastResetDate"], "2026-10-06");
    }

    #[actix_web::test]
    async fn test_create_rejects_zero_budget() {
        let app = app!(app_state());
        let req = test::TestRequest::post()
            .uri("/campaigns")
            .set_json(campaign_body("TOTAL", 0, 150))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[actix_web::test]
    async fn test_unknown_campaign_is_404() {
        let app = app!(app_state());
        let req = test::TestRequest::get()
            .uri(&format!("/campaigns/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "CAMPAIGN_NOT_FOUND");
    }

    #[actix_web::test]
    async fn test_deliver_then_click_then_read() {
        let app = app!(app_state());
        let id = create_active!(app, campaign_body("TOTAL", 10_000, 150));

        let req = test::TestRequest::post()
            .uri("/delivery-opportunity")
            .set_json(json!({ "city": "miami", "adType": "TOP_LIST", "topN": 3, "timestamp": NOON }))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        let winners = resp["data"]["winners"].as_array().unwrap();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0]["campaignId"], id.as_str());
        assert_eq!(winners[0]["effectiveBid"], 150);

        let req = test::TestRequest::post()
            .uri("/events/click")
            .set_json(json!({ "campaignId": id, "timestamp": NOON }))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["amount"], 150);
        assert_eq!(resp["data"]["remaining"], 9_850);

        let req = test::TestRequest::get()
            .uri(&format!("/campaigns/{}?timestamp={}", id, NOON))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["metrics"]["impressions"], 1);
        assert_eq!(resp["data"]["metrics"]["clicks"], 1);
        assert_eq!(resp["data"]["metrics"]["ctr"], 1.0);
        assert_eq!(resp["data"]["budgetState"]["totalSpent"], 150);
    }

    #[actix_web::test]
    async fn test_click_over_budget_is_conflict() {
        let app = app!(app_state());
        let id = create_active!(app, campaign_body("TOTAL", 1_000, 150));

        let req = test::TestRequest::post()
            .uri("/events/click")
            .set_json(json!({ "campaignId": id, "cost": 1_200, "timestamp": NOON }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "INSUFFICIENT_BUDGET");
    }

    #[actix_web::test]
    async fn test_lifecycle_actions_and_history() {
        let app = app!(app_state());
        let id = create_active!(app, campaign_body("DAILY", 2_000, 150));

        let req = test::TestRequest::post()
            .uri(&format!("/campaigns/{}/pause?timestamp={}", id, NOON))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["to"], "PAUSED");

        // Pausing twice is not a legal move
        let req = test::TestRequest::post()
            .uri(&format!("/campaigns/{}/pause?timestamp={}", id, NOON))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri(&format!("/campaigns/{}/resume?timestamp={}", id, NOON))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/campaigns/{}/history", id))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        let actions: Vec<&str> = resp["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["action"].as_str().unwrap())
            .collect();
        assert_eq!(actions, vec!["ACTIVATE", "PAUSE", "RESUME"]);
    }

    #[actix_web::test]
    async fn test_update_budget_while_active_is_conflict() {
        let app = app!(app_state());
        let id = create_active!(app, campaign_body("DAILY", 2_000, 150));

        let req = test::TestRequest::put()
            .uri(&format!("/campaigns/{}", id))
            .set_json(json!({ "budget": 5_000 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::put()
            .uri(&format!("/campaigns/{}", id))
            .set_json(json!({ "bidAmount": 180 }))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["bidAmount"], 180);
    }

    #[actix_web::test]
    async fn test_revenue_and_weekly_metrics() {
        let app = app!(app_state());
        let id = create_active!(app, campaign_body("TOTAL", 10_000, 200));

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/events/click")
                .set_json(json!({ "campaignId": id, "timestamp": NOON }))
                .to_request();
            test::call_service(&app, req).await;
        }
        let req = test::TestRequest::post()
            .uri("/attribution/revenue")
            .set_json(json!({ "campaignId": id, "amount": 1_600, "timestamp": NOON }))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["roas"], 4.0);

        let req = test::TestRequest::get()
            .uri(&format!("/campaigns/{}/metrics?granularity=weekly", id))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        let buckets = resp["data"].as_array().unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0]["periodStart"], "2026-10-12");
        assert_eq!(buckets[0]["clicks"], 2);
        assert_eq!(buckets[0]["spend"], 400);
    }

    #[actix_web::test]
    async fn test_webhook_for_unknown_success_is_billing_error() {
        let app = app!(app_state());
        let id = create_active!(app, campaign_body("DAILY", 2_000, 150));

        let req = test::TestRequest::post()
            .uri("/billing/webhook")
            .set_json(json!({
                "chargeId": Uuid::new_v4(),
                "campaignId": id,
                "status": "succeeded"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "BILLING_ERROR");
    }
}
