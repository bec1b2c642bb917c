//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::services::{AuctionCandidate, BudgetState, CampaignOverview, MetricSnapshot};
use crate::utils::format_minor_units;

use super::campaign::{AdType, BudgetType, Campaign};

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "INSUFFICIENT_BUDGET",
///         "message": "Insufficient budget: requested 150, available 20"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Stable error code (e.g., "CAMPAIGN_NOT_FOUND").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// Ledger view of a campaign.
///
/// ## Example Response
///
/// ```json
/// {
///     "budgetType": "DAILY",
///     "budget": 200000,
///     "spentToday": 12550,
///     "totalSpent": 48210,
///     "remaining": 187450,
///     "formattedBudget": "2,000.00",
///     "formattedRemaining": "1,874.50"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStateResponse {
    pub budget_type: BudgetType,
    pub budget: i64,
    pub spent_today: i64,

    /// Spend in the current billing period.
    pub total_spent: i64,
    pub lifetime_spent: i64,

    /// What the binding cap still allows.
    pub remaining: i64,
    pub period: u32,
    pub last_reset_date: NaiveDate,
    pub formatted_budget: String,
    pub formatted_remaining: String,
}

impl From<&BudgetState> for BudgetStateResponse {
    fn from(s: &BudgetState) -> Self {
        let remaining = s.headroom();
        Self {
            budget_type: s.budget_type,
            budget: s.budget,
            spent_today: s.spent_today,
            total_spent: s.total_spent,
            lifetime_spent: s.lifetime_spent,
            remaining,
            period: s.period,
            last_reset_date: s.last_reset_date,
            formatted_budget: format_minor_units(s.budget),
            formatted_remaining: format_minor_units(remaining),
        }
    }
}

/// Campaign with its budget state and metrics.
///
/// Returned by `GET /campaigns/{id}` and in `GET /campaigns`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub budget_state: BudgetStateResponse,
    pub metrics: MetricSnapshot,
}

impl From<CampaignOverview> for CampaignResponse {
    fn from(o: CampaignOverview) -> Self {
        Self {
            budget_state: BudgetStateResponse::from(&o.budget),
            campaign: o.campaign,
            metrics: o.metrics,
        }
    }
}

/// Winners of a delivery opportunity, in rank order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub city: String,
    pub ad_type: AdType,
    pub winners: Vec<AuctionCandidate>,
    pub timestamp: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded".
    pub status: String,

    /// Campaigns held by the engine.
    pub campaigns: usize,

    /// "connected", "unreachable" or "disabled".
    pub database: String,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::{at, draft};

    #[test]
    fn test_error_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::<()>::error("CAMPAIGN_NOT_FOUND", "gone")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["data"], serde_json::Value::Null);
        assert_eq!(body["error"]["code"], "CAMPAIGN_NOT_FOUND");
    }

    #[test]
    fn test_budget_state_response_formats_remaining() {
        let campaign = Campaign::new(draft(BudgetType::Total, 250_000), at(2026, 10, 1, 0, 0)).unwrap();
        let mut state = BudgetState::open(
            campaign.id,
            BudgetType::Total,
            campaign.budget,
            campaign.timezone,
            at(2026, 10, 1, 0, 0),
        );
        state.total_spent = 1_050;
        state.lifetime_spent = 1_050;

        let response = BudgetStateResponse::from(&state);
        assert_eq!(response.remaining, 248_950);
        assert_eq!(response.formatted_budget, "2,500.00");
        assert_eq!(response.formatted_remaining, "2,489.50");
    }
}
