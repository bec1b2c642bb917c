//! # API Request Models
//!
//! Structures for incoming API request bodies and query strings.
//!
//! Every event body accepts an optional `timestamp`; when absent the
//! handler uses the current time. Money is always in minor units.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::{DeliveryOpportunity, Granularity, WebhookStatus};

use super::campaign::{
    AdType, BudgetType, CampaignDraft, CampaignTimezone, Targeting, ValidationError,
};

/// Request to create a campaign. The campaign starts as DRAFT.
///
/// ## Example JSON
///
/// ```json
/// {
///     "ownerId": "provider-42",
///     "serviceId": "svc-plumbing",
///     "adType": "TOP_LIST",
///     "budget": 2000,
///     "budgetType": "DAILY",
///     "bidAmount": 150,
///     "startDate": "2026-10-01",
///     "endDate": "2026-10-31",
///     "cities": ["Miami"],
///     "timezone": "-04:00"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub owner_id: String,
    pub service_id: String,
    pub ad_type: AdType,

    /// Cap in minor units (per local day for DAILY).
    pub budget: i64,
    pub budget_type: BudgetType,

    /// Omit to bid the platform minimum.
    pub bid_amount: Option<i64>,
    pub max_bid: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    #[serde(default)]
    pub cities: Vec<String>,
    pub category: Option<String>,

    #[serde(default)]
    pub auto_renew: bool,

    /// UTC offset such as `"+05:30"`. Default: UTC.
    pub timezone: Option<String>,
}

impl CreateCampaignRequest {
    /// Turn the body into a draft, rejecting blank identifiers and bad offsets.
    pub fn into_draft(self) -> Result<CampaignDraft, ValidationError> {
        if self.owner_id.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "ownerId",
                reason: "must not be blank".to_string(),
            });
        }
        if self.service_id.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "serviceId",
                reason: "must not be blank".to_string(),
            });
        }

        let timezone = match self.timezone.as_deref() {
            Some(raw) => CampaignTimezone::parse(raw)?,
            None => CampaignTimezone::utc(),
        };

        Ok(CampaignDraft {
            owner_id: self.owner_id.trim().to_string(),
            service_id: self.service_id.trim().to_string(),
            ad_type: self.ad_type,
            budget: self.budget,
            budget_type: self.budget_type,
            bid_amount: self.bid_amount,
            max_bid: self.max_bid,
            start_date: self.start_date,
            end_date: self.end_date,
            targeting: Targeting::new(self.cities, self.category.as_deref()),
            auto_renew: self.auto_renew,
            timezone,
        })
    }
}

/// A placement request from the search layer.
///
/// ## Example JSON
///
/// ```json
/// {
///     "city": "Miami",
///     "category": "Plumbing",
///     "adType": "TOP_LIST",
///     "topN": 3
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOpportunityRequest {
    pub city: String,
    pub category: Option<String>,
    pub ad_type: AdType,

    /// Winners wanted. Default: 1
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_top_n() -> usize {
    1
}

impl DeliveryOpportunityRequest {
    pub fn into_opportunity(self, now: DateTime<Utc>) -> Result<DeliveryOpportunity, ValidationError> {
        if self.city.trim().is_empty() {
            return Err(ValidationError::BlankCity);
        }
        if self.top_n == 0 {
            return Err(ValidationError::InvalidField {
                field: "topN",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(DeliveryOpportunity {
            city: self.city.trim().to_string(),
            category: self.category.map(|c| c.trim().to_string()),
            ad_type: self.ad_type,
            top_n: self.top_n,
            timestamp: self.timestamp.unwrap_or(now),
        })
    }
}

/// A billable click.
///
/// ## Example JSON
///
/// ```json
/// {
///     "campaignId": "550e8400-e29b-41d4-a716-446655440000",
///     "cost": 150
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEventRequest {
    pub campaign_id: Uuid,

    /// Click price in minor units. Default: the campaign's effective bid.
    pub cost: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A lead (contact or booking request) generated by a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEventRequest {
    pub campaign_id: Uuid,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Refund of a disputed or invalid click.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub campaign_id: Uuid,
    pub amount: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Booking revenue attributed to a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueAttributionRequest {
    pub campaign_id: Uuid,
    pub amount: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Billing processor webhook.
///
/// ## Example JSON
///
/// ```json
/// {
///     "chargeId": "0d9c...",
///     "campaignId": "550e...",
///     "status": "failed",
///     "reason": "card_declined"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingWebhookRequest {
    pub charge_id: Uuid,
    pub campaign_id: Uuid,
    pub status: WebhookStatus,
    pub reason: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for the campaign list.
///
/// ```text
/// GET /campaigns?owner=provider-42
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCampaignsQuery {
    pub owner: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for metric rollups.
///
/// ```text
/// GET /campaigns/{id}/metrics?granularity=weekly&from=2026-10-01&to=2026-10-31
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub granularity: Granularity,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Optional evaluation time for read endpoints and lifecycle actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimestampQuery {
    pub timestamp: Option<DateTime<Utc>>,
}
