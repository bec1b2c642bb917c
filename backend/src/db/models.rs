//! # Database Models
//!
//! Row shapes of the persistence tables and their mapping onto engine
//! types. Enums are stored as their SCREAMING_SNAKE_CASE names, offsets
//! as `"+HH:MM"` strings, counters as `BIGINT`.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `campaigns` | Campaign definitions and current status |
//! | `budget_states` | Ledger state per campaign |
//! | `campaign_transitions` | Append-only lifecycle log |
//! | `budget_alerts` | Emitted alerts |
//! | `campaign_daily_metrics` | Counters per campaign-local day |
//! | `billing_charges` | Charges and their retry state |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐       ┌──────────────────────┐
//! │  campaigns  │──────<│ campaign_transitions │
//! │             │       └──────────────────────┘
//! │ id (PK)     │       ┌──────────────────────┐
//! │ owner_id    │──────<│    budget_alerts     │
//! │ status      │       └──────────────────────┘
//! │ ...         │       ┌──────────────────────┐
//! └─────────────┘──────<│campaign_daily_metrics│
//!     │     │           └──────────────────────┘
//!     │     │           ┌──────────────────────┐
//!     │     └──────────<│   billing_charges    │
//!     ▼                 └──────────────────────┘
//! ┌──────────────┐
//! │budget_states │ (1:1)
//! └──────────────┘
//! ```

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Campaign, CampaignTimezone, Targeting};
use crate::services::{BudgetAlert, BudgetState, Charge, Counters, TransitionRecord};

use super::DatabaseError;

fn parse_column<T>(table: &'static str, raw: &str) -> Result<T, DatabaseError>
where
    T: FromStr<Err = String>,
{
    raw.parse()
        .map_err(|reason| DatabaseError::InvalidRow { table, reason })
}

fn parse_timezone(table: &'static str, raw: &str) -> Result<CampaignTimezone, DatabaseError> {
    CampaignTimezone::parse(raw).map_err(|e| DatabaseError::InvalidRow {
        table,
        reason: e.to_string(),
    })
}

fn to_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_count(table: &'static str, value: i64) -> Result<u64, DatabaseError> {
    u64::try_from(value).map_err(|_| DatabaseError::InvalidRow {
        table,
        reason: format!("negative counter {}", value),
    })
}

// ============================================
// CAMPAIGNS
// ============================================

/// A row of `campaigns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub service_id: String,
    pub ad_type: String,
    pub status: String,
    pub budget: i64,
    pub budget_type: String,
    pub bid_amount: Option<i64>,
    pub max_bid: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cities: Vec<String>,
    pub category: Option<String>,
    pub auto_renew: bool,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Campaign> for CampaignRecord {
    fn from(c: &Campaign) -> Self {
        Self {
            id: c.id,
            owner_id: c.owner_id.clone(),
            service_id: c.service_id.clone(),
            ad_type: c.ad_type.as_str().to_string(),
            status: c.status.as_str().to_string(),
            budget: c.budget,
            budget_type: c.budget_type.as_str().to_string(),
            bid_amount: c.bid_amount,
            max_bid: c.max_bid,
            start_date: c.start_date,
            end_date: c.end_date,
            cities: c.targeting.cities.iter().cloned().collect(),
            category: c.targeting.category.clone(),
            auto_renew: c.auto_renew,
            timezone: c.timezone.to_string(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl TryFrom<CampaignRecord> for Campaign {
    type Error = DatabaseError;

    fn try_from(r: CampaignRecord) -> Result<Self, Self::Error> {
        const TABLE: &str = "campaigns";
        Ok(Campaign {
            id: r.id,
            owner_id: r.owner_id,
            service_id: r.service_id,
            ad_type: parse_column(TABLE, &r.ad_type)?,
            status: parse_column(TABLE, &r.status)?,
            budget: r.budget,
            budget_type: parse_column(TABLE, &r.budget_type)?,
            bid_amount: r.bid_amount,
            max_bid: r.max_bid,
            start_date: r.start_date,
            end_date: r.end_date,
            targeting: Targeting::new(r.cities, r.category.as_deref()),
            auto_renew: r.auto_renew,
            timezone: parse_timezone(TABLE, &r.timezone)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

// ============================================
// BUDGET STATES
// ============================================

/// A row of `budget_states`.
///
/// `period` is `INTEGER` in PostgreSQL, which has no unsigned types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStateRecord {
    pub campaign_id: Uuid,
    pub budget_type: String,
    pub budget: i64,
    pub timezone: String,
    pub total_spent: i64,
    pub spent_today: i64,
    pub lifetime_spent: i64,
    pub last_reset_date: NaiveDate,
    pub period: i32,
    pub period_started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&BudgetState> for BudgetStateRecord {
    fn from(s: &BudgetState) -> Self {
        Self {
            campaign_id: s.campaign_id,
            budget_type: s.budget_type.as_str().to_string(),
            budget: s.budget,
            timezone: s.timezone.to_string(),
            total_spent: s.total_spent,
            spent_today: s.spent_today,
            lifetime_spent: s.lifetime_spent,
            last_reset_date: s.last_reset_date,
            period: i32::try_from(s.period).unwrap_or(i32::MAX),
            period_started_at: s.period_started_at,
            closed_at: s.closed_at,
            updated_at: s.updated_at,
        }
    }
}

impl TryFrom<BudgetStateRecord> for BudgetState {
    type Error = DatabaseError;

    fn try_from(r: BudgetStateRecord) -> Result<Self, Self::Error> {
        const TABLE: &str = "budget_states";
        Ok(BudgetState {
            campaign_id: r.campaign_id,
            budget_type: parse_column(TABLE, &r.budget_type)?,
            budget: r.budget,
            timezone: parse_timezone(TABLE, &r.timezone)?,
            total_spent: r.total_spent,
            spent_today: r.spent_today,
            lifetime_spent: r.lifetime_spent,
            last_reset_date: r.last_reset_date,
            period: u32::try_from(r.period).map_err(|_| DatabaseError::InvalidRow {
                table: TABLE,
                reason: format!("negative period {}", r.period),
            })?,
            period_started_at: r.period_started_at,
            closed_at: r.closed_at,
            updated_at: r.updated_at,
        })
    }
}

// ============================================
// TRANSITIONS & ALERTS
// ============================================

/// A row of `campaign_transitions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRow {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub from_status: String,
    pub to_status: String,
    pub action: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&TransitionRecord> for TransitionRow {
    fn from(t: &TransitionRecord) -> Self {
        Self {
            id: t.id,
            campaign_id: t.campaign_id,
            from_status: t.from.as_str().to_string(),
            to_status: t.to.as_str().to_string(),
            action: t.action.as_str().to_string(),
            reason: t.reason.clone(),
            created_at: t.at,
        }
    }
}

impl TryFrom<TransitionRow> for TransitionRecord {
    type Error = DatabaseError;

    fn try_from(r: TransitionRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "campaign_transitions";
        Ok(TransitionRecord {
            id: r.id,
            campaign_id: r.campaign_id,
            from: parse_column(TABLE, &r.from_status)?,
            to: parse_column(TABLE, &r.to_status)?,
            action: parse_column(TABLE, &r.action)?,
            reason: r.reason,
            at: r.created_at,
        })
    }
}

/// A row of `budget_alerts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub severity: String,
    pub ratio: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&BudgetAlert> for AlertRecord {
    fn from(a: &BudgetAlert) -> Self {
        Self {
            id: a.id,
            campaign_id: a.campaign_id,
            severity: a.kind.as_str().to_string(),
            ratio: a.ratio,
            message: a.message.clone(),
            created_at: a.timestamp,
        }
    }
}

impl TryFrom<AlertRecord> for BudgetAlert {
    type Error = DatabaseError;

    fn try_from(r: AlertRecord) -> Result<Self, Self::Error> {
        Ok(BudgetAlert {
            id: r.id,
            campaign_id: r.campaign_id,
            kind: parse_column("budget_alerts", &r.severity)?,
            ratio: r.ratio,
            message: r.message,
            timestamp: r.created_at,
        })
    }
}

// ============================================
// METRICS
// ============================================

/// A row of `campaign_daily_metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetricRecord {
    pub campaign_id: Uuid,
    pub bucket_date: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub leads: i64,
    pub spend: i64,
    pub refunded: i64,
    pub revenue: i64,
}

impl DailyMetricRecord {
    pub fn new(campaign_id: Uuid, bucket_date: NaiveDate, c: &Counters) -> Self {
        Self {
            campaign_id,
            bucket_date,
            impressions: to_count(c.impressions),
            clicks: to_count(c.clicks),
            leads: to_count(c.leads),
            spend: c.spend,
            refunded: c.refunded,
            revenue: c.revenue,
        }
    }

    pub fn counters(&self) -> Result<Counters, DatabaseError> {
        const TABLE: &str = "campaign_daily_metrics";
        Ok(Counters {
            impressions: from_count(TABLE, self.impressions)?,
            clicks: from_count(TABLE, self.clicks)?,
            leads: from_count(TABLE, self.leads)?,
            spend: self.spend,
            refunded: self.refunded,
            revenue: self.revenue,
        })
    }
}

// ============================================
// BILLING
// ============================================

/// A row of `billing_charges`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub period_label: String,
    pub amount: i64,
    pub attempts: i32,
    pub status: String,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Charge> for ChargeRecord {
    fn from(c: &Charge) -> Self {
        Self {
            id: c.id,
            campaign_id: c.campaign_id,
            period_label: c.period_label.clone(),
            amount: c.amount,
            attempts: i32::try_from(c.attempts).unwrap_or(i32::MAX),
            status: c.status.as_str().to_string(),
            last_error: c.last_error.clone(),
            next_retry_at: c.next_retry_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl TryFrom<ChargeRecord> for Charge {
    type Error = DatabaseError;

    fn try_from(r: ChargeRecord) -> Result<Self, Self::Error> {
        const TABLE: &str = "billing_charges";
        Ok(Charge {
            id: r.id,
            campaign_id: r.campaign_id,
            period_label: r.period_label,
            amount: r.amount,
            attempts: u32::try_from(r.attempts).map_err(|_| DatabaseError::InvalidRow {
                table: TABLE,
                reason: format!("negative attempts {}", r.attempts),
            })?,
            status: parse_column(TABLE, &r.status)?,
            last_error: r.last_error,
            next_retry_at: r.next_retry_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::{at, draft};
    use crate::models::{BudgetType, CampaignStatus};
    use crate::services::{AlertKind, LifecycleAction};

    #[test]
    fn test_campaign_record_round_trip() {
        let mut d = draft(BudgetType::Total, 10_000);
        d.timezone = CampaignTimezone::parse("-04:00").unwrap();
        d.targeting = Targeting::new(["Miami", "Orlando"], Some("Plumbing"));
        let campaign = Campaign::new(d, at(2026, 10, 1, 0, 0)).unwrap();

        let record = CampaignRecord::from(&campaign);
        assert_eq!(record.ad_type, "TOP_LIST");
        assert_eq!(record.timezone, "-04:00");
        assert_eq!(record.cities, vec!["Miami".to_string(), "Orlando".to_string()]);

        let back = Campaign::try_from(record).unwrap();
        assert_eq!(back, campaign);
    }

    #[test]
    fn test_bad_enum_column_is_invalid_row() {
        let campaign = Campaign::new(draft(BudgetType::Daily, 500), at(2026, 10, 1, 0, 0)).unwrap();
        let mut record = CampaignRecord::from(&campaign);
        record.status = "ARCHIVED".to_string();

        assert!(matches!(
            Campaign::try_from(record),
            Err(DatabaseError::InvalidRow { table: "campaigns", .. })
        ));
    }

    #[test]
    fn test_transition_and_alert_rows() {
        let now = at(2026, 10, 18, 9, 0);
        let id = Uuid::new_v4();
        let transition = TransitionRecord {
            id: Uuid::new_v4(),
            campaign_id: id,
            from: CampaignStatus::Active,
            to: CampaignStatus::Paused,
            action: LifecycleAction::PaymentFailed,
            reason: Some("payment failed: declined".to_string()),
            at: now,
        };
        let row = TransitionRow::from(&transition);
        assert_eq!(row.action, "PAYMENT_FAILED");
        assert_eq!(TransitionRecord::try_from(row).unwrap(), transition);

        let alert = BudgetAlert::new(id, AlertKind::Critical, 0.96, "96% spent".to_string(), now);
        let record = AlertRecord::from(&alert);
        assert_eq!(record.severity, "CRITICAL");
        assert_eq!(BudgetAlert::try_from(record).unwrap(), alert);
    }

    #[test]
    fn test_negative_counter_rejected() {
        let mut record = DailyMetricRecord::new(
            Uuid::new_v4(),
            at(2026, 10, 18, 0, 0).date_naive(),
            &Counters::default(),
        );
        record.clicks = -1;
        assert!(record.counters().is_err());
    }
}
