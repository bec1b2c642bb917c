//! # Database Queries
//!
//! SQL for the write-behind store.
//!
//! ## Query Organization
//!
//! - `persist_snapshot` - upsert the whole engine state in one transaction
//! - `insert_*` - append-only rows written by the event forwarder
//! - `load_snapshot` - read everything back at startup
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>`. A row that no longer
//! maps onto an engine type is `InvalidRow`.

use std::collections::HashMap;

use deadpool_postgres::Pool;
use tokio_postgres::{GenericClient, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::Campaign;
use crate::services::{BudgetAlert, BudgetState, Charge, Counters, EngineSnapshot, TransitionRecord};

use super::models::*;
use super::DatabaseError;

// ============================================
// HELPER FUNCTIONS
// ============================================

async fn client(pool: &Pool) -> Result<deadpool_postgres::Client, DatabaseError> {
    pool.get()
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

fn row_to_campaign(row: &Row) -> Result<CampaignRecord, DatabaseError> {
    Ok(CampaignRecord {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        service_id: row.try_get("service_id")?,
        ad_type: row.try_get("ad_type")?,
        status: row.try_get("status")?,
        budget: row.try_get("budget")?,
        budget_type: row.try_get("budget_type")?,
        bid_amount: row.try_get("bid_amount")?,
        max_bid: row.try_get("max_bid")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        cities: row.try_get("cities")?,
        category: row.try_get("category")?,
        auto_renew: row.try_get("auto_renew")?,
        timezone: row.try_get("timezone")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_budget_state(row: &Row) -> Result<BudgetStateRecord, DatabaseError> {
    Ok(BudgetStateRecord {
        campaign_id: row.try_get("campaign_id")?,
        budget_type: row.try_get("budget_type")?,
        budget: row.try_get("budget")?,
        timezone: row.try_get("timezone")?,
        total_spent: row.try_get("total_spent")?,
        spent_today: row.try_get("spent_today")?,
        lifetime_spent: row.try_get("lifetime_spent")?,
        last_reset_date: row.try_get("last_reset_date")?,
        period: row.try_get("period")?,
        period_started_at: row.try_get("period_started_at")?,
        closed_at: row.try_get("closed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transition(row: &Row) -> Result<TransitionRow, DatabaseError> {
    Ok(TransitionRow {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        from_status: row.try_get("from_status")?,
        to_status: row.try_get("to_status")?,
        action: row.try_get("action")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_alert(row: &Row) -> Result<AlertRecord, DatabaseError> {
    Ok(AlertRecord {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        severity: row.try_get("severity")?,
        ratio: row.try_get("ratio")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_daily_metric(row: &Row) -> Result<DailyMetricRecord, DatabaseError> {
    Ok(DailyMetricRecord {
        campaign_id: row.try_get("campaign_id")?,
        bucket_date: row.try_get("bucket_date")?,
        impressions: row.try_get("impressions")?,
        clicks: row.try_get("clicks")?,
        leads: row.try_get("leads")?,
        spend: row.try_get("spend")?,
        refunded: row.try_get("refunded")?,
        revenue: row.try_get("revenue")?,
    })
}

fn row_to_charge(row: &Row) -> Result<ChargeRecord, DatabaseError> {
    Ok(ChargeRecord {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        period_label: row.try_get("period_label")?,
        amount: row.try_get("amount")?,
        attempts: row.try_get("attempts")?,
        status: row.try_get("status")?,
        last_error: row.try_get("last_error")?,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================
// UPSERTS
// ============================================

async fn upsert_campaign<C: GenericClient + Sync>(
    client: &C,
    campaign: &Campaign,
) -> Result<(), DatabaseError> {
    let r = CampaignRecord::from(campaign);
    client
        .execute(
            r#"
            INSERT INTO campaigns (
                id, owner_id, service_id, ad_type, status,
                budget, budget_type, bid_amount, max_bid,
                start_date, end_date, cities, category,
                auto_renew, timezone, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                budget = EXCLUDED.budget,
                bid_amount = EXCLUDED.bid_amount,
                max_bid = EXCLUDED.max_bid,
                end_date = EXCLUDED.end_date,
                cities = EXCLUDED.cities,
                category = EXCLUDED.category,
                auto_renew = EXCLUDED.auto_renew,
                updated_at = EXCLUDED.updated_at
            "#,
            &[
                &r.id,
                &r.owner_id,
                &r.service_id,
                &r.ad_type,
                &r.status,
                &r.budget,
                &r.budget_type,
                &r.bid_amount,
                &r.max_bid,
                &r.start_date,
                &r.end_date,
                &r.cities,
                &r.category,
                &r.auto_renew,
                &r.timezone,
                &r.created_at,
                &r.updated_at,
            ],
        )
        .await?;
    Ok(())
}

async fn upsert_budget_state<C: GenericClient + Sync>(
    client: &C,
    state: &BudgetState,
) -> Result<(), DatabaseError> {
    let r = BudgetStateRecord::from(state);
    client
        .execute(
            r#"
            INSERT INTO budget_states (
                campaign_id, budget_type, budget, timezone,
                total_spent, spent_today, lifetime_spent,
                last_reset_date, period, period_started_at, closed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (campaign_id) DO UPDATE SET
                budget = EXCLUDED.budget,
                total_spent = EXCLUDED.total_spent,
                spent_today = EXCLUDED.spent_today,
                lifetime_spent = EXCLUDED.lifetime_spent,
                last_reset_date = EXCLUDED.last_reset_date,
                period = EXCLUDED.period,
                period_started_at = EXCLUDED.period_started_at,
                closed_at = EXCLUDED.closed_at,
                updated_at = EXCLUDED.updated_at
            "#,
            &[
                &r.campaign_id,
                &r.budget_type,
                &r.budget,
                &r.timezone,
                &r.total_spent,
                &r.spent_today,
                &r.lifetime_spent,
                &r.last_reset_date,
                &r.period,
                &r.period_started_at,
                &r.closed_at,
                &r.updated_at,
            ],
        )
        .await?;
    Ok(())
}

async fn upsert_daily_metric<C: GenericClient + Sync>(
    client: &C,
    r: &DailyMetricRecord,
) -> Result<(), DatabaseError> {
    client
        .execute(
            r#"
            INSERT INTO campaign_daily_metrics (
                campaign_id, bucket_date, impressions, clicks, leads, spend, refunded, revenue
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (campaign_id, bucket_date) DO UPDATE SET
                impressions = EXCLUDED.impressions,
                clicks = EXCLUDED.clicks,
                leads = EXCLUDED.leads,
                spend = EXCLUDED.spend,
                refunded = EXCLUDED.refunded,
                revenue = EXCLUDED.revenue
            "#,
            &[
                &r.campaign_id,
                &r.bucket_date,
                &r.impressions,
                &r.clicks,
                &r.leads,
                &r.spend,
                &r.refunded,
                &r.revenue,
            ],
        )
        .await?;
    Ok(())
}

async fn upsert_charge<C: GenericClient + Sync>(client: &C, charge: &Charge) -> Result<(), DatabaseError> {
    let r = ChargeRecord::from(charge);
    client
        .execute(
            r#"
            INSERT INTO billing_charges (
                id, campaign_id, period_label, amount, attempts,
                status, last_error, next_retry_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                attempts = EXCLUDED.attempts,
                status = EXCLUDED.status,
                last_error = EXCLUDED.last_error,
                next_retry_at = EXCLUDED.next_retry_at,
                updated_at = EXCLUDED.updated_at
            "#,
            &[
                &r.id,
                &r.campaign_id,
                &r.period_label,
                &r.amount,
                &r.attempts,
                &r.status,
                &r.last_error,
                &r.next_retry_at,
                &r.created_at,
                &r.updated_at,
            ],
        )
        .await?;
    Ok(())
}

// ============================================
// APPEND-ONLY INSERTS
// ============================================

async fn insert_transition_with<C: GenericClient + Sync>(
    client: &C,
    record: &TransitionRecord,
) -> Result<(), DatabaseError> {
    let r = TransitionRow::from(record);
    client
        .execute(
            r#"
            INSERT INTO campaign_transitions (
                id, campaign_id, from_status, to_status, action, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
            &[
                &r.id,
                &r.campaign_id,
                &r.from_status,
                &r.to_status,
                &r.action,
                &r.reason,
                &r.created_at,
            ],
        )
        .await?;
    Ok(())
}

async fn insert_alert_with<C: GenericClient + Sync>(
    client: &C,
    alert: &BudgetAlert,
) -> Result<(), DatabaseError> {
    let r = AlertRecord::from(alert);
    client
        .execute(
            r#"
            INSERT INTO budget_alerts (id, campaign_id, severity, ratio, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
            &[
                &r.id,
                &r.campaign_id,
                &r.severity,
                &r.ratio,
                &r.message,
                &r.created_at,
            ],
        )
        .await?;
    Ok(())
}

/// Append one lifecycle transition. Re-inserting the same id is a no-op.
///
/// The campaign row must already exist, so a transition of a campaign
/// created since the last flush fails until the next flush writes it.
pub async fn insert_transition(pool: &Pool, record: &TransitionRecord) -> Result<(), DatabaseError> {
    let client = client(pool).await?;
    let pg: &tokio_postgres::Client = &client;
    insert_transition_with(pg, record).await
}

/// Append one emitted alert. Re-inserting the same id is a no-op.
pub async fn insert_alert(pool: &Pool, alert: &BudgetAlert) -> Result<(), DatabaseError> {
    let client = client(pool).await?;
    let pg: &tokio_postgres::Client = &client;
    insert_alert_with(pg, alert).await
}

// ============================================
// SNAPSHOTS
// ============================================

/// Write the whole engine state in one transaction.
///
/// Campaigns go first so every child row has its parent.
pub async fn persist_snapshot(pool: &Pool, snapshot: &EngineSnapshot) -> Result<(), DatabaseError> {
    let mut client = client(pool).await?;
    let tx = client.transaction().await?;
    let pg: &tokio_postgres::Transaction<'_> = &tx;

    for (campaign, history) in &snapshot.campaigns {
        upsert_campaign(pg, campaign).await?;
        for record in history {
            insert_transition_with(pg, record).await?;
        }
    }
    for state in &snapshot.budgets {
        upsert_budget_state(pg, state).await?;
    }
    for (campaign_id, buckets) in &snapshot.metrics {
        for (date, counters) in buckets {
            upsert_daily_metric(pg, &DailyMetricRecord::new(*campaign_id, *date, counters)).await?;
        }
    }
    for alert in &snapshot.alerts {
        insert_alert_with(pg, alert).await?;
    }
    for charge in &snapshot.charges {
        upsert_charge(pg, charge).await?;
    }

    tx.commit().await?;
    debug!(
        "Persisted {} campaigns, {} charges",
        snapshot.campaigns.len(),
        snapshot.charges.len()
    );
    Ok(())
}

/// Read everything back for startup restore.
pub async fn load_snapshot(pool: &Pool) -> Result<EngineSnapshot, DatabaseError> {
    let client = client(pool).await?;

    let mut histories: HashMap<Uuid, Vec<TransitionRecord>> = HashMap::new();
    for row in client
        .query("SELECT * FROM campaign_transitions ORDER BY created_at ASC", &[])
        .await?
    {
        let record = TransitionRecord::try_from(row_to_transition(&row)?)?;
        histories.entry(record.campaign_id).or_default().push(record);
    }

    let mut campaigns = Vec::new();
    for row in client
        .query("SELECT * FROM campaigns ORDER BY created_at ASC", &[])
        .await?
    {
        let campaign = Campaign::try_from(row_to_campaign(&row)?)?;
        let history = histories.remove(&campaign.id).unwrap_or_default();
        campaigns.push((campaign, history));
    }

    let mut budgets = Vec::new();
    for row in client.query("SELECT * FROM budget_states", &[]).await? {
        budgets.push(BudgetState::try_from(row_to_budget_state(&row)?)?);
    }

    let mut buckets: HashMap<Uuid, Vec<(chrono::NaiveDate, Counters)>> = HashMap::new();
    for row in client
        .query(
            "SELECT * FROM campaign_daily_metrics ORDER BY bucket_date ASC",
            &[],
        )
        .await?
    {
        let record = row_to_daily_metric(&row)?;
        buckets
            .entry(record.campaign_id)
            .or_default()
            .push((record.bucket_date, record.counters()?));
    }

    let mut alerts = Vec::new();
    for row in client
        .query("SELECT * FROM budget_alerts ORDER BY created_at ASC", &[])
        .await?
    {
        alerts.push(BudgetAlert::try_from(row_to_alert(&row)?)?);
    }

    let mut charges = Vec::new();
    for row in client.query("SELECT * FROM billing_charges", &[]).await? {
        charges.push(Charge::try_from(row_to_charge(&row)?)?);
    }

    info!(
        "Loaded {} campaigns, {} budget states, {} charges from the database",
        campaigns.len(),
        budgets.len(),
        charges.len()
    );

    Ok(EngineSnapshot {
        campaigns,
        budgets,
        metrics: buckets.into_iter().collect(),
        alerts,
        charges,
    })
}
