//! # Metrics Aggregator
//!
//! Accumulates delivery events into per-campaign counters and derives
//! the performance ratios shown on the dashboard.
//!
//! ## Counters
//!
//! Every counter only ever grows. A disputed click is refunded by the
//! ledger and recorded here under `refunded`; the click itself stays
//! counted because it happened.
//!
//! ## Derived Ratios
//!
//! | Ratio | Formula | Zero when |
//! |-------|---------|-----------|
//! | CTR | clicks / impressions | no impressions |
//! | CPC | spend / clicks | no clicks |
//! | Conversion rate | leads / clicks | no clicks |
//! | ROAS | revenue / spend | no spend |
//!
//! Ratios are computed on read and never stored.
//!
//! ## Buckets
//!
//! Each event also lands in a bucket keyed by the campaign-local date.
//! Weekly (Monday start) and monthly rollups fold those daily buckets.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::safe_ratio;

/// Days in the rolling CTR window used by the auction.
pub const ROLLING_CTR_DAYS: i64 = 7;

/// Raw event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub impressions: u64,
    pub clicks: u64,
    pub leads: u64,

    /// Gross click spend in minor units.
    pub spend: i64,

    /// Refunded spend in minor units.
    pub refunded: i64,

    /// Attributed booking revenue in minor units.
    pub revenue: i64,
}

impl Counters {
    fn absorb(&mut self, other: &Counters) {
        self.impressions = self.impressions.saturating_add(other.impressions);
        self.clicks = self.clicks.saturating_add(other.clicks);
        self.leads = self.leads.saturating_add(other.leads);
        self.spend = self.spend.saturating_add(other.spend);
        self.refunded = self.refunded.saturating_add(other.refunded);
        self.revenue = self.revenue.saturating_add(other.revenue);
    }

    /// Spend net of refunds.
    pub fn net_spend(&self) -> i64 {
        self.spend.saturating_sub(self.refunded)
    }
}

/// Performance ratios over a set of counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedRatios {
    pub ctr: f64,
    pub cpc: f64,
    pub conversion_rate: f64,
    pub roas: f64,
}

impl DerivedRatios {
    pub fn compute(counters: &Counters, spend: i64) -> Self {
        let impressions = counters.impressions as f64;
        let clicks = counters.clicks as f64;
        let spend = spend as f64;

        Self {
            ctr: safe_ratio(clicks, impressions),
            cpc: safe_ratio(spend, clicks),
            conversion_rate: safe_ratio(counters.leads as f64, clicks),
            roas: safe_ratio(counters.revenue as f64, spend),
        }
    }
}

/// Per-campaign metrics as returned by `GET /campaigns/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub campaign_id: Uuid,
    pub impressions: u64,
    pub clicks: u64,
    pub leads: u64,

    /// Ledger spend, net of refunds.
    pub total_spent: i64,
    pub revenue: i64,

    #[serde(flatten)]
    pub ratios: DerivedRatios,
}

/// Rollup window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// First day of the window containing `date`.
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }
}

/// One row of a rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBucket {
    pub period_start: NaiveDate,
    pub granularity: Granularity,

    #[serde(flatten)]
    pub counters: Counters,

    #[serde(flatten)]
    pub ratios: DerivedRatios,
}

#[derive(Debug, Default)]
struct CampaignMetrics {
    totals: Counters,
    daily: BTreeMap<NaiveDate, Counters>,
}

impl CampaignMetrics {
    fn record(&mut self, date: NaiveDate, apply: impl Fn(&mut Counters)) {
        apply(&mut self.totals);
        apply(self.daily.entry(date).or_default());
    }
}

/// Time-bucketed event counters for every campaign.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    campaigns: DashMap<Uuid, CampaignMetrics>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_impression(&self, campaign_id: Uuid, date: NaiveDate) {
        self.entry(campaign_id, date, |c| {
            c.impressions = c.impressions.saturating_add(1);
        });
    }

    /// Count a charged click and its cost.
    pub fn record_click(&self, campaign_id: Uuid, cost: i64, date: NaiveDate) {
        self.entry(campaign_id, date, |c| {
            c.clicks = c.clicks.saturating_add(1);
            c.spend = c.spend.saturating_add(cost);
        });
    }

    pub fn record_lead(&self, campaign_id: Uuid, date: NaiveDate) {
        self.entry(campaign_id, date, |c| c.leads = c.leads.saturating_add(1));
    }

    pub fn record_refund(&self, campaign_id: Uuid, amount: i64, date: NaiveDate) {
        self.entry(campaign_id, date, |c| {
            c.refunded = c.refunded.saturating_add(amount);
        });
    }

    /// Counters saturate rather than wrap, since revenue amounts come
    /// straight from callers.
    pub fn attribute_revenue(&self, campaign_id: Uuid, amount: i64, date: NaiveDate) {
        self.entry(campaign_id, date, |c| {
            c.revenue = c.revenue.saturating_add(amount);
        });
    }

    /// Lifetime counters plus derived ratios.
    ///
    /// ## Arguments
    ///
    /// * `campaign_id` - Campaign to read
    /// * `total_spent` - Ledger spend (lifetime, net of refunds)
    pub fn snapshot(&self, campaign_id: Uuid, total_spent: i64) -> MetricSnapshot {
        let totals = self
            .campaigns
            .get(&campaign_id)
            .map(|m| m.totals)
            .unwrap_or_default();

        MetricSnapshot {
            campaign_id,
            impressions: totals.impressions,
            clicks: totals.clicks,
            leads: totals.leads,
            total_spent,
            revenue: totals.revenue,
            ratios: DerivedRatios::compute(&totals, total_spent),
        }
    }

    /// CTR over the last [`ROLLING_CTR_DAYS`] local days ending at `today`.
    pub fn rolling_ctr(&self, campaign_id: Uuid, today: NaiveDate) -> f64 {
        let Some(metrics) = self.campaigns.get(&campaign_id) else {
            return 0.0;
        };

        let from = today - Duration::days(ROLLING_CTR_DAYS - 1);
        let mut window = Counters::default();
        for (_, counters) in metrics.daily.range(from..=today) {
            window.absorb(counters);
        }

        safe_ratio(window.clicks as f64, window.impressions as f64)
    }

    /// Fold daily buckets into the requested granularity.
    ///
    /// `from` / `to` bound the daily buckets included (inclusive).
    pub fn rollup(
        &self,
        campaign_id: Uuid,
        granularity: Granularity,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<MetricBucket> {
        let Some(metrics) = self.campaigns.get(&campaign_id) else {
            return Vec::new();
        };

        let mut folded: BTreeMap<NaiveDate, Counters> = BTreeMap::new();
        for (date, counters) in &metrics.daily {
            if from.is_some_and(|f| *date < f) || to.is_some_and(|t| *date > t) {
                continue;
            }
            folded
                .entry(granularity.bucket_start(*date))
                .or_default()
                .absorb(counters);
        }

        folded
            .into_iter()
            .map(|(period_start, counters)| MetricBucket {
                period_start,
                granularity,
                ratios: DerivedRatios::compute(&counters, counters.net_spend()),
                counters,
            })
            .collect()
    }

    /// Daily buckets for persistence.
    pub fn daily_buckets(&self, campaign_id: Uuid) -> Vec<(NaiveDate, Counters)> {
        self.campaigns
            .get(&campaign_id)
            .map(|m| m.daily.iter().map(|(d, c)| (*d, *c)).collect())
            .unwrap_or_default()
    }

    /// Rebuild a campaign's counters from persisted daily buckets.
    pub fn restore(&self, campaign_id: Uuid, buckets: Vec<(NaiveDate, Counters)>) {
        let mut metrics = CampaignMetrics::default();
        for (date, counters) in buckets {
            metrics.totals.absorb(&counters);
            metrics.daily.entry(date).or_default().absorb(&counters);
        }
        self.campaigns.insert(campaign_id, metrics);
    }

    fn entry(&self, campaign_id: Uuid, date: NaiveDate, apply: impl Fn(&mut Counters)) {
        self.campaigns
            .entry(campaign_id)
            .or_default()
            .record(date, apply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::date;

    #[test]
    fn test_empty_snapshot_has_no_nan() {
        let metrics = MetricsAggregator::new();
        let snapshot = metrics.snapshot(Uuid::new_v4(), 0);

        for ratio in [
            snapshot.ratios.ctr,
            snapshot.ratios.cpc,
            snapshot.ratios.conversion_rate,
            snapshot.ratios.roas,
        ] {
            assert_eq!(ratio, 0.0);
            assert!(ratio.is_finite());
        }
    }

    #[test]
    fn test_huge_revenue_saturates() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();
        let day = date(2026, 10, 18);

        metrics.attribute_revenue(id, i64::MAX, day);
        metrics.attribute_revenue(id, i64::MAX, day);
        metrics.attribute_revenue(id, 1, date(2026, 10, 19));

        assert_eq!(metrics.snapshot(id, 100).revenue, i64::MAX);
        let buckets = metrics.daily_buckets(id);
        assert_eq!(buckets[0].1.revenue, i64::MAX);

        let rollup = metrics.rollup(id, Granularity::Monthly, None, None);
        assert_eq!(rollup[0].counters.revenue, i64::MAX);
    }

    #[test]
    fn test_derived_ratios() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();
        let day = date(2026, 10, 18);

        for _ in 0..10 {
            metrics.record_impression(id, day);
        }
        metrics.record_click(id, 100, day);
        metrics.record_click(id, 100, day);
        metrics.record_lead(id, day);
        metrics.attribute_revenue(id, 1_000, day);

        let snapshot = metrics.snapshot(id, 200);
        assert_eq!(snapshot.ratios.ctr, 0.2);
        assert_eq!(snapshot.ratios.cpc, 100.0);
        assert_eq!(snapshot.ratios.conversion_rate, 0.5);
        assert_eq!(snapshot.ratios.roas, 5.0);
    }

    #[test]
    fn test_impressions_without_clicks() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();
        metrics.record_impression(id, date(2026, 10, 18));

        let snapshot = metrics.snapshot(id, 0);
        assert_eq!(snapshot.ratios.ctr, 0.0);
        assert_eq!(snapshot.ratios.cpc, 0.0);
        assert_eq!(snapshot.ratios.conversion_rate, 0.0);
    }

    #[test]
    fn test_refund_does_not_roll_back_clicks() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();
        let day = date(2026, 10, 18);
        metrics.record_click(id, 100, day);
        metrics.record_refund(id, 100, day);

        assert_eq!(metrics.snapshot(id, 0).clicks, 1);
        let rollup = metrics.rollup(id, Granularity::Daily, None, None);
        assert_eq!(rollup[0].counters.refunded, 100);
        assert_eq!(rollup[0].counters.net_spend(), 0);
    }

    #[test]
    fn test_rolling_ctr_window() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();

        // Old traffic outside the 7-day window
        for _ in 0..10 {
            metrics.record_impression(id, date(2026, 10, 1));
        }
        for _ in 0..4 {
            metrics.record_impression(id, date(2026, 10, 15));
        }
        metrics.record_click(id, 50, date(2026, 10, 15));

        assert_eq!(metrics.rolling_ctr(id, date(2026, 10, 18)), 0.25);
        assert_eq!(metrics.rolling_ctr(Uuid::new_v4(), date(2026, 10, 18)), 0.0);
    }

    #[test]
    fn test_weekly_and_monthly_rollups() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();

        // 2026-10-12 is a Monday
        metrics.record_impression(id, date(2026, 10, 12));
        metrics.record_impression(id, date(2026, 10, 18));
        metrics.record_impression(id, date(2026, 10, 19));
        metrics.record_impression(id, date(2026, 11, 2));

        let weekly = metrics.rollup(id, Granularity::Weekly, None, None);
        assert_eq!(weekly.len(), 3);
        assert_eq!(weekly[0].period_start, date(2026, 10, 12));
        assert_eq!(weekly[0].counters.impressions, 2);

        let monthly = metrics.rollup(id, Granularity::Monthly, None, Some(date(2026, 10, 31)));
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].period_start, date(2026, 10, 1));
        assert_eq!(monthly[0].counters.impressions, 3);
    }

    #[test]
    fn test_restore_rebuilds_totals() {
        let metrics = MetricsAggregator::new();
        let id = Uuid::new_v4();
        let buckets = vec![
            (
                date(2026, 10, 17),
                Counters {
                    impressions: 5,
                    clicks: 1,
                    ..Counters::default()
                },
            ),
            (
                date(2026, 10, 18),
                Counters {
                    impressions: 5,
                    clicks: 1,
                    ..Counters::default()
                },
            ),
        ];
        metrics.restore(id, buckets.clone());

        assert_eq!(metrics.snapshot(id, 0).impressions, 10);
        assert_eq!(metrics.daily_buckets(id), buckets);
    }
}
