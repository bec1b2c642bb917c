//! # Pacing Controller
//!
//! Decides, per delivery opportunity, which campaigns may deliver right
//! now, and keeps DAILY budgets from burning out in the first minutes
//! of the day.
//!
//! ## Eligibility
//!
//! A campaign is eligible when all of these hold:
//!
//! - status is `ACTIVE`
//! - `startDate ≤ today ≤ endDate` (campaign-local)
//! - DAILY: `spentToday ≤ allowance(now)`
//! - TOTAL: `remainingTotal > minBidIncrement`
//!
//! ## Daily Allowance
//!
//! ```text
//! allowance(t) = min(dailyCap, floor(dailyCap × secondsSinceMidnight / 86400 × paceFactor))
//!
//!  cap ┤                         ____________
//!      │                    ____/
//!      │               ____/    paceFactor > 1 lets spend run
//!      │          ____/         slightly ahead of the clock
//!      │     ____/
//!    0 ┼────/──────────────────────────────── t
//!      00:00                               24:00
//! ```
//!
//! The pace factor is configuration (`PACE_FACTOR`), not a constant.
//! The check runs before the spend, so actual spend can lead the
//! allowance by at most one click and never passes the cap.
//!
//! ## Spend
//!
//! Showing an impression costs nothing; spend only happens on a
//! confirmed click via [`PacingController::charge_click`], which runs
//! the allowance check under the ledger's per-campaign lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{BudgetType, Campaign, CampaignStatus};
use crate::utils::SECONDS_PER_DAY;

use super::auction_ranker::{AuctionCandidate, AuctionRanker, DeliveryOpportunity};
use super::budget_ledger::{BudgetLedger, BudgetState, LedgerError, SpendReceipt};
use super::campaign_lifecycle::CampaignLifecycle;
use super::metrics_aggregator::MetricsAggregator;

/// Tunables for pacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    /// Multiplier on the elapsed-day fraction (≥ 1.0).
    pub pace_factor: f64,

    /// TOTAL campaigns need strictly more than this remaining.
    pub min_bid_increment: i64,
}

impl PacingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            pace_factor: config.pace_factor,
            min_bid_increment: config.min_bid_increment,
        }
    }

    /// Spend permitted so far today for a daily cap.
    pub fn daily_allowance(&self, daily_cap: i64, seconds_since_midnight: u32) -> i64 {
        let elapsed = f64::from(seconds_since_midnight) / f64::from(SECONDS_PER_DAY);
        let allowance = (daily_cap as f64 * elapsed * self.pace_factor).floor() as i64;
        allowance.clamp(0, daily_cap)
    }

    /// Smoothed-pacing check for a DAILY budget. TOTAL budgets pass.
    pub fn check_pace(
        &self,
        state: &BudgetState,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if state.budget_type != BudgetType::Daily {
            return Ok(());
        }

        let allowance =
            self.daily_allowance(state.budget, state.timezone.seconds_since_midnight(now));
        if state.spent_today > allowance {
            return Err(LedgerError::InsufficientBudget {
                requested: amount,
                available: 0,
            });
        }
        Ok(())
    }
}

/// Why a campaign cannot deliver right now.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Ineligible {
    #[error("campaign is {0}")]
    NotActive(CampaignStatus),

    #[error("outside schedule window")]
    OutsideSchedule,

    #[error("paced out: spent {spent_today} of {allowance} allowed so far today")]
    PacedOut { spent_today: i64, allowance: i64 },

    #[error("remaining budget {remaining} is not above the minimum increment")]
    TotalExhausted { remaining: i64 },

    #[error("campaign not found")]
    NotFound,
}

/// Per-opportunity eligibility and delivery.
pub struct PacingController {
    policy: PacingPolicy,
    ledger: Arc<BudgetLedger>,
    lifecycle: Arc<CampaignLifecycle>,
    metrics: Arc<MetricsAggregator>,
    ranker: AuctionRanker,
}

impl PacingController {
    pub fn new(
        policy: PacingPolicy,
        ledger: Arc<BudgetLedger>,
        lifecycle: Arc<CampaignLifecycle>,
        metrics: Arc<MetricsAggregator>,
        ranker: AuctionRanker,
    ) -> Self {
        Self {
            policy,
            ledger,
            lifecycle,
            metrics,
            ranker,
        }
    }

    pub fn policy(&self) -> PacingPolicy {
        self.policy
    }

    /// Eligibility of a campaign given its current budget state.
    pub fn eligibility_of(
        &self,
        campaign: &Campaign,
        state: &BudgetState,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligible> {
        if campaign.status != CampaignStatus::Active {
            return Err(Ineligible::NotActive(campaign.status));
        }

        if !campaign.is_within_schedule(now) {
            return Err(Ineligible::OutsideSchedule);
        }

        match state.budget_type {
            BudgetType::Daily => {
                let allowance = self
                    .policy
                    .daily_allowance(state.budget, state.timezone.seconds_since_midnight(now));
                if state.spent_today > allowance || state.spent_today >= state.budget {
                    return Err(Ineligible::PacedOut {
                        spent_today: state.spent_today,
                        allowance,
                    });
                }
            }
            BudgetType::Total => {
                let remaining = state.remaining_total().unwrap_or(0);
                if remaining <= self.policy.min_bid_increment {
                    return Err(Ineligible::TotalExhausted { remaining });
                }
            }
        }

        Ok(())
    }

    /// Eligibility by id.
    pub fn eligibility(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<(), Ineligible> {
        let campaign = self
            .lifecycle
            .get(campaign_id)
            .map_err(|_| Ineligible::NotFound)?;
        let state = self
            .ledger
            .current_state(campaign_id, now)
            .map_err(|_| Ineligible::NotFound)?;
        self.eligibility_of(&campaign, &state, now)
    }

    pub fn is_eligible(&self, campaign_id: Uuid, now: DateTime<Utc>) -> bool {
        self.eligibility(campaign_id, now).is_ok()
    }

    /// Run one delivery opportunity end to end.
    ///
    /// Gathers matching ACTIVE campaigns, filters by eligibility, ranks
    /// them, then walks the ranking probing each for one click of
    /// headroom. Winners get an impression. No spend happens here.
    ///
    /// ## Returns
    ///
    /// Winners in rank order (at most `opportunity.top_n`).
    pub fn record_delivery_opportunity(
        &self,
        opportunity: &DeliveryOpportunity,
    ) -> Vec<AuctionCandidate> {
        let now = opportunity.timestamp;
        let mut local_dates = HashMap::new();
        let mut candidates = Vec::new();

        for campaign in self.lifecycle.candidates(opportunity) {
            let Ok(state) = self.ledger.current_state(campaign.id, now) else {
                continue;
            };
            if let Err(reason) = self.eligibility_of(&campaign, &state, now) {
                debug!("Campaign {} ineligible: {}", campaign.id, reason);
                continue;
            }

            let today = campaign.local_date(now);
            let ctr = self.metrics.rolling_ctr(campaign.id, today);
            local_dates.insert(campaign.id, today);
            candidates.push(self.ranker.candidate(&campaign, ctr));
        }

        let ranked = self.ranker.rank(opportunity, candidates);
        let winners = self.ranker.select_winners(ranked, opportunity.top_n, |c| {
            self.ledger.check_headroom(c.campaign_id, c.effective_bid, now)
        });

        for winner in &winners {
            if let Some(date) = local_dates.get(&winner.campaign_id) {
                self.metrics.record_impression(winner.campaign_id, *date);
            }
        }

        debug!(
            "Opportunity {} / {:?} / {}: {} winner(s)",
            opportunity.city,
            opportunity.category,
            opportunity.ad_type,
            winners.len()
        );
        winners
    }

    /// Deduct a click's cost, subject to the daily pacing allowance.
    pub fn charge_click(
        &self,
        campaign_id: Uuid,
        cost: i64,
        now: DateTime<Utc>,
    ) -> Result<SpendReceipt, LedgerError> {
        let policy = self.policy;
        self.ledger
            .reserve_spend_guarded(campaign_id, cost, now, move |state| {
                policy.check_pace(state, cost, now)
            })
    }
}
