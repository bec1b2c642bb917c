//! # Campaign Manager Service
//!
//! The CampaignManager is the central service behind the HTTP API.
//! It coordinates the engine components so each request is a single
//! call with one error taxonomy.
//!
//! ## Responsibilities
//!
//! - Create, update and list campaigns
//! - Drive owner lifecycle actions (activate / pause / resume)
//! - Run delivery opportunities through pacing and the auction
//! - Record click, lead, refund and revenue events
//! - React to billing webhooks
//! - Run the periodic tick (resets, expiry, exhaustion, billing)
//!
//! ## Flow Example: Click
//!
//! ```text
//! 1. Placement layer reports a click via API
//!                ↓
//! 2. CampaignManager.record_click() checks the campaign can be charged
//!                ↓
//! 3. PacingController.charge_click() → BudgetLedger (per-campaign lock)
//!                ↓        pacing guard → cap check → deduct → AlertEvaluator
//!                ↓
//! 4. MetricsAggregator counts the click and its cost
//!                ↓
//! 5. TOTAL budget used up? → CampaignLifecycle ends or renews it
//! ```

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{
    BudgetType, Campaign, CampaignDraft, CampaignPatch, CampaignStatus, ValidationError,
};
use crate::utils::format_minor_units;

use super::alert_evaluator::{AlertEvaluator, AlertKind, BudgetAlert};
use super::auction_ranker::{AuctionCandidate, AuctionRanker, DeliveryOpportunity};
use super::billing_coordinator::{
    BillingCoordinator, BillingError, BillingProcessor, Charge, SubmitOutcome, WebhookOutcome,
    WebhookStatus,
};
use super::budget_ledger::{BudgetLedger, BudgetState, LedgerError, RefundReceipt, SpendReceipt};
use super::campaign_lifecycle::{
    CampaignLifecycle, ExhaustionOutcome, LifecycleError, TransitionRecord,
};
use super::events::{EngineEvent, EventSink};
use super::metrics_aggregator::{Counters, Granularity, MetricBucket, MetricSnapshot, MetricsAggregator};
use super::pacing_controller::{PacingController, PacingPolicy};

/// Errors that can occur in campaign operations.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// Malformed input. Caller-visible, not retryable.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Spend rejected; the campaign is ineligible until reset or renewal.
    #[error("Insufficient budget: requested {requested}, available {available}")]
    InsufficientBudget { requested: i64, available: i64 },

    /// Illegal or blocked lifecycle move.
    #[error("{0}")]
    InvalidTransition(String),

    /// Activation without cities or budget.
    #[error("Invalid targeting: {0}")]
    InvalidTargeting(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    /// The campaign's status does not allow billing events.
    #[error("Campaign {campaign_id} is {status} and cannot be charged")]
    NotDeliverable {
        campaign_id: Uuid,
        status: CampaignStatus,
    },

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl From<LedgerError> for CampaignError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::CampaignNotFound(id) => CampaignError::CampaignNotFound(id),
            LedgerError::InsufficientBudget {
                requested,
                available,
            } => CampaignError::InsufficientBudget {
                requested,
                available,
            },
            LedgerError::InvalidAmount(reason) => {
                CampaignError::Validation(ValidationError::InvalidField {
                    field: "amount",
                    reason,
                })
            }
            LedgerError::BudgetBelowSpend { budget, spent } => {
                CampaignError::Validation(ValidationError::BudgetBelowSpend { budget, spent })
            }
        }
    }
}

impl From<LifecycleError> for CampaignError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::CampaignNotFound(id) => CampaignError::CampaignNotFound(id),
            LifecycleError::InvalidTargeting(reason) => CampaignError::InvalidTargeting(reason),
            LifecycleError::Validation(v) => CampaignError::Validation(v),
            other @ (LifecycleError::InvalidTransition { .. }
            | LifecycleError::Blocked(_)
            | LifecycleError::CampaignEnded(_)) => {
                CampaignError::InvalidTransition(other.to_string())
            }
        }
    }
}

/// Status, budget state and metrics of one campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignOverview {
    pub campaign: Campaign,
    pub budget: BudgetState,
    pub metrics: MetricSnapshot,
}

/// What one periodic tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub daily_resets: usize,
    pub schedules_expired: usize,
    pub budgets_ended: usize,
    pub budgets_renewed: usize,
    pub charges_opened: usize,
    pub charges_retried: usize,
    pub payments_failed: usize,
    pub alerts_raised: usize,
}

/// Everything needed to rebuild engine state after a restart.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub campaigns: Vec<(Campaign, Vec<TransitionRecord>)>,
    pub budgets: Vec<BudgetState>,
    pub metrics: Vec<(Uuid, Vec<(NaiveDate, Counters)>)>,
    pub alerts: Vec<BudgetAlert>,
    pub charges: Vec<Charge>,
}

/// The main service for campaign operations.
///
/// ## Usage
///
/// ```rust,ignore
/// let (events, rx) = EventSink::channel();
/// let manager = CampaignManager::new(config, events, Arc::new(LoggingBillingProcessor));
///
/// let campaign = manager.create_campaign(draft, Utc::now())?;
/// manager.activate(campaign.id, Utc::now())?;
/// let winners = manager.deliver(&opportunity);
/// ```
pub struct CampaignManager {
    config: AppConfig,
    ledger: Arc<BudgetLedger>,
    lifecycle: Arc<CampaignLifecycle>,
    metrics: Arc<MetricsAggregator>,
    alerts: Arc<AlertEvaluator>,
    pacing: PacingController,
    billing: BillingCoordinator,
    events: EventSink,
}

impl CampaignManager {
    /// Wire up the engine.
    ///
    /// ## Arguments
    ///
    /// * `config` - Application configuration
    /// * `events` - Where engine events are published
    /// * `processor` - External billing processor
    pub fn new(config: AppConfig, events: EventSink, processor: Arc<dyn BillingProcessor>) -> Self {
        let alerts = Arc::new(AlertEvaluator::from_config(&config));
        let ledger = Arc::new(BudgetLedger::new(alerts.clone(), events.clone()));
        let lifecycle = Arc::new(CampaignLifecycle::new(events.clone()));
        let metrics = Arc::new(MetricsAggregator::new());
        let pacing = PacingController::new(
            PacingPolicy::from_config(&config),
            ledger.clone(),
            lifecycle.clone(),
            metrics.clone(),
            AuctionRanker::new(config.min_bid),
        );
        let billing = BillingCoordinator::from_config(processor, &config);

        Self {
            config,
            ledger,
            lifecycle,
            metrics,
            alerts,
            pacing,
            billing,
            events,
        }
    }

    // ==========================================
    // CAMPAIGNS
    // ==========================================

    /// Create a DRAFT campaign and open its ledger account.
    pub fn create_campaign(
        &self,
        draft: CampaignDraft,
        now: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        self.check_category(draft.targeting.category.as_deref())?;
        let campaign = Campaign::new(draft, now)?;

        self.ledger.open_account(&campaign, now);
        self.lifecycle.insert(campaign.clone());

        info!(
            "Created {} {} campaign {} for {} (budget {})",
            campaign.budget_type,
            campaign.ad_type,
            campaign.id,
            campaign.owner_id,
            format_minor_units(campaign.budget)
        );
        Ok(campaign)
    }

    /// Campaign with its budget state and metrics.
    pub fn get_campaign(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CampaignOverview, CampaignError> {
        let campaign = self.lifecycle.get(campaign_id)?;
        self.overview(campaign, now)
    }

    pub fn list_campaigns(
        &self,
        owner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignOverview>, CampaignError> {
        self.lifecycle
            .list(owner_id)
            .into_iter()
            .map(|campaign| self.overview(campaign, now))
            .collect()
    }

    /// Apply a partial update.
    ///
    /// Budget changes are only accepted while DRAFT or PAUSED, and
    /// never below what the current period already spent.
    pub fn update_campaign(
        &self,
        campaign_id: Uuid,
        patch: CampaignPatch,
        now: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        if let Some(targeting) = &patch.targeting {
            self.check_category(targeting.category.as_deref())?;
        }

        let ledger = &self.ledger;
        let updated = self.lifecycle.update(
            campaign_id,
            patch,
            now,
            |old: &Campaign, new: &Campaign| -> Result<(), CampaignError> {
                if new.budget != old.budget {
                    ledger.update_budget(campaign_id, new.budget, now)?;
                }
                Ok(())
            },
        )?;

        info!("Updated campaign {}", campaign_id);
        Ok(updated)
    }

    pub fn activate(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, CampaignError> {
        Ok(self.lifecycle.activate(campaign_id, now)?)
    }

    pub fn pause(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, CampaignError> {
        Ok(self.lifecycle.pause(campaign_id, now)?)
    }

    /// Resume a paused campaign.
    ///
    /// A TOTAL budget with nothing usable left blocks resuming. A DAILY
    /// budget never does, since it refills at the next local midnight.
    pub fn resume(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, CampaignError> {
        let state = self.ledger.current_state(campaign_id, now)?;
        let exhausted = state.budget_type == BudgetType::Total
            && state.is_exhausted(self.config.min_bid_increment);
        Ok(self.lifecycle.resume(campaign_id, exhausted, now)?)
    }

    // ==========================================
    // DELIVERY & EVENTS
    // ==========================================

    /// Run a delivery opportunity; returns the winners in rank order.
    pub fn deliver(&self, opportunity: &DeliveryOpportunity) -> Vec<AuctionCandidate> {
        self.pacing.record_delivery_opportunity(opportunity)
    }

    pub fn is_eligible(&self, campaign_id: Uuid, now: DateTime<Utc>) -> bool {
        self.pacing.is_eligible(campaign_id, now)
    }

    /// Charge a click.
    ///
    /// `cost` defaults to the campaign's effective bid. Paused campaigns
    /// still pay for clicks on impressions shown before the pause.
    /// A rejected click is not counted.
    pub fn record_click(
        &self,
        campaign_id: Uuid,
        cost: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<SpendReceipt, CampaignError> {
        let campaign = self.lifecycle.get(campaign_id)?;
        if !matches!(campaign.status, CampaignStatus::Active | CampaignStatus::Paused) {
            return Err(CampaignError::NotDeliverable {
                campaign_id,
                status: campaign.status,
            });
        }

        let cost = cost.unwrap_or_else(|| campaign.effective_bid(self.config.min_bid));
        let receipt = self.pacing.charge_click(campaign_id, cost, now)?;
        self.metrics
            .record_click(campaign_id, cost, campaign.local_date(now));

        if campaign.budget_type == BudgetType::Total
            && receipt.remaining <= self.config.min_bid_increment
        {
            self.handle_exhaustion(campaign_id, now)?;
        }

        Ok(receipt)
    }

    pub fn record_lead(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<MetricSnapshot, CampaignError> {
        let campaign = self.lifecycle.get(campaign_id)?;
        self.metrics.record_lead(campaign_id, campaign.local_date(now));
        self.snapshot(campaign_id, now)
    }

    /// Refund a disputed click. Counters are not rolled back.
    pub fn refund_click(
        &self,
        campaign_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<RefundReceipt, CampaignError> {
        let campaign = self.lifecycle.get(campaign_id)?;
        let receipt = self.ledger.refund(campaign_id, amount, now)?;
        self.metrics
            .record_refund(campaign_id, amount, campaign.local_date(now));
        Ok(receipt)
    }

    /// Record booking revenue attributed to a campaign.
    pub fn attribute_revenue(
        &self,
        campaign_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<MetricSnapshot, CampaignError> {
        if amount <= 0 {
            return Err(ValidationError::InvalidField {
                field: "amount",
                reason: format!("revenue must be positive, got {}", amount),
            }
            .into());
        }

        let campaign = self.lifecycle.get(campaign_id)?;
        self.metrics
            .attribute_revenue(campaign_id, amount, campaign.local_date(now));
        self.snapshot(campaign_id, now)
    }

    // ==========================================
    // READ MODELS
    // ==========================================

    pub fn alerts(&self, campaign_id: Uuid) -> Result<Vec<BudgetAlert>, CampaignError> {
        self.lifecycle.get(campaign_id)?;
        Ok(self.alerts.alerts_for(campaign_id))
    }

    pub fn history(&self, campaign_id: Uuid) -> Result<Vec<TransitionRecord>, CampaignError> {
        Ok(self.lifecycle.history(campaign_id)?)
    }

    pub fn metrics_rollup(
        &self,
        campaign_id: Uuid,
        granularity: Granularity,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<MetricBucket>, CampaignError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ValidationError::InvertedSchedule {
                    start: from,
                    end: to,
                }
                .into());
            }
        }
        self.lifecycle.get(campaign_id)?;
        Ok(self.metrics.rollup(campaign_id, granularity, from, to))
    }

    pub fn charges(&self, campaign_id: Uuid) -> Result<Vec<Charge>, CampaignError> {
        self.lifecycle.get(campaign_id)?;
        Ok(self.billing.charges_for(campaign_id))
    }

    /// Owner of a campaign, for routing real-time events.
    pub fn owner_of(&self, campaign_id: Uuid) -> Option<String> {
        self.lifecycle.get(campaign_id).ok().map(|c| c.owner_id)
    }

    pub fn campaign_count(&self) -> usize {
        self.lifecycle.len()
    }

    // ==========================================
    // BILLING
    // ==========================================

    /// Apply a billing-processor webhook.
    ///
    /// When a charge runs out of retries the campaign is paused and a
    /// PAYMENT_FAILED alert is raised.
    pub fn handle_billing_webhook(
        &self,
        charge_id: Uuid,
        campaign_id: Uuid,
        status: WebhookStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Charge, CampaignError> {
        self.lifecycle.get(campaign_id)?;

        let outcome = self
            .billing
            .handle_webhook(charge_id, campaign_id, status, reason, now)?;

        let charge = match outcome {
            WebhookOutcome::GaveUp(charge) => {
                self.fail_payment(&charge, now)?;
                charge
            }
            WebhookOutcome::Settled(charge)
            | WebhookOutcome::RetryScheduled(charge)
            | WebhookOutcome::Ignored(charge) => charge,
        };

        Ok(charge)
    }

    /// Pause the campaign behind a charge that ran out of retries and
    /// raise PAYMENT_FAILED.
    fn fail_payment(&self, charge: &Charge, now: DateTime<Utc>) -> Result<(), CampaignError> {
        let reason = charge
            .last_error
            .clone()
            .unwrap_or_else(|| "declined".to_string());
        self.lifecycle
            .force_pause(charge.campaign_id, format!("payment failed: {}", reason), now)?;

        let alert = self.alerts.raise(
            charge.campaign_id,
            AlertKind::PaymentFailed,
            format!(
                "Charge {} of {} failed after {} attempts: {}",
                charge.id,
                format_minor_units(charge.amount),
                charge.attempts,
                reason
            ),
            now,
        );
        self.events.publish(EngineEvent::BudgetAlert(alert));
        Ok(())
    }

    /// Act on a submission made from the tick. Returns whether the
    /// charge gave up.
    fn settle_submission(&self, outcome: &SubmitOutcome, now: DateTime<Utc>) -> bool {
        match outcome {
            SubmitOutcome::Submitted(charge) => {
                debug!("Charge {} submitted (attempt {})", charge.id, charge.attempts);
                false
            }
            SubmitOutcome::RetryScheduled(charge) => {
                debug!("Charge {} refused; next retry {:?}", charge.id, charge.next_retry_at);
                false
            }
            SubmitOutcome::GaveUp(charge) => {
                if let Err(e) = self.fail_payment(charge, now) {
                    warn!(
                        "Could not pause campaign {} after payment failure: {}",
                        charge.campaign_id, e
                    );
                }
                true
            }
        }
    }

    // ==========================================
    // PERIODIC TICK
    // ==========================================

    /// One pacing/reset tick over every campaign.
    ///
    /// Per campaign: lazy daily reset, schedule expiry, TOTAL budget
    /// exhaustion, then the alert ladder. Then closed periods become
    /// charges and due retries are resubmitted; a charge that gives up
    /// pauses its campaign. A failure on one campaign is logged and the
    /// tick moves on.
    pub fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        for campaign_id in self.lifecycle.ids() {
            match self.ledger.reset_daily_if_needed(campaign_id, now) {
                Ok(true) => summary.daily_resets += 1,
                Ok(false) => {}
                Err(e) => warn!("Daily reset failed for {}: {}", campaign_id, e),
            }

            match self.expire_schedule(campaign_id, now) {
                Ok(true) => {
                    summary.schedules_expired += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!("Schedule check failed for {}: {}", campaign_id, e),
            }

            match self.handle_exhaustion(campaign_id, now) {
                Ok(Some(ExhaustionOutcome::Ended(_))) => summary.budgets_ended += 1,
                Ok(Some(ExhaustionOutcome::Renewed(_))) => summary.budgets_renewed += 1,
                Ok(_) => {}
                Err(e) => warn!("Exhaustion check failed for {}: {}", campaign_id, e),
            }

            match self.ledger.evaluate_alerts(campaign_id, now) {
                Ok(Some(_)) => summary.alerts_raised += 1,
                Ok(None) => {}
                Err(e) => warn!("Alert check failed for {}: {}", campaign_id, e),
            }
        }

        for period in self.ledger.drain_closed_periods() {
            let outcome = self.billing.open_charge(&period, now);
            summary.charges_opened += 1;
            if self.settle_submission(&outcome, now) {
                summary.payments_failed += 1;
            }
        }

        for outcome in self.billing.resubmit_due(now) {
            summary.charges_retried += 1;
            if self.settle_submission(&outcome, now) {
                summary.payments_failed += 1;
            }
        }

        if summary != TickSummary::default() {
            info!("Tick at {}: {:?}", now, summary);
        } else {
            debug!("Tick at {}: nothing to do", now);
        }
        summary
    }

    /// End a campaign whose schedule is over. Returns whether it ended.
    fn expire_schedule(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<bool, CampaignError> {
        let Some(record) = self.lifecycle.expire_if_past_schedule(campaign_id, now)? else {
            return Ok(false);
        };

        self.ledger.close_account(campaign_id, now)?;
        let alert = self.alerts.raise(
            campaign_id,
            AlertKind::ScheduleEnded,
            format!(
                "Campaign ended: {}",
                record.reason.as_deref().unwrap_or("schedule over")
            ),
            now,
        );
        self.events.publish(EngineEvent::BudgetAlert(alert));
        Ok(true)
    }

    /// End or renew a TOTAL campaign whose budget ran out.
    fn handle_exhaustion(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ExhaustionOutcome>, CampaignError> {
        let state = self.ledger.current_state(campaign_id, now)?;
        if state.budget_type != BudgetType::Total
            || !state.is_exhausted(self.config.min_bid_increment)
        {
            return Ok(None);
        }

        let outcome = self.lifecycle.on_budget_exhausted(campaign_id, now)?;
        match &outcome {
            ExhaustionOutcome::Ended(_) => self.ledger.close_account(campaign_id, now)?,
            ExhaustionOutcome::Renewed(_) => {
                self.ledger.open_new_period(campaign_id, now)?;
            }
            ExhaustionOutcome::Unchanged => return Ok(None),
        }
        Ok(Some(outcome))
    }

    // ==========================================
    // PERSISTENCE SUPPORT
    // ==========================================

    /// Copy out everything the database stores.
    pub fn export(&self) -> EngineSnapshot {
        let campaigns: Vec<(Campaign, Vec<TransitionRecord>)> = self
            .lifecycle
            .list(None)
            .into_iter()
            .map(|c| {
                let history = self.lifecycle.history(c.id).unwrap_or_default();
                (c, history)
            })
            .collect();

        let metrics = campaigns
            .iter()
            .map(|(c, _)| (c.id, self.metrics.daily_buckets(c.id)))
            .collect();

        let alerts = campaigns
            .iter()
            .flat_map(|(c, _)| self.alerts.alerts_for(c.id))
            .collect();

        EngineSnapshot {
            budgets: self.ledger.snapshot_all(),
            metrics,
            alerts,
            charges: self.billing.all_charges(),
            campaigns,
        }
    }

    /// Load persisted state into an empty engine.
    pub fn import(&self, snapshot: EngineSnapshot) {
        let EngineSnapshot {
            campaigns,
            budgets,
            metrics,
            alerts,
            charges,
        } = snapshot;

        let count = campaigns.len();
        for (campaign, history) in campaigns {
            self.lifecycle.restore(campaign, history);
        }
        for state in budgets {
            self.ledger.restore_account(state);
        }
        for (campaign_id, buckets) in metrics {
            self.metrics.restore(campaign_id, buckets);
        }
        self.alerts.restore_history(alerts);
        self.billing.restore(charges);

        info!("Restored {} campaigns from the database", count);
    }

    // ==========================================
    // INTERNALS
    // ==========================================

    fn overview(
        &self,
        campaign: Campaign,
        now: DateTime<Utc>,
    ) -> Result<CampaignOverview, CampaignError> {
        let budget = self.ledger.current_state(campaign.id, now)?;
        let metrics = self.metrics.snapshot(campaign.id, budget.lifetime_spent);
        Ok(CampaignOverview {
            campaign,
            budget,
            metrics,
        })
    }

    fn snapshot(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<MetricSnapshot, CampaignError> {
        let state = self.ledger.current_state(campaign_id, now)?;
        Ok(self.metrics.snapshot(campaign_id, state.lifetime_spent))
    }

    fn check_category(&self, category: Option<&str>) -> Result<(), ValidationError> {
        match category {
            Some(category) if !self.config.is_known_category(category) => {
                Err(ValidationError::UnknownCategory(category.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::{at, date, draft};
    use crate::models::{AdType, Targeting};
    use crate::services::billing_coordinator::{ChargeStatus, LoggingBillingProcessor};

    fn manager() -> CampaignManager {
        CampaignManager::new(
            AppConfig::default(),
            EventSink::detached(),
            Arc::new(LoggingBillingProcessor),
        )
    }

    struct RejectingProcessor;

    impl BillingProcessor for RejectingProcessor {
        fn submit(&self, _charge: &Charge) -> Result<(), BillingError> {
            Err(BillingError::Processor("card network down".to_string()))
        }
    }

    fn opportunity(timestamp: DateTime<Utc>) -> DeliveryOpportunity {
        DeliveryOpportunity {
            city: "Miami".to_string(),
            category: None,
            ad_type: AdType::TopList,
            top_n: 1,
            timestamp,
        }
    }

    #[test]
    fn test_create_activate_and_read() {
        let m = manager();
        let now = at(2026, 10, 18, 9, 0);
        let campaign = m.create_campaign(draft(BudgetType::Daily, 2_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();

        let overview = m.get_campaign(campaign.id, now).unwrap();
        assert_eq!(overview.campaign.status, CampaignStatus::Active);
        assert_eq!(overview.budget.daily_cap(), Some(2_000));
        assert_eq!(overview.metrics.ratios.ctr, 0.0);
        assert_eq!(m.list_campaigns(Some("provider-1"), now).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let config = AppConfig {
            category_taxonomy: vec!["Plumbing".to_string()],
            ..AppConfig::default()
        };
        let m = CampaignManager::new(config, EventSink::detached(), Arc::new(LoggingBillingProcessor));
        let mut d = draft(BudgetType::Daily, 2_000);
        d.targeting = Targeting::new(["Miami"], Some("Astrology"));

        assert!(matches!(
            m.create_campaign(d, at(2026, 10, 18, 9, 0)),
            Err(CampaignError::Validation(ValidationError::UnknownCategory(_)))
        ));
    }

    #[test]
    fn test_click_on_draft_is_rejected_and_not_counted() {
        let m = manager();
        let now = at(2026, 10, 18, 9, 0);
        let campaign = m.create_campaign(draft(BudgetType::Daily, 2_000), now).unwrap();

        assert!(matches!(
            m.record_click(campaign.id, None, now),
            Err(CampaignError::NotDeliverable { .. })
        ));
        assert_eq!(m.get_campaign(campaign.id, now).unwrap().metrics.clicks, 0);
    }

    #[test]
    fn test_click_charges_effective_bid() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Daily, 2_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();

        let receipt = m.record_click(campaign.id, None, now).unwrap();
        assert_eq!(receipt.amount, 100);

        let overview = m.get_campaign(campaign.id, now).unwrap();
        assert_eq!(overview.metrics.clicks, 1);
        assert_eq!(overview.metrics.total_spent, 100);
        assert_eq!(overview.metrics.ratios.cpc, 100.0);
    }

    #[test]
    fn test_tick_ends_expired_campaign() {
        let m = manager();
        let mut d = draft(BudgetType::Daily, 2_000);
        d.end_date = date(2026, 10, 17);
        let campaign = m.create_campaign(d, at(2026, 10, 1, 0, 0)).unwrap();
        m.activate(campaign.id, at(2026, 10, 17, 9, 0)).unwrap();

        let now = at(2026, 10, 18, 0, 1);
        let summary = m.run_tick(now);
        assert_eq!(summary.schedules_expired, 1);

        let overview = m.get_campaign(campaign.id, now).unwrap();
        assert_eq!(overview.campaign.status, CampaignStatus::Ended);
        assert!(m.deliver(&opportunity(at(2026, 10, 18, 12, 0))).is_empty());
        assert!(!m.is_eligible(campaign.id, at(2026, 10, 18, 12, 0)));

        let kinds: Vec<_> = m.alerts(campaign.id).unwrap().iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AlertKind::ScheduleEnded));
    }

    #[test]
    fn test_auto_renew_total_budget_gets_fresh_period() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let mut d = draft(BudgetType::Total, 1_000);
        d.auto_renew = true;
        let campaign = m.create_campaign(d, now).unwrap();
        m.activate(campaign.id, now).unwrap();

        for _ in 0..10 {
            m.record_click(campaign.id, None, now).unwrap();
        }

        let overview = m.get_campaign(campaign.id, now).unwrap();
        assert_eq!(overview.campaign.status, CampaignStatus::Active);
        assert_eq!(overview.budget.period, 2);
        assert_eq!(overview.budget.total_spent, 0);
        assert_eq!(overview.budget.lifetime_spent, 1_000);
        assert!(m.is_eligible(campaign.id, now));

        let history = m.history(campaign.id).unwrap();
        assert_eq!(history.last().map(|r| r.action), Some(crate::services::LifecycleAction::Renew));

        // The finished period is billed on the next tick
        assert_eq!(m.run_tick(now).charges_opened, 1);
        assert_eq!(m.charges(campaign.id).unwrap()[0].amount, 1_000);
    }

    #[test]
    fn test_exhausted_total_without_renew_ends() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 200), now).unwrap();
        m.activate(campaign.id, now).unwrap();

        m.record_click(campaign.id, None, now).unwrap();
        m.record_click(campaign.id, None, now).unwrap();

        assert_eq!(
            m.get_campaign(campaign.id, now).unwrap().campaign.status,
            CampaignStatus::Ended
        );
        assert!(matches!(
            m.resume(campaign.id, now),
            Err(CampaignError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_sub_increment_remainder_ends_with_exhausted_alert() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 1_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();

        let receipt = m.record_click(campaign.id, Some(999), now).unwrap();
        assert_eq!(receipt.remaining, 1);
        assert_eq!(receipt.alert.map(|a| a.kind), Some(AlertKind::Exhausted));
        assert_eq!(
            m.get_campaign(campaign.id, now).unwrap().campaign.status,
            CampaignStatus::Ended
        );
    }

    #[test]
    fn test_daily_close_becomes_charge_and_payment_failure_pauses() {
        let config = AppConfig {
            billing_max_retries: 0,
            ..AppConfig::default()
        };
        let m = CampaignManager::new(config, EventSink::detached(), Arc::new(LoggingBillingProcessor));
        let day_one = at(2026, 10, 17, 18, 0);
        let campaign = m.create_campaign(draft(BudgetType::Daily, 2_000), day_one).unwrap();
        m.activate(campaign.id, day_one).unwrap();
        m.record_click(campaign.id, Some(300), day_one).unwrap();

        let summary = m.run_tick(at(2026, 10, 18, 0, 1));
        assert_eq!(summary.daily_resets, 1);
        assert_eq!(summary.charges_opened, 1);

        let charge = m.charges(campaign.id).unwrap().remove(0);
        assert_eq!(charge.period_label, "2026-10-17");
        assert_eq!(charge.amount, 300);

        let charge = m
            .handle_billing_webhook(
                charge.id,
                campaign.id,
                WebhookStatus::Failed,
                Some("insufficient funds".to_string()),
                at(2026, 10, 18, 0, 5),
            )
            .unwrap();
        assert_eq!(charge.status, ChargeStatus::Failed);

        let overview = m.get_campaign(campaign.id, at(2026, 10, 18, 0, 6)).unwrap();
        assert_eq!(overview.campaign.status, CampaignStatus::Paused);
        let last_alert = m.alerts(campaign.id).unwrap().pop().unwrap();
        assert_eq!(last_alert.kind, AlertKind::PaymentFailed);
    }

    #[test]
    fn test_refused_submissions_pause_campaign_from_tick() {
        let config = AppConfig {
            billing_max_retries: 1,
            ..AppConfig::default()
        };
        let m = CampaignManager::new(config, EventSink::detached(), Arc::new(RejectingProcessor));
        let day_one = at(2026, 10, 17, 18, 0);
        let campaign = m.create_campaign(draft(BudgetType::Daily, 2_000), day_one).unwrap();
        m.activate(campaign.id, day_one).unwrap();
        m.record_click(campaign.id, Some(300), day_one).unwrap();

        let summary = m.run_tick(at(2026, 10, 18, 0, 0));
        assert_eq!(summary.charges_opened, 1);
        assert_eq!(summary.payments_failed, 0);
        assert_eq!(
            m.charges(campaign.id).unwrap()[0].status,
            ChargeStatus::RetryScheduled
        );

        // Retry falls due one base delay later and is refused again
        let summary = m.run_tick(at(2026, 10, 18, 0, 1));
        assert_eq!(summary.charges_retried, 1);
        assert_eq!(summary.payments_failed, 1);

        let charge = m.charges(campaign.id).unwrap().remove(0);
        assert_eq!(charge.status, ChargeStatus::Failed);
        assert_eq!(charge.attempts, 2);

        let overview = m.get_campaign(campaign.id, at(2026, 10, 18, 0, 2)).unwrap();
        assert_eq!(overview.campaign.status, CampaignStatus::Paused);
        let last_alert = m.alerts(campaign.id).unwrap().pop().unwrap();
        assert_eq!(last_alert.kind, AlertKind::PaymentFailed);
        assert!(last_alert.message.contains("card network down"));
    }

    #[test]
    fn test_shrinking_paused_budget_raises_alert() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 10_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();
        m.record_click(campaign.id, Some(500), now).unwrap();
        assert!(m.alerts(campaign.id).unwrap().is_empty());

        m.pause(campaign.id, now).unwrap();
        let patch = CampaignPatch {
            budget: Some(520),
            ..CampaignPatch::default()
        };
        m.update_campaign(campaign.id, patch, now).unwrap();

        let kinds: Vec<AlertKind> = m.alerts(campaign.id).unwrap().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Critical]);

        // The tick does not repeat a level already reported
        assert_eq!(m.run_tick(at(2026, 10, 18, 12, 5)).alerts_raised, 0);
    }

    #[test]
    fn test_update_budget_rules() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 1_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();
        m.record_click(campaign.id, Some(600), now).unwrap();

        let patch = CampaignPatch {
            budget: Some(500),
            ..CampaignPatch::default()
        };
        assert!(matches!(
            m.update_campaign(campaign.id, patch.clone(), now),
            Err(CampaignError::InvalidTransition(_))
        ));

        m.pause(campaign.id, now).unwrap();
        assert!(matches!(
            m.update_campaign(campaign.id, patch, now),
            Err(CampaignError::Validation(ValidationError::BudgetBelowSpend { .. }))
        ));

        let patch = CampaignPatch {
            budget: Some(5_000),
            ..CampaignPatch::default()
        };
        m.update_campaign(campaign.id, patch, now).unwrap();
        let overview = m.get_campaign(campaign.id, now).unwrap();
        assert_eq!(overview.campaign.budget, 5_000);
        assert_eq!(overview.budget.remaining_total(), Some(4_400));
    }

    #[test]
    fn test_refund_and_revenue() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 10_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();
        m.record_click(campaign.id, Some(200), now).unwrap();
        m.record_click(campaign.id, Some(200), now).unwrap();

        m.refund_click(campaign.id, 200, now).unwrap();
        let snapshot = m.attribute_revenue(campaign.id, 1_000, now).unwrap();
        assert_eq!(snapshot.clicks, 2);
        assert_eq!(snapshot.total_spent, 200);
        assert_eq!(snapshot.ratios.roas, 5.0);

        assert!(matches!(
            m.attribute_revenue(campaign.id, 0, now),
            Err(CampaignError::Validation(_))
        ));
    }

    #[test]
    fn test_repeated_max_revenue_does_not_overflow() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 10_000), now).unwrap();

        m.attribute_revenue(campaign.id, i64::MAX, now).unwrap();
        let snapshot = m.attribute_revenue(campaign.id, i64::MAX, now).unwrap();
        assert_eq!(snapshot.revenue, i64::MAX);
        assert_eq!(snapshot.ratios.roas, 0.0);
    }

    #[test]
    fn test_export_import_round_trip_keeps_engine_state() {
        let m = manager();
        let now = at(2026, 10, 18, 12, 0);
        let campaign = m.create_campaign(draft(BudgetType::Total, 10_000), now).unwrap();
        m.activate(campaign.id, now).unwrap();
        m.record_click(campaign.id, Some(8_000), now).unwrap();

        let restored = manager();
        restored.import(m.export());

        let overview = restored.get_campaign(campaign.id, now).unwrap();
        assert_eq!(overview.campaign.status, CampaignStatus::Active);
        assert_eq!(overview.budget.total_spent, 8_000);
        assert_eq!(overview.metrics.clicks, 1);
        assert_eq!(restored.history(campaign.id).unwrap().len(), 1);
        assert_eq!(restored.alerts(campaign.id).unwrap().len(), 1);

        // Warning was already sent before the restart
        let receipt = restored.record_click(campaign.id, Some(100), now).unwrap();
        assert!(receipt.alert.is_none());
    }
}
