//! # Budget Ledger
//!
//! The BudgetLedger owns every campaign's monetary state and is the
//! only component that mutates spend.
//!
//! ## Budget Semantics
//!
//! | Type | Cap | Resets |
//! |------|-----|--------|
//! | `DAILY` | `spentToday ≤ budget` | every local midnight |
//! | `TOTAL` | `totalSpent ≤ budget` | only when a renewal opens a new period |
//!
//! A spend that would break its cap is rejected whole. It is never
//! clamped or partially applied.
//!
//! ## Locking
//!
//! ```text
//! DashMap<campaign id, Arc<Mutex<BudgetState>>>
//!        │                     │
//!        │ shard lock held     │ per-campaign lock held for the
//!        │ only to clone Arc   │ whole check → deduct → alert step
//!        ▼                     ▼
//!   lookups never block    concurrent spends on one campaign serialize;
//!   other campaigns        different campaigns proceed in parallel
//! ```
//!
//! The AlertEvaluator runs inside the per-campaign critical section, so
//! an alert never lags the spend that caused it.
//!
//! ## Billing Periods
//!
//! When a period closes (a DAILY campaign's previous local day, a TOTAL
//! campaign's period at renewal or end) its spend is queued as a
//! [`ClosedPeriod`] for the billing coordinator to charge.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{BudgetType, Campaign, CampaignTimezone};

use super::alert_evaluator::{AlertEvaluator, BudgetAlert};
use super::events::{EngineEvent, EventSink};

/// Errors that can occur in ledger operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// No ledger account exists for the campaign.
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    /// The spend would exceed the binding cap (or the pacing allowance).
    #[error("Insufficient budget: requested {requested}, available {available}")]
    InsufficientBudget { requested: i64, available: i64 },

    /// Non-positive amount, or a refund larger than what was spent.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A new budget would fall below what the current period already spent.
    #[error("Budget {budget} is below current spend {spent}")]
    BudgetBelowSpend { budget: i64, spent: i64 },
}

/// Identifies a billing period for alert de-duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKey {
    /// DAILY budgets: the local date of the last reset.
    Day(NaiveDate),
    /// TOTAL budgets: the renewal counter.
    Cycle(u32),
}

/// Monetary state of one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetState {
    pub campaign_id: Uuid,
    pub budget_type: BudgetType,

    /// Cap in minor units: per local day for DAILY, per period for TOTAL.
    pub budget: i64,
    pub timezone: CampaignTimezone,

    /// Spend since the current billing period opened.
    pub total_spent: i64,

    /// Spend on `last_reset_date`.
    pub spent_today: i64,

    /// Spend across every period, net of refunds.
    pub lifetime_spent: i64,

    /// Local date `spent_today` belongs to.
    pub last_reset_date: NaiveDate,

    /// Billing period counter, starting at 1.
    pub period: u32,
    pub period_started_at: DateTime<Utc>,

    /// Set once the campaign ended and its final period was billed.
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetState {
    /// Fresh state for a campaign, with the day anchored at `now`.
    pub fn open(
        campaign_id: Uuid,
        budget_type: BudgetType,
        budget: i64,
        timezone: CampaignTimezone,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            campaign_id,
            budget_type,
            budget,
            timezone,
            total_spent: 0,
            spent_today: 0,
            lifetime_spent: 0,
            last_reset_date: timezone.local_date(now),
            period: 1,
            period_started_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    /// `(spent, cap)` of whichever constraint binds for this budget type.
    pub fn binding_usage(&self) -> (i64, i64) {
        match self.budget_type {
            BudgetType::Daily => (self.spent_today, self.budget),
            BudgetType::Total => (self.total_spent, self.budget),
        }
    }

    /// Daily cap, for DAILY budgets.
    pub fn daily_cap(&self) -> Option<i64> {
        match self.budget_type {
            BudgetType::Daily => Some(self.budget),
            BudgetType::Total => None,
        }
    }

    /// Remaining budget in the current period, for TOTAL budgets.
    pub fn remaining_total(&self) -> Option<i64> {
        match self.budget_type {
            BudgetType::Total => Some((self.budget - self.total_spent).max(0)),
            BudgetType::Daily => None,
        }
    }

    /// How much more can be spent right now under the binding cap.
    pub fn headroom(&self) -> i64 {
        let (spent, cap) = self.binding_usage();
        (cap - spent).max(0)
    }

    /// Whether the binding cap leaves no useful room.
    ///
    /// A TOTAL budget counts as exhausted once its remainder is at or
    /// below `min_increment`, since it can no longer be eligible.
    pub fn is_exhausted(&self, min_increment: i64) -> bool {
        match self.budget_type {
            BudgetType::Daily => self.spent_today >= self.budget,
            BudgetType::Total => self.budget - self.total_spent <= min_increment,
        }
    }

    pub fn period_key(&self) -> PeriodKey {
        match self.budget_type {
            BudgetType::Daily => PeriodKey::Day(self.last_reset_date),
            BudgetType::Total => PeriodKey::Cycle(self.period),
        }
    }
}

/// Proof of an accepted spend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendReceipt {
    pub receipt_id: Uuid,
    pub campaign_id: Uuid,
    pub amount: i64,
    pub spent_today: i64,
    pub total_spent: i64,

    /// Headroom left under the binding cap.
    pub remaining: i64,

    /// Alert raised by this spend, if any.
    pub alert: Option<BudgetAlert>,
    pub timestamp: DateTime<Utc>,
}

/// Proof of an applied refund.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub receipt_id: Uuid,
    pub campaign_id: Uuid,
    pub amount: i64,
    pub spent_today: i64,
    pub total_spent: i64,
    pub lifetime_spent: i64,
    pub timestamp: DateTime<Utc>,
}

/// A billing period whose spend is ready to charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPeriod {
    pub campaign_id: Uuid,

    /// `YYYY-MM-DD` for DAILY days, `period-N` for TOTAL periods.
    pub period_label: String,
    pub amount: i64,
    pub closed_at: DateTime<Utc>,
}

/// Per-campaign spend accounts.
///
/// ## Usage
///
/// ```rust,ignore
/// let ledger = BudgetLedger::new(alerts, events);
/// ledger.open_account(&campaign, now);
///
/// match ledger.reserve_spend(campaign.id, 100, now) {
///     Ok(receipt) => println!("remaining {}", receipt.remaining),
///     Err(LedgerError::InsufficientBudget { .. }) => { /* ineligible */ }
///     Err(e) => return Err(e.into()),
/// }
/// ```
pub struct BudgetLedger {
    accounts: DashMap<Uuid, Arc<Mutex<BudgetState>>>,
    alerts: Arc<AlertEvaluator>,
    events: EventSink,
    closed: Mutex<Vec<ClosedPeriod>>,
}

impl BudgetLedger {
    pub fn new(alerts: Arc<AlertEvaluator>, events: EventSink) -> Self {
        Self {
            accounts: DashMap::new(),
            alerts,
            events,
            closed: Mutex::new(Vec::new()),
        }
    }

    // ==========================================
    // ACCOUNTS
    // ==========================================

    /// Open an account for a campaign. Existing accounts are left as-is.
    pub fn open_account(&self, campaign: &Campaign, now: DateTime<Utc>) -> BudgetState {
        let entry = self.accounts.entry(campaign.id).or_insert_with(|| {
            debug!("Opening ledger account for campaign {}", campaign.id);
            Arc::new(Mutex::new(BudgetState::open(
                campaign.id,
                campaign.budget_type,
                campaign.budget,
                campaign.timezone,
                now,
            )))
        });
        let account = Arc::clone(entry.value());
        drop(entry);

        let state = lock(&account).clone();
        state
    }

    /// Install a persisted state (startup restore).
    pub fn restore_account(&self, state: BudgetState) {
        self.alerts.prime(&state);
        self.accounts
            .insert(state.campaign_id, Arc::new(Mutex::new(state)));
    }

    /// Change the budget cap, refusing to go below the current spend.
    pub fn update_budget(
        &self,
        campaign_id: Uuid,
        budget: i64,
        now: DateTime<Utc>,
    ) -> Result<BudgetState, LedgerError> {
        let account = self.account(campaign_id)?;
        let (snapshot, alert) = {
            let mut state = lock(&account);
            self.roll_day(&mut state, now);

            let (spent, _) = state.binding_usage();
            if budget < spent {
                return Err(LedgerError::BudgetBelowSpend { budget, spent });
            }

            state.budget = budget;
            state.updated_at = now;

            // Shrinking the cap can cross a threshold without any spend
            let alert = self.alerts.evaluate(&state, now);
            (state.clone(), alert)
        };

        self.events.publish(EngineEvent::BudgetUpdate(snapshot.clone()));
        if let Some(alert) = alert {
            self.events.publish(EngineEvent::BudgetAlert(alert));
        }
        Ok(snapshot)
    }

    /// Run the alert ladder against the current state and publish any
    /// newly crossed threshold.
    pub fn evaluate_alerts(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<BudgetAlert>, LedgerError> {
        let account = self.account(campaign_id)?;
        let alert = {
            let mut state = lock(&account);
            self.roll_day(&mut state, now);
            self.alerts.evaluate(&state, now)
        };

        if let Some(alert) = &alert {
            self.events.publish(EngineEvent::BudgetAlert(alert.clone()));
        }
        Ok(alert)
    }

    // ==========================================
    // SPEND
    // ==========================================

    /// Atomically check the cap and deduct `amount`.
    ///
    /// ## Returns
    ///
    /// * `Ok(SpendReceipt)` - Spend applied
    /// * `Err(LedgerError::InsufficientBudget)` - Cap would be exceeded, nothing applied
    /// * `Err(LedgerError::CampaignNotFound)` - No account
    pub fn reserve_spend(
        &self,
        campaign_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<SpendReceipt, LedgerError> {
        self.reserve_spend_guarded(campaign_id, amount, now, |_| Ok(()))
    }

    /// Like [`reserve_spend`](Self::reserve_spend), with an extra check run
    /// under the same per-campaign lock before the cap check.
    ///
    /// The pacing controller uses this to apply its allowance without a
    /// window between "is it paced-eligible" and "deduct".
    pub fn reserve_spend_guarded<F>(
        &self,
        campaign_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
        guard: F,
    ) -> Result<SpendReceipt, LedgerError>
    where
        F: FnOnce(&BudgetState) -> Result<(), LedgerError>,
    {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "spend must be positive, got {}",
                amount
            )));
        }

        let account = self.account(campaign_id)?;
        let (receipt, snapshot) = {
            let mut state = lock(&account);
            self.roll_day(&mut state, now);

            if let Err(e) = guard(&state) {
                debug!("Spend of {} for campaign {} refused by guard: {}", amount, campaign_id, e);
                return Err(e);
            }

            let available = state.headroom();
            if amount > available {
                debug!(
                    "Spend of {} for campaign {} rejected: {} available",
                    amount, campaign_id, available
                );
                return Err(LedgerError::InsufficientBudget {
                    requested: amount,
                    available,
                });
            }

            state.spent_today += amount;
            state.total_spent += amount;
            state.lifetime_spent += amount;
            state.updated_at = now;

            let alert = self.alerts.evaluate(&state, now);
            let receipt = SpendReceipt {
                receipt_id: Uuid::new_v4(),
                campaign_id,
                amount,
                spent_today: state.spent_today,
                total_spent: state.total_spent,
                remaining: state.headroom(),
                alert,
                timestamp: now,
            };
            (receipt, state.clone())
        };

        self.events.publish(EngineEvent::BudgetUpdate(snapshot));
        if let Some(alert) = &receipt.alert {
            self.events.publish(EngineEvent::BudgetAlert(alert.clone()));
        }

        Ok(receipt)
    }

    /// Check whether `amount` would currently fit, without deducting.
    ///
    /// Used by the auction to skip candidates that cannot afford a click.
    pub fn check_headroom(
        &self,
        campaign_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let account = self.account(campaign_id)?;
        let mut state = lock(&account);
        self.roll_day(&mut state, now);

        let available = state.headroom();
        if amount > available {
            return Err(LedgerError::InsufficientBudget {
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    /// Claw back spend for a disputed or invalid click.
    ///
    /// The current period and day counters are credited (never below
    /// zero); lifetime spend is reduced by the full amount.
    pub fn refund(
        &self,
        campaign_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<RefundReceipt, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "refund must be positive, got {}",
                amount
            )));
        }

        let account = self.account(campaign_id)?;
        let (receipt, alert, snapshot) = {
            let mut state = lock(&account);
            self.roll_day(&mut state, now);

            if amount > state.lifetime_spent {
                return Err(LedgerError::InvalidAmount(format!(
                    "refund {} exceeds lifetime spend {}",
                    amount, state.lifetime_spent
                )));
            }

            state.spent_today = (state.spent_today - amount).max(0);
            state.total_spent = (state.total_spent - amount).max(0);
            state.lifetime_spent -= amount;
            state.updated_at = now;

            let alert = self.alerts.evaluate(&state, now);
            let receipt = RefundReceipt {
                receipt_id: Uuid::new_v4(),
                campaign_id,
                amount,
                spent_today: state.spent_today,
                total_spent: state.total_spent,
                lifetime_spent: state.lifetime_spent,
                timestamp: now,
            };
            (receipt, alert, state.clone())
        };

        info!("Refunded {} to campaign {}", amount, campaign_id);
        self.events.publish(EngineEvent::BudgetUpdate(snapshot));
        if let Some(alert) = alert {
            self.events.publish(EngineEvent::BudgetAlert(alert));
        }

        Ok(receipt)
    }

    // ==========================================
    // PERIODS
    // ==========================================

    /// Zero `spentToday` if the campaign's local date moved past
    /// `lastResetDate`. Idempotent within a local day.
    ///
    /// ## Returns
    ///
    /// * `Ok(true)` - A reset happened
    /// * `Ok(false)` - Already current
    pub fn reset_daily_if_needed(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let account = self.account(campaign_id)?;
        let mut state = lock(&account);
        Ok(self.roll_day(&mut state, now))
    }

    /// Read-only snapshot, after the lazy daily reset.
    pub fn current_state(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BudgetState, LedgerError> {
        let account = self.account(campaign_id)?;
        let mut state = lock(&account);
        self.roll_day(&mut state, now);
        Ok(state.clone())
    }

    /// Open a fresh billing period after a TOTAL budget exhausted with
    /// auto-renew. The finished period is queued for billing.
    pub fn open_new_period(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<BudgetState, LedgerError> {
        let account = self.account(campaign_id)?;
        let (snapshot, alert) = {
            let mut state = lock(&account);
            self.roll_day(&mut state, now);

            self.queue_closed(ClosedPeriod {
                campaign_id,
                period_label: format!("period-{}", state.period),
                amount: state.total_spent,
                closed_at: now,
            });

            state.period += 1;
            state.period_started_at = now;
            state.total_spent = 0;
            state.updated_at = now;

            // Re-arms the alert ladder for the new period key
            let alert = self.alerts.evaluate(&state, now);
            (state.clone(), alert)
        };

        info!(
            "Opened billing period {} for campaign {}",
            snapshot.period, campaign_id
        );
        self.events.publish(EngineEvent::BudgetUpdate(snapshot.clone()));
        if let Some(alert) = alert {
            self.events.publish(EngineEvent::BudgetAlert(alert));
        }
        Ok(snapshot)
    }

    /// Bill the final period of an ended campaign. Repeat calls are no-ops.
    pub fn close_account(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let account = self.account(campaign_id)?;
        let mut state = lock(&account);
        if state.closed_at.is_some() {
            return Ok(());
        }

        self.roll_day(&mut state, now);
        let (label, amount) = match state.budget_type {
            BudgetType::Daily => (state.last_reset_date.to_string(), state.spent_today),
            BudgetType::Total => (format!("period-{}", state.period), state.total_spent),
        };
        self.queue_closed(ClosedPeriod {
            campaign_id,
            period_label: label,
            amount,
            closed_at: now,
        });

        state.closed_at = Some(now);
        state.updated_at = now;
        Ok(())
    }

    /// Take every closed period queued since the last call.
    pub fn drain_closed_periods(&self) -> Vec<ClosedPeriod> {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *closed)
    }

    /// Clone every account's state without rolling days.
    pub fn snapshot_all(&self) -> Vec<BudgetState> {
        self.accounts
            .iter()
            .map(|entry| lock(entry.value()).clone())
            .collect()
    }

    // ==========================================
    // INTERNALS
    // ==========================================

    fn account(&self, campaign_id: Uuid) -> Result<Arc<Mutex<BudgetState>>, LedgerError> {
        self.accounts
            .get(&campaign_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::CampaignNotFound(campaign_id))
    }

    /// Roll `spent_today` to the current local date. Caller holds the lock.
    fn roll_day(&self, state: &mut BudgetState, now: DateTime<Utc>) -> bool {
        let today = state.timezone.local_date(now);
        if today <= state.last_reset_date {
            return false;
        }

        if state.budget_type == BudgetType::Daily
            && state.spent_today > 0
            && state.closed_at.is_none()
        {
            self.queue_closed(ClosedPeriod {
                campaign_id: state.campaign_id,
                period_label: state.last_reset_date.to_string(),
                amount: state.spent_today,
                closed_at: now,
            });
        }

        debug!(
            "Daily reset for campaign {}: {} -> {}",
            state.campaign_id, state.last_reset_date, today
        );
        state.spent_today = 0;
        state.last_reset_date = today;
        state.updated_at = now;
        true
    }

    fn queue_closed(&self, period: ClosedPeriod) {
        if period.amount <= 0 {
            return;
        }
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(period);
    }
}

/// Lock a campaign account, recovering the state if a holder panicked.
fn lock(account: &Mutex<BudgetState>) -> MutexGuard<'_, BudgetState> {
    account.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::{at, draft};
    use crate::services::alert_evaluator::AlertKind;
    use proptest::prelude::*;

    fn ledger() -> BudgetLedger {
        BudgetLedger::new(Arc::new(AlertEvaluator::new(0.80, 0.95)), EventSink::detached())
    }

    fn campaign(budget_type: BudgetType, budget: i64) -> Campaign {
        Campaign::new(draft(budget_type, budget), at(2026, 10, 1, 0, 0)).unwrap()
    }

    #[test]
    fn test_spend_within_cap() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 10_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);

        let receipt = ledger.reserve_spend(c.id, 2_500, now).unwrap();
        assert_eq!(receipt.total_spent, 2_500);
        assert_eq!(receipt.remaining, 7_500);
        assert!(receipt.alert.is_none());
    }

    #[test]
    fn test_spend_rejected_whole_not_clamped() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        ledger.reserve_spend(c.id, 900, now).unwrap();

        let err = ledger.reserve_spend(c.id, 200, now).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBudget {
                requested: 200,
                available: 100
            }
        );
        assert_eq!(ledger.current_state(c.id, now).unwrap().total_spent, 900);
    }

    #[test]
    fn test_unknown_campaign_and_bad_amount() {
        let ledger = ledger();
        let id = Uuid::new_v4();
        let now = at(2026, 10, 18, 9, 0);
        assert_eq!(
            ledger.reserve_spend(id, 10, now).unwrap_err(),
            LedgerError::CampaignNotFound(id)
        );

        let c = campaign(BudgetType::Total, 1_000);
        ledger.open_account(&c, now);
        assert!(matches!(
            ledger.reserve_spend(c.id, 0, now),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_spend_receipt_carries_alert() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 10_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);

        let receipt = ledger.reserve_spend(c.id, 8_000, now).unwrap();
        assert_eq!(receipt.alert.map(|a| a.kind), Some(AlertKind::Warning));

        let receipt = ledger.reserve_spend(c.id, 1_600, now).unwrap();
        assert_eq!(receipt.alert.map(|a| a.kind), Some(AlertKind::Critical));
    }

    #[test]
    fn test_daily_reset_is_idempotent() {
        let ledger = ledger();
        let c = campaign(BudgetType::Daily, 2_000);
        ledger.open_account(&c, at(2026, 10, 17, 8, 0));
        ledger.reserve_spend(c.id, 1_500, at(2026, 10, 17, 20, 0)).unwrap();

        let next_day = at(2026, 10, 18, 0, 5);
        assert!(ledger.reset_daily_if_needed(c.id, next_day).unwrap());
        assert!(!ledger.reset_daily_if_needed(c.id, next_day).unwrap());
        assert!(!ledger.reset_daily_if_needed(c.id, at(2026, 10, 18, 23, 59)).unwrap());

        let state = ledger.current_state(c.id, next_day).unwrap();
        assert_eq!(state.spent_today, 0);
        assert_eq!(state.lifetime_spent, 1_500);

        let closed = ledger.drain_closed_periods();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].period_label, "2026-10-17");
        assert_eq!(closed[0].amount, 1_500);
        assert!(ledger.drain_closed_periods().is_empty());
    }

    #[test]
    fn test_daily_cap_frees_up_after_midnight() {
        let ledger = ledger();
        let c = campaign(BudgetType::Daily, 1_000);
        ledger.open_account(&c, at(2026, 10, 17, 8, 0));
        ledger.reserve_spend(c.id, 1_000, at(2026, 10, 17, 9, 0)).unwrap();
        assert!(ledger.reserve_spend(c.id, 1, at(2026, 10, 17, 23, 0)).is_err());

        // Lazy reset on the next write
        assert!(ledger.reserve_spend(c.id, 500, at(2026, 10, 18, 0, 1)).is_ok());
    }

    #[test]
    fn test_refund_credits_current_period() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        ledger.reserve_spend(c.id, 600, now).unwrap();

        let receipt = ledger.refund(c.id, 200, now).unwrap();
        assert_eq!(receipt.total_spent, 400);
        assert_eq!(receipt.lifetime_spent, 400);

        assert!(matches!(
            ledger.refund(c.id, 401, now),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_refund_saturates_day_counter() {
        let ledger = ledger();
        let c = campaign(BudgetType::Daily, 1_000);
        ledger.open_account(&c, at(2026, 10, 17, 8, 0));
        ledger.reserve_spend(c.id, 300, at(2026, 10, 17, 9, 0)).unwrap();

        // Refund lands the next day, after spent_today rolled to zero
        let receipt = ledger.refund(c.id, 300, at(2026, 10, 18, 9, 0)).unwrap();
        assert_eq!(receipt.spent_today, 0);
        assert_eq!(receipt.lifetime_spent, 0);
    }

    #[test]
    fn test_open_new_period_resets_total() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        ledger.reserve_spend(c.id, 1_000, now).unwrap();
        assert!(ledger.current_state(c.id, now).unwrap().is_exhausted(1));

        let state = ledger.open_new_period(c.id, now).unwrap();
        assert_eq!(state.period, 2);
        assert_eq!(state.total_spent, 0);
        assert_eq!(state.lifetime_spent, 1_000);
        assert!(ledger.reserve_spend(c.id, 100, now).is_ok());

        let closed = ledger.drain_closed_periods();
        assert_eq!(closed[0].period_label, "period-1");
        assert_eq!(closed[0].amount, 1_000);
    }

    #[test]
    fn test_new_period_rearms_alert_ladder() {
        let (events, mut rx) = EventSink::channel();
        let ledger = BudgetLedger::new(Arc::new(AlertEvaluator::new(0.80, 0.95)), events);
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        let receipt = ledger.reserve_spend(c.id, 1_000, now).unwrap();
        assert_eq!(receipt.alert.map(|a| a.kind), Some(AlertKind::Exhausted));

        ledger.open_new_period(c.id, now).unwrap();
        let mut renewal_alerts = 0;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::BudgetAlert(alert) = event {
                if alert.kind != AlertKind::Exhausted {
                    renewal_alerts += 1;
                }
            }
        }
        assert_eq!(renewal_alerts, 0);

        let receipt = ledger.reserve_spend(c.id, 850, now).unwrap();
        assert_eq!(receipt.alert.map(|a| a.kind), Some(AlertKind::Warning));
    }

    #[test]
    fn test_close_account_bills_once() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        ledger.reserve_spend(c.id, 400, now).unwrap();

        ledger.close_account(c.id, now).unwrap();
        ledger.close_account(c.id, now).unwrap();
        assert_eq!(ledger.drain_closed_periods().len(), 1);
    }

    #[test]
    fn test_update_budget_never_below_spend() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        ledger.reserve_spend(c.id, 700, now).unwrap();

        assert_eq!(
            ledger.update_budget(c.id, 600, now).unwrap_err(),
            LedgerError::BudgetBelowSpend { budget: 600, spent: 700 }
        );
        assert_eq!(ledger.update_budget(c.id, 2_000, now).unwrap().headroom(), 1_300);
    }

    #[test]
    fn test_shrinking_budget_raises_alert() {
        let (events, mut rx) = EventSink::channel();
        let ledger = BudgetLedger::new(Arc::new(AlertEvaluator::new(0.80, 0.95)), events);
        let c = campaign(BudgetType::Total, 10_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);
        ledger.reserve_spend(c.id, 500, now).unwrap();
        while rx.try_recv().is_ok() {}

        ledger.update_budget(c.id, 550, now).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::BudgetAlert(alert) = event {
                kinds.push(alert.kind);
            }
        }
        assert_eq!(kinds, vec![AlertKind::Critical]);

        // Already reported for this period
        assert!(ledger.evaluate_alerts(c.id, now).unwrap().is_none());
    }

    #[test]
    fn test_evaluate_alerts_reports_level_once() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 1_000);
        let now = at(2026, 10, 18, 9, 0);
        let mut restored = BudgetState::open(c.id, BudgetType::Total, 1_000, c.timezone, now);
        restored.total_spent = 850;
        restored.lifetime_spent = 850;
        ledger.restore_account(restored);

        // Restored level is primed, so nothing is re-sent
        assert!(ledger.evaluate_alerts(c.id, now).unwrap().is_none());

        ledger.update_budget(c.id, 880, now).unwrap();
        assert!(ledger.evaluate_alerts(c.id, now).unwrap().is_none());
        assert!(matches!(
            ledger.evaluate_alerts(Uuid::new_v4(), now),
            Err(LedgerError::CampaignNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_spends_never_overspend() {
        let ledger = ledger();
        let c = campaign(BudgetType::Total, 2_000);
        let now = at(2026, 10, 18, 9, 0);
        ledger.open_account(&c, now);

        let accepted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..50)
                .map(|_| scope.spawn(|| ledger.reserve_spend(c.id, 100, now).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(accepted, 20);
        assert_eq!(ledger.current_state(c.id, now).unwrap().total_spent, 2_000);
    }

    proptest! {
        #[test]
        fn prop_caps_hold_under_any_sequence(
            ops in proptest::collection::vec((any::<bool>(), 1i64..400, 0u32..72), 1..80)
        ) {
            let ledger = ledger();
            let daily = campaign(BudgetType::Daily, 1_000);
            let total = campaign(BudgetType::Total, 5_000);
            let start = at(2026, 10, 17, 0, 0);
            ledger.open_account(&daily, start);
            ledger.open_account(&total, start);

            let mut hours = 0i64;
            for (is_spend, amount, step) in ops {
                hours += i64::from(step) / 8;
                let now = start + chrono::Duration::hours(hours);
                for id in [daily.id, total.id] {
                    if is_spend {
                        let _ = ledger.reserve_spend(id, amount, now);
                    } else {
                        let _ = ledger.refund(id, amount, now);
                    }
                }

                let d = ledger.current_state(daily.id, now).unwrap();
                let t = ledger.current_state(total.id, now).unwrap();
                prop_assert!(d.spent_today >= 0 && d.spent_today <= 1_000);
                prop_assert!(t.total_spent >= 0 && t.total_spent <= 5_000);
                prop_assert!(t.lifetime_spent >= 0);
            }
        }
    }
}
