//! # Campaign Lifecycle
//!
//! The state machine governing campaign status, plus the campaign
//! registry itself.
//!
//! ## Transitions
//!
//! | From | Action | To | Condition |
//! |------|--------|----|-----------|
//! | DRAFT | activate | ACTIVE | cities non-empty, budget > 0, schedule not over |
//! | ACTIVE | pause | PAUSED | |
//! | PAUSED | resume | ACTIVE | `today ≤ endDate`, budget not exhausted |
//! | ACTIVE, PAUSED | scheduleExpire | ENDED | `today > endDate` |
//! | ACTIVE | budgetExhausted | ENDED | `autoRenew = false` |
//! | ACTIVE, PAUSED | renew | (same) | `autoRenew = true`, within schedule |
//! | ACTIVE | paymentFailed | PAUSED | charge retries exhausted |
//!
//! ENDED is terminal. Every transition is appended to the campaign's
//! history, which is never rewritten.
//!
//! ## Locking
//!
//! Each campaign's record is mutated under its DashMap entry lock, so
//! transitions on one campaign serialize while others proceed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::{Campaign, CampaignPatch, CampaignStatus, ValidationError};

use super::auction_ranker::DeliveryOpportunity;
use super::events::{EngineEvent, EventSink};

/// Errors that can occur in lifecycle operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    /// The state machine has no edge for this action from this status.
    #[error("Cannot {action} a {from} campaign")]
    InvalidTransition {
        from: CampaignStatus,
        action: LifecycleAction,
    },

    /// The edge exists but its precondition does not hold.
    #[error("Transition blocked: {0}")]
    Blocked(String),

    /// Activation needs at least one city and a positive budget.
    #[error("Invalid targeting: {0}")]
    InvalidTargeting(String),

    /// Ended campaigns are read-only.
    #[error("Campaign {0} has ended")]
    CampaignEnded(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleAction {
    Activate,
    Pause,
    Resume,
    ScheduleExpire,
    BudgetExhausted,
    Renew,
    PaymentFailed,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Activate => "ACTIVATE",
            LifecycleAction::Pause => "PAUSE",
            LifecycleAction::Resume => "RESUME",
            LifecycleAction::ScheduleExpire => "SCHEDULE_EXPIRE",
            LifecycleAction::BudgetExhausted => "BUDGET_EXHAUSTED",
            LifecycleAction::Renew => "RENEW",
            LifecycleAction::PaymentFailed => "PAYMENT_FAILED",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_lowercase())
    }
}

impl std::str::FromStr for LifecycleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVATE" => Ok(LifecycleAction::Activate),
            "PAUSE" => Ok(LifecycleAction::Pause),
            "RESUME" => Ok(LifecycleAction::Resume),
            "SCHEDULE_EXPIRE" => Ok(LifecycleAction::ScheduleExpire),
            "BUDGET_EXHAUSTED" => Ok(LifecycleAction::BudgetExhausted),
            "RENEW" => Ok(LifecycleAction::Renew),
            "PAYMENT_FAILED" => Ok(LifecycleAction::PaymentFailed),
            other => Err(format!("Unknown lifecycle action: {}", other)),
        }
    }
}

/// The transition table. `None` means no such edge.
pub fn next_status(from: CampaignStatus, action: LifecycleAction) -> Option<CampaignStatus> {
    use CampaignStatus::*;
    use LifecycleAction::*;

    match (from, action) {
        (Draft, Activate) => Some(Active),
        (Active, Pause) => Some(Paused),
        (Paused, Resume) => Some(Active),
        (Active | Paused, ScheduleExpire) => Some(Ended),
        (Active, BudgetExhausted) => Some(Ended),
        (Active | Paused, Renew) => Some(from),
        (Active, PaymentFailed) => Some(Paused),
        _ => None,
    }
}

/// One entry of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub action: LifecycleAction,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of reporting an exhausted budget.
#[derive(Debug, Clone, PartialEq)]
pub enum ExhaustionOutcome {
    /// Campaign ended; its final period needs billing.
    Ended(TransitionRecord),
    /// Campaign renews; the ledger must open a new period.
    Renewed(TransitionRecord),
    /// Nothing to do (paused without auto-renew, draft, ended, or past schedule).
    Unchanged,
}

#[derive(Debug)]
struct CampaignRecord {
    campaign: Campaign,
    history: Vec<TransitionRecord>,
}

/// Registry of campaigns and their lifecycle.
pub struct CampaignLifecycle {
    records: DashMap<Uuid, CampaignRecord>,
    events: EventSink,
}

impl CampaignLifecycle {
    pub fn new(events: EventSink) -> Self {
        Self {
            records: DashMap::new(),
            events,
        }
    }

    // ==========================================
    // REGISTRY
    // ==========================================

    /// Register a freshly created DRAFT campaign.
    pub fn insert(&self, campaign: Campaign) {
        self.records.insert(
            campaign.id,
            CampaignRecord {
                campaign,
                history: Vec::new(),
            },
        );
    }

    /// Register a persisted campaign with its history.
    pub fn restore(&self, campaign: Campaign, history: Vec<TransitionRecord>) {
        self.records
            .insert(campaign.id, CampaignRecord { campaign, history });
    }

    pub fn get(&self, campaign_id: Uuid) -> Result<Campaign, LifecycleError> {
        self.records
            .get(&campaign_id)
            .map(|r| r.campaign.clone())
            .ok_or(LifecycleError::CampaignNotFound(campaign_id))
    }

    /// Campaigns, optionally for one owner, oldest first.
    pub fn list(&self, owner_id: Option<&str>) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .records
            .iter()
            .filter(|r| owner_id.map_or(true, |o| r.campaign.owner_id == o))
            .map(|r| r.campaign.clone())
            .collect();
        campaigns.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        campaigns
    }

    pub fn history(&self, campaign_id: Uuid) -> Result<Vec<TransitionRecord>, LifecycleError> {
        self.records
            .get(&campaign_id)
            .map(|r| r.history.clone())
            .ok_or(LifecycleError::CampaignNotFound(campaign_id))
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.records.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// ACTIVE campaigns in the opportunity's ad-type pool whose targeting matches.
    pub fn candidates(&self, opportunity: &DeliveryOpportunity) -> Vec<Campaign> {
        self.records
            .iter()
            .filter(|r| {
                let c = &r.campaign;
                c.status == CampaignStatus::Active
                    && c.ad_type == opportunity.ad_type
                    && c.targeting
                        .matches(&opportunity.city, opportunity.category.as_deref())
            })
            .map(|r| r.campaign.clone())
            .collect()
    }

    // ==========================================
    // OWNER ACTIONS
    // ==========================================

    /// `DRAFT → ACTIVE`.
    pub fn activate(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, LifecycleError> {
        self.transition(campaign_id, LifecycleAction::Activate, None, now, |c| {
            if c.targeting.cities.is_empty() {
                return Err(LifecycleError::InvalidTargeting(
                    "at least one city is required".to_string(),
                ));
            }
            if c.budget <= 0 {
                return Err(LifecycleError::InvalidTargeting(
                    "budget must be greater than zero".to_string(),
                ));
            }
            if c.is_past_schedule(now) {
                return Err(LifecycleError::Blocked(format!(
                    "schedule ended on {}",
                    c.end_date
                )));
            }
            Ok(())
        })
    }

    /// `ACTIVE → PAUSED`. Takes effect for the next opportunity.
    pub fn pause(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, LifecycleError> {
        self.transition(campaign_id, LifecycleAction::Pause, None, now, |_| Ok(()))
    }

    /// `PAUSED → ACTIVE` while the schedule is open and budget remains.
    pub fn resume(
        &self,
        campaign_id: Uuid,
        budget_exhausted: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, LifecycleError> {
        self.transition(campaign_id, LifecycleAction::Resume, None, now, |c| {
            if c.is_past_schedule(now) {
                return Err(LifecycleError::Blocked(format!(
                    "schedule ended on {}",
                    c.end_date
                )));
            }
            if budget_exhausted {
                return Err(LifecycleError::Blocked("budget is exhausted".to_string()));
            }
            Ok(())
        })
    }

    /// Apply a patch under the campaign's lock.
    ///
    /// `check` sees the old and merged campaign before anything is
    /// stored; the manager uses it to move the ledger's cap in the same
    /// critical section.
    pub fn update<E, F>(
        &self,
        campaign_id: Uuid,
        patch: CampaignPatch,
        now: DateTime<Utc>,
        check: F,
    ) -> Result<Campaign, E>
    where
        E: From<LifecycleError>,
        F: FnOnce(&Campaign, &Campaign) -> Result<(), E>,
    {
        let mut record = self
            .records
            .get_mut(&campaign_id)
            .ok_or(LifecycleError::CampaignNotFound(campaign_id))?;

        let current = &record.campaign;
        if current.status.is_terminal() {
            return Err(LifecycleError::CampaignEnded(campaign_id).into());
        }

        let changes_budget = patch.budget.is_some_and(|b| b != current.budget);
        if changes_budget
            && !matches!(current.status, CampaignStatus::Draft | CampaignStatus::Paused)
        {
            return Err(LifecycleError::Blocked(
                "budget can only change while DRAFT or PAUSED".to_string(),
            )
            .into());
        }

        let merged = current.patched(patch, now).map_err(LifecycleError::from)?;
        check(current, &merged)?;

        record.campaign = merged.clone();
        Ok(merged)
    }

    // ==========================================
    // ENGINE-DRIVEN TRANSITIONS
    // ==========================================

    /// End an ACTIVE or PAUSED campaign whose schedule is over.
    pub fn expire_if_past_schedule(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<TransitionRecord>, LifecycleError> {
        let campaign = self.get(campaign_id)?;
        if !campaign.is_past_schedule(now)
            || !matches!(campaign.status, CampaignStatus::Active | CampaignStatus::Paused)
        {
            return Ok(None);
        }

        let reason = format!("schedule ended on {}", campaign.end_date);
        match self.transition(
            campaign_id,
            LifecycleAction::ScheduleExpire,
            Some(reason),
            now,
            |_| Ok(()),
        ) {
            Ok(record) => Ok(Some(record)),
            // Raced with another transition; status no longer expirable
            Err(LifecycleError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// React to a TOTAL budget that has run out.
    pub fn on_budget_exhausted(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExhaustionOutcome, LifecycleError> {
        let campaign = self.get(campaign_id)?;
        let reason = Some("total budget exhausted".to_string());

        let attempt = if campaign.auto_renew {
            if campaign.is_past_schedule(now) {
                return Ok(ExhaustionOutcome::Unchanged);
            }
            self.transition(campaign_id, LifecycleAction::Renew, reason, now, |c| {
                if c.auto_renew {
                    Ok(())
                } else {
                    Err(LifecycleError::Blocked("auto-renew was turned off".to_string()))
                }
            })
            .map(ExhaustionOutcome::Renewed)
        } else {
            self.transition(
                campaign_id,
                LifecycleAction::BudgetExhausted,
                reason,
                now,
                |_| Ok(()),
            )
            .map(ExhaustionOutcome::Ended)
        };

        match attempt {
            Ok(outcome) => Ok(outcome),
            Err(LifecycleError::InvalidTransition { .. }) | Err(LifecycleError::Blocked(_)) => {
                Ok(ExhaustionOutcome::Unchanged)
            }
            Err(e) => Err(e),
        }
    }

    /// Force an ACTIVE campaign to PAUSED after a failed charge.
    ///
    /// ## Returns
    ///
    /// * `Ok(Some(record))` - Campaign was paused
    /// * `Ok(None)` - Campaign was not ACTIVE; nothing to pause
    pub fn force_pause(
        &self,
        campaign_id: Uuid,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Option<TransitionRecord>, LifecycleError> {
        match self.transition(
            campaign_id,
            LifecycleAction::PaymentFailed,
            Some(reason),
            now,
            |_| Ok(()),
        ) {
            Ok(record) => Ok(Some(record)),
            Err(LifecycleError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn transition<F>(
        &self,
        campaign_id: Uuid,
        action: LifecycleAction,
        reason: Option<String>,
        now: DateTime<Utc>,
        precondition: F,
    ) -> Result<TransitionRecord, LifecycleError>
    where
        F: FnOnce(&Campaign) -> Result<(), LifecycleError>,
    {
        let record = {
            let mut entry = self
                .records
                .get_mut(&campaign_id)
                .ok_or(LifecycleError::CampaignNotFound(campaign_id))?;

            let from = entry.campaign.status;
            let to = next_status(from, action)
                .ok_or(LifecycleError::InvalidTransition { from, action })?;
            precondition(&entry.campaign)?;

            entry.campaign.status = to;
            entry.campaign.updated_at = now;

            let record = TransitionRecord {
                id: Uuid::new_v4(),
                campaign_id,
                from,
                to,
                action,
                reason,
                at: now,
            };
            entry.history.push(record.clone());
            record
        };

        info!(
            "Campaign {} {} -> {} ({})",
            campaign_id,
            record.from,
            record.to,
            record.action.as_str()
        );
        self.events
            .publish(EngineEvent::CampaignStatusChanged(record.clone()));

        Ok(record)
    }
}
