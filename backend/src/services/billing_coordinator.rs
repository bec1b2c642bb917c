//! # Billing Coordinator
//!
//! Turns closed billing periods into charges, hands them to the
//! external billing processor, and reacts to the processor's webhooks.
//!
//! ## Charge Flow
//!
//! ```text
//! ClosedPeriod ──► open_charge ──► BillingProcessor::submit
//!                                         │
//!                     webhook: succeeded  │  webhook: failed
//!               ┌─────────────────────────┴──────────────────────┐
//!               ▼                                                ▼
//!            SETTLED                          attempts ≤ max retries?
//!                                              yes │              │ no
//!                                                  ▼              ▼
//!                                       RETRY_SCHEDULED        FAILED
//!                                  (base × 2^(attempt-1))  campaign paused,
//!                                                          PAYMENT_FAILED alert
//! ```
//!
//! No processor call happens on the spend path. Submissions happen
//! from the periodic tick.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::utils::format_minor_units;

use super::budget_ledger::ClosedPeriod;

/// Longest backoff we will schedule.
const MAX_RETRY_DELAY_SECS: i64 = 7 * 86_400;

/// Errors that can occur in billing operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    /// A success webhook referenced a charge we never opened.
    #[error("Unknown charge: {0}")]
    UnknownCharge(Uuid),

    /// The webhook's campaign does not own the charge.
    #[error("Charge {charge_id} does not belong to campaign {campaign_id}")]
    CampaignMismatch { charge_id: Uuid, campaign_id: Uuid },

    /// The processor refused the submission outright.
    #[error("Billing processor error: {0}")]
    Processor(String),
}

/// Where a charge stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Pending,
    Settled,
    RetryScheduled,
    Failed,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "PENDING",
            ChargeStatus::Settled => "SETTLED",
            ChargeStatus::RetryScheduled => "RETRY_SCHEDULED",
            ChargeStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for ChargeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ChargeStatus::Pending),
            "SETTLED" => Ok(ChargeStatus::Settled),
            "RETRY_SCHEDULED" => Ok(ChargeStatus::RetryScheduled),
            "FAILED" => Ok(ChargeStatus::Failed),
            other => Err(format!("Unknown charge status: {}", other)),
        }
    }
}

/// A charge for one closed billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub period_label: String,
    pub amount: i64,

    /// Submissions so far, including the first.
    pub attempts: u32,
    pub status: ChargeStatus,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Processor verdict delivered by webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Succeeded,
    Failed,
}

/// What a webhook did to a charge.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Settled(Charge),
    RetryScheduled(Charge),
    /// Retries exhausted. The campaign must be paused.
    GaveUp(Charge),
    /// Charge already final; duplicate delivery.
    Ignored(Charge),
}

/// What a submission to the processor did to a charge.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Accepted by the processor; the verdict arrives by webhook.
    Submitted(Charge),
    /// Refused, with retries left.
    RetryScheduled(Charge),
    /// Refused on the last allowed attempt. The campaign must be paused.
    GaveUp(Charge),
}

impl SubmitOutcome {
    fn from_charge(charge: Charge) -> Self {
        match charge.status {
            ChargeStatus::Failed => SubmitOutcome::GaveUp(charge),
            ChargeStatus::RetryScheduled => SubmitOutcome::RetryScheduled(charge),
            _ => SubmitOutcome::Submitted(charge),
        }
    }
}

/// The external processor that actually moves money.
pub trait BillingProcessor: Send + Sync {
    /// Submit a charge. The verdict arrives later by webhook.
    fn submit(&self, charge: &Charge) -> Result<(), BillingError>;
}

/// Default processor: records the submission in the log.
#[derive(Debug, Default)]
pub struct LoggingBillingProcessor;

impl BillingProcessor for LoggingBillingProcessor {
    fn submit(&self, charge: &Charge) -> Result<(), BillingError> {
        info!(
            "Submitting charge {} for campaign {} ({}): {} (attempt {})",
            charge.id,
            charge.campaign_id,
            charge.period_label,
            format_minor_units(charge.amount),
            charge.attempts
        );
        Ok(())
    }
}

/// Charge book-keeping and retry policy.
pub struct BillingCoordinator {
    charges: DashMap<Uuid, Charge>,
    processor: Arc<dyn BillingProcessor>,
    max_retries: u32,
    retry_base_secs: i64,
}

impl BillingCoordinator {
    pub fn new(processor: Arc<dyn BillingProcessor>, max_retries: u32, retry_base_secs: u64) -> Self {
        Self {
            charges: DashMap::new(),
            processor,
            max_retries,
            retry_base_secs: i64::try_from(retry_base_secs).unwrap_or(MAX_RETRY_DELAY_SECS),
        }
    }

    pub fn from_config(processor: Arc<dyn BillingProcessor>, config: &AppConfig) -> Self {
        Self::new(processor, config.billing_max_retries, config.billing_retry_base_secs)
    }

    /// Open and submit a charge for a closed period.
    ///
    /// A processor refusal counts as a failed attempt, so a charge can
    /// give up here without ever seeing a webhook.
    pub fn open_charge(&self, period: &ClosedPeriod, now: DateTime<Utc>) -> SubmitOutcome {
        let mut charge = Charge {
            id: Uuid::new_v4(),
            campaign_id: period.campaign_id,
            period_label: period.period_label.clone(),
            amount: period.amount,
            attempts: 1,
            status: ChargeStatus::Pending,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.processor.submit(&charge) {
            warn!("Submission of charge {} failed: {}", charge.id, e);
            self.record_failure(&mut charge, e.to_string(), now);
        }

        self.charges.insert(charge.id, charge.clone());
        SubmitOutcome::from_charge(charge)
    }

    /// Apply a processor webhook.
    ///
    /// A failure for a charge we have never seen is tracked as a new
    /// charge on its first attempt, so it still enters the retry policy.
    pub fn handle_webhook(
        &self,
        charge_id: Uuid,
        campaign_id: Uuid,
        status: WebhookStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BillingError> {
        let mut entry = match (self.charges.get_mut(&charge_id), status) {
            (Some(entry), _) => entry,
            (None, WebhookStatus::Succeeded) => return Err(BillingError::UnknownCharge(charge_id)),
            (None, WebhookStatus::Failed) => {
                warn!(
                    "Failure webhook for unknown charge {} (campaign {}); tracking it",
                    charge_id, campaign_id
                );
                self.charges.entry(charge_id).or_insert_with(|| Charge {
                    id: charge_id,
                    campaign_id,
                    period_label: "external".to_string(),
                    amount: 0,
                    attempts: 1,
                    status: ChargeStatus::Pending,
                    last_error: None,
                    next_retry_at: None,
                    created_at: now,
                    updated_at: now,
                })
            }
        };

        if entry.campaign_id != campaign_id {
            return Err(BillingError::CampaignMismatch {
                charge_id,
                campaign_id,
            });
        }

        if matches!(entry.status, ChargeStatus::Settled | ChargeStatus::Failed) {
            return Ok(WebhookOutcome::Ignored(entry.clone()));
        }

        match status {
            WebhookStatus::Succeeded => {
                entry.status = ChargeStatus::Settled;
                entry.next_retry_at = None;
                entry.updated_at = now;
                info!("Charge {} settled", charge_id);
                Ok(WebhookOutcome::Settled(entry.clone()))
            }
            WebhookStatus::Failed => {
                let reason = reason.unwrap_or_else(|| "declined".to_string());
                self.record_failure(&mut entry, reason, now);
                if entry.status == ChargeStatus::Failed {
                    Ok(WebhookOutcome::GaveUp(entry.clone()))
                } else {
                    Ok(WebhookOutcome::RetryScheduled(entry.clone()))
                }
            }
        }
    }

    /// Resubmit every charge whose retry time has come.
    ///
    /// No map guard is held while the processor runs; the processor is
    /// free to read charges back.
    pub fn resubmit_due(&self, now: DateTime<Utc>) -> Vec<SubmitOutcome> {
        let due: Vec<Uuid> = self
            .charges
            .iter()
            .filter(|c| {
                c.status == ChargeStatus::RetryScheduled
                    && c.next_retry_at.is_some_and(|at| at <= now)
            })
            .map(|c| c.id)
            .collect();

        let mut outcomes = Vec::with_capacity(due.len());
        for id in due {
            let attempt = {
                let Some(mut charge) = self.charges.get_mut(&id) else {
                    continue;
                };
                if charge.status != ChargeStatus::RetryScheduled {
                    continue;
                }

                charge.attempts += 1;
                charge.status = ChargeStatus::Pending;
                charge.next_retry_at = None;
                charge.updated_at = now;
                charge.clone()
            };

            let result = self.processor.submit(&attempt);

            let Some(mut charge) = self.charges.get_mut(&id) else {
                continue;
            };
            if let Err(e) = result {
                warn!("Resubmission of charge {} failed: {}", charge.id, e);
                // A webhook may have settled it while the processor ran
                if charge.status == ChargeStatus::Pending {
                    self.record_failure(&mut charge, e.to_string(), now);
                }
            }
            outcomes.push(SubmitOutcome::from_charge(charge.clone()));
        }

        outcomes
    }

    /// Charges for a campaign, oldest first.
    pub fn charges_for(&self, campaign_id: Uuid) -> Vec<Charge> {
        let mut charges: Vec<Charge> = self
            .charges
            .iter()
            .filter(|c| c.campaign_id == campaign_id)
            .map(|c| c.clone())
            .collect();
        charges.sort_by_key(|c| c.created_at);
        charges
    }

    pub fn all_charges(&self) -> Vec<Charge> {
        self.charges.iter().map(|c| c.clone()).collect()
    }

    pub fn restore(&self, charges: Vec<Charge>) {
        for charge in charges {
            self.charges.insert(charge.id, charge);
        }
    }

    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2i64.saturating_pow(attempt.saturating_sub(1));
        Duration::seconds(
            self.retry_base_secs
                .saturating_mul(factor)
                .min(MAX_RETRY_DELAY_SECS),
        )
    }

    fn record_failure(&self, charge: &mut Charge, reason: String, now: DateTime<Utc>) {
        charge.last_error = Some(reason);
        charge.updated_at = now;

        // attempts counts submissions; retries used = attempts - 1
        if charge.attempts > self.max_retries {
            charge.status = ChargeStatus::Failed;
            charge.next_retry_at = None;
            warn!(
                "Charge {} for campaign {} failed after {} attempts",
                charge.id, charge.campaign_id, charge.attempts
            );
        } else {
            let at = now + self.retry_delay(charge.attempts);
            charge.status = ChargeStatus::RetryScheduled;
            charge.next_retry_at = Some(at);
            info!(
                "Charge {} declined (attempt {}); retry at {}",
                charge.id, charge.attempts, at
            );
        }
    }
}
