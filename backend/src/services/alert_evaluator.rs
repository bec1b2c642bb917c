//! # Alert Evaluator
//!
//! Inspects a campaign's budget state and emits threshold alerts.
//!
//! ## Thresholds
//!
//! | Kind | Condition |
//! |------|-----------|
//! | `WARNING` | usage ratio ≥ warning (default 0.80) |
//! | `CRITICAL` | usage ratio ≥ critical (default 0.95) |
//! | `EXHAUSTED` | spent ≥ cap (integer compare) |
//!
//! The usage ratio is `spent / cap` for whichever constraint binds:
//! `spentToday / budget` for DAILY, `totalSpent / budget` for TOTAL.
//!
//! Only the highest newly crossed threshold is returned, and each
//! threshold fires at most once per billing period. The period key is
//! the local reset date for DAILY budgets and the renewal counter for
//! TOTAL budgets, so a new day or a renewal re-arms every threshold.
//!
//! `PAYMENT_FAILED` and `SCHEDULE_ENDED` are raised explicitly by the
//! billing coordinator and the lifecycle tick; they share the history
//! but not the threshold ladder.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::utils::{format_minor_units, safe_ratio};

use super::budget_ledger::{BudgetState, PeriodKey};

/// What an alert is about.
///
/// The first three form an ordered ladder; comparisons between them
/// use the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Warning,
    Critical,
    Exhausted,
    PaymentFailed,
    ScheduleEnded,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Warning => "WARNING",
            AlertKind::Critical => "CRITICAL",
            AlertKind::Exhausted => "EXHAUSTED",
            AlertKind::PaymentFailed => "PAYMENT_FAILED",
            AlertKind::ScheduleEnded => "SCHEDULE_ENDED",
        }
    }

    /// Log/notification level: "info", "warning" or "critical".
    pub fn level(&self) -> &'static str {
        match self {
            AlertKind::Warning => "warning",
            AlertKind::ScheduleEnded => "info",
            _ => "critical",
        }
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WARNING" => Ok(AlertKind::Warning),
            "CRITICAL" => Ok(AlertKind::Critical),
            "EXHAUSTED" => Ok(AlertKind::Exhausted),
            "PAYMENT_FAILED" => Ok(AlertKind::PaymentFailed),
            "SCHEDULE_ENDED" => Ok(AlertKind::ScheduleEnded),
            other => Err(format!("Unknown alert kind: {}", other)),
        }
    }
}

/// An emitted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
    pub id: Uuid,
    pub campaign_id: Uuid,

    #[serde(rename = "severity")]
    pub kind: AlertKind,

    /// Usage ratio that triggered the alert (0 for non-budget alerts).
    pub ratio: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl BudgetAlert {
    pub fn new(
        campaign_id: Uuid,
        kind: AlertKind,
        ratio: f64,
        message: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            kind,
            ratio,
            message,
            timestamp,
        }
    }
}

/// Per-campaign alert bookkeeping.
#[derive(Debug)]
struct AlertTrack {
    period: PeriodKey,
    highest: Option<AlertKind>,
    history: Vec<BudgetAlert>,
}

/// Threshold alerting with per-period de-duplication.
#[derive(Debug)]
pub struct AlertEvaluator {
    warning_ratio: f64,
    critical_ratio: f64,

    /// TOTAL remainders at or below this count as exhausted.
    min_increment: i64,
    tracks: DashMap<Uuid, AlertTrack>,
}

impl AlertEvaluator {
    /// Create an evaluator with explicit thresholds.
    pub fn new(warning_ratio: f64, critical_ratio: f64) -> Self {
        Self {
            warning_ratio,
            critical_ratio,
            min_increment: 0,
            tracks: DashMap::new(),
        }
    }

    /// Treat a TOTAL remainder at or below `min_increment` as exhausted,
    /// matching the eligibility rule used by pacing.
    pub fn with_min_increment(mut self, min_increment: i64) -> Self {
        self.min_increment = min_increment;
        self
    }

    /// Create an evaluator from configured thresholds.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.alert_warning_ratio, config.alert_critical_ratio)
            .with_min_increment(config.min_bid_increment)
    }

    /// Highest threshold the state currently sits at or above.
    fn threshold_for(&self, state: &BudgetState) -> (Option<AlertKind>, f64) {
        let (spent, cap) = state.binding_usage();
        let ratio = safe_ratio(spent as f64, cap as f64);

        let kind = if cap > 0 && state.is_exhausted(self.min_increment) {
            Some(AlertKind::Exhausted)
        } else if ratio >= self.critical_ratio {
            Some(AlertKind::Critical)
        } else if ratio >= self.warning_ratio {
            Some(AlertKind::Warning)
        } else {
            None
        };

        (kind, ratio)
    }

    /// Evaluate a budget state after a ledger mutation.
    ///
    /// ## Returns
    ///
    /// * `Some(BudgetAlert)` - A threshold above anything already emitted this period
    /// * `None` - Nothing new crossed
    pub fn evaluate(&self, state: &BudgetState, now: DateTime<Utc>) -> Option<BudgetAlert> {
        let (crossed, ratio) = self.threshold_for(state);
        let period = state.period_key();

        let mut track = self
            .tracks
            .entry(state.campaign_id)
            .or_insert_with(|| AlertTrack {
                period,
                highest: None,
                history: Vec::new(),
            });

        if track.period != period {
            track.period = period;
            track.highest = None;
        }

        let crossed = crossed?;
        if track.highest.is_some_and(|highest| highest >= crossed) {
            return None;
        }
        track.highest = Some(crossed);

        let (spent, cap) = state.binding_usage();
        let message = format!(
            "{} of {} {} budget used ({:.0}%)",
            format_minor_units(spent),
            format_minor_units(cap),
            state.budget_type.as_str().to_ascii_lowercase(),
            ratio * 100.0
        );
        let alert = BudgetAlert::new(state.campaign_id, crossed, ratio, message, now);

        log_alert(&alert);
        track.history.push(alert.clone());
        Some(alert)
    }

    /// Record the current threshold as already emitted without alerting.
    ///
    /// Used when restoring state so a restart does not re-send alerts.
    pub fn prime(&self, state: &BudgetState) {
        let (crossed, _) = self.threshold_for(state);
        let period = state.period_key();

        let mut track = self
            .tracks
            .entry(state.campaign_id)
            .or_insert_with(|| AlertTrack {
                period,
                highest: None,
                history: Vec::new(),
            });
        track.period = period;
        track.highest = crossed;
    }

    /// Raise an out-of-ladder alert (payment failure, schedule end).
    pub fn raise(
        &self,
        campaign_id: Uuid,
        kind: AlertKind,
        message: String,
        now: DateTime<Utc>,
    ) -> BudgetAlert {
        let alert = BudgetAlert::new(campaign_id, kind, 0.0, message, now);
        log_alert(&alert);

        if let Some(mut track) = self.tracks.get_mut(&campaign_id) {
            track.history.push(alert.clone());
        } else {
            self.tracks.insert(
                campaign_id,
                AlertTrack {
                    period: PeriodKey::Cycle(0),
                    highest: None,
                    history: vec![alert.clone()],
                },
            );
        }

        alert
    }

    /// All alerts emitted for a campaign, oldest first.
    pub fn alerts_for(&self, campaign_id: Uuid) -> Vec<BudgetAlert> {
        self.tracks
            .get(&campaign_id)
            .map(|track| track.history.clone())
            .unwrap_or_default()
    }

    /// Load persisted alert history.
    pub fn restore_history(&self, alerts: Vec<BudgetAlert>) {
        for alert in alerts {
            self.tracks
                .entry(alert.campaign_id)
                .or_insert_with(|| AlertTrack {
                    period: PeriodKey::Cycle(0),
                    highest: None,
                    history: Vec::new(),
                })
                .history
                .push(alert);
        }
    }
}

fn log_alert(alert: &BudgetAlert) {
    match alert.kind.level() {
        "critical" => error!(
            "ALERT [{}] campaign {}: {}",
            alert.kind.as_str(),
            alert.campaign_id,
            alert.message
        ),
        "warning" => warn!(
            "ALERT [{}] campaign {}: {}",
            alert.kind.as_str(),
            alert.campaign_id,
            alert.message
        ),
        _ => info!(
            "ALERT [{}] campaign {}: {}",
            alert.kind.as_str(),
            alert.campaign_id,
            alert.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::at;
    use crate::models::{BudgetType, CampaignTimezone};

    fn total_state(budget: i64) -> BudgetState {
        BudgetState::open(
            Uuid::new_v4(),
            BudgetType::Total,
            budget,
            CampaignTimezone::utc(),
            at(2026, 10, 18, 9, 0),
        )
    }

    #[test]
    fn test_total_budget_warning_then_critical_once() {
        let evaluator = AlertEvaluator::new(0.80, 0.95);
        let now = at(2026, 10, 18, 10, 0);
        let mut state = total_state(10_000);

        state.total_spent = 8_000;
        let alert = evaluator.evaluate(&state, now).unwrap();
        assert_eq!(alert.kind, AlertKind::Warning);
        assert!((alert.ratio - 0.8).abs() < 1e-9);

        state.total_spent = 9_600;
        assert_eq!(evaluator.evaluate(&state, now).unwrap().kind, AlertKind::Critical);

        // No further spend: nothing new
        assert!(evaluator.evaluate(&state, now).is_none());
        assert_eq!(evaluator.alerts_for(state.campaign_id).len(), 2);
    }

    #[test]
    fn test_jump_reports_only_highest() {
        let evaluator = AlertEvaluator::new(0.80, 0.95);
        let mut state = total_state(10_000);

        state.total_spent = 10_000;
        let alert = evaluator.evaluate(&state, at(2026, 10, 18, 10, 0)).unwrap();
        assert_eq!(alert.kind, AlertKind::Exhausted);
        assert_eq!(evaluator.alerts_for(state.campaign_id).len(), 1);
    }

    #[test]
    fn test_total_remainder_below_increment_is_exhausted() {
        let evaluator = AlertEvaluator::new(0.80, 0.95).with_min_increment(1);
        let mut state = total_state(1_000);

        state.total_spent = 999;
        let alert = evaluator.evaluate(&state, at(2026, 10, 18, 10, 0)).unwrap();
        assert_eq!(alert.kind, AlertKind::Exhausted);
        assert!(state.is_exhausted(1));
    }

    #[test]
    fn test_from_config_uses_min_bid_increment() {
        let config = AppConfig {
            min_bid_increment: 5,
            ..AppConfig::default()
        };
        let evaluator = AlertEvaluator::from_config(&config);
        let mut state = total_state(1_000);

        state.total_spent = 995;
        assert_eq!(
            evaluator.evaluate(&state, at(2026, 10, 18, 10, 0)).unwrap().kind,
            AlertKind::Exhausted
        );
    }

    #[test]
    fn test_below_warning_is_silent() {
        let evaluator = AlertEvaluator::new(0.80, 0.95);
        let mut state = total_state(10_000);
        state.total_spent = 7_999;
        assert!(evaluator.evaluate(&state, at(2026, 10, 18, 10, 0)).is_none());
    }

    #[test]
    fn test_new_period_rearms_thresholds() {
        let evaluator = AlertEvaluator::new(0.80, 0.95);
        let mut state = BudgetState::open(
            Uuid::new_v4(),
            BudgetType::Daily,
            2_000,
            CampaignTimezone::utc(),
            at(2026, 10, 17, 9, 0),
        );

        state.spent_today = 1_700;
        assert!(evaluator.evaluate(&state, at(2026, 10, 17, 20, 0)).is_some());
        assert!(evaluator.evaluate(&state, at(2026, 10, 17, 21, 0)).is_none());

        state.last_reset_date = at(2026, 10, 18, 0, 0).date_naive();
        state.spent_today = 1_650;
        let alert = evaluator.evaluate(&state, at(2026, 10, 18, 20, 0)).unwrap();
        assert_eq!(alert.kind, AlertKind::Warning);
    }

    #[test]
    fn test_prime_suppresses_existing_level() {
        let evaluator = AlertEvaluator::new(0.80, 0.95);
        let mut state = total_state(10_000);
        state.total_spent = 8_500;

        evaluator.prime(&state);
        assert!(evaluator.evaluate(&state, at(2026, 10, 18, 10, 0)).is_none());

        state.total_spent = 9_500;
        assert_eq!(
            evaluator.evaluate(&state, at(2026, 10, 18, 10, 5)).unwrap().kind,
            AlertKind::Critical
        );
    }

    #[test]
    fn test_raise_records_history() {
        let evaluator = AlertEvaluator::new(0.80, 0.95);
        let id = Uuid::new_v4();
        let alert = evaluator.raise(
            id,
            AlertKind::PaymentFailed,
            "Charge declined".to_string(),
            at(2026, 10, 18, 10, 0),
        );
        assert_eq!(alert.kind.level(), "critical");
        assert_eq!(evaluator.alerts_for(id), vec![alert]);
    }
}
