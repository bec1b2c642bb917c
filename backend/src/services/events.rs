//! # Engine Events
//!
//! Engine services publish what happened on a tokio unbounded channel.
//! Sending never blocks, so publishing is safe from inside the
//! per-campaign critical sections on the spend path.
//!
//! ```text
//! BudgetLedger / CampaignLifecycle / CampaignManager
//!              │  EventSink::publish (sync, non-blocking)
//!              ▼
//!      mpsc::UnboundedSender<EngineEvent>
//!              │
//!              ▼
//!   websocket::forward_engine_events ──► WsRegistry ──► /ws/{owner}
//!                                   └──► database (alerts, transitions)
//! ```

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::alert_evaluator::BudgetAlert;
use super::budget_ledger::BudgetState;
use super::campaign_lifecycle::TransitionRecord;

/// Something observers care about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A budget threshold was crossed, or a billing/schedule alert fired.
    BudgetAlert(BudgetAlert),

    /// A lifecycle transition was recorded.
    CampaignStatusChanged(TransitionRecord),

    /// Spend or refund changed a campaign's budget state.
    BudgetUpdate(BudgetState),
}

impl EngineEvent {
    /// Campaign the event concerns.
    pub fn campaign_id(&self) -> uuid::Uuid {
        match self {
            EngineEvent::BudgetAlert(alert) => alert.campaign_id,
            EngineEvent::CampaignStatusChanged(record) => record.campaign_id,
            EngineEvent::BudgetUpdate(state) => state.campaign_id,
        }
    }
}

/// Cloneable, optional publisher.
///
/// A detached sink (no receiver) drops events, which is what unit tests use.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventSink {
    /// Create a connected sink and the receiving half for the forwarder.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Publish an event. A closed channel is not an engine error.
    pub fn publish(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped; event discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::at;
    use crate::services::alert_evaluator::AlertKind;

    #[test]
    fn test_channel_delivers_events() {
        let (sink, mut rx) = EventSink::channel();
        let alert = BudgetAlert::new(
            uuid::Uuid::new_v4(),
            AlertKind::Warning,
            0.8,
            "80% of budget used".to_string(),
            at(2026, 10, 18, 12, 0),
        );
        let id = alert.campaign_id;

        sink.publish(EngineEvent::BudgetAlert(alert));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.campaign_id(), id);
        let json = serde_json::to_value(&received).unwrap();
        assert_eq!(json["type"], "budget_alert");
    }

    #[test]
    fn test_detached_sink_is_silent() {
        let sink = EventSink::detached();
        sink.publish(EngineEvent::BudgetAlert(BudgetAlert::new(
            uuid::Uuid::new_v4(),
            AlertKind::Critical,
            0.95,
            String::new(),
            at(2026, 10, 18, 12, 0),
        )));
    }
}
