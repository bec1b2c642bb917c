//! # WebSocket Module
//!
//! This module pushes engine events to campaign owners in real time.
//!
//! ## Features
//!
//! - Budget threshold alerts (80% / 95% / 100%, payment failures)
//! - Campaign status changes (activate, pause, exhaustion, expiry)
//! - Budget state after each spend or refund
//!
//! ## Connection Flow
//!
//! ```text
//! 1. Client connects to /ws/:owner
//!              ↓
//! 2. Server registers the connection under the owner id
//!              ↓
//! 3. The event forwarder maps each EngineEvent to its campaign's owner
//!              ↓
//! 4. Events are pushed as they occur:
//!    - budget_alert
//!    - campaign_status_changed
//!    - budget_update
//! ```
//!
//! ## Message Format
//!
//! All messages are JSON:
//!
//! ```json
//! {
//!     "event": "budget_alert",
//!     "data": {
//!         "campaignId": "550e8400-e29b-41d4-a716-446655440000",
//!         "kind": "WARNING",
//!         "ratio": 0.81,
//!         "message": "81% of daily budget used"
//!     },
//!     "timestamp": "2026-10-18T12:00:00Z"
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::db::{queries, Database};
use crate::services::{CampaignManager, EngineEvent};
use crate::AppState;

/// WebSocket event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventType {
    /// A budget or billing alert fired.
    BudgetAlert,
    /// A lifecycle transition was recorded.
    CampaignStatusChanged,
    /// Spend or refund changed the budget state.
    BudgetUpdate,
    /// Sent once after the handshake.
    Connected,
    /// Ping/pong for keepalive.
    Ping,
    /// Error message.
    Error,
}

/// WebSocket message wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage<T> {
    /// Event type.
    pub event: WsEventType,
    /// Event data.
    pub data: T,
    /// Timestamp.
    pub timestamp: chrono::DateTime<Utc>,
}

impl<T: Serialize> WsMessage<T> {
    /// Create a new WebSocket message.
    pub fn new(event: WsEventType, data: T) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// WebSocket connection registry.
///
/// Tracks active WebSocket sessions per owner and provides
/// methods to send messages to a specific owner.
#[derive(Clone)]
pub struct WsRegistry {
    /// Map of owner id -> broadcast senders.
    /// Each owner can have multiple connections (multiple tabs/devices)
    sessions: Arc<Mutex<HashMap<String, Vec<broadcast::Sender<String>>>>>,
}

impl WsRegistry {
    /// Create a new WebSocket registry.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new WebSocket connection for an owner.
    /// Returns a receiver that will receive messages for this owner.
    pub async fn register(&self, owner: String) -> broadcast::Receiver<String> {
        let mut sessions = self.sessions.lock().await;
        let (tx, rx) = broadcast::channel(100);

        let connections = sessions.entry(owner.clone()).or_default();
        connections.push(tx);

        info!(
            "Registered WebSocket for owner: {} (total connections: {})",
            owner,
            connections.len()
        );

        rx
    }

    /// Drop senders whose receivers are gone.
    pub async fn unregister(&self, owner: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(senders) = sessions.get_mut(owner) {
            senders.retain(|tx| tx.receiver_count() > 0);

            if senders.is_empty() {
                sessions.remove(owner);
                info!("Unregistered all WebSocket connections for owner: {}", owner);
            } else {
                info!(
                    "Unregistered one WebSocket connection for owner: {} (remaining: {})",
                    owner,
                    senders.len()
                );
            }
        }
    }

    /// Send a message to every connection of an owner.
    ///
    /// ## Arguments
    ///
    /// * `owner` - Campaign owner id
    /// * `event` - Event type
    /// * `data` - Event data (must implement Serialize)
    ///
    /// ## Returns
    ///
    /// * `Ok(n)` - Number of connections reached (0 if the owner is offline)
    /// * `Err(String)` - Failed to serialize message
    pub async fn send_to_owner<T: Serialize>(
        &self,
        owner: &str,
        event: WsEventType,
        data: T,
    ) -> Result<usize, String> {
        let json = WsMessage::new(event, data)
            .to_json()
            .map_err(|e| format!("Failed to serialize message: {}", e))?;

        let mut sessions = self.sessions.lock().await;
        let Some(senders) = sessions.get_mut(owner) else {
            debug!("No active WebSocket connections for owner: {}", owner);
            return Ok(0);
        };

        let mut sent_count = 0;
        senders.retain(|sender| {
            if sender.receiver_count() == 0 {
                return false;
            }
            match sender.send(json.clone()) {
                Ok(_) => {
                    sent_count += 1;
                    true
                }
                Err(_) => false,
            }
        });

        if senders.is_empty() {
            sessions.remove(owner);
        }

        if sent_count > 0 {
            debug!("Sent {:?} to owner {} ({} connections)", event, owner, sent_count);
        }
        Ok(sent_count)
    }

    /// Get the number of active connections for an owner.
    pub async fn connection_count(&self, owner: &str) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.get(owner).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for WsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// EVENT FORWARDING
// ==========================================

/// Drain the engine event channel.
///
/// Each event is pushed to the owner of its campaign. With a database
/// configured, alerts and transitions are also written as they happen;
/// everything else reaches the database through the periodic snapshot.
///
/// Runs until every `EventSink` has been dropped.
pub async fn forward_engine_events(
    mut rx: mpsc::UnboundedReceiver<EngineEvent>,
    manager: Arc<CampaignManager>,
    registry: WsRegistry,
    db: Option<Database>,
) {
    info!("Engine event forwarder started");

    while let Some(event) = rx.recv().await {
        if let Some(db) = &db {
            persist_event(db, &event).await;
        }

        let campaign_id = event.campaign_id();
        let Some(owner) = manager.owner_of(campaign_id) else {
            debug!("Dropping event for unknown campaign {}", campaign_id);
            continue;
        };

        let sent = match &event {
            EngineEvent::BudgetAlert(alert) => {
                registry
                    .send_to_owner(&owner, WsEventType::BudgetAlert, alert)
                    .await
            }
            EngineEvent::CampaignStatusChanged(record) => {
                registry
                    .send_to_owner(&owner, WsEventType::CampaignStatusChanged, record)
                    .await
            }
            EngineEvent::BudgetUpdate(state) => {
                registry
                    .send_to_owner(&owner, WsEventType::BudgetUpdate, state)
                    .await
            }
        };

        if let Err(e) = sent {
            warn!("Failed to push event for campaign {}: {}", campaign_id, e);
        }
    }

    info!("Engine event channel closed; forwarder stopping");
}

async fn persist_event(db: &Database, event: &EngineEvent) {
    let result = match event {
        EngineEvent::BudgetAlert(alert) => queries::insert_alert(db.pool(), alert).await,
        EngineEvent::CampaignStatusChanged(record) => {
            queries::insert_transition(db.pool(), record).await
        }
        EngineEvent::BudgetUpdate(_) => Ok(()),
    };

    // Rows for campaigns not yet flushed fail here; the next snapshot writes them.
    if let Err(e) = result {
        debug!("Deferred event write for {}: {}", event.campaign_id(), e);
    }
}

// ==========================================
// HTTP UPGRADE
// ==========================================

/// Configure WebSocket routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/{owner}", web::get().to(websocket_handler));
}

/// WebSocket connection handler.
///
/// ## Endpoint
///
/// `GET /ws/:owner`
///
/// ## Example (JavaScript)
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:8080/ws/provider-42');
///
/// ws.onmessage = (event) => {
///     const message = JSON.parse(event.data);
///     console.log('Event:', message.event);
///     console.log('Data:', message.data);
/// };
/// ```
pub async fn websocket_handler(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    let owner = path.into_inner();
    info!("WebSocket connection request for owner: {}", owner);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let ws_registry = state.ws_registry.clone();
    let mut rx = ws_registry.register(owner.clone()).await;

    actix_rt::spawn(async move {
        let welcome = WsMessage::new(
            WsEventType::Connected,
            serde_json::json!({
                "status": "connected",
                "owner": owner,
                "message": "You will receive budget alerts and status changes for your campaigns"
            }),
        );

        if let Ok(json) = welcome.to_json() {
            if let Err(e) = session.text(json).await {
                error!("Failed to send welcome message: {}", e);
            }
        }

        // Registry -> socket
        let mut push_session = session.clone();
        let push_owner = owner.clone();
        let push_registry = ws_registry.clone();
        actix_rt::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if let Err(e) = push_session.text(msg).await {
                            debug!("WebSocket session closed for {}: {}", push_owner, e);
                            push_registry.unregister(&push_owner).await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Owner {} lagged; {} messages skipped", push_owner, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Socket -> server
        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                Message::Ping(bytes) => {
                    let _ = session.pong(&bytes).await;
                }
                Message::Pong(_) => {}
                Message::Text(text) => {
                    debug!("Received text from {}: {}", owner, text);
                    let response = WsMessage::new(
                        WsEventType::Ping,
                        serde_json::json!({ "received": text.to_string() }),
                    );
                    if let Ok(json) = response.to_json() {
                        let _ = session.text(json).await;
                    }
                }
                Message::Binary(_) => {
                    warn!("Received unexpected binary message from {}", owner);
                    let response = WsMessage::new(
                        WsEventType::Error,
                        serde_json::json!({ "message": "binary frames are not supported" }),
                    );
                    if let Ok(json) = response.to_json() {
                        let _ = session.text(json).await;
                    }
                }
                Message::Close(reason) => {
                    info!("WebSocket closed for {}: {:?}", owner, reason);
                    break;
                }
                _ => {}
            }
        }

        ws_registry.unregister(&owner).await;
        info!("WebSocket disconnected for owner: {}", owner);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::campaign::fixtures::{at, draft};
    use crate::models::BudgetType;
    use crate::services::{EventSink, LoggingBillingProcessor};
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_to_offline_owner_is_not_an_error() {
        let registry = WsRegistry::new();
        let sent = registry
            .send_to_owner("nobody", WsEventType::Ping, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let registry = WsRegistry::new();
        let rx = registry.register("provider-1".to_string()).await;
        assert_eq!(registry.connection_count("provider-1").await, 1);

        drop(rx);
        let sent = registry
            .send_to_owner("provider-1", WsEventType::Ping, "hello")
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert_eq!(registry.connection_count("provider-1").await, 0);
    }

    #[tokio::test]
    async fn test_forwarder_routes_status_change_to_owner() {
        let (sink, events) = EventSink::channel();
        let manager = Arc::new(CampaignManager::new(
            AppConfig::default(),
            sink,
            Arc::new(LoggingBillingProcessor),
        ));
        let registry = WsRegistry::new();
        let mut owner_rx = registry.register("provider-1".to_string()).await;
        let mut other_rx = registry.register("provider-2".to_string()).await;

        tokio::spawn(forward_engine_events(
            events,
            manager.clone(),
            registry.clone(),
            None,
        ));

        let now = at(2026, 10, 18, 9, 0);
        let campaign = manager
            .create_campaign(draft(BudgetType::Daily, 2_000), now)
            .unwrap();
        manager.activate(campaign.id, now).unwrap();

        let status_change = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let raw = owner_rx.recv().await.unwrap();
                let msg: serde_json::Value = serde_json::from_str(&raw).unwrap();
                if msg["event"] == "campaign_status_changed" {
                    return msg;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(status_change["data"]["to"], "ACTIVE");
        assert_eq!(status_change["data"]["campaignId"], campaign.id.to_string());
        assert!(other_rx.try_recv().is_err());
    }
}
