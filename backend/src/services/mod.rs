//! # Services Module
//!
//! This module contains the campaign budget and delivery pacing engine.
//! Each service handles one concern; `CampaignManager` wires them together.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `BudgetLedger` | Spend accounting, daily resets, hard caps |
//! | `PacingController` | Eligibility and even daily delivery |
//! | `AuctionRanker` | Bid/CTR ranking within an ad-type pool |
//! | `CampaignLifecycle` | Status state machine and transition log |
//! | `MetricsAggregator` | Counters, derived ratios, rollups |
//! | `AlertEvaluator` | Threshold alerts, once per period |
//! | `BillingCoordinator` | Charges for closed periods, retry policy |
//! | `CampaignManager` | Facade used by the API |
//! | `CampaignMonitor` | Periodic tick and persistence flush |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                   CampaignManager                         │   │
//! │  │  • create / update / activate / pause / resume            │   │
//! │  │  • deliver()  • record_click()  • run_tick()              │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │         │                    │                    │             │
//! │         ▼                    ▼                    ▼             │
//! │  ┌────────────┐      ┌────────────┐       ┌────────────┐       │
//! │  │  Pacing    │─────►│  Budget    │──────►│   Alert    │       │
//! │  │ Controller │      │  Ledger    │       │ Evaluator  │       │
//! │  └────────────┘      └────────────┘       └────────────┘       │
//! │     │       │                                                   │
//! │     ▼       ▼                                                   │
//! │  ┌────────┐ ┌───────────┐ ┌───────────┐   ┌────────────┐       │
//! │  │Auction │ │ Campaign  │ │ Metrics   │   │  Billing   │       │
//! │  │ Ranker │ │ Lifecycle │ │Aggregator │   │Coordinator │       │
//! │  └────────┘ └───────────┘ └───────────┘   └────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is lifecycle before ledger. The ledger never calls back
//! into the lifecycle.

pub mod alert_evaluator;
pub mod auction_ranker;
pub mod billing_coordinator;
pub mod budget_ledger;
pub mod campaign_lifecycle;
pub mod campaign_manager;
pub mod campaign_monitor;
pub mod events;
pub mod metrics_aggregator;
pub mod pacing_controller;

pub use alert_evaluator::{AlertEvaluator, AlertKind, BudgetAlert};
pub use auction_ranker::{AuctionCandidate, AuctionRanker, DeliveryOpportunity};
pub use billing_coordinator::{
    BillingCoordinator, BillingError, BillingProcessor, Charge, ChargeStatus,
    LoggingBillingProcessor, SubmitOutcome, WebhookStatus,
};
pub use budget_ledger::{BudgetLedger, BudgetState, LedgerError, RefundReceipt, SpendReceipt};
pub use campaign_lifecycle::{CampaignLifecycle, LifecycleAction, LifecycleError, TransitionRecord};
pub use campaign_manager::{CampaignError, CampaignManager, CampaignOverview, EngineSnapshot, TickSummary};
pub use campaign_monitor::CampaignMonitor;
pub use events::{EngineEvent, EventSink};
pub use metrics_aggregator::{Counters, Granularity, MetricBucket, MetricSnapshot, MetricsAggregator};
pub use pacing_controller::{Ineligible, PacingController, PacingPolicy};
