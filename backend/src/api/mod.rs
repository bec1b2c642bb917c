//! # REST API Module
//!
//! This module defines all HTTP endpoints for the campaign pacing API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/campaigns` | Create campaign (DRAFT) |
//! | GET | `/campaigns?owner=` | List campaigns |
//! | GET | `/campaigns/:id` | Campaign, budget state and metrics |
//! | PUT | `/campaigns/:id` | Partial update |
//! | POST | `/campaigns/:id/activate` | DRAFT → ACTIVE |
//! | POST | `/campaigns/:id/pause` | ACTIVE → PAUSED |
//! | POST | `/campaigns/:id/resume` | PAUSED → ACTIVE |
//! | GET | `/campaigns/:id/history` | Transition audit log |
//! | GET | `/campaigns/:id/alerts` | Budget alerts |
//! | GET | `/campaigns/:id/metrics` | Daily/weekly/monthly rollups |
//! | GET | `/campaigns/:id/charges` | Billing charges |
//! | POST | `/delivery-opportunity` | Run an auction |
//! | POST | `/events/click` | Charge a click |
//! | POST | `/events/lead` | Record a lead |
//! | POST | `/events/refund` | Refund a click |
//! | POST | `/attribution/revenue` | Attribute booking revenue |
//! | POST | `/billing/webhook` | Billing processor callback |
//! | GET | `/health` | Health check |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod routes;
pub mod handlers;

pub use routes::configure_routes;
