//! # Models
//!
//! The campaign domain model plus the request and response structures
//! of the REST API. API shapes are kept separate from engine types so
//! the wire format can add formatting without touching the engine.
//!
//! ## Organization
//!
//! - `campaign.rs` - Campaign, targeting, schedule, validation
//! - `requests.rs` - Incoming request bodies and query strings
//! - `responses.rs` - Outgoing response bodies
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names are converted to camelCase for JavaScript clients.

pub mod campaign;
pub mod requests;
pub mod responses;

pub use campaign::*;
pub use requests::*;
pub use responses::*;
