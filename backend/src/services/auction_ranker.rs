//! # Auction Ranker
//!
//! Orders eligible campaigns competing for the same `(city, category)`
//! slot and picks the winners.
//!
//! ## Ranking Key
//!
//! 1. Effective bid, descending (own bid or platform minimum, capped at max bid)
//! 2. Rolling 7-day CTR, descending
//! 3. Campaign id, ascending (deterministic)
//!
//! BOOST, FEATURED and TOP_LIST occupy different placements, so a
//! campaign only ever competes inside its own ad-type pool.
//!
//! ## Fall-through
//!
//! ```text
//! ranked: [A $2.00] [B $1.50] [C $1.00]      topN = 1
//!            │
//!            ├─ probe A: InsufficientBudget ──► skip
//!            └─ probe B: ok ──────────────────► winner
//! ```
//!
//! Ranking reads slightly stale snapshots; the ledger probe is what
//! keeps an over-budget campaign from holding a slot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::models::{AdType, Campaign};

use super::budget_ledger::LedgerError;

/// One placement request from the search layer. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOpportunity {
    pub city: String,
    pub category: Option<String>,
    pub ad_type: AdType,

    /// Number of winners requested.
    pub top_n: usize,
    pub timestamp: DateTime<Utc>,
}

/// A campaign as seen by the auction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionCandidate {
    pub campaign_id: Uuid,
    pub ad_type: AdType,
    pub effective_bid: i64,
    pub ctr: f64,
}

/// Bid/CTR ranking within an ad-type pool.
#[derive(Debug, Clone)]
pub struct AuctionRanker {
    /// Effective bid of campaigns without their own bid.
    min_bid: i64,
}

impl AuctionRanker {
    pub fn new(min_bid: i64) -> Self {
        Self { min_bid }
    }

    /// Build the auction view of a campaign.
    pub fn candidate(&self, campaign: &Campaign, ctr: f64) -> AuctionCandidate {
        AuctionCandidate {
            campaign_id: campaign.id,
            ad_type: campaign.ad_type,
            effective_bid: campaign.effective_bid(self.min_bid),
            ctr,
        }
    }

    /// Order candidates for an opportunity.
    ///
    /// Candidates from another ad-type pool are dropped. Identical
    /// inputs always produce the same order regardless of input order.
    pub fn rank(
        &self,
        opportunity: &DeliveryOpportunity,
        candidates: Vec<AuctionCandidate>,
    ) -> Vec<AuctionCandidate> {
        let mut pool: Vec<AuctionCandidate> = candidates
            .into_iter()
            .filter(|c| c.ad_type == opportunity.ad_type)
            .collect();

        pool.sort_by(|a, b| {
            b.effective_bid
                .cmp(&a.effective_bid)
                .then_with(|| b.ctr.total_cmp(&a.ctr))
                .then_with(|| a.campaign_id.cmp(&b.campaign_id))
        });

        pool
    }

    /// Walk the ranking and keep the first `top_n` candidates whose
    /// budget probe passes.
    ///
    /// ## Arguments
    ///
    /// * `ranked` - Output of [`rank`](Self::rank)
    /// * `top_n` - Winners wanted
    /// * `probe` - Budget check per candidate; any error skips it
    pub fn select_winners<F>(
        &self,
        ranked: Vec<AuctionCandidate>,
        top_n: usize,
        mut probe: F,
    ) -> Vec<AuctionCandidate>
    where
        F: FnMut(&AuctionCandidate) -> Result<(), LedgerError>,
    {
        let mut winners = Vec::with_capacity(top_n.min(ranked.len()));

        for candidate in ranked {
            if winners.len() >= top_n {
                break;
            }
            match probe(&candidate) {
                Ok(()) => winners.push(candidate),
                Err(e) => debug!(
                    "Candidate {} skipped in auction: {}",
                    candidate.campaign_id, e
                ),
            }
        }

        winners
    }
}
