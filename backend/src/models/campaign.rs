//! # Campaign Domain Model
//!
//! The tagged-variant campaign model shared by every engine service.
//!
//! ## Lifecycle
//!
//! ```text
//!            activate              pause
//!   DRAFT ─────────────► ACTIVE ◄─────────► PAUSED
//!                          │       resume      │
//!                          │                   │
//!                          └──────► ENDED ◄────┘
//!                   schedule expired / budget exhausted
//! ```
//!
//! ## Money
//!
//! All monetary fields are `i64` minor currency units (cents).
//! Floating point only appears in derived ratios, never in balances.
//!
//! ## Dates
//!
//! `startDate` / `endDate` are calendar dates forming an inclusive window,
//! interpreted in the campaign's own [`CampaignTimezone`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::utils;

/// Errors raised when a campaign's fields break an invariant.
///
/// These are rejected at the API boundary and never reach engine state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Budget must be strictly positive.
    #[error("Budget must be greater than zero, got {0}")]
    NonPositiveBudget(i64),

    /// The schedule window ends before it starts.
    #[error("End date {end} is before start date {start}")]
    InvertedSchedule { start: NaiveDate, end: NaiveDate },

    /// The bid exceeds the campaign's own max bid.
    #[error("Bid amount {bid} exceeds max bid {max_bid}")]
    BidAboveMax { bid: i64, max_bid: i64 },

    /// Bids, when present, must be strictly positive.
    #[error("Bid amounts must be greater than zero")]
    NonPositiveBid,

    /// An active campaign must target at least one city.
    #[error("Targeting must include at least one city")]
    NoCities,

    /// City names must carry some text.
    #[error("City names must not be blank")]
    BlankCity,

    /// Category is not part of the marketplace taxonomy.
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Timezone offset could not be parsed.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A budget change would fall below what was already spent.
    #[error("Budget {budget} is below current period spend {spent}")]
    BudgetBelowSpend { budget: i64, spent: i64 },

    /// Generic malformed field (event amounts, query params).
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

// ==========================================
// TAGGED VARIANTS
// ==========================================

/// Placement a campaign buys. Each variant is its own auction pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdType {
    Boost,
    Featured,
    TopList,
}

impl AdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::Boost => "BOOST",
            AdType::Featured => "FEATURED",
            AdType::TopList => "TOP_LIST",
        }
    }
}

impl FromStr for AdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOST" => Ok(AdType::Boost),
            "FEATURED" => Ok(AdType::Featured),
            "TOP_LIST" => Ok(AdType::TopList),
            other => Err(format!("Unknown ad type: {}", other)),
        }
    }
}

impl fmt::Display for AdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the budget caps each local day or the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetType {
    Daily,
    Total,
}

impl BudgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetType::Daily => "DAILY",
            BudgetType::Total => "TOTAL",
        }
    }
}

impl FromStr for BudgetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(BudgetType::Daily),
            "TOTAL" => Ok(BudgetType::Total),
            other => Err(format!("Unknown budget type: {}", other)),
        }
    }
}

impl fmt::Display for BudgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Active => "ACTIVE",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Ended => "ENDED",
        }
    }

    /// ENDED is irreversible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Ended)
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(CampaignStatus::Draft),
            "ACTIVE" => Ok(CampaignStatus::Active),
            "PAUSED" => Ok(CampaignStatus::Paused),
            "ENDED" => Ok(CampaignStatus::Ended),
            other => Err(format!("Unknown campaign status: {}", other)),
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// TIMEZONE
// ==========================================

/// Campaign billing timezone as a fixed UTC offset.
///
/// Serialized as `"+05:30"` / `"-04:00"`. Daily resets, pacing and
/// schedule checks all use the local calendar of this offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignTimezone(FixedOffset);

impl CampaignTimezone {
    /// UTC (`+00:00`).
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    /// Parse an offset string such as `"-04:00"` or `"Z"`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        utils::parse_utc_offset(raw)
            .map(Self)
            .map_err(ValidationError::InvalidTimezone)
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    /// Local calendar date of `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        utils::local_date(now, &self.0)
    }

    /// Seconds since local midnight.
    pub fn seconds_since_midnight(&self, now: DateTime<Utc>) -> u32 {
        utils::seconds_since_local_midnight(now, &self.0)
    }
}

impl Default for CampaignTimezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl fmt::Display for CampaignTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&utils::format_utc_offset(&self.0))
    }
}

impl Serialize for CampaignTimezone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CampaignTimezone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ==========================================
// TARGETING
// ==========================================

/// City set plus optional category filter.
///
/// Matching is case-insensitive on both fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Targeting {
    /// Cities the campaign delivers in.
    pub cities: BTreeSet<String>,

    /// When set, only opportunities in this category match.
    #[serde(default)]
    pub category: Option<String>,
}

impl Targeting {
    /// Build a targeting from city names, trimming each.
    pub fn new<I, S>(cities: I, category: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            cities: cities.into_iter().map(|c| c.as_ref().trim().to_string()).collect(),
            category: category.map(|c| c.trim().to_string()),
        }
    }

    /// Whether an opportunity in `city` / `category` falls inside this targeting.
    pub fn matches(&self, city: &str, category: Option<&str>) -> bool {
        let city = city.trim();
        let city_ok = self.cities.iter().any(|c| c.eq_ignore_ascii_case(city));

        let category_ok = match (&self.category, category) {
            (None, _) => true,
            (Some(wanted), Some(got)) => wanted.eq_ignore_ascii_case(got.trim()),
            (Some(_), None) => false,
        };

        city_ok && category_ok
    }

    fn normalized(self) -> Self {
        Self::new(self.cities.iter(), self.category.as_deref())
    }
}

// ==========================================
// CAMPAIGN
// ==========================================

/// Everything an owner supplies when creating a campaign.
#[derive(Debug, Clone)]
pub struct CampaignDraft {
    pub owner_id: String,
    pub service_id: String,
    pub ad_type: AdType,
    pub budget: i64,
    pub budget_type: BudgetType,
    pub bid_amount: Option<i64>,
    pub max_bid: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub targeting: Targeting,
    pub auto_renew: bool,
    pub timezone: CampaignTimezone,
}

/// Partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPatch {
    pub budget: Option<i64>,
    pub bid_amount: Option<i64>,
    pub max_bid: Option<i64>,
    pub end_date: Option<NaiveDate>,
    pub targeting: Option<Targeting>,
    pub auto_renew: Option<bool>,
}

/// A provider's ad campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub owner_id: String,
    pub service_id: String,
    pub ad_type: AdType,
    pub status: CampaignStatus,

    /// Budget in minor units. Per local day for DAILY, per period for TOTAL.
    pub budget: i64,
    pub budget_type: BudgetType,
    pub bid_amount: Option<i64>,
    pub max_bid: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub targeting: Targeting,
    pub auto_renew: bool,
    pub timezone: CampaignTimezone,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a DRAFT campaign, enforcing every construction invariant.
    ///
    /// ## Returns
    ///
    /// * `Ok(Campaign)` - A new campaign in `DRAFT`
    /// * `Err(ValidationError)` - First invariant the draft breaks
    pub fn new(draft: CampaignDraft, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let campaign = Self {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id.trim().to_string(),
            service_id: draft.service_id.trim().to_string(),
            ad_type: draft.ad_type,
            status: CampaignStatus::Draft,
            budget: draft.budget,
            budget_type: draft.budget_type,
            bid_amount: draft.bid_amount,
            max_bid: draft.max_bid,
            start_date: draft.start_date,
            end_date: draft.end_date,
            targeting: draft.targeting.normalized(),
            auto_renew: draft.auto_renew,
            timezone: draft.timezone,
            created_at: now,
            updated_at: now,
        };

        campaign.validate()?;
        Ok(campaign)
    }

    /// Check the field invariants.
    ///
    /// An empty city set is tolerated while DRAFT; activation has its
    /// own targeting check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.budget <= 0 {
            return Err(ValidationError::NonPositiveBudget(self.budget));
        }

        if self.end_date < self.start_date {
            return Err(ValidationError::InvertedSchedule {
                start: self.start_date,
                end: self.end_date,
            });
        }

        if self.bid_amount.is_some_and(|b| b <= 0) || self.max_bid.is_some_and(|m| m <= 0) {
            return Err(ValidationError::NonPositiveBid);
        }

        if let (Some(bid), Some(max_bid)) = (self.bid_amount, self.max_bid) {
            if bid > max_bid {
                return Err(ValidationError::BidAboveMax { bid, max_bid });
            }
        }

        if self.targeting.cities.iter().any(|c| c.trim().is_empty()) {
            return Err(ValidationError::BlankCity);
        }

        if matches!(self.status, CampaignStatus::Active | CampaignStatus::Paused)
            && self.targeting.cities.is_empty()
        {
            return Err(ValidationError::NoCities);
        }

        Ok(())
    }

    /// Merge a patch into a copy of this campaign and re-validate it.
    pub fn patched(&self, patch: CampaignPatch, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let mut next = self.clone();

        if let Some(budget) = patch.budget {
            next.budget = budget;
        }
        if let Some(bid) = patch.bid_amount {
            next.bid_amount = Some(bid);
        }
        if let Some(max_bid) = patch.max_bid {
            next.max_bid = Some(max_bid);
        }
        if let Some(end_date) = patch.end_date {
            next.end_date = end_date;
        }
        if let Some(targeting) = patch.targeting {
            next.targeting = targeting.normalized();
        }
        if let Some(auto_renew) = patch.auto_renew {
            next.auto_renew = auto_renew;
        }
        next.updated_at = now;

        next.validate()?;
        Ok(next)
    }

    /// Bid used in the auction: own bid (or `min_bid`), capped at `max_bid`.
    pub fn effective_bid(&self, min_bid: i64) -> i64 {
        let bid = self.bid_amount.unwrap_or(min_bid);
        match self.max_bid {
            Some(max_bid) => bid.min(max_bid),
            None => bid,
        }
    }

    /// Campaign-local calendar date of `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.timezone.local_date(now)
    }

    /// `startDate <= today <= endDate` in the campaign's timezone.
    pub fn is_within_schedule(&self, now: DateTime<Utc>) -> bool {
        let today = self.local_date(now);
        self.start_date <= today && today <= self.end_date
    }

    /// `today > endDate` in the campaign's timezone.
    pub fn is_past_schedule(&self, now: DateTime<Utc>) -> bool {
        self.local_date(now) > self.end_date
    }
}
