//! Boundary to the external ad platforms.
//!
//! The orchestration core only talks to a platform through [`PlatformClient`].
//! Every call either yields the remote identifier of the created resource or a
//! typed [`PlatformError`]. Clients never retry on their own: a blind retry at
//! this layer could create the same resource twice.

use std::fmt::{self, Display};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calculator::TargetingSpec;

pub mod sandbox;
pub mod token;

pub use sandbox::SandboxPlatformClient;
pub use token::{AccessToken, RefreshingTokenProvider, TokenProvider};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    #[serde(alias = "meta")]
    Meta,
    #[serde(alias = "google-ads", alias = "google_ads")]
    GoogleAds,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Meta => "META",
            Platform::GoogleAds => "GOOGLE_ADS",
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("authentication rejected: {message}")]
    Auth { message: String },
    #[error("quota or permission denied: {message}")]
    QuotaOrPermission { message: String },
    #[error("a resource named {name:?} already exists")]
    DuplicateName { name: String },
    #[error("request rejected: {message}")]
    Validation { message: String },
    #[error("network failure: {message}")]
    TransientNetwork { message: String },
}

impl PlatformError {
    /// Whether the same request may succeed later without any change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Auth { .. }
                | PlatformError::QuotaOrPermission { .. }
                | PlatformError::TransientNetwork { .. }
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Paused,
    Active,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Campaign,
    TargetingUnit,
    Ad,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> ResourceRef {
        ResourceRef {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CampaignContainerRequest {
    pub account_id: String,
    pub name: String,
    pub objective: String,
    pub status: ResourceStatus,
    pub budget_ref: Option<String>,
    pub bidding_strategy_ref: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct BudgetRequest {
    pub account_id: String,
    pub name: String,
    pub daily_amount_micros: i64,
    pub currency: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BiddingScheme {
    MaximizeConversions,
    LowestCost,
}

#[derive(Clone, Debug)]
pub struct BiddingStrategyRequest {
    pub account_id: String,
    pub name: String,
    pub scheme: BiddingScheme,
}

#[derive(Clone, Debug)]
pub struct TargetingUnitRequest {
    pub account_id: String,
    pub campaign_id: String,
    pub name: String,
    pub daily_budget_minor: Option<i64>,
    pub targeting: Option<TargetingSpec>,
    pub conversion_id: Option<String>,
    pub status: ResourceStatus,
}

#[derive(Clone, Debug)]
pub struct CreativeRequest {
    pub account_id: String,
    pub name: String,
    pub page_ref: Option<String>,
    pub product_id: String,
    pub link: String,
    pub image_urls: Vec<String>,
    pub bodies: Vec<String>,
    pub headlines: Vec<String>,
    pub descriptions: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum AdContent {
    Creative { creative_id: String },
    Responsive {
        headlines: Vec<String>,
        descriptions: Vec<String>,
        final_url: String,
    },
}

#[derive(Clone, Debug)]
pub struct AdRequest {
    pub account_id: String,
    pub name: String,
    pub targeting_unit_id: String,
    pub content: AdContent,
    pub status: ResourceStatus,
}

#[derive(Clone, Debug)]
pub struct GeoTargetRequest {
    pub account_id: String,
    pub campaign_id: String,
    pub country_code: String,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    async fn create_campaign_container(
        &self,
        request: &CampaignContainerRequest,
    ) -> Result<String, PlatformError>;

    async fn create_budget(&self, request: &BudgetRequest) -> Result<String, PlatformError>;

    async fn create_bidding_strategy(
        &self,
        request: &BiddingStrategyRequest,
    ) -> Result<String, PlatformError>;

    async fn create_targeting_unit(
        &self,
        request: &TargetingUnitRequest,
    ) -> Result<String, PlatformError>;

    async fn create_creative(&self, request: &CreativeRequest) -> Result<String, PlatformError>;

    async fn create_ad(&self, request: &AdRequest) -> Result<String, PlatformError>;

    async fn add_geo_target(&self, request: &GeoTargetRequest) -> Result<String, PlatformError>;

    async fn set_status(
        &self,
        account_id: &str,
        resource: &ResourceRef,
        status: ResourceStatus,
    ) -> Result<(), PlatformError>;
}

pub type SharedPlatformClient = Arc<dyn PlatformClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_path_spellings() {
        for (spelling, platform) in [
            ("\"meta\"", Platform::Meta),
            ("\"META\"", Platform::Meta),
            ("\"google-ads\"", Platform::GoogleAds),
            ("\"google_ads\"", Platform::GoogleAds),
            ("\"GOOGLE_ADS\"", Platform::GoogleAds),
        ] {
            assert_eq!(serde_json::from_str::<Platform>(spelling).unwrap(), platform);
        }
        assert!(serde_json::from_str::<Platform>("\"tiktok\"").is_err());
    }

    #[test]
    fn only_unchanged_requests_count_as_transient() {
        assert!(PlatformError::TransientNetwork {
            message: "timeout".into()
        }
        .is_transient());
        assert!(!PlatformError::Validation {
            message: "bad budget".into()
        }
        .is_transient());
    }
}
