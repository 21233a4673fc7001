use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calculator::BudgetAllocation;
use crate::campaign::{Campaign, CampaignId};
use crate::platform::{Platform, ResourceStatus};
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod manager;
pub mod patch;

pub use patch::RecordPatch;

pub type TrackingRecordId = TypedId<TrackingRecord>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Initializing,
    Initialized,
    CreatingTargetingUnits,
    TargetingUnitsCreated,
    CreatingCreatives,
    CreativesCreated,
    CreatingAds,
    AdsCreated,
    CreatingAdGroup,
    AdGroupCreated,
    CreatingGeoTargets,
    GeoTargetsCreated,
    Launching,
    Launched,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Initializing => "INITIALIZING",
            ProcessingStatus::Initialized => "INITIALIZED",
            ProcessingStatus::CreatingTargetingUnits => "CREATING_TARGETING_UNITS",
            ProcessingStatus::TargetingUnitsCreated => "TARGETING_UNITS_CREATED",
            ProcessingStatus::CreatingCreatives => "CREATING_CREATIVES",
            ProcessingStatus::CreativesCreated => "CREATIVES_CREATED",
            ProcessingStatus::CreatingAds => "CREATING_ADS",
            ProcessingStatus::AdsCreated => "ADS_CREATED",
            ProcessingStatus::CreatingAdGroup => "CREATING_AD_GROUP",
            ProcessingStatus::AdGroupCreated => "AD_GROUP_CREATED",
            ProcessingStatus::CreatingGeoTargets => "CREATING_GEO_TARGETS",
            ProcessingStatus::GeoTargetsCreated => "GEO_TARGETS_CREATED",
            ProcessingStatus::Launching => "LAUNCHING",
            ProcessingStatus::Launched => "LAUNCHED",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of provisioning work. Each step moves a record from its
/// in-progress status to its completed status.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Initialize,
    CreateTargetingUnits,
    CreateCreatives,
    CreateAds,
    CreateAdGroup,
    AddGeoTargeting,
    Launch,
}

impl Step {
    const ALL: [Step; 7] = [
        Step::Initialize,
        Step::CreateTargetingUnits,
        Step::CreateCreatives,
        Step::CreateAds,
        Step::CreateAdGroup,
        Step::AddGeoTargeting,
        Step::Launch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Initialize => "initialize",
            Step::CreateTargetingUnits => "create-targeting-units",
            Step::CreateCreatives => "create-creatives",
            Step::CreateAds => "create-ads",
            Step::CreateAdGroup => "create-ad-group",
            Step::AddGeoTargeting => "add-geo-targeting",
            Step::Launch => "launch",
        }
    }

    pub fn in_progress(&self) -> ProcessingStatus {
        match self {
            Step::Initialize => ProcessingStatus::Initializing,
            Step::CreateTargetingUnits => ProcessingStatus::CreatingTargetingUnits,
            Step::CreateCreatives => ProcessingStatus::CreatingCreatives,
            Step::CreateAds => ProcessingStatus::CreatingAds,
            Step::CreateAdGroup => ProcessingStatus::CreatingAdGroup,
            Step::AddGeoTargeting => ProcessingStatus::CreatingGeoTargets,
            Step::Launch => ProcessingStatus::Launching,
        }
    }

    pub fn completed(&self) -> ProcessingStatus {
        match self {
            Step::Initialize => ProcessingStatus::Initialized,
            Step::CreateTargetingUnits => ProcessingStatus::TargetingUnitsCreated,
            Step::CreateCreatives => ProcessingStatus::CreativesCreated,
            Step::CreateAds => ProcessingStatus::AdsCreated,
            Step::CreateAdGroup => ProcessingStatus::AdGroupCreated,
            Step::AddGeoTargeting => ProcessingStatus::GeoTargetsCreated,
            Step::Launch => ProcessingStatus::Launched,
        }
    }

    /// The step a record in `status` was executing, if any.
    pub fn from_in_progress(status: ProcessingStatus) -> Option<Step> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.in_progress() == status)
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one campaign on one platform. There is at most one record per
/// (campaign, platform); remote identifiers stored here are never recreated.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TrackingRecord {
    #[serde(rename = "_id")]
    pub id: TrackingRecordId,
    pub campaign_id: CampaignId,
    pub platform: Platform,
    pub processing_status: ProcessingStatus,
    pub failed_step: Option<ProcessingStatus>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    #[serde(default)]
    pub failure_retryable: bool,
    pub retry_count: i32,
    pub retried_step: Option<ProcessingStatus>,
    pub external_campaign_id: Option<String>,
    pub external_campaign_status: Option<ResourceStatus>,
    pub external_budget_ref: Option<String>,
    pub external_bidding_strategy_ref: Option<String>,
    #[serde(default)]
    pub targeting_units: Vec<TargetingUnitRecord>,
    #[serde(default)]
    pub creatives: Vec<CreativeRecord>,
    #[serde(default)]
    pub ads: Vec<AdRecord>,
    #[serde(default)]
    pub geo_targets: Vec<GeoTargetRecord>,
    pub original_campaign_data: Campaign,
    pub budget: Option<BudgetAllocation>,
    pub lease: Option<StepLease>,
    pub version: i64,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub last_processed_at: DateTime<Utc>,
}

impl TypedIdMarker for TrackingRecord {
    fn tag() -> &'static str {
        "TRK"
    }
}

impl TrackingRecord {
    pub fn new(campaign: Campaign, platform: Platform) -> TrackingRecord {
        let now = Utc::now();
        TrackingRecord {
            id: TrackingRecordId::new(),
            campaign_id: campaign.id,
            platform,
            processing_status: ProcessingStatus::Pending,
            failed_step: None,
            error_message: None,
            error_code: None,
            failure_retryable: false,
            retry_count: 0,
            retried_step: None,
            external_campaign_id: None,
            external_campaign_status: None,
            external_budget_ref: None,
            external_bidding_strategy_ref: None,
            targeting_units: vec![],
            creatives: vec![],
            ads: vec![],
            geo_targets: vec![],
            original_campaign_data: campaign,
            budget: None,
            lease: None,
            version: 0,
            created_at: now,
            last_processed_at: now,
        }
    }

    pub fn active_lease(&self, now: DateTime<Utc>) -> Option<&StepLease> {
        self.lease.as_ref().filter(|lease| lease.expires_at > now)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TargetingUnitRecord {
    pub id: String,
    pub name: String,
    pub status: ResourceStatus,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CreativeRecord {
    pub id: String,
    pub product_id: String,
}

/// An ad links a targeting unit to either a stored creative or an inline
/// content bundle.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AdRecord {
    pub id: String,
    pub targeting_unit_id: String,
    pub creative_id: Option<String>,
    pub bundle_key: Option<String>,
    pub status: ResourceStatus,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GeoTargetRecord {
    pub country_code: String,
    pub criterion_id: String,
}

/// Marks a step as owned by one invocation until `expires_at`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StepLease {
    pub token: String,
    pub step: Step,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}
