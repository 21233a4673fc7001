use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::UserId;
use crate::platform::Platform;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::*;

pub type CampaignId = TypedId<Campaign>;

/// The upstream description of a campaign. Provisioning only ever reads it;
/// a copy is frozen into each tracking record when provisioning starts.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub user_id: UserId,
    pub name: String,
    pub objective: CampaignObjective,
    /// In minor currency units.
    pub total_budget: i64,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,
    pub locations: Vec<String>,
    pub products: Vec<Product>,
    pub platforms: Vec<Platform>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl TypedIdMarker for Campaign {
    fn tag() -> &'static str {
        "CPN"
    }
}

impl Campaign {
    /// Name used for the remote campaign container. Derived only from stable
    /// fields so a re-run after a crash asks for the same name again.
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.objective.as_str(), self.id)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignObjective {
    Sales,
    Traffic,
    Awareness,
    Leads,
}

impl CampaignObjective {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignObjective::Sales => "SALES",
            CampaignObjective::Traffic => "TRAFFIC",
            CampaignObjective::Awareness => "AWARENESS",
            CampaignObjective::Leads => "LEADS",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub headlines: Vec<String>,
    #[serde(default)]
    pub bodies: Vec<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
}
