use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::*;

pub type UserId = TypedId<User>;
pub type AdAccountId = TypedId<AdAccount>;

#[derive(Clone, Debug)]
pub struct User;

impl TypedIdMarker for User {
    fn tag() -> &'static str {
        "USR"
    }
}

/// The ad account a user has connected for one platform. Credentials live
/// with the platform client; this only carries what provisioning needs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AdAccount {
    #[serde(rename = "_id")]
    pub id: AdAccountId,
    pub user_id: UserId,
    pub platform: Platform,
    pub external_account_id: String,
    pub pixel_id: Option<String>,
    pub page_ref: Option<String>,
    pub currency: String,
    pub status: AdAccountStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for AdAccount {
    fn tag() -> &'static str {
        "ACT"
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdAccountStatus {
    Ready,
    PendingSetup,
    Disconnected,
}
