use mongodb::Collection;

use crate::account::db::AdAccountStore;
use crate::account::AdAccount;
use crate::campaign::db::CampaignStore;
use crate::campaign::Campaign;
use crate::error::Error;
use crate::tracking::db::TrackingStore;
use crate::tracking::TrackingRecord;

pub mod memory;

pub type MongoCampaignStore = Collection<Campaign>;
pub type MongoAdAccountStore = Collection<AdAccount>;
pub type MongoTrackingStore = Collection<TrackingRecord>;

pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
    fn ad_accounts(&self) -> &dyn AdAccountStore;
    fn tracking_records(&self) -> &dyn TrackingStore;
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: MongoCampaignStore,
    ad_accounts: MongoAdAccountStore,
    tracking_records: MongoTrackingStore,
}

impl MongoDatabase {
    pub async fn initialize(db: mongodb::Database) -> Result<MongoDatabase, Error> {
        crate::account::db::initialize(&db).await?;
        crate::tracking::db::initialize(&db).await?;

        Ok(MongoDatabase {
            campaigns: db.collection("campaigns"),
            ad_accounts: db.collection("ad_accounts"),
            tracking_records: db.collection("tracking_records"),
        })
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }

    fn ad_accounts(&self) -> &dyn AdAccountStore {
        &self.ad_accounts
    }

    fn tracking_records(&self) -> &dyn TrackingStore {
        &self.tracking_records
    }
}
