//! Process-local stores for sandbox runs and tests. They honour the same
//! uniqueness and version rules as the MongoDB collections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::account::db::AdAccountStore;
use crate::account::{AdAccount, UserId};
use crate::campaign::db::CampaignStore;
use crate::campaign::{Campaign, CampaignId};
use crate::error::Error;
use crate::platform::Platform;
use crate::tracking::db::TrackingStore;
use crate::tracking::{RecordPatch, TrackingRecord};

use super::Database;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Error> {
    mutex
        .lock()
        .map_err(|_| Error::ExistentialState("memory store lock poisoned".into()))
}

#[derive(Clone, Default)]
pub struct MemoryCampaignStore {
    campaigns: Arc<Mutex<HashMap<CampaignId, Campaign>>>,
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        lock(&self.campaigns)?.insert(campaign.id, campaign.clone());

        Ok(())
    }

    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        Ok(lock(&self.campaigns)?.get(&campaign_id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct MemoryAdAccountStore {
    accounts: Arc<Mutex<HashMap<(UserId, Platform), AdAccount>>>,
}

#[async_trait]
impl AdAccountStore for MemoryAdAccountStore {
    async fn upsert_account(&self, account: &AdAccount) -> Result<(), Error> {
        lock(&self.accounts)?.insert((account.user_id, account.platform), account.clone());

        Ok(())
    }

    async fn fetch_accounts_by_user(&self, user_id: UserId) -> Result<Vec<AdAccount>, Error> {
        let accounts = lock(&self.accounts)?
            .values()
            .filter(|account| account.user_id == user_id)
            .cloned()
            .collect();

        Ok(accounts)
    }

    async fn fetch_primary_account(
        &self,
        user_id: UserId,
        platform: Platform,
    ) -> Result<Option<AdAccount>, Error> {
        Ok(lock(&self.accounts)?.get(&(user_id, platform)).cloned())
    }
}

#[derive(Clone, Default)]
pub struct MemoryTrackingStore {
    records: Arc<Mutex<HashMap<(CampaignId, Platform), TrackingRecord>>>,
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn insert_record(&self, record: &TrackingRecord) -> Result<bool, Error> {
        let mut records = lock(&self.records)?;
        let key = (record.campaign_id, record.platform);
        if records.contains_key(&key) {
            return Ok(false);
        }

        records.insert(key, record.clone());

        Ok(true)
    }

    async fn fetch_record(
        &self,
        campaign_id: CampaignId,
        platform: Platform,
    ) -> Result<Option<TrackingRecord>, Error> {
        Ok(lock(&self.records)?.get(&(campaign_id, platform)).cloned())
    }

    async fn apply_patch(
        &self,
        record: &TrackingRecord,
        patch: &RecordPatch,
    ) -> Result<TrackingRecord, Error> {
        let mut records = lock(&self.records)?;
        let stored = records
            .get_mut(&(record.campaign_id, record.platform))
            .filter(|stored| stored.id == record.id && stored.version == record.version)
            .ok_or(Error::ConcurrentModificationDetected)?;

        patch.apply(stored, Utc::now());

        Ok(stored.clone())
    }
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    campaigns: MemoryCampaignStore,
    ad_accounts: MemoryAdAccountStore,
    tracking_records: MemoryTrackingStore,
}

impl MemoryDatabase {
    pub fn new() -> MemoryDatabase {
        MemoryDatabase::default()
    }
}

impl Database for MemoryDatabase {
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
