use async_trait::async_trait;
use chrono::Utc;
use mongodb::error::{Error as DatabaseError, ErrorKind, WriteFailure};
use mongodb::{bson, Database};

use crate::campaign::CampaignId;
use crate::database::MongoTrackingStore;
use crate::error::Error;
use crate::platform::Platform;

use super::{RecordPatch, TrackingRecord};

const TRACKING_RECORDS: &str = "tracking_records";
const DUPLICATE_KEY: i32 = 11000;

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": TRACKING_RECORDS,
            "indexes": [
                {
                    "key": { "campaign_id": 1, "platform": 1 },
                    "name": "by_campaign_id_and_platform",
                    "unique": true
                },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Returns `false` when a record for the same campaign and platform
    /// already exists.
    async fn insert_record(&self, record: &TrackingRecord) -> Result<bool, Error>;

    async fn fetch_record(
        &self,
        campaign_id: CampaignId,
        platform: Platform,
    ) -> Result<Option<TrackingRecord>, Error>;

    /// Applies `patch` if the stored record still has `record.version`, and
    /// returns the record as it is after the write.
    async fn apply_patch(
        &self,
        record: &TrackingRecord,
        patch: &RecordPatch,
    ) -> Result<TrackingRecord, Error>;
}

#[async_trait]
impl TrackingStore for MongoTrackingStore {
    #[tracing::instrument(skip(self, record), fields(campaign_id = %record.campaign_id))]
    async fn insert_record(&self, record: &TrackingRecord) -> Result<bool, Error> {
        match self.insert_one(record, None).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_record(
        &self,
        campaign_id: CampaignId,
        platform: Platform,
    ) -> Result<Option<TrackingRecord>, Error> {
        let platform = bson::to_bson(&platform)?;
        let record = self
            .find_one(
                bson::doc! { "campaign_id": campaign_id, "platform": platform },
                None,
            )
            .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self, record, patch), fields(record_id = %record.id, version = record.version))]
    async fn apply_patch(
        &self,
        record: &TrackingRecord,
        patch: &RecordPatch,
    ) -> Result<TrackingRecord, Error> {
        let now = Utc::now();
        let update = patch.to_update_document(now)?;

        let result = self
            .update_one(
                bson::doc! { "_id": record.id, "version": record.version },
                update,
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::ConcurrentModificationDetected);
        }

        let mut updated = record.clone();
        patch.apply(&mut updated, now);

        Ok(updated)
    }
}

fn is_duplicate_key(err: &DatabaseError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}
