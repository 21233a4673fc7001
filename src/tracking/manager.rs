use tracing::debug;

use crate::campaign::manager::expect_campaign_by_id;
use crate::campaign::CampaignId;
use crate::database::Database;
use crate::error::Error;
use crate::platform::Platform;

use super::{RecordPatch, TrackingRecord};

/// Fetches the record for the pair, creating a `PENDING` one with a snapshot
/// of the campaign if provisioning has not started yet.
#[tracing::instrument(skip(db))]
pub async fn load_or_create_record(
    db: &dyn Database,
    campaign_id: CampaignId,
    platform: Platform,
) -> Result<TrackingRecord, Error> {
    if let Some(record) = db
        .tracking_records()
        .fetch_record(campaign_id, platform)
        .await?
    {
        return Ok(record);
    }

    let campaign = expect_campaign_by_id(db, campaign_id).await?;
    if !campaign.platforms.contains(&platform) {
        return Err(Error::PlatformNotEnabled { platform });
    }

    let record = TrackingRecord::new(campaign, platform);

    if db.tracking_records().insert_record(&record).await? {
        debug!(record_id = %record.id, "created tracking record");
        return Ok(record);
    }

    // lost the race to another invocation; use the record it inserted
    expect_record(db, campaign_id, platform).await
}

#[tracing::instrument(skip(db))]
pub async fn expect_record(
    db: &dyn Database,
    campaign_id: CampaignId,
    platform: Platform,
) -> Result<TrackingRecord, Error> {
    let record = db
        .tracking_records()
        .fetch_record(campaign_id, platform)
        .await?
        .ok_or(Error::TrackingRecordNotFound {
            campaign_id,
            platform,
        })?;

    Ok(record)
}

#[tracing::instrument(skip(db, record), fields(record_id = %record.id))]
pub async fn update_record(
    db: &dyn Database,
    record: &TrackingRecord,
    patch: RecordPatch,
) -> Result<TrackingRecord, Error> {
    db.tracking_records().apply_patch(record, &patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::UserId;
    use crate::campaign::manager::{create_campaign, NewCampaign};
    use crate::campaign::CampaignObjective;
    use crate::database::memory::MemoryDatabase;
    use crate::tracking::ProcessingStatus;
    use chrono::{Duration, Utc};

    async fn campaign_id(db: &MemoryDatabase) -> CampaignId {
        let now = Utc::now();
        let campaign = create_campaign(
            db,
            NewCampaign {
                user_id: UserId::new(),
                name: "Spring Sale".into(),
                objective: CampaignObjective::Sales,
                total_budget: 30_000,
                start_date: now,
                end_date: now + Duration::days(10),
                locations: vec!["US".into()],
                products: vec![],
                platforms: vec![Platform::Meta],
            },
        )
        .await
        .unwrap();
        campaign.id
    }

    #[tokio::test]
    async fn loading_twice_yields_one_record() {
        let db = MemoryDatabase::new();
        let campaign_id = campaign_id(&db).await;

        let first = load_or_create_record(&db, campaign_id, Platform::Meta)
            .await
            .unwrap();
        let second = load_or_create_record(&db, campaign_id, Platform::Meta)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.processing_status, ProcessingStatus::Pending);
        assert_eq!(second.original_campaign_data.id, campaign_id);
    }

    #[tokio::test]
    async fn stale_versions_are_rejected() {
        let db = MemoryDatabase::new();
        let campaign_id = campaign_id(&db).await;
        let record = load_or_create_record(&db, campaign_id, Platform::Meta)
            .await
            .unwrap();

        update_record(
            &db,
            &record,
            RecordPatch::new().status(ProcessingStatus::Initializing),
        )
        .await
        .unwrap();
        let result = update_record(
            &db,
            &record,
            RecordPatch::new().status(ProcessingStatus::Initializing),
        )
        .await;

        assert_eq!(result.unwrap_err(), Error::ConcurrentModificationDetected);
    }

    #[tokio::test]
    async fn records_are_only_created_for_requested_platforms() {
        let db = MemoryDatabase::new();
        let campaign_id = campaign_id(&db).await;

        let result = load_or_create_record(&db, campaign_id, Platform::GoogleAds).await;

        assert_eq!(
            result.unwrap_err(),
            Error::PlatformNotEnabled {
                platform: Platform::GoogleAds
            }
        );
    }

    #[tokio::test]
    async fn records_need_an_existing_campaign() {
        let db = MemoryDatabase::new();
        let campaign_id = CampaignId::new();

        let result = load_or_create_record(&db, campaign_id, Platform::GoogleAds).await;

        assert_eq!(result.unwrap_err(), Error::CampaignNotFound { campaign_id });
    }
}
