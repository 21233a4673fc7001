use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document};

use crate::calculator::BudgetAllocation;
use crate::error::Error;
use crate::platform::ResourceStatus;

use super::{
    AdRecord, CreativeRecord, GeoTargetRecord, ProcessingStatus, StepLease, TargetingUnitRecord,
    TrackingRecord,
};

#[derive(Clone, Debug, PartialEq)]
enum Change<T> {
    Set(T),
    Clear,
}

#[derive(Clone, Debug, PartialEq)]
struct Failure {
    failed_step: ProcessingStatus,
    error_message: String,
    error_code: String,
    retryable: bool,
}

/// A single write against a tracking record.
///
/// A patch is applied as one version-checked update: either every change in
/// it lands or none does. [`RecordPatch::apply`] and
/// [`RecordPatch::to_update_document`] describe the same change for the
/// in-memory and MongoDB stores.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPatch {
    processing_status: Option<ProcessingStatus>,
    failure: Option<Change<Failure>>,
    retries: Option<(i32, Option<ProcessingStatus>)>,
    lease: Option<Change<StepLease>>,
    budget: Option<BudgetAllocation>,
    external_campaign_id: Option<String>,
    external_campaign_status: Option<ResourceStatus>,
    external_budget_ref: Option<String>,
    external_bidding_strategy_ref: Option<String>,
    push_targeting_units: Vec<TargetingUnitRecord>,
    push_creatives: Vec<CreativeRecord>,
    push_ads: Vec<AdRecord>,
    push_geo_targets: Vec<GeoTargetRecord>,
    targeting_unit_statuses: Vec<(usize, ResourceStatus)>,
    ad_statuses: Vec<(usize, ResourceStatus)>,
}

impl RecordPatch {
    pub fn new() -> RecordPatch {
        RecordPatch::default()
    }

    pub fn status(mut self, status: ProcessingStatus) -> RecordPatch {
        self.processing_status = Some(status);
        self
    }

    pub fn claim(mut self, lease: StepLease) -> RecordPatch {
        self.lease = Some(Change::Set(lease));
        self
    }

    pub fn release(mut self) -> RecordPatch {
        self.lease = Some(Change::Clear);
        self
    }

    pub fn fail(
        mut self,
        failed_step: ProcessingStatus,
        error_message: String,
        error_code: &str,
        retryable: bool,
    ) -> RecordPatch {
        self.failure = Some(Change::Set(Failure {
            failed_step,
            error_message,
            error_code: error_code.to_owned(),
            retryable,
        }));
        self
    }

    pub fn clear_failure(mut self) -> RecordPatch {
        self.failure = Some(Change::Clear);
        self
    }

    pub fn retries(mut self, retry_count: i32, retried_step: Option<ProcessingStatus>) -> RecordPatch {
        self.retries = Some((retry_count, retried_step));
        self
    }

    pub fn budget(mut self, budget: BudgetAllocation) -> RecordPatch {
        self.budget = Some(budget);
        self
    }

    pub fn external_campaign(mut self, id: String, status: ResourceStatus) -> RecordPatch {
        self.external_campaign_id = Some(id);
        self.external_campaign_status = Some(status);
        self
    }

    pub fn external_campaign_status(mut self, status: ResourceStatus) -> RecordPatch {
        self.external_campaign_status = Some(status);
        self
    }

    pub fn external_budget_ref(mut self, id: String) -> RecordPatch {
        self.external_budget_ref = Some(id);
        self
    }

    pub fn external_bidding_strategy_ref(mut self, id: String) -> RecordPatch {
        self.external_bidding_strategy_ref = Some(id);
        self
    }

    pub fn push_targeting_unit(mut self, unit: TargetingUnitRecord) -> RecordPatch {
        self.push_targeting_units.push(unit);
        self
    }

    pub fn push_creative(mut self, creative: CreativeRecord) -> RecordPatch {
        self.push_creatives.push(creative);
        self
    }

    pub fn push_ad(mut self, ad: AdRecord) -> RecordPatch {
        self.push_ads.push(ad);
        self
    }

    pub fn push_geo_target(mut self, geo_target: GeoTargetRecord) -> RecordPatch {
        self.push_geo_targets.push(geo_target);
        self
    }

    pub fn targeting_unit_status(mut self, index: usize, status: ResourceStatus) -> RecordPatch {
        self.targeting_unit_statuses.push((index, status));
        self
    }

    pub fn ad_status(mut self, index: usize, status: ResourceStatus) -> RecordPatch {
        self.ad_statuses.push((index, status));
        self
    }

    pub fn apply(&self, record: &mut TrackingRecord, now: DateTime<Utc>) {
        if let Some(status) = self.processing_status {
            record.processing_status = status;
        }

        match &self.failure {
            Some(Change::Set(failure)) => {
                record.failed_step = Some(failure.failed_step);
                record.error_message = Some(failure.error_message.clone());
                record.error_code = Some(failure.error_code.clone());
                record.failure_retryable = failure.retryable;
            }
            Some(Change::Clear) => {
                record.failed_step = None;
                record.error_message = None;
                record.error_code = None;
                record.failure_retryable = false;
            }
            None => {}
        }

        if let Some((retry_count, retried_step)) = self.retries {
            record.retry_count = retry_count;
            record.retried_step = retried_step;
        }

        match &self.lease {
            Some(Change::Set(lease)) => record.lease = Some(lease.clone()),
            Some(Change::Clear) => record.lease = None,
            None => {}
        }

        if let Some(budget) = &self.budget {
            record.budget = Some(budget.clone());
        }
        if let Some(id) = &self.external_campaign_id {
            record.external_campaign_id = Some(id.clone());
        }
        if let Some(status) = self.external_campaign_status {
            record.external_campaign_status = Some(status);
        }
        if let Some(id) = &self.external_budget_ref {
            record.external_budget_ref = Some(id.clone());
        }
        if let Some(id) = &self.external_bidding_strategy_ref {
            record.external_bidding_strategy_ref = Some(id.clone());
        }

        record
            .targeting_units
            .extend(self.push_targeting_units.iter().cloned());
        record.creatives.extend(self.push_creatives.iter().cloned());
        record.ads.extend(self.push_ads.iter().cloned());
        record
            .geo_targets
            .extend(self.push_geo_targets.iter().cloned());

        for &(index, status) in &self.targeting_unit_statuses {
            if let Some(unit) = record.targeting_units.get_mut(index) {
                unit.status = status;
            }
        }
        for &(index, status) in &self.ad_statuses {
            if let Some(ad) = record.ads.get_mut(index) {
                ad.status = status;
            }
        }

        record.version += 1;
        record.last_processed_at = now;
    }

    pub fn to_update_document(&self, now: DateTime<Utc>) -> Result<Document, Error> {
        let mut set = Document::new();
        let mut push = Document::new();

        if let Some(status) = self.processing_status {
            set.insert("processing_status", bson::to_bson(&status)?);
        }

        match &self.failure {
            Some(Change::Set(failure)) => {
                set.insert("failed_step", bson::to_bson(&failure.failed_step)?);
                set.insert("error_message", failure.error_message.as_str());
                set.insert("error_code", failure.error_code.as_str());
                set.insert("failure_retryable", failure.retryable);
            }
            Some(Change::Clear) => {
                set.insert("failed_step", Bson::Null);
                set.insert("error_message", Bson::Null);
                set.insert("error_code", Bson::Null);
                set.insert("failure_retryable", false);
            }
            None => {}
        }

        if let Some((retry_count, retried_step)) = self.retries {
            set.insert("retry_count", retry_count);
            set.insert("retried_step", bson::to_bson(&retried_step)?);
        }

        match &self.lease {
            Some(Change::Set(lease)) => {
                set.insert("lease", bson::to_bson(lease)?);
            }
            Some(Change::Clear) => {
                set.insert("lease", Bson::Null);
            }
            None => {}
        }

        if let Some(budget) = &self.budget {
            set.insert("budget", bson::to_bson(budget)?);
        }
        if let Some(id) = &self.external_campaign_id {
            set.insert("external_campaign_id", id.as_str());
        }
        if let Some(status) = self.external_campaign_status {
            set.insert("external_campaign_status", bson::to_bson(&status)?);
        }
        if let Some(id) = &self.external_budget_ref {
            set.insert("external_budget_ref", id.as_str());
        }
        if let Some(id) = &self.external_bidding_strategy_ref {
            set.insert("external_bidding_strategy_ref", id.as_str());
        }

        for &(index, status) in &self.targeting_unit_statuses {
            set.insert(
                format!("targeting_units.{}.status", index),
                bson::to_bson(&status)?,
            );
        }
        for &(index, status) in &self.ad_statuses {
            set.insert(format!("ads.{}.status", index), bson::to_bson(&status)?);
        }

        set.insert("last_processed_at", bson::DateTime::from_chrono(now));

        push_each(&mut push, "targeting_units", &self.push_targeting_units)?;
        push_each(&mut push, "creatives", &self.push_creatives)?;
        push_each(&mut push, "ads", &self.push_ads)?;
        push_each(&mut push, "geo_targets", &self.push_geo_targets)?;

        let mut update = bson::doc! {
            "$set": set,
            "$inc": { "version": 1_i64 },
        };
        if !push.is_empty() {
            update.insert("$push", push);
        }

        Ok(update)
    }
}

fn push_each<T: serde::Serialize>(
    push: &mut Document,
    field: &str,
    items: &[T],
) -> Result<(), Error> {
    if items.is_empty() {
        return Ok(());
    }

    push.insert(field, bson::doc! { "$each": bson::to_bson(items)? });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::UserId;
    use crate::campaign::{Campaign, CampaignId, CampaignObjective};
    use crate::platform::Platform;
    use crate::tracking::Step;
    use chrono::Duration;

    fn record() -> TrackingRecord {
        let now = Utc::now();
        let campaign = Campaign {
            id: CampaignId::new(),
            user_id: UserId::new(),
            name: "Spring Sale".into(),
            objective: CampaignObjective::Sales,
            total_budget: 30_000,
            start_date: now,
            end_date: now + Duration::days(10),
            locations: vec!["US".into()],
            products: vec![],
            platforms: vec![Platform::Meta],
            created_at: now,
        };
        TrackingRecord::new(campaign, Platform::Meta)
    }

    #[test]
    fn failure_keeps_completed_outputs() {
        let mut record = record();
        let now = Utc::now();
        RecordPatch::new()
            .external_campaign("120001".into(), ResourceStatus::Paused)
            .apply(&mut record, now);

        RecordPatch::new()
            .status(ProcessingStatus::Failed)
            .fail(
                ProcessingStatus::CreatingTargetingUnits,
                "network failure".into(),
                "E5031001",
                true,
            )
            .release()
            .apply(&mut record, now);

        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            record.failed_step,
            Some(ProcessingStatus::CreatingTargetingUnits)
        );
        assert!(record.failure_retryable);
        assert_eq!(record.external_campaign_id.as_deref(), Some("120001"));
        assert_eq!(record.version, 2);
    }

    #[test]
    fn item_statuses_are_updated_by_position() {
        let mut record = record();
        let now = Utc::now();
        RecordPatch::new()
            .push_ad(AdRecord {
                id: "a1".into(),
                targeting_unit_id: "u1".into(),
                creative_id: Some("c1".into()),
                bundle_key: None,
                status: ResourceStatus::Paused,
            })
            .apply(&mut record, now);

        let patch = RecordPatch::new().ad_status(0, ResourceStatus::Active);
        patch.apply(&mut record, now);
        let update = patch.to_update_document(now).unwrap();

        assert_eq!(record.ads[0].status, ResourceStatus::Active);
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("ads.0.status").unwrap(), "ACTIVE");
        assert!(update.get("$push").is_none());
    }

    #[test]
    fn update_document_pushes_and_versions() {
        let now = Utc::now();
        let lease = StepLease {
            token: "t".into(),
            step: Step::CreateCreatives,
            expires_at: now + Duration::minutes(5),
        };
        let update = RecordPatch::new()
            .status(ProcessingStatus::CreatingCreatives)
            .claim(lease)
            .push_creative(CreativeRecord {
                id: "c1".into(),
                product_id: "p1".into(),
            })
            .to_update_document(now)
            .unwrap();

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("processing_status").unwrap(), "CREATING_CREATIVES");
        assert!(set.get_document("lease").is_ok());
        let push = update.get_document("$push").unwrap();
        assert!(push.get_document("creatives").unwrap().get_array("$each").is_ok());
        assert_eq!(
            update.get_document("$inc").unwrap().get_i64("version").unwrap(),
            1
        );
    }

    #[test]
    fn clearing_failure_nulls_the_fields() {
        let update = RecordPatch::new()
            .clear_failure()
            .to_update_document(Utc::now())
            .unwrap();

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get("failed_step"), Some(&Bson::Null));
        assert_eq!(set.get("error_code"), Some(&Bson::Null));
        assert!(!set.get_bool("failure_retryable").unwrap());
    }
}
