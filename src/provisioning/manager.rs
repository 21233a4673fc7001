use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::account::manager::expect_ready_account;
use crate::account::AdAccount;
use crate::campaign::CampaignId;
use crate::config::ProvisioningSettings;
use crate::database::Database;
use crate::error::Error;
use crate::platform::{Platform, SharedPlatformClient};
use crate::tracking::manager::{expect_record, load_or_create_record, update_record};
use crate::tracking::{ProcessingStatus, RecordPatch, Step, StepLease, TrackingRecord};

use super::workflow::{PlatformWorkflow, StepContext};
use super::{ProvisioningStatus, RetryOutcome, StepOutcome};

enum Entry {
    /// The step already completed; hand back what it stored.
    Completed,
    Ready,
}

/// Drives campaigns through one platform's workflow.
///
/// Every step follows the same shape: load (or create) the tracking record,
/// return the stored result if the step already completed, check that the
/// previous step finished, claim the record with a lease, run the workflow
/// step, then mark it completed or failed. The workflow persists each remote
/// resource as soon as it exists, so a re-run after a crash or failure only
/// creates what is still missing.
pub struct Orchestrator {
    workflow: Box<dyn PlatformWorkflow>,
    client: SharedPlatformClient,
    settings: ProvisioningSettings,
}

impl Orchestrator {
    pub fn new(
        workflow: Box<dyn PlatformWorkflow>,
        client: SharedPlatformClient,
        settings: ProvisioningSettings,
    ) -> Orchestrator {
        Orchestrator {
            workflow,
            client,
            settings,
        }
    }

    pub fn platform(&self) -> Platform {
        self.workflow.platform()
    }

    pub fn steps(&self) -> &'static [Step] {
        self.workflow.steps()
    }

    pub async fn initialize(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::Initialize).await
    }

    pub async fn create_targeting_units(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::CreateTargetingUnits)
            .await
    }

    pub async fn create_creatives(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::CreateCreatives).await
    }

    pub async fn create_ads(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::CreateAds).await
    }

    pub async fn create_ad_group(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::CreateAdGroup).await
    }

    pub async fn add_geo_targeting(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::AddGeoTargeting).await
    }

    pub async fn launch(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<StepOutcome, Error> {
        self.run_step(db, campaign_id, Step::Launch).await
    }

    #[tracing::instrument(skip(self, db), fields(platform = %self.platform()))]
    pub async fn run_step(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
        step: Step,
    ) -> Result<StepOutcome, Error> {
        let platform = self.platform();
        let index = self
            .workflow
            .position(step)
            .ok_or(Error::StepNotInWorkflow { platform, step })?;

        let record = load_or_create_record(db, campaign_id, platform).await?;
        let now = Utc::now();

        if let Entry::Completed = self.entry(step, index, &record, now)? {
            info!(status = %record.processing_status, "step already completed");
            return Ok(self.outcome(step, &record, true));
        }

        let account = self.ready_account(db, &record).await?;
        let record = self.claim(db, step, &record, RecordPatch::new(), now).await?;
        let record = self.execute(db, step, record, &account).await?;

        Ok(self.outcome(step, &record, false))
    }

    /// Re-runs the step that failed. `failed_step` is the in-progress status
    /// stored on the record when it failed. Only transient and internal
    /// failures can be retried; caller and validation errors stay `FAILED`.
    #[tracing::instrument(skip(self, db), fields(platform = %self.platform()))]
    pub async fn retry_step(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
        failed_step: ProcessingStatus,
    ) -> Result<RetryOutcome, Error> {
        let platform = self.platform();
        let record = expect_record(db, campaign_id, platform).await?;

        let step = match (record.processing_status, record.failed_step) {
            (ProcessingStatus::Failed, Some(stored))
                if stored == failed_step && record.failure_retryable =>
            {
                Step::from_in_progress(stored)
                    .filter(|step| self.workflow.position(*step).is_some())
            }
            _ => None,
        }
        .ok_or(Error::StepNotRetryable {
            campaign_id,
            platform,
            requested_step: failed_step,
            processing_status: record.processing_status,
            failed_step: record.failed_step,
        })?;

        if record.retry_count >= self.settings.max_retries {
            warn!(retry_count = record.retry_count, "retry limit reached");
            return Err(Error::RetryLimitExceeded {
                campaign_id,
                platform,
                failed_step,
                retry_count: record.retry_count,
            });
        }

        let account = self.ready_account(db, &record).await?;
        let patch = RecordPatch::new()
            .clear_failure()
            .retries(record.retry_count + 1, Some(failed_step));
        let record = self.claim(db, step, &record, patch, Utc::now()).await?;
        info!(retry_count = record.retry_count, "retrying failed step");

        let record = self.execute(db, step, record, &account).await?;

        Ok(RetryOutcome {
            completed_step: step,
            processing_status: record.processing_status,
            retry_count: record.retry_count,
            next_step: self.next_step(&record),
        })
    }

    #[tracing::instrument(skip(self, db), fields(platform = %self.platform()))]
    pub async fn get_status(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<ProvisioningStatus, Error> {
        let record = expect_record(db, campaign_id, self.platform()).await?;
        let next_step = self.next_step(&record);

        let is_ready_for_next_step = match record.processing_status {
            ProcessingStatus::Failed | ProcessingStatus::Launched => false,
            status if Step::from_in_progress(status).is_some() => {
                record.active_lease(Utc::now()).is_none()
            }
            _ => next_step.is_some(),
        };

        Ok(ProvisioningStatus {
            platform: record.platform,
            processing_status: record.processing_status,
            failed_step: record.failed_step,
            error_message: record.error_message,
            error_code: record.error_code,
            retry_count: record.retry_count,
            next_step,
            is_ready_for_next_step,
        })
    }

    fn entry(
        &self,
        step: Step,
        index: usize,
        record: &TrackingRecord,
        now: DateTime<Utc>,
    ) -> Result<Entry, Error> {
        let status = record.processing_status;

        if status == ProcessingStatus::Failed {
            // steps before the failed one have completed; the failed one
            // only runs again through a retry
            let failed_index = record
                .failed_step
                .and_then(Step::from_in_progress)
                .and_then(|failed| self.workflow.position(failed));
            return match failed_index {
                Some(failed_index) if index < failed_index => Ok(Entry::Completed),
                _ => Err(self.out_of_order(step, record)),
            };
        }

        let rank = self.rank(status).ok_or_else(|| {
            Error::ExistentialState(format!(
                "status {} is not part of the {} workflow",
                status,
                self.platform()
            ))
        })?;

        if rank >= 2 * index + 2 {
            return Ok(Entry::Completed);
        }
        if rank == 2 * index {
            return Ok(Entry::Ready);
        }
        if rank == 2 * index + 1 {
            if let Some(lease) = record.active_lease(now) {
                return Err(Error::StepInProgress {
                    campaign_id: record.campaign_id,
                    platform: record.platform,
                    processing_status: status,
                    lease_expires_at: lease.expires_at,
                });
            }
            warn!(%status, "resuming a step abandoned by an earlier invocation");
            return Ok(Entry::Ready);
        }

        Err(self.out_of_order(step, record))
    }

    /// Position of a status in the workflow: `PENDING` is 0 and step `i`
    /// occupies `2i + 1` (running) and `2i + 2` (completed).
    fn rank(&self, status: ProcessingStatus) -> Option<usize> {
        if status == ProcessingStatus::Pending {
            return Some(0);
        }

        self.steps()
            .iter()
            .enumerate()
            .find_map(|(index, step)| {
                if step.in_progress() == status {
                    Some(2 * index + 1)
                } else if step.completed() == status {
                    Some(2 * index + 2)
                } else {
                    None
                }
            })
    }

    fn next_step(&self, record: &TrackingRecord) -> Option<Step> {
        let status = record.processing_status;
        match status {
            ProcessingStatus::Failed => record.failed_step.and_then(Step::from_in_progress),
            ProcessingStatus::Pending => self.steps().first().copied(),
            _ => match Step::from_in_progress(status) {
                Some(step) => Some(step),
                None => self
                    .steps()
                    .iter()
                    .position(|step| step.completed() == status)
                    .and_then(|index| self.steps().get(index + 1).copied()),
            },
        }
    }

    fn out_of_order(&self, step: Step, record: &TrackingRecord) -> Error {
        Error::StepOutOfOrder {
            campaign_id: record.campaign_id,
            platform: record.platform,
            step,
            processing_status: record.processing_status,
        }
    }

    async fn ready_account(
        &self,
        db: &dyn Database,
        record: &TrackingRecord,
    ) -> Result<AdAccount, Error> {
        expect_ready_account(db, record.original_campaign_data.user_id, self.platform()).await
    }

    async fn claim(
        &self,
        db: &dyn Database,
        step: Step,
        record: &TrackingRecord,
        patch: RecordPatch,
        now: DateTime<Utc>,
    ) -> Result<TrackingRecord, Error> {
        let lease = StepLease {
            token: Uuid::new_v4().to_string(),
            step,
            expires_at: now + Duration::seconds(self.settings.step_lease_seconds),
        };
        let patch = patch.status(step.in_progress()).claim(lease);

        let record = update_record(db, record, patch).await?;
        info!(status = %record.processing_status, "claimed step");

        Ok(record)
    }

    async fn execute(
        &self,
        db: &dyn Database,
        step: Step,
        record: TrackingRecord,
        account: &AdAccount,
    ) -> Result<TrackingRecord, Error> {
        let mut ctx = StepContext::new(db, &*self.client, account, step, record);
        let result = self.workflow.execute(step, &mut ctx).await;
        let record = ctx.into_record();

        match result {
            Ok(()) => {
                let patch = RecordPatch::new()
                    .status(step.completed())
                    .clear_failure()
                    .release();
                let record = update_record(db, &record, patch).await?;
                info!(status = %record.processing_status, "step completed");

                Ok(record)
            }
            Err(err) => {
                if err.records_step_failure() {
                    self.record_failure(db, step, &record, &err).await;
                }

                Err(err)
            }
        }
    }

    /// Marks the record `FAILED` while keeping everything the step created
    /// before it failed. The budget resets when a different step fails than
    /// the one last retried.
    async fn record_failure(
        &self,
        db: &dyn Database,
        step: Step,
        record: &TrackingRecord,
        err: &Error,
    ) {
        let failed_step = step.in_progress();
        let message = truncate_message(&failure_message(err), self.settings.error_message_limit);

        let mut patch = RecordPatch::new()
            .status(ProcessingStatus::Failed)
            .fail(failed_step, message, err.error_code(), err.is_retryable())
            .release();
        if record.retried_step != Some(failed_step) {
            patch = patch.retries(0, None);
        }

        match update_record(db, record, patch).await {
            Ok(_) => warn!(
                %failed_step,
                error_code = err.error_code(),
                retryable = err.is_retryable(),
                "step failed"
            ),
            Err(write_err) => error!(
                %failed_step,
                ?write_err,
                "could not record step failure"
            ),
        }
    }

    fn outcome(&self, step: Step, record: &TrackingRecord, reused: bool) -> StepOutcome {
        let resource_ids = resource_ids(step, record);

        StepOutcome {
            step,
            processing_status: record.processing_status,
            count: resource_ids.len(),
            resource_ids,
            next_step: self.next_step(record),
            reused,
        }
    }
}

/// Remote identifiers a step is responsible for, as stored on the record.
fn resource_ids(step: Step, record: &TrackingRecord) -> Vec<String> {
    let units = record.targeting_units.iter().map(|unit| unit.id.clone());
    let ads = record.ads.iter().map(|ad| ad.id.clone());

    match step {
        Step::Initialize => vec![
            record.external_budget_ref.clone(),
            record.external_bidding_strategy_ref.clone(),
            record.external_campaign_id.clone(),
        ]
        .into_iter()
        .flatten()
        .collect(),
        Step::CreateTargetingUnits => units.collect(),
        Step::CreateCreatives => record
            .creatives
            .iter()
            .map(|creative| creative.id.clone())
            .collect(),
        Step::CreateAds => ads.collect(),
        Step::CreateAdGroup => units.chain(ads).collect(),
        Step::AddGeoTargeting => record
            .geo_targets
            .iter()
            .map(|geo_target| geo_target.criterion_id.clone())
            .collect(),
        Step::Launch => record.external_campaign_id.iter().cloned().collect(),
    }
}

fn failure_message(err: &Error) -> String {
    match err {
        Error::PlatformCallFailed(platform_err) => platform_err.to_string(),
        _ => format!("{}: {}", err.error_message(), err),
    }
}

/// Cuts `message` to at most `limit` characters.
fn truncate_message(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((end, _)) => message[..end].to_owned(),
        None => message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::account::manager::{connect_account, NewAdAccount};
    use crate::account::{AdAccountStatus, UserId};
    use crate::campaign::manager::{create_campaign, NewCampaign};
    use crate::campaign::{CampaignObjective, Product};
    use crate::database::memory::MemoryDatabase;
    use crate::error::ErrorClass;
    use crate::platform::sandbox::{Operation, PlatformCall};
    use crate::platform::token::IssuingTokenSource;
    use crate::platform::{
        CampaignContainerRequest, PlatformClient, PlatformError, RefreshingTokenProvider,
        ResourceKind, ResourceStatus, SandboxPlatformClient,
    };
    use crate::provisioning::{workflow_for, GoogleAdsWorkflow, MetaWorkflow};

    struct Harness {
        db: MemoryDatabase,
        client: Arc<SandboxPlatformClient>,
        orchestrator: Orchestrator,
        campaign_id: CampaignId,
        user_id: UserId,
    }

    fn product(id: &str) -> Product {
        Product {
            id: id.into(),
            title: format!("Product {}", id),
            link: format!("https://shop.example/{}", id),
            image_urls: vec![format!("https://cdn.example/{}.png", id)],
            headlines: vec!["Fast".into(), "Cheap".into(), "Good".into(), "Fast".into()],
            bodies: vec!["Buy it".into()],
            descriptions: vec!["One".into(), "Two".into(), "Three".into()],
        }
    }

    fn transient() -> PlatformError {
        PlatformError::TransientNetwork {
            message: "connection reset".into(),
        }
    }

    async fn harness_with(
        platform: Platform,
        products: Vec<Product>,
        status: AdAccountStatus,
        pixel_id: Option<&str>,
    ) -> Harness {
        let db = MemoryDatabase::new();
        let user_id = UserId::new();
        let now = Utc::now();

        let campaign = create_campaign(
            &db,
            NewCampaign {
                user_id,
                name: "Spring Sale".into(),
                objective: CampaignObjective::Sales,
                total_budget: 30_000,
                start_date: now,
                end_date: now + Duration::days(10),
                locations: vec!["USA".into(), "uk".into(), "Atlantis".into()],
                products,
                platforms: vec![platform],
            },
        )
        .await
        .unwrap();

        connect_account(
            &db,
            NewAdAccount {
                user_id,
                platform,
                external_account_id: "1234567890".into(),
                pixel_id: pixel_id.map(String::from),
                page_ref: Some("page_1".into()),
                currency: "USD".into(),
                status,
            },
        )
        .await
        .unwrap();

        let tokens = RefreshingTokenProvider::new(
            IssuingTokenSource::new("test", Duration::hours(1)),
            Duration::minutes(5),
        );
        let client = Arc::new(SandboxPlatformClient::new(platform, Arc::new(tokens)));
        let orchestrator = Orchestrator::new(
            workflow_for(platform),
            client.clone(),
            ProvisioningSettings::default(),
        );

        Harness {
            db,
            client,
            orchestrator,
            campaign_id: campaign.id,
            user_id,
        }
    }

    async fn harness(platform: Platform, products: Vec<Product>) -> Harness {
        harness_with(platform, products, AdAccountStatus::Ready, Some("px_1")).await
    }

    impl Harness {
        async fn run(&self, step: Step) -> Result<StepOutcome, Error> {
            self.orchestrator
                .run_step(&self.db, self.campaign_id, step)
                .await
        }

        async fn retry(&self, failed_step: ProcessingStatus) -> Result<RetryOutcome, Error> {
            self.orchestrator
                .retry_step(&self.db, self.campaign_id, failed_step)
                .await
        }

        async fn record(&self) -> TrackingRecord {
            expect_record(&self.db, self.campaign_id, self.orchestrator.platform())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn meta_campaign_launches_bottom_up() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        let o = &h.orchestrator;

        let initialized = o.initialize(&h.db, h.campaign_id).await.unwrap();
        assert_eq!(initialized.processing_status, ProcessingStatus::Initialized);
        assert_eq!(initialized.next_step, Some(Step::CreateTargetingUnits));
        assert_eq!(
            o.create_targeting_units(&h.db, h.campaign_id).await.unwrap().count,
            1
        );
        assert_eq!(o.create_creatives(&h.db, h.campaign_id).await.unwrap().count, 1);
        assert_eq!(o.create_ads(&h.db, h.campaign_id).await.unwrap().count, 1);
        let launched = o.launch(&h.db, h.campaign_id).await.unwrap();

        assert_eq!(launched.processing_status, ProcessingStatus::Launched);
        assert_eq!(launched.next_step, None);

        let activations: Vec<ResourceKind> = h
            .client
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                PlatformCall::SetStatus { resource, .. } => Some(resource.kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            activations,
            vec![
                ResourceKind::Ad,
                ResourceKind::TargetingUnit,
                ResourceKind::Campaign
            ]
        );

        let record = h.record().await;
        assert_eq!(record.budget.unwrap().daily_budget, 3_000);
        assert_eq!(record.external_campaign_status, Some(ResourceStatus::Active));
        assert!(record.lease.is_none());
        assert!(record
            .ads
            .iter()
            .all(|ad| ad.status == ResourceStatus::Active));
    }

    #[tokio::test]
    async fn completed_steps_return_stored_results() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;

        let first = h.run(Step::Initialize).await.unwrap();
        let second = h.run(Step::Initialize).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.resource_ids, second.resource_ids);
        assert_eq!(h.client.count(Operation::CreateCampaignContainer), 1);
    }

    #[tokio::test]
    async fn launched_campaigns_are_not_touched_again() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        for step in h.orchestrator.steps() {
            h.run(*step).await.unwrap();
        }
        let calls = h.client.calls().len();

        let outcome = h.run(Step::Launch).await.unwrap();

        assert!(outcome.reused);
        assert_eq!(h.client.calls().len(), calls);
    }

    #[tokio::test]
    async fn steps_cannot_skip_ahead() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;

        let result = h.run(Step::CreateCreatives).await;

        assert_eq!(
            result.unwrap_err(),
            Error::StepOutOfOrder {
                campaign_id: h.campaign_id,
                platform: Platform::Meta,
                step: Step::CreateCreatives,
                processing_status: ProcessingStatus::Pending,
            }
        );
        assert!(h.client.calls().is_empty());
        assert_eq!(h.record().await.processing_status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn steps_outside_the_workflow_are_rejected() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;

        let result = h.run(Step::CreateAdGroup).await;

        assert_eq!(
            result.unwrap_err(),
            Error::StepNotInWorkflow {
                platform: Platform::Meta,
                step: Step::CreateAdGroup,
            }
        );
    }

    #[tokio::test]
    async fn failed_step_can_be_retried() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        h.run(Step::Initialize).await.unwrap();
        h.client
            .fail_next(Operation::CreateTargetingUnit, transient());

        let err = h.run(Step::CreateTargetingUnits).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::TransientPlatform);
        assert!(h.record().await.failure_retryable);

        let status = h
            .orchestrator
            .get_status(&h.db, h.campaign_id)
            .await
            .unwrap();
        assert_eq!(status.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            status.failed_step,
            Some(ProcessingStatus::CreatingTargetingUnits)
        );
        assert_eq!(status.error_code.as_deref(), Some("E5031001"));
        assert_eq!(status.next_step, Some(Step::CreateTargetingUnits));
        assert!(!status.is_ready_for_next_step);

        let retried = h
            .retry(ProcessingStatus::CreatingTargetingUnits)
            .await
            .unwrap();

        assert_eq!(retried.completed_step, Step::CreateTargetingUnits);
        assert_eq!(
            retried.processing_status,
            ProcessingStatus::TargetingUnitsCreated
        );
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.next_step, Some(Step::CreateCreatives));

        let record = h.record().await;
        assert_eq!(record.failed_step, None);
        assert_eq!(record.error_message, None);
        assert_eq!(record.targeting_units.len(), 1);
    }

    #[tokio::test]
    async fn failed_records_only_accept_a_retry() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        h.run(Step::Initialize).await.unwrap();
        h.client
            .fail_next(Operation::CreateTargetingUnit, transient());
        h.run(Step::CreateTargetingUnits).await.unwrap_err();

        let again = h.run(Step::CreateTargetingUnits).await;
        let earlier = h.run(Step::Initialize).await.unwrap();

        assert!(matches!(again, Err(Error::StepOutOfOrder { .. })));
        assert!(earlier.reused);
        assert_eq!(earlier.processing_status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        h.run(Step::Initialize).await.unwrap();
        for _ in 0..3 {
            h.client
                .fail_next(Operation::CreateTargetingUnit, transient());
        }

        h.run(Step::CreateTargetingUnits).await.unwrap_err();
        h.retry(ProcessingStatus::CreatingTargetingUnits)
            .await
            .unwrap_err();
        h.retry(ProcessingStatus::CreatingTargetingUnits)
            .await
            .unwrap_err();
        let result = h.retry(ProcessingStatus::CreatingTargetingUnits).await;

        assert_eq!(
            result.unwrap_err(),
            Error::RetryLimitExceeded {
                campaign_id: h.campaign_id,
                platform: Platform::Meta,
                failed_step: ProcessingStatus::CreatingTargetingUnits,
                retry_count: 2,
            }
        );
        assert_eq!(h.client.count(Operation::CreateTargetingUnit), 3);
    }

    #[tokio::test]
    async fn retry_budget_belongs_to_the_failing_step() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        h.run(Step::Initialize).await.unwrap();
        h.client
            .fail_next(Operation::CreateTargetingUnit, transient());
        h.run(Step::CreateTargetingUnits).await.unwrap_err();
        h.retry(ProcessingStatus::CreatingTargetingUnits)
            .await
            .unwrap();

        h.client.fail_next(Operation::CreateCreative, transient());
        h.run(Step::CreateCreatives).await.unwrap_err();

        let record = h.record().await;
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.retried_step, None);
    }

    #[tokio::test]
    async fn only_the_failed_step_is_retryable() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        h.run(Step::Initialize).await.unwrap();

        let result = h.retry(ProcessingStatus::Initializing).await;

        assert_eq!(
            result.unwrap_err(),
            Error::StepNotRetryable {
                campaign_id: h.campaign_id,
                platform: Platform::Meta,
                requested_step: ProcessingStatus::Initializing,
                processing_status: ProcessingStatus::Initialized,
                failed_step: None,
            }
        );
    }

    #[tokio::test]
    async fn partial_creatives_are_kept_across_retry() {
        let h = harness(
            Platform::Meta,
            vec![product("p1"), product("p2"), product("p3")],
        )
        .await;
        h.run(Step::Initialize).await.unwrap();
        h.run(Step::CreateTargetingUnits).await.unwrap();
        h.client
            .fail_after(Operation::CreateCreative, 1, transient());

        h.run(Step::CreateCreatives).await.unwrap_err();
        assert_eq!(h.record().await.creatives.len(), 1);

        h.retry(ProcessingStatus::CreatingCreatives).await.unwrap();

        let record = h.record().await;
        let products: Vec<_> = record
            .creatives
            .iter()
            .map(|creative| creative.product_id.as_str())
            .collect();
        assert_eq!(products, vec!["p1", "p2", "p3"]);
        let p1_calls = h
            .client
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(call, PlatformCall::CreateCreative { product_id, .. } if product_id == "p1")
            })
            .count();
        assert_eq!(p1_calls, 1);
    }

    #[tokio::test]
    async fn duplicate_container_names_fail_the_step() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        let record = load_or_create_record(&h.db, h.campaign_id, Platform::Meta)
            .await
            .unwrap();
        h.client
            .create_campaign_container(&CampaignContainerRequest {
                account_id: "1234567890".into(),
                name: record.original_campaign_data.container_name(),
                objective: "SALES".into(),
                status: ResourceStatus::Paused,
                budget_ref: None,
                bidding_strategy_ref: None,
                start_date: Utc::now(),
                end_date: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();

        let err = h.run(Step::Initialize).await.unwrap_err();

        assert_eq!(err.class(), ErrorClass::Validation);
        let record = h.record().await;
        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("E4221006"));
        assert!(!record.failure_retryable);
        assert!(record.budget.is_some());
    }

    #[tokio::test]
    async fn active_leases_keep_other_invocations_out() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        let record = load_or_create_record(&h.db, h.campaign_id, Platform::Meta)
            .await
            .unwrap();
        let lease = StepLease {
            token: "other-worker".into(),
            step: Step::Initialize,
            expires_at: Utc::now() + Duration::minutes(5),
        };
        update_record(
            &h.db,
            &record,
            RecordPatch::new()
                .status(ProcessingStatus::Initializing)
                .claim(lease),
        )
        .await
        .unwrap();

        let result = h.run(Step::Initialize).await;

        assert!(matches!(result, Err(Error::StepInProgress { .. })));
        assert!(h.client.calls().is_empty());
        assert_eq!(
            h.record().await.processing_status,
            ProcessingStatus::Initializing
        );
        let status = h
            .orchestrator
            .get_status(&h.db, h.campaign_id)
            .await
            .unwrap();
        assert!(!status.is_ready_for_next_step);
    }

    #[tokio::test]
    async fn expired_leases_are_resumed() {
        let h = harness(Platform::Meta, vec![product("p1")]).await;
        let record = load_or_create_record(&h.db, h.campaign_id, Platform::Meta)
            .await
            .unwrap();
        let lease = StepLease {
            token: "crashed-worker".into(),
            step: Step::Initialize,
            expires_at: Utc::now() - Duration::minutes(1),
        };
        update_record(
            &h.db,
            &record,
            RecordPatch::new()
                .status(ProcessingStatus::Initializing)
                .claim(lease),
        )
        .await
        .unwrap();

        let outcome = h.run(Step::Initialize).await.unwrap();

        assert_eq!(outcome.processing_status, ProcessingStatus::Initialized);
        assert!(!outcome.reused);
    }

    #[tokio::test]
    async fn targeting_units_need_a_pixel() {
        let h = harness_with(
            Platform::Meta,
            vec![product("p1")],
            AdAccountStatus::Ready,
            None,
        )
        .await;
        h.run(Step::Initialize).await.unwrap();

        let err = h.run(Step::CreateTargetingUnits).await.unwrap_err();

        assert_eq!(
            err,
            Error::MissingPixelConfiguration {
                external_account_id: "1234567890".into()
            }
        );
        assert_eq!(h.client.count(Operation::CreateTargetingUnit), 0);
        assert_eq!(
            h.record().await.failed_step,
            Some(ProcessingStatus::CreatingTargetingUnits)
        );
    }

    #[tokio::test]
    async fn ads_need_creatives() {
        let h = harness(Platform::Meta, vec![]).await;
        h.run(Step::Initialize).await.unwrap();
        h.run(Step::CreateTargetingUnits).await.unwrap();
        assert_eq!(h.run(Step::CreateCreatives).await.unwrap().count, 0);

        let err = h.run(Step::CreateAds).await.unwrap_err();

        assert_eq!(
            err,
            Error::PrerequisitesMissing {
                campaign_id: h.campaign_id,
                step: Step::CreateAds,
                missing: vec!["creatives"],
            }
        );
    }

    #[tokio::test]
    async fn missing_prerequisites_cannot_be_retried() {
        let h = harness(Platform::Meta, vec![]).await;
        h.run(Step::Initialize).await.unwrap();
        h.run(Step::CreateTargetingUnits).await.unwrap();
        h.run(Step::CreateCreatives).await.unwrap();
        let err = h.run(Step::CreateAds).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::PreconditionFailed);

        let result = h.retry(ProcessingStatus::CreatingAds).await;

        assert_eq!(
            result.unwrap_err(),
            Error::StepNotRetryable {
                campaign_id: h.campaign_id,
                platform: Platform::Meta,
                requested_step: ProcessingStatus::CreatingAds,
                processing_status: ProcessingStatus::Failed,
                failed_step: Some(ProcessingStatus::CreatingAds),
            }
        );
        let record = h.record().await;
        assert_eq!(record.retry_count, 0);
        assert!(!record.failure_retryable);
        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        assert_eq!(h.client.count(Operation::CreateAd), 0);
    }

    #[tokio::test]
    async fn validation_failures_cannot_be_retried() {
        let h = harness_with(
            Platform::Meta,
            vec![product("p1")],
            AdAccountStatus::Ready,
            None,
        )
        .await;
        h.run(Step::Initialize).await.unwrap();
        h.run(Step::CreateTargetingUnits).await.unwrap_err();

        let result = h.retry(ProcessingStatus::CreatingTargetingUnits).await;

        assert!(matches!(result, Err(Error::StepNotRetryable { .. })));
        assert_eq!(h.record().await.retry_count, 0);
    }

    #[tokio::test]
    async fn completed_meta_steps_call_the_platform_once() {
        let h = harness(Platform::Meta, vec![product("p1"), product("p2")]).await;
        h.run(Step::Initialize).await.unwrap();

        for (step, operation) in [
            (Step::CreateTargetingUnits, Operation::CreateTargetingUnit),
            (Step::CreateCreatives, Operation::CreateCreative),
            (Step::CreateAds, Operation::CreateAd),
        ] {
            let first = h.run(step).await.unwrap();
            let calls = h.client.count(operation);
            let second = h.run(step).await.unwrap();

            assert!(!first.reused);
            assert!(second.reused, "step {}", step);
            assert_eq!(first.resource_ids, second.resource_ids);
            assert_eq!(h.client.count(operation), calls, "step {}", step);
        }
        assert_eq!(h.client.count(Operation::CreateTargetingUnit), 1);
        assert_eq!(h.client.count(Operation::CreateCreative), 2);
        assert_eq!(h.client.count(Operation::CreateAd), 2);
    }

    fn creative_calls(h: &Harness) -> Vec<PlatformCall> {
        h.client
            .calls()
            .into_iter()
            .filter(|call| call.operation() == Operation::CreateCreative)
            .collect()
    }

    #[tokio::test]
    async fn creative_assets_are_deduplicated() {
        let mut p1 = product("p1");
        p1.image_urls.push(p1.image_urls[0].clone());
        p1.bodies.push("Buy it".into());
        p1.descriptions.push("Two".into());
        let h = harness(Platform::Meta, vec![p1]).await;
        h.run(Step::Initialize).await.unwrap();
        h.run(Step::CreateTargetingUnits).await.unwrap();

        h.run(Step::CreateCreatives).await.unwrap();

        assert_eq!(
            creative_calls(&h),
            vec![PlatformCall::CreateCreative {
                product_id: "p1".into(),
                image_urls: vec!["https://cdn.example/p1.png".into()],
                bodies: vec!["Buy it".into()],
                headlines: vec!["Fast".into(), "Cheap".into(), "Good".into()],
                descriptions: vec!["One".into(), "Two".into(), "Three".into()],
            }]
        );
    }

    #[tokio::test]
    async fn creatives_without_headlines_use_the_title() {
        let mut p1 = product("p1");
        p1.headlines.clear();
        let h = harness(Platform::Meta, vec![p1]).await;
        h.run(Step::Initialize).await.unwrap();
        h.run(Step::CreateTargetingUnits).await.unwrap();

        let outcome = h.run(Step::CreateCreatives).await.unwrap();

        assert_eq!(outcome.count, 1);
        match creative_calls(&h).as_slice() {
            [PlatformCall::CreateCreative { headlines, .. }] => {
                assert_eq!(headlines, &vec!["Product p1".to_string()]);
            }
            calls => panic!("unexpected creative calls: {:?}", calls),
        }
    }

    #[tokio::test]
    async fn accounts_must_be_ready_before_anything_runs() {
        let h = harness_with(
            Platform::Meta,
            vec![product("p1")],
            AdAccountStatus::Disconnected,
            Some("px_1"),
        )
        .await;

        let err = h.run(Step::Initialize).await.unwrap_err();

        assert_eq!(
            err,
            Error::AdAccountNotReady {
                user_id: h.user_id,
                platform: Platform::Meta,
                status: AdAccountStatus::Disconnected,
            }
        );
        assert_eq!(h.record().await.processing_status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn google_campaign_provisions_end_to_end() {
        let h = harness(Platform::GoogleAds, vec![product("p1"), product("p2")]).await;
        let o = &h.orchestrator;

        let initialized = o.initialize(&h.db, h.campaign_id).await.unwrap();
        assert_eq!(initialized.count, 3);
        let ad_group = o.create_ad_group(&h.db, h.campaign_id).await.unwrap();
        assert_eq!(ad_group.count, 3);
        let geo = o.add_geo_targeting(&h.db, h.campaign_id).await.unwrap();
        assert_eq!(geo.count, 2);
        let launched = o.launch(&h.db, h.campaign_id).await.unwrap();
        assert_eq!(launched.processing_status, ProcessingStatus::Launched);

        let record = h.record().await;
        let countries: Vec<_> = record
            .geo_targets
            .iter()
            .map(|geo_target| geo_target.country_code.as_str())
            .collect();
        assert_eq!(countries, vec!["US", "GB"]);
        let keys: Vec<_> = record
            .ads
            .iter()
            .filter_map(|ad| ad.bundle_key.as_deref())
            .collect();
        assert_eq!(keys, vec!["p1#0", "p2#0"]);
        assert!(record
            .external_campaign_id
            .unwrap()
            .starts_with("customers/1234567890/campaigns/"));
        assert_eq!(h.client.count(Operation::SetStatus), 1);
    }

    #[tokio::test]
    async fn google_initialize_resumes_after_partial_progress() {
        let h = harness(Platform::GoogleAds, vec![product("p1")]).await;
        h.client
            .fail_next(Operation::CreateBiddingStrategy, transient());

        h.run(Step::Initialize).await.unwrap_err();
        assert!(h.record().await.external_budget_ref.is_some());
        h.retry(ProcessingStatus::Initializing).await.unwrap();

        assert_eq!(h.client.count(Operation::CreateBudget), 1);
        assert_eq!(h.client.count(Operation::CreateBiddingStrategy), 2);
        assert_eq!(h.client.count(Operation::CreateCampaignContainer), 1);
    }

    #[tokio::test]
    async fn google_ad_group_needs_enough_copy() {
        let mut thin = product("p1");
        thin.descriptions.truncate(2);
        let h = harness(Platform::GoogleAds, vec![thin]).await;
        h.run(Step::Initialize).await.unwrap();

        let err = h.run(Step::CreateAdGroup).await.unwrap_err();

        assert!(matches!(err, Error::InsufficientAdContent { .. }));
        assert_eq!(h.client.count(Operation::CreateTargetingUnit), 0);
        assert_eq!(
            h.record().await.failed_step,
            Some(ProcessingStatus::CreatingAdGroup)
        );
    }

    #[tokio::test]
    async fn status_of_a_fresh_record_points_at_the_first_step() {
        let h = harness(Platform::GoogleAds, vec![product("p1")]).await;
        load_or_create_record(&h.db, h.campaign_id, Platform::GoogleAds)
            .await
            .unwrap();

        let status = h
            .orchestrator
            .get_status(&h.db, h.campaign_id)
            .await
            .unwrap();

        assert_eq!(status.processing_status, ProcessingStatus::Pending);
        assert_eq!(status.next_step, Some(Step::Initialize));
        assert!(status.is_ready_for_next_step);
    }

    #[test]
    fn workflows_have_fixed_step_orders() {
        assert_eq!(
            MetaWorkflow.steps(),
            &[
                Step::Initialize,
                Step::CreateTargetingUnits,
                Step::CreateCreatives,
                Step::CreateAds,
                Step::Launch
            ]
        );
        assert_eq!(
            GoogleAdsWorkflow.steps(),
            &[
                Step::Initialize,
                Step::CreateAdGroup,
                Step::AddGeoTargeting,
                Step::Launch
            ]
        );
    }

    #[test]
    fn messages_are_cut_on_character_boundaries() {
        let message = "é".repeat(600);

        let truncated = truncate_message(&message, 500);

        assert_eq!(truncated.chars().count(), 500);
        assert_eq!(truncate_message("short", 500), "short");
    }
}
