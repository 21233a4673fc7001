use async_trait::async_trait;
use tracing::{debug, info};

use crate::calculator::{allocate_budget, resolve_targeting};
use crate::error::Error;
use crate::platform::{
    AdContent, AdRequest, CampaignContainerRequest, CreativeRequest, Platform, ResourceKind,
    ResourceRef, ResourceStatus, TargetingUnitRequest,
};
use crate::tracking::{AdRecord, CreativeRecord, RecordPatch, Step, TargetingUnitRecord};

use super::workflow::{distinct, PlatformWorkflow, StepContext};

const STEPS: &[Step] = &[
    Step::Initialize,
    Step::CreateTargetingUnits,
    Step::CreateCreatives,
    Step::CreateAds,
    Step::Launch,
];

/// Social-ads flavour: container, one ad set, a creative per product, an ad
/// per creative, then bottom-up activation.
pub struct MetaWorkflow;

#[async_trait]
impl PlatformWorkflow for MetaWorkflow {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    fn steps(&self) -> &'static [Step] {
        STEPS
    }

    async fn execute(&self, step: Step, ctx: &mut StepContext<'_>) -> Result<(), Error> {
        match step {
            Step::Initialize => initialize(ctx).await,
            Step::CreateTargetingUnits => create_targeting_units(ctx).await,
            Step::CreateCreatives => create_creatives(ctx).await,
            Step::CreateAds => create_ads(ctx).await,
            Step::Launch => launch(ctx).await,
            Step::CreateAdGroup | Step::AddGeoTargeting => Err(Error::StepNotInWorkflow {
                platform: Platform::Meta,
                step,
            }),
        }
    }
}

async fn initialize(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign = ctx.campaign();
    let account = ctx.account();

    if ctx.record().budget.is_none() {
        let budget = allocate_budget(
            campaign.total_budget,
            campaign.platforms.len(),
            campaign.start_date,
            campaign.end_date,
            &account.currency,
        )?;
        ctx.persist(RecordPatch::new().budget(budget)).await?;
    }

    if ctx.record().external_campaign_id.is_some() {
        debug!("campaign container already exists");
        return Ok(());
    }

    let request = CampaignContainerRequest {
        account_id: account.external_account_id.clone(),
        name: campaign.container_name(),
        objective: campaign.objective.as_str().to_owned(),
        status: ResourceStatus::Paused,
        budget_ref: None,
        bidding_strategy_ref: None,
        start_date: campaign.start_date,
        end_date: campaign.end_date,
    };
    let id = ctx.client().create_campaign_container(&request).await?;
    info!(external_campaign_id = %id, "created campaign container");

    ctx.persist(RecordPatch::new().external_campaign(id, ResourceStatus::Paused))
        .await
}

async fn create_targeting_units(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    if !ctx.record().targeting_units.is_empty() {
        debug!("targeting unit already exists");
        return Ok(());
    }

    let campaign = ctx.campaign();
    let account = ctx.account();
    let pixel_id = account
        .pixel_id
        .clone()
        .ok_or_else(|| Error::MissingPixelConfiguration {
            external_account_id: account.external_account_id.clone(),
        })?;
    let campaign_ref = ctx.external_campaign_id()?;

    let budget = allocate_budget(
        campaign.total_budget,
        campaign.platforms.len(),
        campaign.start_date,
        campaign.end_date,
        &account.currency,
    )?;
    let targeting = resolve_targeting(&campaign.locations)?;

    let name = format!("{}-UNIT-1", campaign.container_name());
    let request = TargetingUnitRequest {
        account_id: account.external_account_id.clone(),
        campaign_id: campaign_ref,
        name: name.clone(),
        daily_budget_minor: Some(budget.daily_budget),
        targeting: Some(targeting),
        conversion_id: Some(pixel_id),
        status: ResourceStatus::Paused,
    };
    let id = ctx.client().create_targeting_unit(&request).await?;
    info!(targeting_unit_id = %id, "created targeting unit");

    ctx.persist(RecordPatch::new().push_targeting_unit(TargetingUnitRecord {
        id,
        name,
        status: ResourceStatus::Paused,
    }))
    .await
}

async fn create_creatives(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign = ctx.campaign();
    let account = ctx.account();

    for product in &campaign.products {
        let exists = ctx
            .record()
            .creatives
            .iter()
            .any(|creative| creative.product_id == product.id);
        if exists {
            debug!(product_id = %product.id, "creative already exists");
            continue;
        }

        let mut headlines = distinct(&product.headlines);
        if headlines.is_empty() {
            headlines.push(product.title.clone());
        }

        let request = CreativeRequest {
            account_id: account.external_account_id.clone(),
            name: format!("{}-CREATIVE-{}", campaign.container_name(), product.id),
            page_ref: account.page_ref.clone(),
            product_id: product.id.clone(),
            link: product.link.clone(),
            image_urls: distinct(&product.image_urls),
            bodies: distinct(&product.bodies),
            headlines,
            descriptions: distinct(&product.descriptions),
        };
        let id = ctx.client().create_creative(&request).await?;
        info!(creative_id = %id, product_id = %product.id, "created creative");

        ctx.persist(RecordPatch::new().push_creative(CreativeRecord {
            id,
            product_id: product.id.clone(),
        }))
        .await?;
    }

    Ok(())
}

async fn create_ads(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let record = ctx.record();
    let mut missing = vec![];
    if record.targeting_units.is_empty() {
        missing.push("targeting_units");
    }
    if record.creatives.is_empty() {
        missing.push("creatives");
    }
    if !missing.is_empty() {
        return Err(ctx.missing(missing));
    }

    let campaign = ctx.campaign();
    let account = ctx.account();
    let unit_id = record.targeting_units[0].id.clone();
    let creatives = record.creatives.clone();

    for creative in creatives {
        let exists = ctx
            .record()
            .ads
            .iter()
            .any(|ad| ad.creative_id.as_deref() == Some(creative.id.as_str()));
        if exists {
            debug!(creative_id = %creative.id, "ad already exists");
            continue;
        }

        let request = AdRequest {
            account_id: account.external_account_id.clone(),
            name: format!("{}-AD-{}", campaign.container_name(), creative.product_id),
            targeting_unit_id: unit_id.clone(),
            content: AdContent::Creative {
                creative_id: creative.id.clone(),
            },
            status: ResourceStatus::Paused,
        };
        let id = ctx.client().create_ad(&request).await?;
        info!(ad_id = %id, creative_id = %creative.id, "created ad");

        ctx.persist(RecordPatch::new().push_ad(AdRecord {
            id,
            targeting_unit_id: unit_id.clone(),
            creative_id: Some(creative.id),
            bundle_key: None,
            status: ResourceStatus::Paused,
        }))
        .await?;
    }

    Ok(())
}

/// Activates ads, then targeting units, then the container, so nothing is
/// live before the pieces under it are.
async fn launch(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign_ref = ctx.external_campaign_id()?;
    if ctx.record().ads.is_empty() {
        return Err(ctx.missing(vec!["ads"]));
    }

    let account_id = ctx.account().external_account_id.clone();
    let client = ctx.client();

    let ads = ctx.record().ads.clone();
    for (index, ad) in ads.iter().enumerate() {
        if ad.status == ResourceStatus::Active {
            continue;
        }
        let resource = ResourceRef::new(ResourceKind::Ad, ad.id.clone());
        client
            .set_status(&account_id, &resource, ResourceStatus::Active)
            .await?;
        ctx.persist(RecordPatch::new().ad_status(index, ResourceStatus::Active))
            .await?;
    }

    let units = ctx.record().targeting_units.clone();
    for (index, unit) in units.iter().enumerate() {
        if unit.status == ResourceStatus::Active {
            continue;
        }
        let resource = ResourceRef::new(ResourceKind::TargetingUnit, unit.id.clone());
        client
            .set_status(&account_id, &resource, ResourceStatus::Active)
            .await?;
        ctx.persist(RecordPatch::new().targeting_unit_status(index, ResourceStatus::Active))
            .await?;
    }

    if ctx.record().external_campaign_status != Some(ResourceStatus::Active) {
        let resource = ResourceRef::new(ResourceKind::Campaign, campaign_ref);
        client
            .set_status(&account_id, &resource, ResourceStatus::Active)
            .await?;
        ctx.persist(RecordPatch::new().external_campaign_status(ResourceStatus::Active))
            .await?;
    }

    info!("campaign is live");

    Ok(())
}
