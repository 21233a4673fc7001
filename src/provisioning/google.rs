use async_trait::async_trait;
use tracing::{debug, info};

use crate::calculator::{allocate_budget, resolve_targeting};
use crate::campaign::{CampaignObjective, Product};
use crate::error::Error;
use crate::platform::{
    AdContent, AdRequest, BiddingScheme, BiddingStrategyRequest, BudgetRequest,
    CampaignContainerRequest, GeoTargetRequest, Platform, ResourceKind, ResourceRef,
    ResourceStatus, TargetingUnitRequest,
};
use crate::tracking::{AdRecord, GeoTargetRecord, RecordPatch, Step, TargetingUnitRecord};

use super::workflow::{distinct, PlatformWorkflow, StepContext};

const STEPS: &[Step] = &[
    Step::Initialize,
    Step::CreateAdGroup,
    Step::AddGeoTargeting,
    Step::Launch,
];

/// Headlines and descriptions per responsive ad.
pub const BUNDLE_SIZE: usize = 3;

/// Search-ads flavour: budget, bidding strategy and container, one ad group
/// with responsive ads, then country criteria.
pub struct GoogleAdsWorkflow;

#[async_trait]
impl PlatformWorkflow for GoogleAdsWorkflow {
    fn platform(&self) -> Platform {
        Platform::GoogleAds
    }

    fn steps(&self) -> &'static [Step] {
        STEPS
    }

    async fn execute(&self, step: Step, ctx: &mut StepContext<'_>) -> Result<(), Error> {
        match step {
            Step::Initialize => initialize(ctx).await,
            Step::CreateAdGroup => create_ad_group(ctx).await,
            Step::AddGeoTargeting => add_geo_targeting(ctx).await,
            Step::Launch => launch(ctx).await,
            Step::CreateTargetingUnits | Step::CreateCreatives | Step::CreateAds => {
                Err(Error::StepNotInWorkflow {
                    platform: Platform::GoogleAds,
                    step,
                })
            }
        }
    }
}

/// One responsive ad's worth of copy for a product.
#[derive(Clone, Debug, PartialEq)]
pub struct AdBundle {
    pub key: String,
    pub headlines: Vec<String>,
    pub descriptions: Vec<String>,
    pub final_url: String,
}

/// Splits each product's copy into full batches; a product short of a full
/// batch of either kind yields nothing.
pub fn responsive_bundles(products: &[Product]) -> Vec<AdBundle> {
    let mut bundles = vec![];
    for product in products {
        let headlines = distinct(&product.headlines);
        let descriptions = distinct(&product.descriptions);

        let batches = headlines
            .chunks_exact(BUNDLE_SIZE)
            .zip(descriptions.chunks_exact(BUNDLE_SIZE));
        for (index, (headlines, descriptions)) in batches.enumerate() {
            bundles.push(AdBundle {
                key: format!("{}#{}", product.id, index),
                headlines: headlines.to_vec(),
                descriptions: descriptions.to_vec(),
                final_url: product.link.clone(),
            });
        }
    }
    bundles
}

fn bidding_scheme(objective: CampaignObjective) -> BiddingScheme {
    match objective {
        CampaignObjective::Sales | CampaignObjective::Leads => BiddingScheme::MaximizeConversions,
        CampaignObjective::Traffic | CampaignObjective::Awareness => BiddingScheme::LowestCost,
    }
}

async fn initialize(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign = ctx.campaign();
    let account = ctx.account();
    let container_name = campaign.container_name();

    let budget = match ctx.record().budget.clone() {
        Some(budget) => budget,
        None => {
            let budget = allocate_budget(
                campaign.total_budget,
                campaign.platforms.len(),
                campaign.start_date,
                campaign.end_date,
                &account.currency,
            )?;
            ctx.persist(RecordPatch::new().budget(budget.clone())).await?;
            budget
        }
    };

    let budget_ref = match ctx.record().external_budget_ref.clone() {
        Some(budget_ref) => budget_ref,
        None => {
            let request = BudgetRequest {
                account_id: account.external_account_id.clone(),
                name: format!("{}-BUDGET", container_name),
                daily_amount_micros: budget.daily_budget_micros(),
                currency: budget.currency.clone(),
            };
            let id = ctx.client().create_budget(&request).await?;
            info!(budget_ref = %id, "created campaign budget");
            ctx.persist(RecordPatch::new().external_budget_ref(id.clone()))
                .await?;
            id
        }
    };

    let bidding_ref = match ctx.record().external_bidding_strategy_ref.clone() {
        Some(bidding_ref) => bidding_ref,
        None => {
            let request = BiddingStrategyRequest {
                account_id: account.external_account_id.clone(),
                name: format!("{}-BIDDING", container_name),
                scheme: bidding_scheme(campaign.objective),
            };
            let id = ctx.client().create_bidding_strategy(&request).await?;
            info!(bidding_strategy_ref = %id, "created bidding strategy");
            ctx.persist(RecordPatch::new().external_bidding_strategy_ref(id.clone()))
                .await?;
            id
        }
    };

    if ctx.record().external_campaign_id.is_some() {
        debug!("campaign container already exists");
        return Ok(());
    }

    let request = CampaignContainerRequest {
        account_id: account.external_account_id.clone(),
        name: container_name,
        objective: campaign.objective.as_str().to_owned(),
        status: ResourceStatus::Paused,
        budget_ref: Some(budget_ref),
        bidding_strategy_ref: Some(bidding_ref),
        start_date: campaign.start_date,
        end_date: campaign.end_date,
    };
    let id = ctx.client().create_campaign_container(&request).await?;
    info!(external_campaign_id = %id, "created campaign container");

    ctx.persist(RecordPatch::new().external_campaign(id, ResourceStatus::Paused))
        .await
}

async fn create_ad_group(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign = ctx.campaign();
    let account = ctx.account();
    let campaign_ref = ctx.external_campaign_id()?;

    let bundles = responsive_bundles(&campaign.products);
    if bundles.is_empty() {
        return Err(Error::InsufficientAdContent {
            campaign_id: campaign.id,
            minimum_headlines: BUNDLE_SIZE,
            minimum_descriptions: BUNDLE_SIZE,
        });
    }

    let existing = ctx.record().targeting_units.first().map(|unit| unit.id.clone());
    let ad_group_id = match existing {
        Some(id) => id,
        None => {
            let name = format!("{}-AD-GROUP-1", campaign.container_name());
            let request = TargetingUnitRequest {
                account_id: account.external_account_id.clone(),
                campaign_id: campaign_ref,
                name: name.clone(),
                daily_budget_minor: None,
                targeting: None,
                conversion_id: None,
                status: ResourceStatus::Active,
            };
            let id = ctx.client().create_targeting_unit(&request).await?;
            info!(ad_group_id = %id, "created ad group");
            ctx.persist(RecordPatch::new().push_targeting_unit(TargetingUnitRecord {
                id: id.clone(),
                name,
                status: ResourceStatus::Active,
            }))
            .await?;
            id
        }
    };

    for bundle in bundles {
        let exists = ctx
            .record()
            .ads
            .iter()
            .any(|ad| ad.bundle_key.as_deref() == Some(bundle.key.as_str()));
        if exists {
            debug!(bundle_key = %bundle.key, "responsive ad already exists");
            continue;
        }

        let request = AdRequest {
            account_id: account.external_account_id.clone(),
            name: format!("{}-AD-{}", campaign.container_name(), bundle.key),
            targeting_unit_id: ad_group_id.clone(),
            content: AdContent::Responsive {
                headlines: bundle.headlines,
                descriptions: bundle.descriptions,
                final_url: bundle.final_url,
            },
            status: ResourceStatus::Active,
        };
        let id = ctx.client().create_ad(&request).await?;
        info!(ad_id = %id, bundle_key = %bundle.key, "created responsive ad");

        ctx.persist(RecordPatch::new().push_ad(AdRecord {
            id,
            targeting_unit_id: ad_group_id.clone(),
            creative_id: None,
            bundle_key: Some(bundle.key),
            status: ResourceStatus::Active,
        }))
        .await?;
    }

    Ok(())
}

async fn add_geo_targeting(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign = ctx.campaign();
    let account = ctx.account();
    let campaign_ref = ctx.external_campaign_id()?;

    let targeting = resolve_targeting(&campaign.locations)?;

    for country_code in targeting.countries {
        let exists = ctx
            .record()
            .geo_targets
            .iter()
            .any(|geo_target| geo_target.country_code == country_code);
        if exists {
            debug!(%country_code, "geo target already exists");
            continue;
        }

        let request = GeoTargetRequest {
            account_id: account.external_account_id.clone(),
            campaign_id: campaign_ref.clone(),
            country_code: country_code.clone(),
        };
        let criterion_id = ctx.client().add_geo_target(&request).await?;
        info!(%criterion_id, %country_code, "added geo target");

        ctx.persist(RecordPatch::new().push_geo_target(GeoTargetRecord {
            country_code,
            criterion_id,
        }))
        .await?;
    }

    Ok(())
}

async fn launch(ctx: &mut StepContext<'_>) -> Result<(), Error> {
    let campaign_ref = ctx.external_campaign_id()?;
    if ctx.record().ads.is_empty() {
        return Err(ctx.missing(vec!["ads"]));
    }

    if ctx.record().external_campaign_status == Some(ResourceStatus::Active) {
        return Ok(());
    }

    let account_id = ctx.account().external_account_id.clone();
    let resource = ResourceRef::new(ResourceKind::Campaign, campaign_ref);
    ctx.client()
        .set_status(&account_id, &resource, ResourceStatus::Active)
        .await?;
    ctx.persist(RecordPatch::new().external_campaign_status(ResourceStatus::Active))
        .await?;

    info!("campaign is live");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, headlines: usize, descriptions: usize) -> Product {
        Product {
            id: id.into(),
            title: format!("Product {}", id),
            link: format!("https://shop.example/{}", id),
            image_urls: vec![],
            headlines: (0..headlines).map(|i| format!("Headline {}", i)).collect(),
            bodies: vec![],
            descriptions: (0..descriptions)
                .map(|i| format!("Description {}", i))
                .collect(),
        }
    }

    #[test]
    fn bundles_take_full_batches_only() {
        let bundles = responsive_bundles(&[product("p1", 7, 6), product("p2", 2, 9)]);

        let keys: Vec<_> = bundles.iter().map(|bundle| bundle.key.as_str()).collect();
        assert_eq!(keys, vec!["p1#0", "p1#1"]);
        assert_eq!(bundles[1].headlines, vec!["Headline 3", "Headline 4", "Headline 5"]);
    }

    #[test]
    fn repeated_copy_does_not_fill_a_batch() {
        let mut p = product("p1", 3, 3);
        p.headlines = vec!["Same".into(), "Same".into(), "Same ".into()];

        assert!(responsive_bundles(&[p]).is_empty());
    }
}
