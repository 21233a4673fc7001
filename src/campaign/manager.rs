use chrono::{DateTime, Utc};

use crate::account::UserId;
use crate::calculator::duration_days;
use crate::database::Database;
use crate::error::Error;
use crate::platform::Platform;

use super::{Campaign, CampaignId, CampaignObjective, Product};

#[derive(Clone, Debug)]
pub struct NewCampaign {
    pub user_id: UserId,
    pub name: String,
    pub objective: CampaignObjective,
    pub total_budget: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub locations: Vec<String>,
    pub products: Vec<Product>,
    pub platforms: Vec<Platform>,
}

#[tracing::instrument(skip(db))]
pub async fn create_campaign(db: &dyn Database, new: NewCampaign) -> Result<Campaign, Error> {
    if new.total_budget <= 0 {
        return Err(Error::InvalidBudget {
            total_budget: new.total_budget,
        });
    }
    duration_days(new.start_date, new.end_date)?;

    let mut platforms: Vec<Platform> = Vec::with_capacity(new.platforms.len());
    for platform in new.platforms {
        if !platforms.contains(&platform) {
            platforms.push(platform);
        }
    }

    let campaign = Campaign {
        id: CampaignId::new(),
        user_id: new.user_id,
        name: new.name,
        objective: new.objective,
        total_budget: new.total_budget,
        start_date: new.start_date,
        end_date: new.end_date,
        locations: new.locations,
        products: new.products,
        platforms,
        created_at: Utc::now(),
    };

    db.campaigns().insert_campaign(&campaign).await?;

    Ok(campaign)
}

#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Option<Campaign>, Error> {
    let campaign = db.campaigns().fetch_campaign_by_id(campaign_id).await?;

    Ok(campaign)
}

#[tracing::instrument(skip(db))]
pub async fn expect_campaign_by_id(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    let campaign = db
        .campaigns()
        .fetch_campaign_by_id(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound { campaign_id })?;

    Ok(campaign)
}
