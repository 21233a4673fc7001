use actix_web::web::{Data, Json, Path};
use actix_web::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::UserId;
use crate::database::Database;
use crate::error::Error;
use crate::platform::Platform;

use super::manager::{self, NewCampaign};
use super::{Campaign, CampaignId, CampaignObjective, Product};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCampaignBody {
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

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CampaignBody {
    pub id: CampaignId,
    pub user_id: UserId,
    pub name: String,
    pub objective: CampaignObjective,
    pub total_budget: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub locations: Vec<String>,
    pub products: Vec<Product>,
    pub platforms: Vec<Platform>,
    pub created_at: DateTime<Utc>,
}

impl CampaignBody {
    pub fn render(campaign: Campaign) -> CampaignBody {
        CampaignBody {
            id: campaign.id,
            user_id: campaign.user_id,
            name: campaign.name,
            objective: campaign.objective,
            total_budget: campaign.total_budget,
            start_date: campaign.start_date,
            end_date: campaign.end_date,
            locations: campaign.locations,
            products: campaign.products,
            platforms: campaign.platforms,
            created_at: campaign.created_at,
        }
    }
}

#[post("/campaigns")]
#[tracing::instrument(skip(db))]
pub async fn create_campaign(
    db: Data<dyn Database>,
    body: Json<CreateCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let body = body.into_inner();

    let campaign = manager::create_campaign(
        &**db,
        NewCampaign {
            user_id: body.user_id,
            name: body.name,
            objective: body.objective,
            total_budget: body.total_budget,
            start_date: body.start_date,
            end_date: body.end_date,
            locations: body.locations,
            products: body.products,
            platforms: body.platforms,
        },
    )
    .await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[get("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: Data<dyn Database>,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::expect_campaign_by_id(&**db, campaign_id).await?;

    Ok(Json(CampaignBody::render(campaign)))
}
