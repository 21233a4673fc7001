use actix_web::web::{Data, Json, Path};
use actix_web::{get, post};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignId;
use crate::database::Database;
use crate::error::Error;
use crate::platform::Platform;
use crate::tracking::{ProcessingStatus, Step};

use super::{Orchestrators, ProvisioningStatus, RetryOutcome, StepOutcome};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryStepBody {
    pub failed_step: ProcessingStatus,
}

#[post("/campaigns/{campaign_id}/platforms/{platform}/steps/{step}")]
#[tracing::instrument(skip(db, orchestrators))]
pub async fn run_provisioning_step(
    db: Data<dyn Database>,
    orchestrators: Data<Orchestrators>,
    params: Path<(CampaignId, Platform, Step)>,
) -> Result<Json<StepOutcome>, Error> {
    let (campaign_id, platform, step) = params.into_inner();

    let outcome = orchestrators
        .get(platform)?
        .run_step(&**db, campaign_id, step)
        .await?;

    Ok(Json(outcome))
}

#[get("/campaigns/{campaign_id}/platforms/{platform}/status")]
#[tracing::instrument(skip(db, orchestrators))]
pub async fn get_provisioning_status(
    db: Data<dyn Database>,
    orchestrators: Data<Orchestrators>,
    params: Path<(CampaignId, Platform)>,
) -> Result<Json<ProvisioningStatus>, Error> {
    let (campaign_id, platform) = params.into_inner();

    let status = orchestrators
        .get(platform)?
        .get_status(&**db, campaign_id)
        .await?;

    Ok(Json(status))
}

#[post("/campaigns/{campaign_id}/platforms/{platform}/retry")]
#[tracing::instrument(skip(db, orchestrators))]
pub async fn retry_provisioning_step(
    db: Data<dyn Database>,
    orchestrators: Data<Orchestrators>,
    params: Path<(CampaignId, Platform)>,
    body: Json<RetryStepBody>,
) -> Result<Json<RetryOutcome>, Error> {
    let (campaign_id, platform) = params.into_inner();

    let outcome = orchestrators
        .get(platform)?
        .retry_step(&**db, campaign_id, body.failed_step)
        .await?;

    Ok(Json(outcome))
}
