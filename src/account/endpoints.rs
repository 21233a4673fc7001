use actix_web::web::{Data, Json, Path};
use actix_web::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::Error;
use crate::platform::Platform;

use super::manager::{self, NewAdAccount};
use super::{AdAccount, AdAccountId, AdAccountStatus, UserId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectAdAccountBody {
    pub user_id: UserId,
    pub platform: Platform,
    pub external_account_id: String,
    pub pixel_id: Option<String>,
    pub page_ref: Option<String>,
    pub currency: String,
    pub status: AdAccountStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdAccountBody {
    pub id: AdAccountId,
    pub user_id: UserId,
    pub platform: Platform,
    pub external_account_id: String,
    pub pixel_id: Option<String>,
    pub page_ref: Option<String>,
    pub currency: String,
    pub status: AdAccountStatus,
    pub modified_at: DateTime<Utc>,
}

impl AdAccountBody {
    pub fn render(account: AdAccount) -> AdAccountBody {
        AdAccountBody {
            id: account.id,
            user_id: account.user_id,
            platform: account.platform,
            external_account_id: account.external_account_id,
            pixel_id: account.pixel_id,
            page_ref: account.page_ref,
            currency: account.currency,
            status: account.status,
            modified_at: account.modified_at,
        }
    }
}

#[post("/ad-accounts")]
#[tracing::instrument(skip(db))]
pub async fn connect_ad_account(
    db: Data<dyn Database>,
    body: Json<ConnectAdAccountBody>,
) -> Result<Json<AdAccountBody>, Error> {
    let body = body.into_inner();

    let account = manager::connect_account(
        &**db,
        NewAdAccount {
            user_id: body.user_id,
            platform: body.platform,
            external_account_id: body.external_account_id,
            pixel_id: body.pixel_id,
            page_ref: body.page_ref,
            currency: body.currency,
            status: body.status,
        },
    )
    .await?;

    Ok(Json(AdAccountBody::render(account)))
}

#[get("/users/{user_id}/ad-accounts")]
#[tracing::instrument(skip(db))]
pub async fn get_ad_accounts_for_user(
    db: Data<dyn Database>,
    params: Path<UserId>,
) -> Result<Json<Vec<AdAccountBody>>, Error> {
    let user_id = params.into_inner();

    let accounts = manager::get_accounts(&**db, user_id).await?;

    let body = accounts.into_iter().map(AdAccountBody::render).collect();

    Ok(Json(body))
}
