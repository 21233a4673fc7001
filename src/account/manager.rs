use chrono::Utc;

use crate::database::Database;
use crate::error::Error;
use crate::platform::Platform;

use super::{AdAccount, AdAccountId, AdAccountStatus, UserId};

#[derive(Clone, Debug)]
pub struct NewAdAccount {
    pub user_id: UserId,
    pub platform: Platform,
    pub external_account_id: String,
    pub pixel_id: Option<String>,
    pub page_ref: Option<String>,
    pub currency: String,
    pub status: AdAccountStatus,
}

#[tracing::instrument(skip(db))]
pub async fn connect_account(db: &dyn Database, new: NewAdAccount) -> Result<AdAccount, Error> {
    let existing = db
        .ad_accounts()
        .fetch_primary_account(new.user_id, new.platform)
        .await?;

    let account = AdAccount {
        id: existing.map(|account| account.id).unwrap_or_else(AdAccountId::new),
        user_id: new.user_id,
        platform: new.platform,
        external_account_id: new.external_account_id,
        pixel_id: new.pixel_id,
        page_ref: new.page_ref,
        currency: new.currency.to_uppercase(),
        status: new.status,
        modified_at: Utc::now(),
    };

    db.ad_accounts().upsert_account(&account).await?;

    Ok(account)
}

#[tracing::instrument(skip(db))]
pub async fn get_accounts(db: &dyn Database, user_id: UserId) -> Result<Vec<AdAccount>, Error> {
    let accounts = db.ad_accounts().fetch_accounts_by_user(user_id).await?;

    Ok(accounts)
}

/// The account a provisioning step runs against; it must be `READY`.
#[tracing::instrument(skip(db))]
pub async fn expect_ready_account(
    db: &dyn Database,
    user_id: UserId,
    platform: Platform,
) -> Result<AdAccount, Error> {
    let account = db
        .ad_accounts()
        .fetch_primary_account(user_id, platform)
        .await?
        .ok_or(Error::AdAccountNotFound { user_id, platform })?;

    if account.status != AdAccountStatus::Ready {
        return Err(Error::AdAccountNotReady {
            user_id,
            platform,
            status: account.status,
        });
    }

    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDatabase;

    fn new_account(user_id: UserId, status: AdAccountStatus) -> NewAdAccount {
        NewAdAccount {
            user_id,
            platform: Platform::Meta,
            external_account_id: "act_1001".into(),
            pixel_id: Some("px_1".into()),
            page_ref: Some("page_1".into()),
            currency: "usd".into(),
            status,
        }
    }

    #[tokio::test]
    async fn reconnecting_keeps_the_account_id() {
        let db = MemoryDatabase::new();
        let user_id = UserId::new();

        let first = connect_account(&db, new_account(user_id, AdAccountStatus::PendingSetup))
            .await
            .unwrap();
        let second = connect_account(&db, new_account(user_id, AdAccountStatus::Ready))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.currency, "USD");
        assert_eq!(get_accounts(&db, user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn accounts_must_be_ready() {
        let db = MemoryDatabase::new();
        let user_id = UserId::new();
        connect_account(&db, new_account(user_id, AdAccountStatus::PendingSetup))
            .await
            .unwrap();

        let result = expect_ready_account(&db, user_id, Platform::Meta).await;

        assert_eq!(
            result.unwrap_err(),
            Error::AdAccountNotReady {
                user_id,
                platform: Platform::Meta,
                status: AdAccountStatus::PendingSetup,
            }
        );
    }

    #[tokio::test]
    async fn missing_accounts_are_reported() {
        let db = MemoryDatabase::new();
        let user_id = UserId::new();

        let result = expect_ready_account(&db, user_id, Platform::GoogleAds).await;

        assert_eq!(
            result.unwrap_err(),
            Error::AdAccountNotFound {
                user_id,
                platform: Platform::GoogleAds,
            }
        );
    }
}
