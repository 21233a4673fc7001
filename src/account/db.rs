use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::options::ReplaceOptions;
use mongodb::{bson, Database};

use crate::database::MongoAdAccountStore;
use crate::error::Error;
use crate::platform::Platform;

use super::{AdAccount, UserId};

const AD_ACCOUNTS: &str = "ad_accounts";

pub async fn initialize(db: &Database) -> Result<(), Error> {
    db.run_command(
        bson::doc! {
            "createIndexes": AD_ACCOUNTS,
            "indexes": [
                {
                    "key": { "user_id": 1, "platform": 1 },
                    "name": "by_user_id_and_platform",
                    "unique": true
                },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

#[async_trait]
pub trait AdAccountStore: Send + Sync {
    /// Inserts the account, replacing whatever the user had connected for the
    /// same platform before.
    async fn upsert_account(&self, account: &AdAccount) -> Result<(), Error>;

    async fn fetch_accounts_by_user(&self, user_id: UserId) -> Result<Vec<AdAccount>, Error>;

    async fn fetch_primary_account(
        &self,
        user_id: UserId,
        platform: Platform,
    ) -> Result<Option<AdAccount>, Error>;
}

#[async_trait]
impl AdAccountStore for MongoAdAccountStore {
    #[tracing::instrument(skip(self))]
    async fn upsert_account(&self, account: &AdAccount) -> Result<(), Error> {
        let options = ReplaceOptions::builder().upsert(true).build();
        let platform = bson::to_bson(&account.platform)?;

        self.replace_one(
            bson::doc! { "user_id": account.user_id, "platform": platform },
            account,
            options,
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_accounts_by_user(&self, user_id: UserId) -> Result<Vec<AdAccount>, Error> {
        let accounts: Vec<AdAccount> = self
            .find(bson::doc! { "user_id": user_id }, None)
            .await?
            .try_collect()
            .await?;

        Ok(accounts)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_primary_account(
        &self,
        user_id: UserId,
        platform: Platform,
    ) -> Result<Option<AdAccount>, Error> {
        let platform = bson::to_bson(&platform)?;
        let account = self
            .find_one(
                bson::doc! { "user_id": user_id, "platform": platform },
                None,
            )
            .await?;

        Ok(account)
    }
}
