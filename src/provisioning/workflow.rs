use async_trait::async_trait;

use crate::account::AdAccount;
use crate::campaign::Campaign;
use crate::database::Database;
use crate::error::Error;
use crate::platform::{Platform, PlatformClient};
use crate::tracking::manager::update_record;
use crate::tracking::{RecordPatch, Step, TrackingRecord};

/// The fixed step sequence of one platform and what each step does there.
#[async_trait]
pub trait PlatformWorkflow: Send + Sync {
    fn platform(&self) -> Platform;

    fn steps(&self) -> &'static [Step];

    /// Runs `step` against a record the caller has already claimed. Every
    /// remote resource must be persisted through the context as soon as it
    /// exists, and resources already on the record must be skipped.
    async fn execute(&self, step: Step, ctx: &mut StepContext<'_>) -> Result<(), Error>;

    fn position(&self, step: Step) -> Option<usize> {
        self.steps().iter().position(|s| *s == step)
    }
}

pub struct StepContext<'a> {
    db: &'a dyn Database,
    client: &'a dyn PlatformClient,
    account: &'a AdAccount,
    step: Step,
    record: TrackingRecord,
}

impl<'a> StepContext<'a> {
    pub fn new(
        db: &'a dyn Database,
        client: &'a dyn PlatformClient,
        account: &'a AdAccount,
        step: Step,
        record: TrackingRecord,
    ) -> StepContext<'a> {
        StepContext {
            db,
            client,
            account,
            step,
            record,
        }
    }

    pub fn client(&self) -> &'a dyn PlatformClient {
        self.client
    }

    pub fn account(&self) -> &'a AdAccount {
        self.account
    }

    pub fn record(&self) -> &TrackingRecord {
        &self.record
    }

    pub fn campaign(&self) -> Campaign {
        self.record.original_campaign_data.clone()
    }

    /// Writes `patch` and keeps the context's copy of the record current.
    pub async fn persist(&mut self, patch: RecordPatch) -> Result<(), Error> {
        self.record = update_record(self.db, &self.record, patch).await?;

        Ok(())
    }

    pub fn missing(&self, missing: Vec<&'static str>) -> Error {
        Error::PrerequisitesMissing {
            campaign_id: self.record.campaign_id,
            step: self.step,
            missing,
        }
    }

    /// The stored campaign container id, which every step after
    /// initialization builds on.
    pub fn external_campaign_id(&self) -> Result<String, Error> {
        self.record
            .external_campaign_id
            .clone()
            .ok_or_else(|| self.missing(vec!["external_campaign_id"]))
    }

    pub fn into_record(self) -> TrackingRecord {
        self.record
    }
}

/// Trimmed, non-empty values in first-seen order without repeats.
pub fn distinct(values: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !seen.iter().any(|existing| existing == value) {
            seen.push(value.to_owned());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keeps_first_occurrence() {
        let values = vec![
            "Fast".to_string(),
            " Cheap ".to_string(),
            "Fast".to_string(),
            "".to_string(),
            "Cheap".to_string(),
        ];

        assert_eq!(distinct(&values), vec!["Fast", "Cheap"]);
    }
}
