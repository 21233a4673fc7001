use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::Error;
use crate::platform::token::IssuingTokenSource;
use crate::platform::{Platform, RefreshingTokenProvider, SandboxPlatformClient, SharedPlatformClient};
use crate::tracking::{ProcessingStatus, Step};

pub mod endpoints;
pub mod google;
pub mod manager;
pub mod meta;
pub mod workflow;
pub use endpoints::*;

pub use google::GoogleAdsWorkflow;
pub use manager::Orchestrator;
pub use meta::MetaWorkflow;
pub use workflow::{PlatformWorkflow, StepContext};

/// What a step call produced. `reused` is set when the step had already
/// completed and nothing was sent to the platform.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StepOutcome {
    pub step: Step,
    pub processing_status: ProcessingStatus,
    pub resource_ids: Vec<String>,
    pub count: usize,
    pub next_step: Option<Step>,
    pub reused: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ProvisioningStatus {
    pub platform: Platform,
    pub processing_status: ProcessingStatus,
    pub failed_step: Option<ProcessingStatus>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: i32,
    pub next_step: Option<Step>,
    pub is_ready_for_next_step: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RetryOutcome {
    pub completed_step: Step,
    pub processing_status: ProcessingStatus,
    pub retry_count: i32,
    pub next_step: Option<Step>,
}

pub fn workflow_for(platform: Platform) -> Box<dyn PlatformWorkflow> {
    match platform {
        Platform::Meta => Box::new(MetaWorkflow),
        Platform::GoogleAds => Box::new(GoogleAdsWorkflow),
    }
}

/// The orchestrator serving each enabled platform.
#[derive(Default)]
pub struct Orchestrators {
    by_platform: HashMap<Platform, Orchestrator>,
}

impl Orchestrators {
    pub fn new() -> Orchestrators {
        Orchestrators::default()
    }

    pub fn register(&mut self, orchestrator: Orchestrator) {
        self.by_platform.insert(orchestrator.platform(), orchestrator);
    }

    pub fn get(&self, platform: Platform) -> Result<&Orchestrator, Error> {
        self.by_platform
            .get(&platform)
            .ok_or(Error::PlatformNotEnabled { platform })
    }

    /// Wires every enabled platform to a sandbox client.
    pub fn sandbox(settings: &Settings) -> Orchestrators {
        let mut orchestrators = Orchestrators::new();
        for &platform in &settings.platforms.enabled {
            let tokens = RefreshingTokenProvider::new(
                IssuingTokenSource::new(
                    platform.as_str().to_ascii_lowercase(),
                    Duration::seconds(settings.platforms.token_ttl_seconds),
                ),
                Duration::seconds(settings.platforms.token_refresh_margin_seconds),
            );
            let client: SharedPlatformClient =
                Arc::new(SandboxPlatformClient::new(platform, Arc::new(tokens)));

            orchestrators.register(Orchestrator::new(
                workflow_for(platform),
                client,
                settings.provisioning.clone(),
            ));
        }
        orchestrators
    }
}
