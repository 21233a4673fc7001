//! A simulated ad platform.
//!
//! Behaves like the remote APIs closely enough to exercise the orchestration
//! core: it hands out platform-shaped identifiers, refuses a second campaign
//! with the same name in one account, asks for a valid token on every call,
//! and lets callers queue failures for specific operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::{
    AdContent, AdRequest, BiddingStrategyRequest, BudgetRequest, CampaignContainerRequest,
    CreativeRequest, GeoTargetRequest, Platform, PlatformClient, PlatformError, ResourceRef,
    ResourceStatus, TargetingUnitRequest, TokenProvider,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateCampaignContainer,
    CreateBudget,
    CreateBiddingStrategy,
    CreateTargetingUnit,
    CreateCreative,
    CreateAd,
    AddGeoTarget,
    SetStatus,
}

/// One attempted call, in the order it reached the platform.
#[derive(Clone, Debug, PartialEq)]
pub enum PlatformCall {
    CreateCampaignContainer { name: String },
    CreateBudget { name: String },
    CreateBiddingStrategy { name: String },
    CreateTargetingUnit { name: String },
    CreateCreative {
        product_id: String,
        image_urls: Vec<String>,
        bodies: Vec<String>,
        headlines: Vec<String>,
        descriptions: Vec<String>,
    },
    CreateAd { targeting_unit_id: String },
    AddGeoTarget { country_code: String },
    SetStatus { resource: ResourceRef, status: ResourceStatus },
}

impl PlatformCall {
    pub fn operation(&self) -> Operation {
        match self {
            PlatformCall::CreateCampaignContainer { .. } => Operation::CreateCampaignContainer,
            PlatformCall::CreateBudget { .. } => Operation::CreateBudget,
            PlatformCall::CreateBiddingStrategy { .. } => Operation::CreateBiddingStrategy,
            PlatformCall::CreateTargetingUnit { .. } => Operation::CreateTargetingUnit,
            PlatformCall::CreateCreative { .. } => Operation::CreateCreative,
            PlatformCall::CreateAd { .. } => Operation::CreateAd,
            PlatformCall::AddGeoTarget { .. } => Operation::AddGeoTarget,
            PlatformCall::SetStatus { .. } => Operation::SetStatus,
        }
    }
}

struct Fault {
    operation: Operation,
    skip: usize,
    error: PlatformError,
}

#[derive(Default)]
struct SandboxState {
    campaign_names: HashSet<(String, String)>,
    statuses: HashMap<String, ResourceStatus>,
    calls: Vec<PlatformCall>,
    faults: Vec<Fault>,
}

pub struct SandboxPlatformClient {
    platform: Platform,
    tokens: Arc<dyn TokenProvider>,
    state: Mutex<SandboxState>,
}

impl SandboxPlatformClient {
    pub fn new(platform: Platform, tokens: Arc<dyn TokenProvider>) -> SandboxPlatformClient {
        SandboxPlatformClient {
            platform,
            tokens,
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Makes the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: PlatformError) {
        self.fail_after(operation, 0, error);
    }

    /// Lets `skip` calls of `operation` succeed, then fails the following one.
    pub fn fail_after(&self, operation: Operation, skip: usize, error: PlatformError) {
        self.lock().faults.push(Fault {
            operation,
            skip,
            error,
        });
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    pub fn status_of(&self, resource_id: &str) -> Option<ResourceStatus> {
        self.lock().statuses.get(resource_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SandboxState> {
        // a panicking test thread must not hide the calls made before it
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn begin(&self, call: PlatformCall) -> Result<(), PlatformError> {
        let token = self.tokens.valid_token().await?;
        debug!(platform = %self.platform, ?call, token_expires_at = %token.expires_at, "sandbox call");

        let operation = call.operation();
        let mut state = self.lock();
        state.calls.push(call);

        let position = state
            .faults
            .iter()
            .position(|fault| fault.operation == operation);
        if let Some(index) = position {
            if state.faults[index].skip == 0 {
                let fault = state.faults.remove(index);
                return Err(fault.error);
            }
            state.faults[index].skip -= 1;
        }

        Ok(())
    }

    fn next_number() -> u64 {
        rand::thread_rng().gen_range(100_000_000_000_000..1_000_000_000_000_000)
    }

    fn resource_id(&self, account_id: &str, collection: &str) -> String {
        let number = SandboxPlatformClient::next_number();
        match self.platform {
            Platform::Meta => number.to_string(),
            Platform::GoogleAds => format!("customers/{}/{}/{}", account_id, collection, number),
        }
    }

    fn register(&self, id: &str, status: ResourceStatus) {
        self.lock().statuses.insert(id.to_owned(), status);
    }
}

#[async_trait]
impl PlatformClient for SandboxPlatformClient {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn create_campaign_container(
        &self,
        request: &CampaignContainerRequest,
    ) -> Result<String, PlatformError> {
        self.begin(PlatformCall::CreateCampaignContainer {
            name: request.name.clone(),
        })
        .await?;

        let key = (request.account_id.clone(), request.name.clone());
        if !self.lock().campaign_names.insert(key) {
            return Err(PlatformError::DuplicateName {
                name: request.name.clone(),
            });
        }

        let id = self.resource_id(&request.account_id, "campaigns");
        self.register(&id, request.status);

        Ok(id)
    }

    async fn create_budget(&self, request: &BudgetRequest) -> Result<String, PlatformError> {
        self.begin(PlatformCall::CreateBudget {
            name: request.name.clone(),
        })
        .await?;

        if request.daily_amount_micros <= 0 {
            return Err(PlatformError::Validation {
                message: "budget amount must be positive".into(),
            });
        }

        Ok(self.resource_id(&request.account_id, "campaignBudgets"))
    }

    async fn create_bidding_strategy(
        &self,
        request: &BiddingStrategyRequest,
    ) -> Result<String, PlatformError> {
        self.begin(PlatformCall::CreateBiddingStrategy {
            name: request.name.clone(),
        })
        .await?;

        Ok(self.resource_id(&request.account_id, "biddingStrategies"))
    }

    async fn create_targeting_unit(
        &self,
        request: &TargetingUnitRequest,
    ) -> Result<String, PlatformError> {
        self.begin(PlatformCall::CreateTargetingUnit {
            name: request.name.clone(),
        })
        .await?;

        if !self.lock().statuses.contains_key(&request.campaign_id) {
            return Err(PlatformError::Validation {
                message: format!("campaign {} does not exist", request.campaign_id),
            });
        }

        let id = self.resource_id(&request.account_id, "adGroups");
        self.register(&id, request.status);

        Ok(id)
    }

    async fn create_creative(&self, request: &CreativeRequest) -> Result<String, PlatformError> {
        self.begin(PlatformCall::CreateCreative {
            product_id: request.product_id.clone(),
            image_urls: request.image_urls.clone(),
            bodies: request.bodies.clone(),
            headlines: request.headlines.clone(),
            descriptions: request.descriptions.clone(),
        })
        .await?;

        if request.headlines.is_empty() {
            return Err(PlatformError::Validation {
                message: "creative needs at least one headline".into(),
            });
        }

        Ok(self.resource_id(&request.account_id, "assets"))
    }

    async fn create_ad(&self, request: &AdRequest) -> Result<String, PlatformError> {
        self.begin(PlatformCall::CreateAd {
            targeting_unit_id: request.targeting_unit_id.clone(),
        })
        .await?;

        if let AdContent::Responsive {
            headlines,
            descriptions,
            ..
        } = &request.content
        {
            if headlines.len() < 3 || descriptions.len() < 2 {
                return Err(PlatformError::Validation {
                    message: "responsive ads need 3 headlines and 2 descriptions".into(),
                });
            }
        }

        let id = self.resource_id(&request.account_id, "adGroupAds");
        self.register(&id, request.status);

        Ok(id)
    }

    async fn add_geo_target(&self, request: &GeoTargetRequest) -> Result<String, PlatformError> {
        self.begin(PlatformCall::AddGeoTarget {
            country_code: request.country_code.clone(),
        })
        .await?;

        Ok(self.resource_id(&request.account_id, "campaignCriteria"))
    }

    async fn set_status(
        &self,
        _account_id: &str,
        resource: &ResourceRef,
        status: ResourceStatus,
    ) -> Result<(), PlatformError> {
        self.begin(PlatformCall::SetStatus {
            resource: resource.clone(),
            status,
        })
        .await?;

        let mut state = self.lock();
        match state.statuses.get_mut(&resource.id) {
            Some(current) => {
                *current = status;
                Ok(())
            }
            None => Err(PlatformError::Validation {
                message: format!("{:?} {} does not exist", resource.kind, resource.id),
            }),
        }
    }
}
