use std::fmt::{Debug, Display};
use std::io::Error as IoError;

use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use config::ConfigError;
use derivative::Derivative;
use mongodb::bson::ser::Error as BsonError;
use mongodb::error::Error as DatabaseError;
use serde::{Serialize, Serializer};

use crate::account::{AdAccountStatus, UserId};
use crate::campaign::CampaignId;
use crate::platform::{Platform, PlatformError};
use crate::tracking::{ProcessingStatus, Step};

#[derive(Debug, Serialize, Derivative)]
#[derivative(PartialEq)]
#[serde(untagged)]
pub enum Error {
    // 400
    #[serde(serialize_with = "display")]
    InvalidJson(#[derivative(PartialEq = "ignore")] JsonPayloadError),
    #[serde(serialize_with = "display")]
    InvalidPath(#[derivative(PartialEq = "ignore")] PathError),
    #[serde(serialize_with = "display")]
    InvalidQuery(#[derivative(PartialEq = "ignore")] QueryPayloadError),

    // 404
    PathNotFound,
    CampaignNotFound {
        campaign_id: CampaignId,
    },
    AdAccountNotFound {
        user_id: UserId,
        platform: Platform,
    },
    TrackingRecordNotFound {
        campaign_id: CampaignId,
        platform: Platform,
    },
    PlatformNotEnabled {
        platform: Platform,
    },

    // 409
    ConcurrentModificationDetected,
    StepInProgress {
        campaign_id: CampaignId,
        platform: Platform,
        processing_status: ProcessingStatus,
        lease_expires_at: DateTime<Utc>,
    },
    StepOutOfOrder {
        campaign_id: CampaignId,
        platform: Platform,
        step: Step,
        processing_status: ProcessingStatus,
    },
    StepNotInWorkflow {
        platform: Platform,
        step: Step,
    },
    StepNotRetryable {
        campaign_id: CampaignId,
        platform: Platform,
        requested_step: ProcessingStatus,
        processing_status: ProcessingStatus,
        failed_step: Option<ProcessingStatus>,
    },
    RetryLimitExceeded {
        campaign_id: CampaignId,
        platform: Platform,
        failed_step: ProcessingStatus,
        retry_count: i32,
    },
    PrerequisitesMissing {
        campaign_id: CampaignId,
        step: Step,
        missing: Vec<&'static str>,
    },
    AdAccountNotReady {
        user_id: UserId,
        platform: Platform,
        status: AdAccountStatus,
    },

    // 422
    InvalidSchedule {
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    },
    NoPlatformsRequested,
    InvalidBudget {
        total_budget: i64,
    },
    UnrecognizedLocation {
        location: String,
    },
    NoValidLocations {
        rejected: Vec<String>,
    },
    MissingPixelConfiguration {
        external_account_id: String,
    },
    InsufficientAdContent {
        campaign_id: CampaignId,
        minimum_headlines: usize,
        minimum_descriptions: usize,
    },

    // 422 / 502 / 503 depending on the platform's answer
    #[serde(serialize_with = "display")]
    PlatformCallFailed(PlatformError),

    // 500
    ExistentialState(String),
    #[serde(serialize_with = "display")]
    FailedDatabaseCall(#[derivative(PartialEq = "ignore")] DatabaseError),
    #[serde(serialize_with = "display")]
    FailedToSerializeToBson(#[derivative(PartialEq = "ignore")] BsonError),
    #[serde(serialize_with = "display")]
    InvalidConfiguration(#[derivative(PartialEq = "ignore")] ConfigError),
    #[serde(serialize_with = "display")]
    IoError(#[derivative(PartialEq = "ignore")] IoError),
}

/// Coarse grouping used by callers deciding what to do with a failed step.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    Validation,
    PreconditionFailed,
    TransientPlatform,
    RetryLimitExceeded,
    Internal,
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "E4001000",
            Error::InvalidPath(_) => "E4001001",
            Error::InvalidQuery(_) => "E4001002",
            Error::PathNotFound => "E4041000",
            Error::CampaignNotFound { .. } => "E4041001",
            Error::AdAccountNotFound { .. } => "E4041002",
            Error::TrackingRecordNotFound { .. } => "E4041003",
            Error::PlatformNotEnabled { .. } => "E4041004",
            Error::ConcurrentModificationDetected => "E4091000",
            Error::StepInProgress { .. } => "E4091001",
            Error::StepOutOfOrder { .. } => "E4091002",
            Error::StepNotInWorkflow { .. } => "E4091003",
            Error::StepNotRetryable { .. } => "E4091004",
            Error::RetryLimitExceeded { .. } => "E4091005",
            Error::PrerequisitesMissing { .. } => "E4091006",
            Error::AdAccountNotReady { .. } => "E4091007",
            Error::InvalidSchedule { .. } => "E4221000",
            Error::NoPlatformsRequested => "E4221001",
            Error::InvalidBudget { .. } => "E4221008",
            Error::UnrecognizedLocation { .. } => "E4221002",
            Error::NoValidLocations { .. } => "E4221003",
            Error::MissingPixelConfiguration { .. } => "E4221004",
            Error::InsufficientAdContent { .. } => "E4221005",
            Error::PlatformCallFailed(err) => match err {
                PlatformError::DuplicateName { .. } => "E4221006",
                PlatformError::Validation { .. } => "E4221007",
                PlatformError::Auth { .. } => "E5021000",
                PlatformError::QuotaOrPermission { .. } => "E5031000",
                PlatformError::TransientNetwork { .. } => "E5031001",
            },
            Error::ExistentialState(_) => "E5001000",
            Error::FailedDatabaseCall(_) => "E5001001",
            Error::FailedToSerializeToBson(_) => "E5001002",
            Error::InvalidConfiguration(_) => "E5001003",
            Error::IoError(_) => "E5001004",
        }
    }

    pub fn error_message(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "The given json could not be parsed",
            Error::InvalidPath(_) => "The given path could not be parsed",
            Error::InvalidQuery(_) => "The given query could not be parsed",
            Error::PathNotFound => "The requested path was not found",
            Error::CampaignNotFound { .. } => "The requested campaign was not found",
            Error::AdAccountNotFound { .. } => {
                "No ad account is connected for the campaign owner on this platform"
            }
            Error::TrackingRecordNotFound { .. } => {
                "The campaign has not been provisioned on this platform"
            }
            Error::PlatformNotEnabled { .. } => "The requested platform is not enabled",
            Error::ConcurrentModificationDetected => {
                "The server detected a concurrent modification"
            }
            Error::StepInProgress { .. } => {
                "Another worker is currently executing a step for this campaign"
            }
            Error::StepOutOfOrder { .. } => {
                "The requested step cannot run before the previous step has completed"
            }
            Error::StepNotInWorkflow { .. } => {
                "The requested step is not part of this platform's workflow"
            }
            Error::StepNotRetryable { .. } => "The requested step is not the step that failed",
            Error::RetryLimitExceeded { .. } => {
                "The failed step has exhausted its retries and needs manual intervention"
            }
            Error::PrerequisitesMissing { .. } => {
                "The resources this step links together have not been created"
            }
            Error::AdAccountNotReady { .. } => "The connected ad account is not ready",
            Error::InvalidSchedule { .. } => "The campaign must end after it starts",
            Error::NoPlatformsRequested => "The campaign does not request any platform",
            Error::InvalidBudget { .. } => "The campaign budget must be positive",
            Error::UnrecognizedLocation { .. } => "The location could not be resolved to a country",
            Error::NoValidLocations { .. } => "None of the campaign's locations could be resolved",
            Error::MissingPixelConfiguration { .. } => {
                "The ad account has no pixel or conversion identifier"
            }
            Error::InsufficientAdContent { .. } => {
                "No product has enough headlines and descriptions for an ad"
            }
            Error::PlatformCallFailed(err) => match err {
                PlatformError::DuplicateName { .. } => {
                    "The platform already has a resource with this name"
                }
                PlatformError::Validation { .. } => "The platform rejected the request",
                PlatformError::Auth { .. } => "The platform rejected our credentials",
                PlatformError::QuotaOrPermission { .. } => {
                    "The platform refused the request due to quota or permissions"
                }
                PlatformError::TransientNetwork { .. } => "The platform could not be reached",
            },
            Error::ExistentialState(_) => "The server detected an invalid state",
            Error::FailedDatabaseCall(_) => {
                "An error occurred when communicating with the database"
            }
            Error::FailedToSerializeToBson(_) => {
                "An error occurred when serializing an object to bson"
            }
            Error::InvalidConfiguration(_) => "The server configuration could not be loaded",
            Error::IoError(_) => "An error occurred during an I/O operation",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidJson(_)
            | Error::InvalidPath(_)
            | Error::InvalidQuery(_)
            | Error::InvalidSchedule { .. }
            | Error::NoPlatformsRequested
            | Error::InvalidBudget { .. }
            | Error::UnrecognizedLocation { .. }
            | Error::NoValidLocations { .. }
            | Error::MissingPixelConfiguration { .. }
            | Error::InsufficientAdContent { .. } => ErrorClass::Validation,
            Error::PathNotFound
            | Error::CampaignNotFound { .. }
            | Error::AdAccountNotFound { .. }
            | Error::TrackingRecordNotFound { .. }
            | Error::PlatformNotEnabled { .. }
            | Error::ConcurrentModificationDetected
            | Error::StepInProgress { .. }
            | Error::StepOutOfOrder { .. }
            | Error::StepNotInWorkflow { .. }
            | Error::StepNotRetryable { .. }
            | Error::PrerequisitesMissing { .. }
            | Error::AdAccountNotReady { .. } => ErrorClass::PreconditionFailed,
            Error::RetryLimitExceeded { .. } => ErrorClass::RetryLimitExceeded,
            Error::PlatformCallFailed(err) => {
                if err.is_transient() {
                    ErrorClass::TransientPlatform
                } else {
                    ErrorClass::Validation
                }
            }
            Error::ExistentialState(_)
            | Error::FailedDatabaseCall(_)
            | Error::FailedToSerializeToBson(_)
            | Error::InvalidConfiguration(_)
            | Error::IoError(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransientPlatform | ErrorClass::Internal
        )
    }

    /// Whether a step that raised this error should be marked `FAILED`.
    /// Conflicts mean another invocation owns the record, so it is left alone.
    pub fn records_step_failure(&self) -> bool {
        !matches!(
            self,
            Error::ConcurrentModificationDetected | Error::StepInProgress { .. }
        )
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Error::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Error::PathNotFound => StatusCode::NOT_FOUND,
            Error::CampaignNotFound { .. } => StatusCode::NOT_FOUND,
            Error::AdAccountNotFound { .. } => StatusCode::NOT_FOUND,
            Error::TrackingRecordNotFound { .. } => StatusCode::NOT_FOUND,
            Error::PlatformNotEnabled { .. } => StatusCode::NOT_FOUND,
            Error::ConcurrentModificationDetected => StatusCode::CONFLICT,
            Error::StepInProgress { .. } => StatusCode::CONFLICT,
            Error::StepOutOfOrder { .. } => StatusCode::CONFLICT,
            Error::StepNotInWorkflow { .. } => StatusCode::CONFLICT,
            Error::StepNotRetryable { .. } => StatusCode::CONFLICT,
            Error::RetryLimitExceeded { .. } => StatusCode::CONFLICT,
            Error::PrerequisitesMissing { .. } => StatusCode::CONFLICT,
            Error::AdAccountNotReady { .. } => StatusCode::CONFLICT,
            Error::InvalidSchedule { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NoPlatformsRequested => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidBudget { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::UnrecognizedLocation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NoValidLocations { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::MissingPixelConfiguration { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InsufficientAdContent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PlatformCallFailed(err) => match err {
                PlatformError::DuplicateName { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PlatformError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PlatformError::Auth { .. } => StatusCode::BAD_GATEWAY,
                PlatformError::QuotaOrPermission { .. } => StatusCode::SERVICE_UNAVAILABLE,
                PlatformError::TransientNetwork { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            Error::ExistentialState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::FailedDatabaseCall(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::FailedToSerializeToBson(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        #[derive(Serialize)]
        struct Dummy<'a> {
            error_code: &'static str,
            error_message: &'static str,
            error_meta: &'a Error,
        }

        HttpResponse::build(self.status_code()).json(&Dummy {
            error_code: self.error_code(),
            error_message: self.error_message(),
            error_meta: self,
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        Debug::fmt(self, f)
    }
}

impl From<DatabaseError> for Error {
    fn from(error: DatabaseError) -> Error {
        Error::FailedDatabaseCall(error)
    }
}

impl From<BsonError> for Error {
    fn from(error: BsonError) -> Error {
        Error::FailedToSerializeToBson(error)
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Error {
        Error::InvalidConfiguration(error)
    }
}

impl From<PlatformError> for Error {
    fn from(error: PlatformError) -> Error {
        Error::PlatformCallFailed(error)
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidJson(err) => Some(err),
            Error::InvalidPath(err) => Some(err),
            Error::InvalidQuery(err) => Some(err),
            Error::PlatformCallFailed(err) => Some(err),
            Error::FailedDatabaseCall(err) => Some(err),
            Error::FailedToSerializeToBson(err) => Some(err),
            Error::InvalidConfiguration(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

fn display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.collect_str(value)
}
