use std::sync::Arc;

use actix_web::web::{self, Data, JsonConfig, PathConfig, QueryConfig, ServiceConfig};
use actix_web::{App, HttpServer, ResponseError};
use mongodb::{bson, Client};
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub mod account;
pub mod calculator;
pub mod campaign;
pub mod config;
pub mod database;
pub mod error;
pub mod platform;
pub mod provisioning;
pub mod tracking;
pub mod typedid;

use crate::config::{DatabaseBackend, LogFormat, LoggingSettings, Settings};
use crate::database::memory::MemoryDatabase;
use crate::database::{Database, MongoDatabase};
use crate::error::Error;
use crate::provisioning::Orchestrators;

pub fn init_tracing(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NEW);

    match settings.format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Registers the extractor error formats and every endpoint.
pub fn configure(cfg: &mut ServiceConfig) {
    cfg.app_data(JsonConfig::default().error_handler(|err, _req| {
        // format json errors with custom format
        Error::InvalidJson(err).into()
    }))
    .app_data(PathConfig::default().error_handler(|err, _req| {
        // format path errors with custom format
        Error::InvalidPath(err).into()
    }))
    .app_data(QueryConfig::default().error_handler(|err, _req| {
        // format query errors with custom format
        Error::InvalidQuery(err).into()
    }))
    .service(campaign::endpoints::create_campaign)
    .service(campaign::endpoints::get_campaign_by_id)
    .service(account::endpoints::connect_ad_account)
    .service(account::endpoints::get_ad_accounts_for_user)
    .service(provisioning::endpoints::run_provisioning_step)
    .service(provisioning::endpoints::get_provisioning_status)
    .service(provisioning::endpoints::retry_provisioning_step);
}

pub async fn connect_database(settings: &Settings) -> Result<Arc<dyn Database>, Error> {
    match settings.database.backend {
        DatabaseBackend::Mongo => {
            info!("connecting to db: {}", settings.database.uri);
            let db = Client::with_uri_str(&settings.database.uri)
                .await?
                .database(&settings.database.name);

            // ping the database to ensure connection is established
            db.run_command(bson::doc! { "ping": 1 }, None).await?;

            Ok(Arc::new(MongoDatabase::initialize(db).await?))
        }
        DatabaseBackend::Memory => {
            warn!("using the in-memory database; records are lost on restart");
            Ok(Arc::new(MemoryDatabase::new()))
        }
    }
}

pub async fn run(settings: Settings) -> Result<(), Error> {
    let db: Data<dyn Database> = Data::from(connect_database(&settings).await?);
    let orchestrators = Data::new(Orchestrators::sandbox(&settings));
    info!(
        platforms = ?settings.platforms.enabled,
        "provisioning through sandbox platform clients"
    );

    let address = (settings.server.host.clone(), settings.server.port);
    info!("listening on {}:{}", address.0, address.1);

    HttpServer::new(move || {
        App::new()
            .app_data(db.clone())
            .app_data(orchestrators.clone())
            .wrap(TracingLogger::default())
            .configure(configure)
            .default_service(web::to(|| async { Error::PathNotFound.error_response() }))
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
