use adlaunch::config::Settings;
use adlaunch::error::Error;

#[actix_web::main]
async fn main() -> Result<(), Error> {
    let settings = Settings::load()?;
    adlaunch::init_tracing(&settings.logging);

    adlaunch::run(settings).await
}
