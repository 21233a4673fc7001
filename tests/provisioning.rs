use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{test, App};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use adlaunch::campaign::CampaignBody;
use adlaunch::config::Settings;
use adlaunch::database::memory::MemoryDatabase;
use adlaunch::database::Database;
use adlaunch::provisioning::{Orchestrators, ProvisioningStatus, StepOutcome};
use adlaunch::tracking::{ProcessingStatus, Step};

macro_rules! app {
    () => {{
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let orchestrators = Orchestrators::sandbox(&Settings::default());
        test::init_service(
            App::new()
                .app_data(Data::from(db))
                .app_data(Data::new(orchestrators))
                .configure(adlaunch::configure),
        )
        .await
    }};
}

fn campaign_body(user_id: &str, platforms: Value) -> Value {
    let start = Utc::now();
    json!({
        "user_id": user_id,
        "name": "Spring Sale",
        "objective": "SALES",
        "total_budget": 30000,
        "start_date": start,
        "end_date": start + Duration::days(10),
        "locations": ["USA", "Germany", "Atlantis"],
        "products": [{
            "id": "p1",
            "title": "Trail Shoe",
            "link": "https://shop.example/p1",
            "image_urls": ["https://cdn.example/p1.png"],
            "headlines": ["Light", "Grippy", "Durable"],
            "bodies": ["Built for the trail"],
            "descriptions": ["Breathable mesh", "Recycled sole", "Free returns"]
        }],
        "platforms": platforms
    })
}

fn account_body(user_id: &str, platform: &str) -> Value {
    json!({
        "user_id": user_id,
        "platform": platform,
        "external_account_id": "1234567890",
        "pixel_id": "px_1",
        "page_ref": "page_1",
        "currency": "usd",
        "status": "READY"
    })
}

const USER_ID: &str = "USR-67E55044-10B1-426F-9247-BB680E5FE0C8";

#[actix_web::test]
async fn meta_campaign_is_provisioned_over_http() {
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/ad-accounts")
        .set_json(account_body(USER_ID, "META"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/campaigns")
        .set_json(campaign_body(USER_ID, json!(["META"])))
        .to_request();
    let campaign: CampaignBody = test::call_and_read_body_json(&app, req).await;

    for step in &[
        "initialize",
        "create-targeting-units",
        "create-creatives",
        "create-ads",
        "launch",
    ] {
        let req = test::TestRequest::post()
            .uri(&format!(
                "/campaigns/{}/platforms/meta/steps/{}",
                campaign.id, step
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "step {}", step);
        let outcome: StepOutcome = test::read_body_json(resp).await;
        assert!(!outcome.reused);
    }

    let req = test::TestRequest::get()
        .uri(&format!("/campaigns/{}/platforms/META/status", campaign.id))
        .to_request();
    let status: ProvisioningStatus = test::call_and_read_body_json(&app, req).await;

    assert_eq!(status.processing_status, ProcessingStatus::Launched);
    assert_eq!(status.next_step, None);
    assert!(!status.is_ready_for_next_step);
}

#[actix_web::test]
async fn out_of_order_steps_are_conflicts() {
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/ad-accounts")
        .set_json(account_body(USER_ID, "GOOGLE_ADS"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/campaigns")
        .set_json(campaign_body(USER_ID, json!(["GOOGLE_ADS"])))
        .to_request();
    let campaign: CampaignBody = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/campaigns/{}/platforms/google-ads/steps/launch",
            campaign.id
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "E4091002");
    assert_eq!(body["error_meta"]["processing_status"], "PENDING");
}

#[actix_web::test]
async fn google_steps_report_their_next_step() {
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/ad-accounts")
        .set_json(account_body(USER_ID, "GOOGLE_ADS"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/campaigns")
        .set_json(campaign_body(USER_ID, json!(["GOOGLE_ADS"])))
        .to_request();
    let campaign: CampaignBody = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!(
            "/campaigns/{}/platforms/google-ads/steps/initialize",
            campaign.id
        ))
        .to_request();
    let outcome: StepOutcome = test::call_and_read_body_json(&app, req).await;

    assert_eq!(outcome.processing_status, ProcessingStatus::Initialized);
    assert_eq!(outcome.next_step, Some(Step::CreateAdGroup));
    assert_eq!(outcome.count, 3);
}

#[actix_web::test]
async fn retrying_a_step_that_did_not_fail_is_rejected() {
    let app = app!();

    let req = test::TestRequest::post()
        .uri("/ad-accounts")
        .set_json(account_body(USER_ID, "META"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/campaigns")
        .set_json(campaign_body(USER_ID, json!(["META"])))
        .to_request();
    let campaign: CampaignBody = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/campaigns/{}/platforms/meta/steps/initialize", campaign.id))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/campaigns/{}/platforms/meta/retry", campaign.id))
        .set_json(json!({ "failed_step": "INITIALIZING" }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "E4091004");
}

#[actix_web::test]
async fn unknown_campaigns_are_not_found() {
    let app = app!();

    let req = test::TestRequest::get()
        .uri("/campaigns/CPN-67E55044-10B1-426F-9247-BB680E5FE0C8")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "E4041001");
}

#[actix_web::test]
async fn campaigns_without_budget_are_rejected() {
    let app = app!();
    let mut body = campaign_body(USER_ID, json!(["META"]));
    body["total_budget"] = json!(0);

    let req = test::TestRequest::post()
        .uri("/campaigns")
        .set_json(body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "E4221008");
}
