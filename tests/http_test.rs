//! End-to-end tests of the HTTP surface

mod common;
use serial_test::serial;

use actix_web::http::StatusCode;
use actix_web::test::{self, TestRequest};
use actix_web::web::Data;
use actix_web::App;
use common::database::*;
use serde_json::{json, Value};

const USER_HEADER: &str = "X-User-Id";

/// Trust the test header as the authenticated user id
fn enable_header_identity() {
    pollster::app_config::APP_CONFIG
        .write()
        .expect("Config lock poisoned")
        .identity
        .trusted_header = USER_HEADER.to_string();
}

macro_rules! init_app {
    ($engine:expr) => {
        test::init_service(
            App::new()
                .app_data(Data::new($engine.store.clone()))
                .app_data(Data::new($engine.ledger.clone()))
                .app_data(Data::new($engine.results.clone()))
                .configure(pollster::web::configure),
        )
        .await
    };
}

#[actix_rt::test]
#[serial]
async fn test_create_vote_and_view() {
    enable_header_identity();
    let engine = setup_engine().await;
    let app = init_app!(engine);

    let req = TestRequest::post()
        .uri("/api/v1/polls")
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({
            "title": "Tabs or spaces",
            "options": ["Tabs", "Spaces"]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let created: Value = test::read_body_json(resp).await;
    let poll_id = created["id"].as_i64().unwrap();
    let spaces = created["options"][1]["id"].as_i64().unwrap();
    assert_eq!(created["is_public"], true);
    assert_eq!(created["total_votes"], 0);

    let req = TestRequest::post()
        .uri(&format!("/api/v1/polls/{}/vote", poll_id))
        .insert_header((USER_HEADER, "2"))
        .set_json(json!({ "option_id": spaces }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = TestRequest::post()
        .uri(&format!("/api/v1/polls/{}/vote", poll_id))
        .insert_header((USER_HEADER, "2"))
        .set_json(json!({ "option_id": spaces }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "ALREADY_VOTED");
    assert_eq!(body["poll_id"], poll_id);

    let req = TestRequest::get()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .insert_header((USER_HEADER, "2"))
        .to_request();
    let view: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view["total_votes"], 1);
    assert_eq!(view["user_has_voted"], true);
    assert_eq!(view["user_vote_option_id"], spaces);
    assert_eq!(view["options"][1]["percentage"], 100.0);
}

#[actix_rt::test]
#[serial]
async fn test_private_poll_status_codes() {
    enable_header_identity();
    let engine = setup_engine().await;
    let app = init_app!(engine);

    let req = TestRequest::post()
        .uri("/api/v1/polls")
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({ "title": "Hidden", "is_public": false, "options": ["A"] }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let poll_id = created["id"].as_i64().unwrap();

    let req = TestRequest::get()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "AUTH_REQUIRED");

    let req = TestRequest::get()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .insert_header((USER_HEADER, "2"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = TestRequest::get().uri("/api/v1/polls").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["total"], 0);
    assert_eq!(page["items"].as_array().unwrap().len(), 0);
}

#[actix_rt::test]
#[serial]
async fn test_update_add_option_and_delete() {
    enable_header_identity();
    let engine = setup_engine().await;
    let app = init_app!(engine);

    let req = TestRequest::post()
        .uri("/api/v1/polls")
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({ "title": "Snacks", "options": ["Chips"] }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let poll_id = created["id"].as_i64().unwrap();

    let req = TestRequest::patch()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .insert_header((USER_HEADER, "2"))
        .set_json(json!({ "title": "Mine now" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = TestRequest::patch()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({ "is_active": false }))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated["is_active"], false);

    let req = TestRequest::post()
        .uri(&format!("/api/v1/polls/{}/options", poll_id))
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({ "text": "Nuts" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = TestRequest::post()
        .uri(&format!("/api/v1/polls/{}/options", poll_id))
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({ "text": "NUTS" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "DUPLICATE_OPTION");

    let req = TestRequest::delete()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .insert_header((USER_HEADER, "1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = TestRequest::get()
        .uri(&format!("/api/v1/polls/{}", poll_id))
        .insert_header((USER_HEADER, "1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
#[serial]
async fn test_invalid_input_is_unprocessable() {
    enable_header_identity();
    let engine = setup_engine().await;
    let app = init_app!(engine);

    let req = TestRequest::post()
        .uri("/api/v1/polls")
        .insert_header((USER_HEADER, "1"))
        .set_json(json!({ "title": "" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    // Malformed JSON uses the same error shape.
    let req = TestRequest::post()
        .uri("/api/v1/polls")
        .insert_header((USER_HEADER, "1"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let req = TestRequest::get()
        .uri("/api/v1/polls?size=500")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let req = TestRequest::post()
        .uri("/api/v1/polls")
        .set_json(json!({ "title": "Anonymous" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
#[serial]
async fn test_quota_response_has_retry_after() {
    enable_header_identity();
    let engine = setup_engine_with(
        pollster::rate_limit::RateGuardConfig {
            poll_creation_max: 1,
            ..generous_limits()
        },
        pollster::app_config::LimitsConfig::default(),
    )
    .await;
    let app = init_app!(engine);

    for expected in [StatusCode::CREATED, StatusCode::TOO_MANY_REQUESTS] {
        let req = TestRequest::post()
            .uri("/api/v1/polls")
            .insert_header((USER_HEADER, "1"))
            .set_json(json!({ "title": "Again" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), expected);

        if expected == StatusCode::TOO_MANY_REQUESTS {
            assert!(resp.headers().contains_key("Retry-After"));
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error_code"], "QUOTA_EXCEEDED");
            assert!(body["retry_after_seconds"].as_u64().unwrap() > 0);
        }
    }
}
