mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{read_json, spawn_app};
use identity_service::services::{totp, IdentityStore};

#[tokio::test]
async fn login_with_sms_second_factor() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;

    let response = app
        .post_json(
            "/login",
            json!({ "username": "alice", "password": "correct horse battery" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["next"], "smsconfirmation");
    let token = body["token"].as_str().unwrap().to_string();

    let code = app.sms.last_code().unwrap();
    let response = app
        .post_json(
            "/loginsmsconfirmation",
            json!({ "token": token, "smscode": code }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body_cookie = common::session_cookie(&response);
    let body = read_json(response).await;
    assert_eq!(body["next"], "authenticated");

    let response = app
        .get_with_cookie("/authorize?scopes=user:name", &body_cookie)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_identical() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;

    let wrong = app
        .post_json(
            "/login",
            json!({ "username": "alice", "password": "nope nope nope" }),
        )
        .await;
    let unknown = app
        .post_json(
            "/login",
            json!({ "username": "nobody", "password": "nope nope nope" }),
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn totp_login_rejects_the_sms_endpoint_for_the_totp_step() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;
    let session = app.login_session("alice", "correct horse battery").await;

    // Enroll TOTP through the API.
    let response = app
        .post_json_with_cookie("/totp/setup", &session, json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let secret = body["totpsecret"].as_str().unwrap().to_string();

    // Fresh login now pends on TOTP.
    let response = app
        .post_json(
            "/login",
            json!({ "username": "alice", "password": "correct horse battery" }),
        )
        .await;
    let body = read_json(response).await;
    assert_eq!(body["next"], "totpconfirmation");
    let token = body["token"].as_str().unwrap().to_string();

    // Submitting to the SMS endpoint is a step mismatch, not a retry.
    let response = app
        .post_json(
            "/loginsmsconfirmation",
            json!({ "token": token, "smscode": "123456" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The real TOTP code finishes the flow.
    let code = totp::current_code(&secret, chrono::Utc::now().timestamp()).unwrap();
    let response = app
        .post_json(
            "/logintotpconfirmation",
            json!({ "token": token, "totpcode": code }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["next"], "authenticated");
}

#[tokio::test]
async fn empty_totp_code_fails_dto_validation() {
    let app = spawn_app();

    let response = app
        .post_json(
            "/logintotpconfirmation",
            json!({ "token": "whatever", "totpcode": "" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cancelled_attempt_rejects_further_submissions() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;

    let response = app
        .post_json(
            "/login",
            json!({ "username": "alice", "password": "correct horse battery" }),
        )
        .await;
    let body = read_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    let code = app.sms.last_code().unwrap();

    let response = app
        .post_json("/logincancel", json!({ "token": token }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/loginsmsconfirmation",
            json!({ "token": token, "smscode": code }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn double_submission_has_a_single_winner() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;

    let response = app
        .post_json(
            "/login",
            json!({ "username": "alice", "password": "correct horse battery" }),
        )
        .await;
    let body = read_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    let code = app.sms.last_code().unwrap();

    let first = app
        .post_json(
            "/loginsmsconfirmation",
            json!({ "token": token, "smscode": code }),
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    // The attempt concluded; a replay cannot win a second session.
    let second = app
        .post_json(
            "/loginsmsconfirmation",
            json!({ "token": token, "smscode": code }),
        )
        .await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_invalidates_the_presented_session() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;
    let session = app.login_session("alice", "correct horse battery").await;

    let response = app
        .get_with_cookie("/authorize?scopes=user:name", &session)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get_with_cookie("/logout", &session).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The cookie still parses but its session is gone.
    let response = app
        .get_with_cookie("/authorize?scopes=user:name", &session)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_never_exposes_credential_material() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;
    let session = app.login_session("alice", "correct horse battery").await;

    let response = app.get_with_cookie("/users/me", &session).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["totp_enabled"], false);
    assert!(body.get("password_hash").is_none());
    assert!(body.get("totp_secret").is_none());
    assert_eq!(body["phonenumbers"][0]["verified"], true);
}

#[tokio::test]
async fn protected_routes_reject_missing_and_forged_cookies() {
    let app = spawn_app();

    let response = app.get("/authorize?scopes=user:name").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .get_with_cookie("/authorize?scopes=user:name", "iyo_session=forged.value")
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn external_callback_signs_in_and_reuses_the_bound_user() {
    let app = spawn_app();

    let response = app.get("/github_callback?code=Octocat").await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = common::session_cookie(&response);
    let body = read_json(response).await;
    assert_eq!(body["next"], "authenticated");

    let response = app.get_with_cookie("/users/me", &session).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["username"], "octocat");

    // A repeat callback binds to the same account instead of creating one.
    let response = app.get("/github_callback?code=Octocat").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.store.get_user("octocat").await.unwrap().is_some());
}

#[tokio::test]
async fn login_sms_delivery_failure_surfaces_the_token() {
    let app = spawn_app();
    app.register_active_user("alice", "correct horse battery")
        .await;

    app.sms.fail_next_delivery();
    let response = app
        .post_json(
            "/login",
            json!({ "username": "alice", "password": "correct horse battery" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["next"], "smsconfirmation");
    assert_eq!(body["delivery_failed"], true);
    let token = body["token"].as_str().unwrap().to_string();

    // The token makes the resend reachable; the flow then completes.
    let response = app
        .post_json("/loginresendsms", json!({ "token": token }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let code = app.sms.last_code().unwrap();
    let response = app
        .post_json(
            "/loginsmsconfirmation",
            json!({ "token": token, "smscode": code }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["next"], "authenticated");
}
