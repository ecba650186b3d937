mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct Me {
    username: String,
    email: String,
    role: String,
    is_superuser: bool,
    profile_image_url: Option<String>,
}

#[tokio::test]
async fn login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let password = "s3cret-pass";
    app.insert_user("alice", password, "admin", false).await?;

    let token = app.login_token("alice", password).await?;

    let response = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Me = json_body(response).await?;

    assert_eq!(me.username, "alice");
    assert_eq!(me.email, "alice@example.com");
    assert_eq!(me.role, "admin");
    assert!(!me.is_superuser);
    assert!(me.profile_image_url.is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_accepts_email_case_insensitively() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("bob", "hunter2-hunter2", "resident", false)
        .await?;
    let token = app.login_token("Bob@Example.com", "hunter2-hunter2").await?;
    assert!(!token.is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_and_missing_token_are_unauthorized() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("carol", "right-password", "resident", false)
        .await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "carol", "password": "wrong-password" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/workspaces", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

fn refresh_cookie(response: &hyper::Response<axum::body::Body>) -> Option<String> {
    response
        .headers()
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

#[derive(Deserialize)]
struct Session {
    access_token: String,
}

#[tokio::test]
async fn refresh_rotates_and_logout_revokes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("dora", "dora-password", "resident", false)
        .await?;
    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "dora", "password": "dora-password" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let first_cookie = refresh_cookie(&response).expect("login sets a refresh cookie");
    assert!(first_cookie.starts_with("refresh_token="));

    let response = app
        .post_with_cookie("/api/auth/refresh", &first_cookie, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second_cookie = refresh_cookie(&response).expect("refresh sets a new cookie");
    assert_ne!(second_cookie, first_cookie);
    let session: Session = json_body(response).await?;

    let response = app
        .post_with_cookie("/api/auth/refresh", &first_cookie, None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_with_cookie("/api/auth/logout", &second_cookie, Some(&session.access_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(refresh_cookie(&response).as_deref(), Some("refresh_token="));

    let response = app
        .post_with_cookie("/api/auth/refresh", &second_cookie, None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
