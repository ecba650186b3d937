mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, FilePart, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const GIF: [u8; 6] = *b"GIF89a";

#[derive(Deserialize)]
struct ProfileImage {
    user_id: Uuid,
    url: Option<String>,
}

#[derive(Deserialize)]
struct DocumentInfo {
    entity_type: String,
    entity_id: Uuid,
    file_name: String,
    is_profile_image: bool,
    url: String,
}

#[derive(Deserialize)]
struct Created {
    id: Uuid,
}

#[tokio::test]
async fn profile_images_use_a_stable_key_and_latest_wins() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (user_id, token) = app.user_with_token("petra", "resident", false).await?;
    let (_, viewer) = app.user_with_token("victor", "resident", false).await?;

    let profile_path = format!("/api/users/{user_id}/profile-image");
    let response = app.get(&profile_path, Some(&viewer)).await?;
    let empty: ProfileImage = json_body(response).await?;
    assert!(empty.url.is_none());

    let response = app
        .post_multipart(
            "/api/users/me/profile-image",
            &[],
            Some(FilePart {
                file_name: "me.png",
                content_type: "image/png",
                data: &PNG,
            }),
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let uploaded: ProfileImage = json_body(response).await?;
    assert_eq!(uploaded.user_id, user_id);
    let png_key = format!("profiles/{user_id}_profile.png");
    assert!(uploaded.url.as_deref().is_some_and(|url| url.contains(&png_key)));
    assert!(app.storage().get(&png_key).await.is_some());

    let response = app
        .post_multipart(
            "/api/users/me/profile-image",
            &[],
            Some(FilePart {
                file_name: "me.gif",
                content_type: "image/gif",
                data: &GIF,
            }),
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get(&profile_path, Some(&viewer)).await?;
    let current: ProfileImage = json_body(response).await?;
    let gif_key = format!("profiles/{user_id}_profile.gif");
    assert!(current.url.as_deref().is_some_and(|url| url.contains(&gif_key)));

    let response = app.get("/api/auth/me", Some(&token)).await?;
    let me: serde_json::Value = json_body(response).await?;
    assert!(me["profile_image_url"]
        .as_str()
        .is_some_and(|url| url.contains(&gif_key)));

    let response = app
        .post_multipart(
            "/api/users/me/profile-image",
            &[],
            Some(FilePart {
                file_name: "notes.txt",
                content_type: "text/plain",
                data: b"not an image",
            }),
            &token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!("/api/users/{}/profile-image", Uuid::new_v4()), Some(&viewer))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn uploads_follow_the_owning_entity_permissions() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, owner) = app.user_with_token("owner", "owner", false).await?;
    let (resident_id, resident) = app.user_with_token("resident", "resident", false).await?;
    let (_, outsider) = app.user_with_token("outsider", "resident", false).await?;

    let response = app
        .post_json("/api/workspaces", &json!({ "name": "Cedar Flats" }), Some(&owner))
        .await?;
    let workspace: Created = json_body(response).await?;
    let response = app
        .post_json(
            &format!("/api/workspaces/{}/members", workspace.id),
            &json!({ "user_id": resident_id }),
            Some(&owner),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let workspace_id = workspace.id.to_string();
    let fields = [("entity_type", "workspace"), ("entity_id", workspace_id.as_str())];
    let floor_plan = || FilePart {
        file_name: "floor-plan.png",
        content_type: "image/png",
        data: &PNG,
    };

    let response = app
        .post_multipart("/api/uploads", &fields, Some(floor_plan()), &resident)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_multipart("/api/uploads", &fields, Some(floor_plan()), &outsider)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_multipart(
            "/api/uploads",
            &[
                ("entity_type", "workspace"),
                ("entity_id", workspace_id.as_str()),
                ("is_profile_image", "true"),
            ],
            Some(floor_plan()),
            &owner,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_multipart("/api/uploads", &fields, Some(floor_plan()), &owner)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let document: DocumentInfo = json_body(response).await?;
    assert_eq!(document.entity_type, "workspace");
    assert_eq!(document.entity_id, workspace.id);
    assert!(!document.is_profile_image);
    assert!(document
        .url
        .contains(&format!("workspace/{}/floor-plan.png", workspace.id)));

    let listing = format!(
        "/api/uploads?entity_type=workspace&entity_id={}",
        workspace.id
    );
    let response = app.get(&listing, Some(&resident)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let documents: Vec<DocumentInfo> = json_body(response).await?;
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].file_name, "floor-plan.png");

    let response = app.get(&listing, Some(&outsider)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get(
            &format!("/api/uploads?entity_type=invoice&entity_id={}", workspace.id),
            Some(&owner),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
