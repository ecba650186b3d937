mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, FilePart, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Deserialize)]
struct UserInfo {
    id: Uuid,
    display_name: String,
    role: String,
}

#[derive(Deserialize)]
struct Created {
    id: Uuid,
}

#[derive(Deserialize)]
struct MessageInfo {
    id: Uuid,
}

#[tokio::test]
async fn bulk_update_is_all_or_nothing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, root) = app.user_with_token("root", "admin", true).await?;
    let (hana_id, hana) = app.user_with_token("hana", "resident", false).await?;
    let (ivan_id, _) = app.user_with_token("ivan", "resident", false).await?;

    let response = app
        .patch_json(
            "/api/users",
            &json!([{ "id": ivan_id, "display_name": "Ivan" }]),
            Some(&hana),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .patch_json(
            "/api/users",
            &json!([
                { "id": hana_id, "display_name": "Hana K." },
                { "id": Uuid::new_v4(), "display_name": "Nobody" }
            ]),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get(&format!("/api/users/{hana_id}"), Some(&root)).await?;
    let untouched: UserInfo = json_body(response).await?;
    assert_eq!(untouched.display_name, "hana");

    let response = app
        .patch_json(
            "/api/users",
            &json!([{ "display_name": "No id" }]),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(
            "/api/users",
            &json!([
                { "id": hana_id, "display_name": "Hana K." },
                { "id": ivan_id, "role": "owner" }
            ]),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Vec<UserInfo> = json_body(response).await?;
    assert_eq!(updated.len(), 2);
    assert_eq!(updated[0].id, hana_id);
    assert_eq!(updated[0].display_name, "Hana K.");
    assert_eq!(updated[1].id, ivan_id);
    assert_eq!(updated[1].role, "owner");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bulk_delete_requires_every_id_and_detaches_files() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, root) = app.user_with_token("root", "admin", true).await?;
    let (alice_id, alice) = app.user_with_token("alice", "resident", false).await?;
    let (bob_id, bob) = app.user_with_token("bob", "resident", false).await?;
    let (carl_id, _) = app.user_with_token("carl", "resident", false).await?;

    for token in [&alice, &bob] {
        let response = app
            .post_multipart(
                "/api/users/me/profile-image",
                &[],
                Some(FilePart {
                    file_name: "me.png",
                    content_type: "image/png",
                    data: &PNG,
                }),
                token,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .post_json(
            "/api/conversations/messages",
            &json!({ "recipient_id": bob_id, "content": "Here is the parking map" }),
            Some(&alice),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let message: MessageInfo = json_body(response).await?;
    let message_id = message.id.to_string();
    let response = app
        .post_multipart(
            "/api/uploads",
            &[("entity_type", "chat_message"), ("entity_id", message_id.as_str())],
            Some(FilePart {
                file_name: "parking.png",
                content_type: "image/png",
                data: &PNG,
            }),
            &alice,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.document_count().await?, 3);

    let response = app
        .delete_json("/api/users", &json!({ "ids": [bob_id] }), Some(&alice))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete_json(
            "/api/users",
            &json!({ "ids": [bob_id, Uuid::new_v4()] }),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app.get(&format!("/api/users/{bob_id}"), Some(&root)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .delete_json("/api/users", &json!({ "ids": [bob_id, carl_id] }), Some(&root))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    for user_id in [bob_id, carl_id] {
        let response = app.get(&format!("/api/users/{user_id}"), Some(&root)).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // Only alice's profile image is left: bob's profile and the message in
    // their shared conversation went with him.
    assert_eq!(app.document_count().await?, 1);
    assert_eq!(app.storage().object_count().await, 1);
    let alice_key = format!("profiles/{alice_id}_profile.png");
    assert!(app.storage().get(&alice_key).await.is_some());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_removes_files_of_their_complaints() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (_, root) = app.user_with_token("root", "admin", true).await?;
    let (_, owner) = app.user_with_token("opal", "owner", false).await?;
    let (tenant_id, tenant) = app.user_with_token("theo", "resident", false).await?;

    let response = app
        .post_json("/api/workspaces", &json!({ "name": "Poplar Lofts" }), Some(&owner))
        .await?;
    let workspace: Created = json_body(response).await?;
    let response = app
        .post_json(
            &format!("/api/workspaces/{}/members", workspace.id),
            &json!({ "user_id": tenant_id }),
            Some(&owner),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            &format!("/api/workspaces/{}/complaints", workspace.id),
            &json!({ "title": "Broken heater", "category": "maintenance", "description": "Cold" }),
            Some(&tenant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let complaint: Created = json_body(response).await?;

    let response = app
        .post_multipart(
            &format!(
                "/api/workspaces/{}/complaints/{}/messages",
                workspace.id, complaint.id
            ),
            &[("message_type", "image"), ("entity_type", "complaint_message")],
            Some(FilePart {
                file_name: "heater.png",
                content_type: "image/png",
                data: &PNG,
            }),
            &tenant,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.document_count().await?, 1);

    let response = app
        .delete(&format!("/api/users/{tenant_id}"), Some(&root))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(app.document_count().await?, 0);
    assert_eq!(app.storage().object_count().await, 0);

    app.cleanup().await?;
    Ok(())
}
