mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use diesel::prelude::*;
use propdesk::access::{self, AccessDecision, Principal, WorkspaceAction};
use propdesk::schema::workspace_memberships;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct Created {
    id: Uuid,
}

struct Capabilities {
    view: bool,
    mutate: bool,
    delete: bool,
}

async fn capabilities(app: &TestApp, principal: Principal, workspace_id: Uuid) -> Result<Capabilities> {
    app.with_conn(move |conn| {
        Ok(Capabilities {
            view: access::can_view(conn, &principal, workspace_id)?,
            mutate: access::can_mutate(conn, &principal, workspace_id)?,
            delete: access::can_delete_workspace(conn, &principal, workspace_id)?,
        })
    })
    .await
}

fn member(user_id: Uuid) -> Principal {
    Principal {
        user_id,
        is_superuser: false,
    }
}

#[tokio::test]
async fn stored_relations_drive_workspace_capabilities() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let (owner_id, owner) = app.user_with_token("wanda", "owner", false).await?;
    let (admin_id, _) = app.user_with_token("arthur", "resident", false).await?;
    let (resident_id, _) = app.user_with_token("rhea", "resident", false).await?;
    let (outsider_id, _) = app.user_with_token("otto", "resident", false).await?;
    let (root_id, _) = app.user_with_token("root", "admin", true).await?;

    let response = app
        .post_json("/api/workspaces", &json!({ "name": "Linden Yard" }), Some(&owner))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let workspace: Created = json_body(response).await?;

    for (user_id, role) in [(admin_id, "admin"), (resident_id, "resident")] {
        let response = app
            .post_json(
                &format!("/api/workspaces/{}/members", workspace.id),
                &json!({ "user_id": user_id, "role": role }),
                Some(&owner),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let workspace_id = workspace.id;
    let owner_rows: i64 = app
        .with_conn(move |conn| {
            Ok(workspace_memberships::table
                .filter(workspace_memberships::workspace_id.eq(workspace_id))
                .filter(workspace_memberships::user_id.eq(owner_id))
                .count()
                .get_result(conn)?)
        })
        .await?;
    assert_eq!(owner_rows, 0);

    let owner_caps = capabilities(&app, member(owner_id), workspace_id).await?;
    assert!(owner_caps.view && owner_caps.mutate && owner_caps.delete);

    let admin_caps = capabilities(&app, member(admin_id), workspace_id).await?;
    assert!(admin_caps.view && admin_caps.mutate);
    assert!(!admin_caps.delete);

    let resident_caps = capabilities(&app, member(resident_id), workspace_id).await?;
    assert!(resident_caps.view);
    assert!(!resident_caps.mutate && !resident_caps.delete);

    let outsider_caps = capabilities(&app, member(outsider_id), workspace_id).await?;
    assert!(!outsider_caps.view && !outsider_caps.mutate && !outsider_caps.delete);

    let root = Principal {
        user_id: root_id,
        is_superuser: true,
    };
    let root_caps = capabilities(&app, root, workspace_id).await?;
    assert!(root_caps.view && root_caps.mutate && root_caps.delete);

    let missing = capabilities(&app, root, Uuid::new_v4()).await?;
    assert!(!missing.view);

    let decisions = app
        .with_conn(move |conn| {
            Ok((
                access::evaluate(conn, &member(resident_id), workspace_id, WorkspaceAction::Mutate)?,
                access::evaluate(conn, &member(outsider_id), workspace_id, WorkspaceAction::View)?,
            ))
        })
        .await?;
    assert_eq!(decisions, (AccessDecision::Deny, AccessDecision::Hidden));

    app.cleanup().await?;
    Ok(())
}
