use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, ListScope, MembershipRole, WorkspaceAction};
use crate::attachments;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, DomainError};
use crate::models::{NewWorkspace, Workspace, WorkspaceMembership};
use crate::residency;
use crate::routes::to_iso;
use crate::schema::{users, workspace_memberships, workspaces};
use crate::state::AppState;
use crate::utils::json::classify_nullable;

#[derive(Serialize)]
pub struct WorkspaceResponse {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub owner_id: Option<Uuid>,
    pub timezone: String,
    pub is_active: bool,
    pub contact_email: String,
    pub contact_phone: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Workspace> for WorkspaceResponse {
    fn from(workspace: Workspace) -> Self {
        Self {
            id: workspace.id,
            name: workspace.name,
            address: workspace.address,
            owner_id: workspace.owner_id,
            timezone: workspace.timezone,
            is_active: workspace.is_active,
            contact_email: workspace.contact_email,
            contact_phone: workspace.contact_phone,
            created_at: to_iso(workspace.created_at),
            updated_at: to_iso(workspace.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct MembershipResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub role: String,
    pub created_at: String,
}

impl From<WorkspaceMembership> for MembershipResponse {
    fn from(membership: WorkspaceMembership) -> Self {
        Self {
            id: membership.id,
            user_id: membership.user_id,
            workspace_id: membership.workspace_id,
            role: membership.role,
            created_at: to_iso(membership.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

pub async fn list_workspaces(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<WorkspaceResponse>>> {
    let mut conn = state.db()?;

    let visible: Vec<Workspace> = if user.is_superuser {
        workspaces::table
            .order(workspaces::name.asc())
            .load(&mut conn)?
    } else {
        let member_of = workspace_memberships::table
            .filter(workspace_memberships::user_id.eq(user.user_id))
            .select(workspace_memberships::workspace_id);
        workspaces::table
            .filter(
                workspaces::owner_id
                    .eq(user.user_id)
                    .or(workspaces::id.eq_any(member_of)),
            )
            .order(workspaces::name.asc())
            .load(&mut conn)?
    };

    Ok(Json(visible.into_iter().map(Into::into).collect()))
}

pub async fn create_workspace(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> AppResult<(StatusCode, Json<WorkspaceResponse>)> {
    if !(user.is_superuser || user.role == "owner" || user.role == "admin") {
        return Err(AppError::forbidden(
            "only property owners and administrators can create workspaces",
        ));
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.owner_id.is_some_and(|owner| owner != user.user_id) && !user.is_superuser {
        return Err(AppError::forbidden(
            "only superusers can create workspaces on behalf of another user",
        ));
    }

    let mut conn = state.db()?;
    let owner_id = payload.owner_id.unwrap_or(user.user_id);
    users::table
        .find(owner_id)
        .select(users::id)
        .first::<Uuid>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("owner does not exist"))?;

    let workspace: Workspace = diesel::insert_into(workspaces::table)
        .values(&NewWorkspace {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: payload.address.trim().to_string(),
            owner_id: Some(owner_id),
            timezone: payload
                .timezone
                .filter(|tz| !tz.trim().is_empty())
                .unwrap_or_else(|| "UTC".to_string()),
            is_active: true,
            contact_email: payload.contact_email.unwrap_or_default(),
            contact_phone: payload.contact_phone.unwrap_or_default(),
        })
        .get_result(&mut conn)?;

    info!(workspace_id = %workspace.id, owner_id = %owner_id, "workspace created");
    Ok((StatusCode::CREATED, Json(workspace.into())))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Json<WorkspaceResponse>> {
    let mut conn = state.db()?;
    let access = access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::View,
    )?;
    Ok(Json(access.workspace.into()))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = workspaces)]
struct UpdateWorkspaceChangeset {
    name: Option<String>,
    address: Option<String>,
    owner_id: Option<Option<Uuid>>,
    timezone: Option<String>,
    is_active: Option<bool>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
}

pub async fn update_workspace(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<WorkspaceResponse>> {
    let principal = user.principal();
    let mut conn = state.db()?;
    let access = access::authorize(&mut conn, &principal, workspace_id, WorkspaceAction::Mutate)?;

    let text = |field: &str| {
        classify_nullable::<String>(&body, field)
            .and_then(|value| value.required(field))
            .map_err(AppError::bad_request)
    };

    let mut changes = UpdateWorkspaceChangeset {
        name: text("name")?.map(|name| name.trim().to_string()),
        address: text("address")?,
        timezone: text("timezone")?,
        contact_email: text("contact_email")?,
        contact_phone: text("contact_phone")?,
        is_active: classify_nullable::<bool>(&body, "is_active")
            .and_then(|value| value.required("is_active"))
            .map_err(AppError::bad_request)?,
        ..Default::default()
    };
    if changes.name.as_deref() == Some("") {
        return Err(AppError::bad_request("name must not be empty"));
    }

    if let Some(new_owner) = classify_nullable::<Uuid>(&body, "owner_id")
        .and_then(|value| value.required("owner_id"))
        .map_err(AppError::bad_request)?
    {
        if new_owner != access.workspace.owner_id.unwrap_or_default() {
            access
                .require(WorkspaceAction::DeleteWorkspace, "workspace")
                .map_err(|_| AppError::forbidden("only the owner can transfer ownership"))?;
            users::table
                .find(new_owner)
                .select(users::id)
                .first::<Uuid>(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::bad_request("new owner does not exist"))?;
            info!(workspace_id = %workspace_id, owner_id = %new_owner, "workspace ownership transferred");
            changes.owner_id = Some(Some(new_owner));
        }
    }

    let nothing_to_change = changes.name.is_none()
        && changes.address.is_none()
        && changes.owner_id.is_none()
        && changes.timezone.is_none()
        && changes.is_active.is_none()
        && changes.contact_email.is_none()
        && changes.contact_phone.is_none();
    if nothing_to_change {
        return Ok(Json(access.workspace.into()));
    }

    let updated: Workspace = diesel::update(workspaces::table.find(workspace_id))
        .set((&changes, workspaces::updated_at.eq(Utc::now().naive_utc())))
        .get_result(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_workspace(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let dependents = {
        let mut conn = state.db()?;
        access::authorize(
            &mut conn,
            &user.principal(),
            workspace_id,
            WorkspaceAction::DeleteWorkspace,
        )?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let dependents = attachments::workspace_dependents(conn, workspace_id)?;
            diesel::delete(workspaces::table.find(workspace_id)).execute(conn)?;
            Ok(dependents)
        })?
    };

    let detached = attachments::detach_each(&state, &dependents).await?;
    info!(
        workspace_id = %workspace_id,
        deleted_by = %user.user_id,
        detached,
        "workspace deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Json<Vec<MembershipResponse>>> {
    let mut conn = state.db()?;
    let Some(access) = access::scope_for(&mut conn, &user.principal(), workspace_id)? else {
        return Ok(Json(Vec::new()));
    };

    let mut query = workspace_memberships::table
        .filter(workspace_memberships::workspace_id.eq(workspace_id))
        .order(workspace_memberships::created_at.asc())
        .into_boxed();
    if let ListScope::Own(user_id) = access.scope() {
        query = query.filter(workspace_memberships::user_id.eq(user_id));
    }

    let memberships: Vec<WorkspaceMembership> = query.load(&mut conn)?;
    Ok(Json(memberships.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<String>,
}

pub async fn add_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<MembershipResponse>)> {
    let mut conn = state.db()?;
    access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::Mutate,
    )?;

    let role = match payload.role.as_deref() {
        Some(role) => role.parse::<MembershipRole>()?,
        None => MembershipRole::Resident,
    };
    let membership = residency::add_member(&mut conn, workspace_id, payload.user_id, role)?;
    Ok((StatusCode::CREATED, Json(membership.into())))
}

fn load_membership(
    conn: &mut PgConnection,
    workspace_id: Uuid,
    membership_id: Uuid,
) -> AppResult<WorkspaceMembership> {
    workspace_memberships::table
        .filter(workspace_memberships::id.eq(membership_id))
        .filter(workspace_memberships::workspace_id.eq(workspace_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| DomainError::NotFound("membership").into())
}

pub async fn get_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, membership_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<MembershipResponse>> {
    let mut conn = state.db()?;
    let access = access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::View,
    )?;
    let membership = load_membership(&mut conn, workspace_id, membership_id)?;
    if !access.scope().includes(Some(membership.user_id)) {
        return Err(DomainError::NotFound("membership").into());
    }
    Ok(Json(membership.into()))
}

#[derive(Deserialize)]
pub struct UpdateMemberRequest {
    pub role: String,
}

pub async fn update_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, membership_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateMemberRequest>,
) -> AppResult<Json<MembershipResponse>> {
    let mut conn = state.db()?;
    let access = access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::View,
    )?;
    let membership = load_membership(&mut conn, workspace_id, membership_id)?;
    access.require(WorkspaceAction::Mutate, "membership")?;

    let role: MembershipRole = payload.role.parse()?;
    let updated = residency::change_member_role(&mut conn, &membership, role)?;
    info!(membership_id = %membership_id, role = role.as_str(), "membership role changed");
    Ok(Json(updated.into()))
}

/// Owners and admins remove anyone; members may leave on their own.
pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, membership_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let access = access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::View,
    )?;
    let membership = load_membership(&mut conn, workspace_id, membership_id)?;
    if !access.can_modify_authored(Some(membership.user_id)) {
        return Err(AppError::forbidden(
            "you do not have permission to remove this member",
        ));
    }

    diesel::delete(workspace_memberships::table.find(membership.id)).execute(&mut conn)?;
    info!(workspace_id = %workspace_id, user_id = %membership.user_id, "member removed");
    Ok(StatusCode::NO_CONTENT)
}
