use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, ListScope, WorkspaceAccess, WorkspaceAction};
use crate::attachments::{self, EntityRef, EntityType};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, DomainError};
use crate::models::{Complaint, ComplaintMessage, NewComplaint};
use crate::routes::uploads::{attachment_responses, AttachmentResponse};
use crate::routes::{form::MultipartForm, to_iso};
use crate::schema::{complaint_messages, complaints};
use crate::state::AppState;
use crate::utils::json::classify_nullable;
use crate::workflow::{
    self, AttachmentRequest, ComplaintCategory, ComplaintMessageDraft, ComplaintStatus,
    MessageType,
};

#[derive(Serialize)]
pub struct ComplaintResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub title: String,
    pub category: String,
    pub description: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Complaint> for ComplaintResponse {
    fn from(complaint: Complaint) -> Self {
        Self {
            id: complaint.id,
            workspace_id: complaint.workspace_id,
            user_id: complaint.user_id,
            unit_id: complaint.unit_id,
            title: complaint.title,
            category: complaint.category,
            description: complaint.description,
            status: complaint.status,
            created_at: to_iso(complaint.created_at),
            updated_at: to_iso(complaint.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct ComplaintMessageResponse {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub created_at: String,
    pub attachments: Vec<AttachmentResponse>,
}

async fn message_response(
    state: &AppState,
    message: ComplaintMessage,
) -> AppResult<ComplaintMessageResponse> {
    let documents = {
        let mut conn = state.db()?;
        attachments::documents_for(
            &mut conn,
            EntityRef::new(EntityType::ComplaintMessage, message.id),
        )?
    };

    Ok(ComplaintMessageResponse {
        id: message.id,
        complaint_id: message.complaint_id,
        sender_id: message.sender_id,
        content: message.content,
        message_type: message.message_type,
        reply_to_id: message.reply_to_id,
        is_edited: message.is_edited,
        edited_at: message.edited_at.map(to_iso),
        created_at: to_iso(message.created_at),
        attachments: attachment_responses(state, documents).await?,
    })
}

#[derive(Deserialize)]
pub struct ComplaintListQuery {
    pub status: Option<String>,
}

pub async fn list_complaints(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<ComplaintListQuery>,
) -> AppResult<Json<Vec<ComplaintResponse>>> {
    let mut conn = state.db()?;
    let Some(access) = access::scope_for(&mut conn, &user.principal(), workspace_id)? else {
        return Ok(Json(Vec::new()));
    };

    let mut listing = complaints::table
        .filter(complaints::workspace_id.eq(workspace_id))
        .order(complaints::created_at.desc())
        .into_boxed();
    if let ListScope::Own(user_id) = access.scope() {
        listing = listing.filter(complaints::user_id.eq(user_id));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let status: ComplaintStatus = status.parse()?;
        listing = listing.filter(complaints::status.eq(status.as_str()));
    }

    let found: Vec<Complaint> = listing.load(&mut conn)?;
    Ok(Json(found.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
pub struct CreateComplaintRequest {
    pub title: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub unit_id: Option<Uuid>,
}

pub async fn create_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<CreateComplaintRequest>,
) -> AppResult<(StatusCode, Json<ComplaintResponse>)> {
    let mut conn = state.db()?;
    let access = access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::View,
    )?;
    workflow::ensure_complaint_sender(&access)?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let category: ComplaintCategory = payload.category.parse()?;
    workflow::validate_complaint_unit(&mut conn, workspace_id, payload.unit_id)?;

    let complaint: Complaint = diesel::insert_into(complaints::table)
        .values(&NewComplaint {
            id: Uuid::new_v4(),
            workspace_id,
            user_id: user.user_id,
            unit_id: payload.unit_id,
            title: title.to_string(),
            category: category.as_str().to_string(),
            description: payload.description,
            status: ComplaintStatus::Open.as_str().to_string(),
        })
        .get_result(&mut conn)?;

    info!(complaint_id = %complaint.id, workspace_id = %workspace_id, filed_by = %user.user_id, "complaint filed");
    Ok((StatusCode::CREATED, Json(complaint.into())))
}

pub async fn get_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ComplaintResponse>> {
    let mut conn = state.db()?;
    let (_, complaint) =
        access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
    Ok(Json(complaint.into()))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = complaints)]
struct ComplaintChangeset {
    title: Option<String>,
    category: Option<String>,
    description: Option<String>,
    unit_id: Option<Option<Uuid>>,
    status: Option<String>,
}

#[derive(Default)]
struct ComplaintUpdate {
    title: Option<String>,
    category: Option<ComplaintCategory>,
    description: Option<String>,
    unit_id: Option<Option<Uuid>>,
    status: Option<ComplaintStatus>,
}

/// The filer edits what they wrote; only owners and admins move the status.
fn apply_complaint_update(
    conn: &mut PgConnection,
    access: &WorkspaceAccess,
    complaint: Complaint,
    update: ComplaintUpdate,
) -> AppResult<Complaint> {
    let touches_content = update.title.is_some()
        || update.category.is_some()
        || update.description.is_some()
        || update.unit_id.is_some();
    if touches_content && !access.can_modify_authored(Some(complaint.user_id)) {
        return Err(AppError::forbidden(
            "you do not have permission to modify this complaint",
        ));
    }

    let current: ComplaintStatus = complaint.status.parse()?;
    let status = update.status.filter(|next| *next != current);
    if let Some(next) = status {
        access.require(WorkspaceAction::Mutate, "complaint")?;
        if !current.can_advance_to(next) {
            return Err(AppError::bad_request(format!(
                "cannot move a complaint from {current} back to {next}"
            )));
        }
    }

    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
    }
    if let Some(unit_id) = update.unit_id {
        workflow::validate_complaint_unit(conn, complaint.workspace_id, unit_id)?;
    }

    let changes = ComplaintChangeset {
        title: update.title.map(|title| title.trim().to_string()),
        category: update.category.map(|category| category.as_str().to_string()),
        description: update.description,
        unit_id: update.unit_id,
        status: status.map(|status| status.as_str().to_string()),
    };
    if !touches_content && changes.status.is_none() {
        return Ok(complaint);
    }

    let updated: Complaint = diesel::update(complaints::table.find(complaint.id))
        .set((&changes, complaints::updated_at.eq(Utc::now().naive_utc())))
        .get_result(conn)?;
    if let Some(status) = status {
        info!(complaint_id = %updated.id, status = status.as_str(), "complaint status changed");
    }
    Ok(updated)
}

#[derive(Deserialize)]
pub struct ReplaceComplaintRequest {
    pub title: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub unit_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn replace_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ReplaceComplaintRequest>,
) -> AppResult<Json<ComplaintResponse>> {
    let mut conn = state.db()?;
    let (access, complaint) =
        access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;

    let update = ComplaintUpdate {
        title: Some(payload.title),
        category: Some(payload.category.parse()?),
        description: Some(payload.description),
        unit_id: Some(payload.unit_id),
        status: payload
            .status
            .as_deref()
            .map(str::parse::<ComplaintStatus>)
            .transpose()?,
    };
    let updated = apply_complaint_update(&mut conn, &access, complaint, update)?;
    Ok(Json(updated.into()))
}

pub async fn update_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<Value>,
) -> AppResult<Json<ComplaintResponse>> {
    let mut conn = state.db()?;
    let (access, complaint) =
        access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;

    let text = |field: &str| {
        classify_nullable::<String>(&body, field)
            .and_then(|value| value.required(field))
            .map_err(AppError::bad_request)
    };

    let update = ComplaintUpdate {
        title: text("title")?,
        category: text("category")?
            .as_deref()
            .map(str::parse::<ComplaintCategory>)
            .transpose()?,
        description: text("description")?,
        unit_id: classify_nullable(&body, "unit_id")
            .map_err(AppError::bad_request)?
            .into_change(),
        status: text("status")?
            .as_deref()
            .map(str::parse::<ComplaintStatus>)
            .transpose()?,
    };
    let updated = apply_complaint_update(&mut conn, &access, complaint, update)?;
    Ok(Json(updated.into()))
}

pub async fn delete_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let dependents = {
        let mut conn = state.db()?;
        let (access, complaint) =
            access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
        access.require(WorkspaceAction::Mutate, "complaint")?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let dependents = attachments::complaint_dependents(conn, complaint.id)?;
            diesel::delete(complaints::table.find(complaint.id)).execute(conn)?;
            Ok(dependents)
        })?
    };

    attachments::detach_each(&state, &dependents).await?;

    info!(complaint_id = %complaint_id, deleted_by = %user.user_id, "complaint deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resolve_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ComplaintResponse>> {
    let mut conn = state.db()?;
    let (access, complaint) =
        access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
    access.require(WorkspaceAction::Mutate, "complaint")?;

    let resolved = workflow::resolve_complaint(&mut conn, complaint.id)?;
    Ok(Json(resolved.into()))
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<ComplaintMessageResponse>>> {
    let messages: Vec<ComplaintMessage> = {
        let mut conn = state.db()?;
        let (_, complaint) =
            access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
        complaint_messages::table
            .filter(complaint_messages::complaint_id.eq(complaint.id))
            .order((
                complaint_messages::created_at.asc(),
                complaint_messages::id.asc(),
            ))
            .load(&mut conn)?
    };

    let mut response = Vec::with_capacity(messages.len());
    for message in messages {
        response.push(message_response(&state, message).await?);
    }
    Ok(Json(response))
}

/// Multipart fields: `content`, `message_type`, `reply_to_id`, and for image
/// or file messages `file` plus `entity_type`.
pub async fn create_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id)): Path<(Uuid, Uuid)>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ComplaintMessageResponse>)> {
    let form = MultipartForm::read(multipart, state.config.max_upload_bytes).await?;
    let message_type: MessageType = form.text("message_type").unwrap_or("text").parse()?;
    let reply_to_id = form.uuid("reply_to_id")?;
    let content = form.raw("content").unwrap_or_default().to_string();
    let entity_tag = form.text("entity_type").map(str::to_string);

    let draft = ComplaintMessageDraft {
        id: Uuid::new_v4(),
        content,
        message_type,
        reply_to_id,
    };

    let complaint = {
        let mut conn = state.db()?;
        let (access, complaint) =
            access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
        workflow::ensure_complaint_sender(&access)?;
        workflow::validate_content(draft.message_type, &draft.content)?;
        workflow::ensure_complaint_reply_target(&mut conn, complaint.id, draft.reply_to_id)?;
        complaint
    };

    let attachment = AttachmentRequest {
        file: form.file,
        entity_tag,
    }
    .validate(message_type)?;

    let prepared = match attachment {
        Some((upload, entity_type)) => {
            let entity = match entity_type {
                EntityType::ComplaintMessage => {
                    EntityRef::new(EntityType::ComplaintMessage, draft.id)
                }
                EntityType::Complaint => EntityRef::new(EntityType::Complaint, complaint.id),
                other => {
                    return Err(AppError::bad_request(format!(
                        "complaint message attachments cannot target {}",
                        other.as_str()
                    )));
                }
            };
            let prepared = attachments::prepare(&upload, entity, user.user_id, false)?;
            attachments::store(&state, &prepared, upload.bytes).await?;
            Some(prepared)
        }
        None => None,
    };

    let outcome = {
        let mut conn = state.db()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            let message = workflow::insert_complaint_message(conn, &complaint, user.user_id, draft)?;
            if let Some(prepared) = &prepared {
                attachments::record(conn, prepared)?;
            }
            Ok(message)
        })
    };

    let message = match outcome {
        Ok(message) => message,
        Err(err) => {
            if let Some(prepared) = &prepared {
                attachments::discard(&state, prepared).await?;
            }
            return Err(err.into());
        }
    };

    info!(
        message_id = %message.id,
        complaint_id = %complaint.id,
        message_type = message_type.as_str(),
        "complaint message posted"
    );
    Ok((StatusCode::CREATED, Json(message_response(&state, message).await?)))
}

fn load_message(
    conn: &mut PgConnection,
    complaint_id: Uuid,
    message_id: Uuid,
) -> AppResult<ComplaintMessage> {
    complaint_messages::table
        .filter(complaint_messages::id.eq(message_id))
        .filter(complaint_messages::complaint_id.eq(complaint_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| DomainError::NotFound("complaint message").into())
}

pub async fn get_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<Json<ComplaintMessageResponse>> {
    let message = {
        let mut conn = state.db()?;
        let (_, complaint) =
            access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
        load_message(&mut conn, complaint.id, message_id)?
    };
    Ok(Json(message_response(&state, message).await?))
}

#[derive(Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

pub async fn update_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<UpdateMessageRequest>,
) -> AppResult<Json<ComplaintMessageResponse>> {
    let updated = {
        let mut conn = state.db()?;
        let (access, complaint) =
            access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
        let message = load_message(&mut conn, complaint.id, message_id)?;
        if !access.can_modify_authored(message.sender_id) {
            return Err(AppError::forbidden(
                "you do not have permission to update this message",
            ));
        }
        workflow::update_complaint_message(&mut conn, &message, &payload.content)?
    };
    Ok(Json(message_response(&state, updated).await?))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, complaint_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    {
        let mut conn = state.db()?;
        let (access, complaint) =
            access::authorize_complaint(&mut conn, &user.principal(), workspace_id, complaint_id)?;
        let message = load_message(&mut conn, complaint.id, message_id)?;
        if !access.can_modify_authored(message.sender_id) {
            return Err(AppError::forbidden(
                "you do not have permission to delete this message",
            ));
        }
        diesel::delete(complaint_messages::table.find(message.id)).execute(&mut conn)?;
    }

    attachments::detach_all(
        &state,
        EntityRef::new(EntityType::ComplaintMessage, message_id),
    )
    .await?;
    info!(message_id = %message_id, complaint_id = %complaint_id, "complaint message deleted");
    Ok(StatusCode::NO_CONTENT)
}
