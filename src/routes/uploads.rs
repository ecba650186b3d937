use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::attachments::{self, EntityAccess, EntityRef, EntityType};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::routes::{form::MultipartForm, to_iso};
use crate::state::AppState;

#[derive(Serialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub url: String,
}

pub(crate) async fn attachment_responses(
    state: &AppState,
    documents: Vec<Document>,
) -> AppResult<Vec<AttachmentResponse>> {
    let mut responses = Vec::with_capacity(documents.len());
    for document in documents {
        let url = attachments::presign(state, &document).await?;
        responses.push(AttachmentResponse {
            id: document.id,
            file_name: document.file_name,
            content_type: document.content_type,
            url,
        });
    }
    Ok(responses)
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub is_profile_image: bool,
    pub uploaded_at: String,
    pub url: String,
}

async fn document_response(state: &AppState, document: Document) -> AppResult<DocumentResponse> {
    let url = attachments::presign(state, &document).await?;
    Ok(DocumentResponse {
        id: document.id,
        entity_type: document.entity_type,
        entity_id: document.entity_id,
        file_name: document.file_name,
        content_type: document.content_type,
        uploaded_by: document.uploaded_by,
        is_profile_image: document.is_profile_image,
        uploaded_at: to_iso(document.uploaded_at),
        url,
    })
}

#[derive(Deserialize)]
pub struct UploadQuery {
    pub entity_type: String,
    pub entity_id: Uuid,
}

pub async fn list_uploads(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<UploadQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let entity_type: EntityType = query.entity_type.parse()?;
    let entity = EntityRef::new(entity_type, query.entity_id);

    let documents = {
        let mut conn = state.db()?;
        attachments::authorize_entity(&mut conn, &user.principal(), entity, EntityAccess::Read)?;
        attachments::documents_for(&mut conn, entity)?
    };

    let mut response = Vec::with_capacity(documents.len());
    for document in documents {
        response.push(document_response(&state, document).await?);
    }
    Ok(Json(response))
}

/// Multipart fields: `file`, `entity_type`, `entity_id` and an optional
/// `is_profile_image` flag.
pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let form = MultipartForm::read(multipart, state.config.max_upload_bytes).await?;
    let entity_type: EntityType = form
        .text("entity_type")
        .ok_or_else(|| AppError::bad_request("entity_type is required"))?
        .parse()?;
    let entity_id = form
        .uuid("entity_id")?
        .ok_or_else(|| AppError::bad_request("entity_id is required"))?;
    let is_profile = form.flag("is_profile_image");
    let entity = EntityRef::new(entity_type, entity_id);

    {
        let mut conn = state.db()?;
        attachments::authorize_entity(&mut conn, &user.principal(), entity, EntityAccess::Write)?;
    }

    let upload = form
        .file
        .ok_or_else(|| AppError::bad_request("file field is required"))?;
    let document = attachments::associate(&state, upload, entity, user.user_id, is_profile).await?;

    info!(document_id = %document.id, uploaded_by = %user.user_id, "upload stored");
    Ok((StatusCode::CREATED, Json(document_response(&state, document).await?)))
}
