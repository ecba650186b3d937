//! Files attached to users, workspaces, complaints and messages.
//!
//! A [`Document`] row records which entity a blob belongs to. The blob is
//! written first; the row is only inserted once storage accepted the bytes.

use std::str::FromStr;

use diesel::{prelude::*, PgConnection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{self, Principal, WorkspaceAction};
use crate::conversations;
use crate::error::{DomainError, DomainResult};
use crate::models::{ChatMessage, Complaint, ComplaintMessage, Conversation, Document, NewDocument};
use crate::schema::{chat_messages, complaint_messages, complaints, conversations as conversations_table, documents, users};
use crate::state::AppState;

pub const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/gif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    User,
    Workspace,
    Complaint,
    ComplaintMessage,
    ChatMessage,
}

const ENTITY_TYPES: [(&str, EntityType); 5] = [
    ("user", EntityType::User),
    ("workspace", EntityType::Workspace),
    ("complaint", EntityType::Complaint),
    ("complaint_message", EntityType::ComplaintMessage),
    ("chat_message", EntityType::ChatMessage),
];

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Workspace => "workspace",
            EntityType::Complaint => "complaint",
            EntityType::ComplaintMessage => "complaint_message",
            EntityType::ChatMessage => "chat_message",
        }
    }
}

impl FromStr for EntityType {
    type Err = DomainError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let normalized = tag.trim().to_ascii_lowercase();
        ENTITY_TYPES
            .iter()
            .find(|(known, _)| *known == normalized || known.replace('_', "") == normalized)
            .map(|(_, entity_type)| *entity_type)
            .ok_or_else(|| DomainError::validation(format!("unknown entity type: {tag}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: Uuid) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

/// A file received from a multipart body.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Everything needed to store an upload and record it, computed before any
/// side effect happens.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub document_id: Uuid,
    pub entity: EntityRef,
    pub s3_key: String,
    pub file_name: String,
    pub content_type: &'static str,
    pub uploaded_by: Uuid,
    pub is_profile_image: bool,
}

pub fn validate_mime(content_type: Option<&str>) -> DomainResult<&'static str> {
    let essence = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    ALLOWED_IMAGE_TYPES
        .iter()
        .find(|allowed| **allowed == essence)
        .copied()
        .ok_or_else(|| {
            DomainError::validation("unsupported file type; only JPEG, PNG and GIF are allowed")
        })
}

/// Keeps the last path segment of a client-supplied file name.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        "upload".to_string()
    } else {
        last.to_string()
    }
}

fn file_extension(file_name: &str, content_type: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => mime_guess::get_mime_extensions_str(content_type)
            .and_then(|extensions| extensions.first())
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "bin".to_string()),
    }
}

pub fn storage_key(entity: EntityRef, file_name: &str, content_type: &str, is_profile: bool) -> String {
    let file_name = sanitize_file_name(file_name);
    if is_profile {
        format!(
            "profiles/{}_profile.{}",
            entity.entity_id,
            file_extension(&file_name, content_type)
        )
    } else {
        format!(
            "{}/{}/{}",
            entity.entity_type.as_str(),
            entity.entity_id,
            file_name
        )
    }
}

pub fn prepare(
    upload: &Upload,
    entity: EntityRef,
    uploaded_by: Uuid,
    is_profile: bool,
) -> DomainResult<PreparedUpload> {
    if is_profile && entity.entity_type != EntityType::User {
        return Err(DomainError::validation(
            "profile images can only be attached to users",
        ));
    }
    if upload.bytes.is_empty() {
        return Err(DomainError::validation("uploaded file is empty"));
    }
    let content_type = validate_mime(upload.content_type.as_deref())?;

    Ok(PreparedUpload {
        document_id: Uuid::new_v4(),
        entity,
        s3_key: storage_key(entity, &upload.file_name, content_type, is_profile),
        file_name: sanitize_file_name(&upload.file_name),
        content_type,
        uploaded_by,
        is_profile_image: is_profile,
    })
}

pub async fn store(state: &AppState, prepared: &PreparedUpload, bytes: Vec<u8>) -> DomainResult<()> {
    state
        .storage
        .put_object(&prepared.s3_key, bytes, Some(prepared.content_type))
        .await
        .map_err(|err| {
            warn!(key = %prepared.s3_key, error = %err, "attachment upload failed");
            DomainError::Storage(err)
        })
}

pub fn record(conn: &mut PgConnection, prepared: &PreparedUpload) -> DomainResult<Document> {
    let new_document = NewDocument {
        id: prepared.document_id,
        entity_type: prepared.entity.entity_type.as_str().to_string(),
        entity_id: prepared.entity.entity_id,
        s3_key: prepared.s3_key.clone(),
        file_name: prepared.file_name.clone(),
        content_type: Some(prepared.content_type.to_string()),
        uploaded_by: Some(prepared.uploaded_by),
        is_profile_image: prepared.is_profile_image,
    };

    Ok(diesel::insert_into(documents::table)
        .values(&new_document)
        .get_result(conn)?)
}

/// Drops the blob of an upload whose row never made it into `documents`.
/// Keys are reused per entity and file name, so the blob stays when another
/// row still points at it.
pub async fn discard(state: &AppState, prepared: &PreparedUpload) -> DomainResult<bool> {
    let referenced: bool = {
        let mut conn = state.pool.get()?;
        diesel::select(diesel::dsl::exists(
            documents::table.filter(documents::s3_key.eq(&prepared.s3_key)),
        ))
        .get_result(&mut conn)?
    };
    if referenced {
        return Ok(false);
    }

    if let Err(err) = state.storage.delete_object(&prepared.s3_key).await {
        warn!(key = %prepared.s3_key, error = %err, "failed to remove orphaned attachment");
        return Ok(false);
    }
    Ok(true)
}

/// Validates, stores and records an upload in one go.
pub async fn associate(
    state: &AppState,
    upload: Upload,
    entity: EntityRef,
    uploaded_by: Uuid,
    is_profile: bool,
) -> DomainResult<Document> {
    let prepared = prepare(&upload, entity, uploaded_by, is_profile)?;
    store(state, &prepared, upload.bytes).await?;

    let recorded = state
        .pool
        .get()
        .map_err(DomainError::from)
        .and_then(|mut conn| record(&mut conn, &prepared));
    let document = match recorded {
        Ok(document) => document,
        Err(err) => {
            discard(state, &prepared).await?;
            return Err(err);
        }
    };
    info!(
        document_id = %document.id,
        entity_type = %document.entity_type,
        entity_id = %document.entity_id,
        is_profile_image = document.is_profile_image,
        "attachment recorded"
    );
    Ok(document)
}

pub fn documents_for(conn: &mut PgConnection, entity: EntityRef) -> DomainResult<Vec<Document>> {
    Ok(documents::table
        .filter(documents::entity_type.eq(entity.entity_type.as_str()))
        .filter(documents::entity_id.eq(entity.entity_id))
        .order(documents::uploaded_at.asc())
        .load(conn)?)
}

pub fn latest_profile_document(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> DomainResult<Option<Document>> {
    Ok(documents::table
        .filter(documents::entity_type.eq(EntityType::User.as_str()))
        .filter(documents::entity_id.eq(user_id))
        .filter(documents::is_profile_image.eq(true))
        .order((documents::uploaded_at.desc(), documents::id.desc()))
        .first(conn)
        .optional()?)
}

pub async fn presign(state: &AppState, document: &Document) -> DomainResult<String> {
    state
        .storage
        .presign_get_object(&document.s3_key, state.presign_ttl())
        .await
        .map_err(DomainError::Storage)
}

pub async fn current_profile_image(state: &AppState, user_id: Uuid) -> DomainResult<Option<String>> {
    let document = {
        let mut conn = state.pool.get()?;
        latest_profile_document(&mut conn, user_id)?
    };
    match document {
        Some(document) => Ok(Some(presign(state, &document).await?)),
        None => Ok(None),
    }
}

pub async fn attachment_urls(state: &AppState, entity: EntityRef) -> DomainResult<Vec<String>> {
    let attached = {
        let mut conn = state.pool.get()?;
        documents_for(&mut conn, entity)?
    };
    let mut urls = Vec::with_capacity(attached.len());
    for document in &attached {
        urls.push(presign(state, document).await?);
    }
    Ok(urls)
}

/// Removes every Document attached to `entity`. Blob deletion is best effort:
/// a failure is logged and the row is removed regardless.
pub async fn detach_all(state: &AppState, entity: EntityRef) -> DomainResult<usize> {
    let removed: Vec<Document> = {
        let mut conn = state.pool.get()?;
        diesel::delete(
            documents::table
                .filter(documents::entity_type.eq(entity.entity_type.as_str()))
                .filter(documents::entity_id.eq(entity.entity_id)),
        )
        .get_results(&mut conn)?
    };

    for document in &removed {
        if let Err(err) = state.storage.delete_object(&document.s3_key).await {
            warn!(key = %document.s3_key, error = %err, "failed to delete attachment blob");
        }
    }
    Ok(removed.len())
}

pub async fn detach_each(state: &AppState, entities: &[EntityRef]) -> DomainResult<usize> {
    let mut removed = 0;
    for entity in entities {
        removed += detach_all(state, *entity).await?;
    }
    Ok(removed)
}

// Documents carry no foreign key, so the owners that an SQL cascade takes
// with it are collected before the delete and detached afterwards.

fn complaint_owners(conn: &mut PgConnection, complaint_ids: Vec<Uuid>) -> DomainResult<Vec<EntityRef>> {
    let message_ids: Vec<Uuid> = complaint_messages::table
        .filter(complaint_messages::complaint_id.eq_any(complaint_ids.clone()))
        .select(complaint_messages::id)
        .load(conn)?;
    Ok(complaint_ids
        .into_iter()
        .map(|id| EntityRef::new(EntityType::Complaint, id))
        .chain(
            message_ids
                .into_iter()
                .map(|id| EntityRef::new(EntityType::ComplaintMessage, id)),
        )
        .collect())
}

pub fn complaint_dependents(conn: &mut PgConnection, complaint_id: Uuid) -> DomainResult<Vec<EntityRef>> {
    complaint_owners(conn, vec![complaint_id])
}

pub fn conversation_dependents(
    conn: &mut PgConnection,
    conversation_id: Uuid,
) -> DomainResult<Vec<EntityRef>> {
    let message_ids: Vec<Uuid> = chat_messages::table
        .filter(chat_messages::conversation_id.eq(conversation_id))
        .select(chat_messages::id)
        .load(conn)?;
    Ok(message_ids
        .into_iter()
        .map(|id| EntityRef::new(EntityType::ChatMessage, id))
        .collect())
}

/// The workspace itself, its complaints and their messages.
pub fn workspace_dependents(conn: &mut PgConnection, workspace_id: Uuid) -> DomainResult<Vec<EntityRef>> {
    let complaint_ids: Vec<Uuid> = complaints::table
        .filter(complaints::workspace_id.eq(workspace_id))
        .select(complaints::id)
        .load(conn)?;
    let mut owners = vec![EntityRef::new(EntityType::Workspace, workspace_id)];
    owners.extend(complaint_owners(conn, complaint_ids)?);
    Ok(owners)
}

/// The user, the complaints they filed with their messages, and every message
/// in their conversations. Messages they sent elsewhere survive with a null
/// sender.
pub fn user_dependents(conn: &mut PgConnection, user_id: Uuid) -> DomainResult<Vec<EntityRef>> {
    let complaint_ids: Vec<Uuid> = complaints::table
        .filter(complaints::user_id.eq(user_id))
        .select(complaints::id)
        .load(conn)?;
    let conversation_ids: Vec<Uuid> = conversations_table::table
        .filter(
            conversations_table::user1_id
                .eq(user_id)
                .or(conversations_table::user2_id.eq(user_id)),
        )
        .select(conversations_table::id)
        .load(conn)?;
    let chat_message_ids: Vec<Uuid> = chat_messages::table
        .filter(chat_messages::conversation_id.eq_any(conversation_ids))
        .select(chat_messages::id)
        .load(conn)?;

    let mut owners = vec![EntityRef::new(EntityType::User, user_id)];
    owners.extend(complaint_owners(conn, complaint_ids)?);
    owners.extend(
        chat_message_ids
            .into_iter()
            .map(|id| EntityRef::new(EntityType::ChatMessage, id)),
    );
    Ok(owners)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAccess {
    Read,
    Write,
}

/// Decides whether `principal` may read or attach files to `entity`, resolving
/// the owning workspace or conversation first. Entities the principal cannot
/// see are reported as missing.
pub fn authorize_entity(
    conn: &mut PgConnection,
    principal: &Principal,
    entity: EntityRef,
    intent: EntityAccess,
) -> DomainResult<()> {
    match entity.entity_type {
        EntityType::User => {
            let exists: bool = diesel::select(diesel::dsl::exists(
                users::table.filter(users::id.eq(entity.entity_id)),
            ))
            .get_result(conn)?;
            if !exists {
                return Err(DomainError::NotFound("user"));
            }
            if intent == EntityAccess::Write
                && !principal.is_superuser
                && principal.user_id != entity.entity_id
            {
                return Err(DomainError::forbidden(
                    "you can only attach files to your own profile",
                ));
            }
            Ok(())
        }
        EntityType::Workspace => {
            let action = match intent {
                EntityAccess::Read => WorkspaceAction::View,
                EntityAccess::Write => WorkspaceAction::Mutate,
            };
            access::authorize(conn, principal, entity.entity_id, action).map(|_| ())
        }
        EntityType::Complaint => {
            let complaint: Complaint = complaints::table
                .find(entity.entity_id)
                .first(conn)
                .optional()?
                .ok_or(DomainError::NotFound("complaint"))?;
            authorize_complaint_author(conn, principal, &complaint, Some(complaint.user_id), intent)
        }
        EntityType::ComplaintMessage => {
            let message: ComplaintMessage = complaint_messages::table
                .find(entity.entity_id)
                .first(conn)
                .optional()?
                .ok_or(DomainError::NotFound("complaint message"))?;
            let complaint: Complaint = complaints::table.find(message.complaint_id).first(conn)?;
            authorize_complaint_author(conn, principal, &complaint, message.sender_id, intent)
        }
        EntityType::ChatMessage => {
            let message: ChatMessage = chat_messages::table
                .find(entity.entity_id)
                .first(conn)
                .optional()?
                .ok_or(DomainError::NotFound("chat message"))?;
            let conversation: Conversation = conversations_table::table
                .find(message.conversation_id)
                .first(conn)?;
            if !conversations::is_participant(&conversation, principal.user_id) {
                return Err(DomainError::NotFound("chat message"));
            }
            if intent == EntityAccess::Write && message.sender_id != Some(principal.user_id) {
                return Err(DomainError::forbidden(
                    "only the sender can attach files to a message",
                ));
            }
            Ok(())
        }
    }
}

fn authorize_complaint_author(
    conn: &mut PgConnection,
    principal: &Principal,
    complaint: &Complaint,
    author: Option<Uuid>,
    intent: EntityAccess,
) -> DomainResult<()> {
    let (access, _) =
        access::authorize_complaint(conn, principal, complaint.workspace_id, complaint.id)?;
    if intent == EntityAccess::Write && !access.can_modify_authored(author) {
        return Err(DomainError::forbidden(
            "you do not have permission to attach files here",
        ));
    }
    Ok(())
}
