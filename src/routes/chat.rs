use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::attachments::{self, EntityRef, EntityType};
use crate::auth::AuthenticatedUser;
use crate::conversations;
use crate::error::{AppError, AppResult, DomainError};
use crate::models::{ChatMessage, Conversation};
use crate::routes::to_iso;
use crate::routes::uploads::{attachment_responses, AttachmentResponse};
use crate::schema::{chat_messages, conversations as conversations_table};
use crate::state::AppState;
use crate::workflow;

#[derive(Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub other_user_id: Option<Uuid>,
    pub unread_count: i64,
    pub created_at: String,
    pub last_message_at: Option<String>,
}

fn unread_count(conn: &mut PgConnection, conversation_id: Uuid, reader_id: Uuid) -> AppResult<i64> {
    Ok(chat_messages::table
        .filter(chat_messages::conversation_id.eq(conversation_id))
        .filter(chat_messages::is_read.eq(false))
        .filter(
            chat_messages::sender_id
                .ne(reader_id)
                .or(chat_messages::sender_id.is_null()),
        )
        .count()
        .get_result(conn)?)
}

fn conversation_response(
    conn: &mut PgConnection,
    conversation: Conversation,
    viewer_id: Uuid,
) -> AppResult<ConversationResponse> {
    Ok(ConversationResponse {
        other_user_id: conversations::other_participant(&conversation, viewer_id),
        unread_count: unread_count(conn, conversation.id, viewer_id)?,
        id: conversation.id,
        user1_id: conversation.user1_id,
        user2_id: conversation.user2_id,
        created_at: to_iso(conversation.created_at),
        last_message_at: conversation.last_message_at.map(to_iso),
    })
}

#[derive(Serialize)]
pub struct ChatMessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub is_read: bool,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: String,
    pub attachments: Vec<AttachmentResponse>,
}

async fn message_response(state: &AppState, message: ChatMessage) -> AppResult<ChatMessageResponse> {
    let documents = {
        let mut conn = state.db()?;
        attachments::documents_for(&mut conn, EntityRef::new(EntityType::ChatMessage, message.id))?
    };

    Ok(ChatMessageResponse {
        id: message.id,
        conversation_id: message.conversation_id,
        sender_id: message.sender_id,
        content: message.content,
        is_read: message.is_read,
        is_edited: message.is_edited,
        edited_at: message.edited_at.map(to_iso),
        reply_to_id: message.reply_to_id,
        created_at: to_iso(message.created_at),
        attachments: attachment_responses(state, documents).await?,
    })
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ConversationResponse>>> {
    let mut conn = state.db()?;
    let found = conversations::list_for_user(&mut conn, user.user_id)?;

    let mut response = Vec::with_capacity(found.len());
    for conversation in found {
        response.push(conversation_response(&mut conn, conversation, user.user_id)?);
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct StartConversationRequest {
    pub participant_id: Uuid,
}

/// Returns the existing conversation with `participant_id` (200) or creates
/// it (201).
pub async fn start_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<StartConversationRequest>,
) -> AppResult<(StatusCode, Json<ConversationResponse>)> {
    let mut conn = state.db()?;
    let (conversation, created) =
        conversations::resolve_or_create(&mut conn, user.user_id, payload.participant_id)?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(conversation_response(&mut conn, conversation, user.user_id)?),
    ))
}

#[derive(Deserialize)]
pub struct DirectMessageRequest {
    pub recipient_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
}

/// Sends a message to `recipient_id`, resolving the conversation first. The
/// conversation and the message are written in one transaction.
pub async fn send_direct_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DirectMessageRequest>,
) -> AppResult<(StatusCode, Json<ChatMessageResponse>)> {
    let message = {
        let mut conn = state.db()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            let (conversation, _) =
                conversations::resolve_or_create(conn, user.user_id, payload.recipient_id)?;
            workflow::post_chat_message(
                conn,
                &conversation,
                user.user_id,
                &payload.content,
                payload.reply_to_id,
            )
        })?
    };

    info!(message_id = %message.id, conversation_id = %message.conversation_id, "direct message sent");
    Ok((StatusCode::CREATED, Json(message_response(&state, message).await?)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ConversationResponse>> {
    let mut conn = state.db()?;
    let conversation =
        conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
    Ok(Json(conversation_response(&mut conn, conversation, user.user_id)?))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let dependents = {
        let mut conn = state.db()?;
        let conversation =
            conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
        conn.transaction::<_, DomainError, _>(|conn| {
            let dependents = attachments::conversation_dependents(conn, conversation.id)?;
            diesel::delete(conversations_table::table.find(conversation.id)).execute(conn)?;
            Ok(dependents)
        })?
    };

    attachments::detach_each(&state, &dependents).await?;

    info!(conversation_id = %conversation_id, deleted_by = %user.user_id, "conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub marked_read: usize,
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<MarkReadResponse>> {
    let mut conn = state.db()?;
    let conversation =
        conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
    let marked_read = workflow::mark_conversation_read(&mut conn, &conversation, user.user_id)?;
    Ok(Json(MarkReadResponse { marked_read }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<ChatMessageResponse>>> {
    let messages: Vec<ChatMessage> = {
        let mut conn = state.db()?;
        let conversation =
            conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
        chat_messages::table
            .filter(chat_messages::conversation_id.eq(conversation.id))
            .order((chat_messages::created_at.asc(), chat_messages::id.asc()))
            .load(&mut conn)?
    };

    let mut response = Vec::with_capacity(messages.len());
    for message in messages {
        response.push(message_response(&state, message).await?);
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
}

pub async fn post_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<(StatusCode, Json<ChatMessageResponse>)> {
    let message = {
        let mut conn = state.db()?;
        let conversation =
            conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
        workflow::post_chat_message(
            &mut conn,
            &conversation,
            user.user_id,
            &payload.content,
            payload.reply_to_id,
        )?
    };
    Ok((StatusCode::CREATED, Json(message_response(&state, message).await?)))
}

fn load_message(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    message_id: Uuid,
) -> AppResult<ChatMessage> {
    chat_messages::table
        .filter(chat_messages::id.eq(message_id))
        .filter(chat_messages::conversation_id.eq(conversation_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| DomainError::NotFound("chat message").into())
}

pub async fn get_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ChatMessageResponse>> {
    let message = {
        let mut conn = state.db()?;
        let conversation =
            conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
        load_message(&mut conn, conversation.id, message_id)?
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
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateMessageRequest>,
) -> AppResult<Json<ChatMessageResponse>> {
    let updated = {
        let mut conn = state.db()?;
        let conversation =
            conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
        let message = load_message(&mut conn, conversation.id, message_id)?;
        if message.sender_id != Some(user.user_id) {
            return Err(AppError::forbidden("you can only edit your own messages"));
        }
        workflow::update_chat_message(&mut conn, &message, &payload.content)?
    };
    Ok(Json(message_response(&state, updated).await?))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    {
        let mut conn = state.db()?;
        let conversation =
            conversations::visible_conversation(&mut conn, &user.principal(), conversation_id)?;
        let message = load_message(&mut conn, conversation.id, message_id)?;
        if message.sender_id != Some(user.user_id) {
            return Err(AppError::forbidden("you can only delete your own messages"));
        }
        diesel::delete(chat_messages::table.find(message.id)).execute(&mut conn)?;
    }

    attachments::detach_all(&state, EntityRef::new(EntityType::ChatMessage, message_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
