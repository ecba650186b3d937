//! Complaint lifecycle and the shared rules for complaint and chat messages.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use tracing::info;
use uuid::Uuid;

use crate::access::WorkspaceAccess;
use crate::attachments::{EntityType, Upload};
use crate::conversations;
use crate::error::{DomainError, DomainResult};
use crate::models::{
    ChatMessage, Complaint, ComplaintMessage, Conversation, NewChatMessage, NewComplaintMessage,
};
use crate::schema::{apartment_units, chat_messages, complaint_messages, complaints};

macro_rules! string_enum {
    ($name:ident, $what:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($tag => Ok($name::$variant),)+
                    _ => {
                        let allowed: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        Err(DomainError::validation(format!(
                            concat!($what, " must be one of: {}"),
                            allowed.join(", ")
                        )))
                    }
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(ComplaintStatus, "status", {
    Open => "open",
    InProgress => "in_progress",
    Resolved => "resolved",
    Closed => "closed",
});

string_enum!(ComplaintCategory, "category", {
    Maintenance => "maintenance",
    Security => "security",
    Neighbor => "neighbor",
    Noise => "noise",
    Other => "other",
});

string_enum!(MessageType, "message_type", {
    Text => "text",
    Image => "image",
    File => "file",
});

impl ComplaintStatus {
    fn rank(self) -> u8 {
        match self {
            ComplaintStatus::Open => 0,
            ComplaintStatus::InProgress => 1,
            ComplaintStatus::Resolved => 2,
            ComplaintStatus::Closed => 3,
        }
    }

    /// Direct status updates never move a complaint backwards.
    pub fn can_advance_to(self, next: ComplaintStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl MessageType {
    pub fn requires_attachment(self) -> bool {
        matches!(self, MessageType::Image | MessageType::File)
    }
}

/// Messages whose content edits are tracked.
pub trait EditTracked {
    fn content(&self) -> &str;
    fn is_edited(&self) -> bool;
    fn edited_at(&self) -> Option<NaiveDateTime>;
}

impl EditTracked for ComplaintMessage {
    fn content(&self) -> &str {
        &self.content
    }

    fn is_edited(&self) -> bool {
        self.is_edited
    }

    fn edited_at(&self) -> Option<NaiveDateTime> {
        self.edited_at
    }
}

impl EditTracked for ChatMessage {
    fn content(&self) -> &str {
        &self.content
    }

    fn is_edited(&self) -> bool {
        self.is_edited
    }

    fn edited_at(&self) -> Option<NaiveDateTime> {
        self.edited_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentEdit {
    pub content: String,
    pub is_edited: bool,
    pub edited_at: Option<NaiveDateTime>,
}

pub fn apply_content_edit<M: EditTracked>(
    stored: &M,
    incoming: &str,
    now: NaiveDateTime,
) -> ContentEdit {
    if stored.content() == incoming {
        ContentEdit {
            content: stored.content().to_string(),
            is_edited: stored.is_edited(),
            edited_at: stored.edited_at(),
        }
    } else {
        ContentEdit {
            content: incoming.to_string(),
            is_edited: true,
            edited_at: Some(now),
        }
    }
}

/// Text messages need content; attachment-bearing messages may have none.
pub fn validate_content(message_type: MessageType, content: &str) -> DomainResult<String> {
    if content.trim().is_empty() && !message_type.requires_attachment() {
        return Err(DomainError::validation("content must not be empty"));
    }
    Ok(content.to_string())
}

pub fn validate_complaint_unit(
    conn: &mut PgConnection,
    workspace_id: Uuid,
    unit_id: Option<Uuid>,
) -> DomainResult<()> {
    let Some(unit_id) = unit_id else {
        return Ok(());
    };
    let unit_workspace: Option<Uuid> = apartment_units::table
        .find(unit_id)
        .select(apartment_units::workspace_id)
        .first(conn)
        .optional()?;
    match unit_workspace {
        Some(found) if found == workspace_id => Ok(()),
        Some(_) => Err(DomainError::validation(
            "unit does not belong to this workspace",
        )),
        None => Err(DomainError::validation("unit does not exist")),
    }
}

/// Marks a complaint resolved. Calling it on an already resolved complaint
/// changes nothing.
pub fn resolve_complaint(conn: &mut PgConnection, complaint_id: Uuid) -> DomainResult<Complaint> {
    let resolved = ComplaintStatus::Resolved.as_str();
    let updated = diesel::update(
        complaints::table
            .filter(complaints::id.eq(complaint_id))
            .filter(complaints::status.ne(resolved)),
    )
    .set(complaints::status.eq(resolved))
    .execute(conn)?;

    if updated > 0 {
        info!(complaint_id = %complaint_id, "complaint resolved");
    }

    complaints::table
        .find(complaint_id)
        .first(conn)
        .optional()?
        .ok_or(DomainError::NotFound("complaint"))
}

/// Attachment fields submitted alongside a message.
#[derive(Debug, Default)]
pub struct AttachmentRequest {
    pub file: Option<Upload>,
    pub entity_tag: Option<String>,
}

impl AttachmentRequest {
    /// Image and file messages must carry a file and an entity type tag;
    /// text messages ignore both.
    pub fn validate(self, message_type: MessageType) -> DomainResult<Option<(Upload, EntityType)>> {
        if !message_type.requires_attachment() {
            return Ok(None);
        }
        let file = self.file.ok_or_else(|| {
            DomainError::validation(format!("a file is required for {message_type} messages"))
        })?;
        let tag = self
            .entity_tag
            .filter(|tag| !tag.trim().is_empty())
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "an entity_type is required for {message_type} messages"
                ))
            })?;
        Ok(Some((file, tag.parse()?)))
    }
}

pub fn ensure_complaint_reply_target(
    conn: &mut PgConnection,
    complaint_id: Uuid,
    reply_to: Option<Uuid>,
) -> DomainResult<()> {
    let Some(reply_to) = reply_to else {
        return Ok(());
    };
    let target: Option<Uuid> = complaint_messages::table
        .find(reply_to)
        .select(complaint_messages::complaint_id)
        .first(conn)
        .optional()?;
    match target {
        Some(found) if found == complaint_id => Ok(()),
        Some(_) => Err(DomainError::validation(
            "reply_to must reference a message in the same complaint",
        )),
        None => Err(DomainError::validation("reply_to message does not exist")),
    }
}

pub fn ensure_chat_reply_target(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    reply_to: Option<Uuid>,
) -> DomainResult<()> {
    let Some(reply_to) = reply_to else {
        return Ok(());
    };
    let target: Option<Uuid> = chat_messages::table
        .find(reply_to)
        .select(chat_messages::conversation_id)
        .first(conn)
        .optional()?;
    match target {
        Some(found) if found == conversation_id => Ok(()),
        Some(_) => Err(DomainError::validation(
            "reply_to must reference a message in the same conversation",
        )),
        None => Err(DomainError::validation("reply_to message does not exist")),
    }
}

pub fn ensure_complaint_sender(access: &WorkspaceAccess) -> DomainResult<()> {
    if access.principal.is_superuser || access.relation.is_related() {
        Ok(())
    } else {
        Err(DomainError::forbidden(
            "only workspace members can post on complaints",
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ComplaintMessageDraft {
    pub id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<Uuid>,
}

pub fn insert_complaint_message(
    conn: &mut PgConnection,
    complaint: &Complaint,
    sender_id: Uuid,
    draft: ComplaintMessageDraft,
) -> DomainResult<ComplaintMessage> {
    ensure_complaint_reply_target(conn, complaint.id, draft.reply_to_id)?;

    let new_message = NewComplaintMessage {
        id: draft.id,
        complaint_id: complaint.id,
        sender_id: Some(sender_id),
        content: validate_content(draft.message_type, &draft.content)?,
        message_type: draft.message_type.as_str().to_string(),
        reply_to_id: draft.reply_to_id,
    };

    Ok(diesel::insert_into(complaint_messages::table)
        .values(&new_message)
        .get_result(conn)?)
}

/// Appends a message to `conversation` and bumps its `last_message_at` in the
/// same transaction.
pub fn post_chat_message(
    conn: &mut PgConnection,
    conversation: &Conversation,
    sender_id: Uuid,
    content: &str,
    reply_to: Option<Uuid>,
) -> DomainResult<ChatMessage> {
    if !conversations::is_participant(conversation, sender_id) {
        return Err(DomainError::forbidden(
            "only participants can post in this conversation",
        ));
    }
    let content = validate_content(MessageType::Text, content)?;

    conn.transaction(|conn| {
        ensure_chat_reply_target(conn, conversation.id, reply_to)?;

        let message: ChatMessage = diesel::insert_into(chat_messages::table)
            .values(&NewChatMessage {
                id: Uuid::new_v4(),
                conversation_id: conversation.id,
                sender_id: Some(sender_id),
                content,
                reply_to_id: reply_to,
            })
            .get_result(conn)?;

        conversations::touch_last_message(conn, conversation.id, message.created_at)?;
        Ok(message)
    })
}

pub fn update_chat_message(
    conn: &mut PgConnection,
    message: &ChatMessage,
    incoming: &str,
) -> DomainResult<ChatMessage> {
    validate_content(MessageType::Text, incoming)?;
    let edit = apply_content_edit(message, incoming, Utc::now().naive_utc());
    Ok(diesel::update(chat_messages::table.find(message.id))
        .set((
            chat_messages::content.eq(edit.content),
            chat_messages::is_edited.eq(edit.is_edited),
            chat_messages::edited_at.eq(edit.edited_at),
        ))
        .get_result(conn)?)
}

pub fn update_complaint_message(
    conn: &mut PgConnection,
    message: &ComplaintMessage,
    incoming: &str,
) -> DomainResult<ComplaintMessage> {
    let message_type = message.message_type.parse().unwrap_or(MessageType::Text);
    validate_content(message_type, incoming)?;
    let edit = apply_content_edit(message, incoming, Utc::now().naive_utc());
    Ok(diesel::update(complaint_messages::table.find(message.id))
        .set((
            complaint_messages::content.eq(edit.content),
            complaint_messages::is_edited.eq(edit.is_edited),
            complaint_messages::edited_at.eq(edit.edited_at),
        ))
        .get_result(conn)?)
}

/// Marks every message the reader received in `conversation` as read.
pub fn mark_conversation_read(
    conn: &mut PgConnection,
    conversation: &Conversation,
    reader_id: Uuid,
) -> DomainResult<usize> {
    Ok(diesel::update(
        chat_messages::table
            .filter(chat_messages::conversation_id.eq(conversation.id))
            .filter(chat_messages::is_read.eq(false))
            .filter(
                chat_messages::sender_id
                    .ne(reader_id)
                    .or(chat_messages::sender_id.is_null()),
            ),
    )
    .set(chat_messages::is_read.eq(true))
    .execute(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn chat_message(content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Some(Uuid::new_v4()),
            content: content.to_string(),
            is_read: false,
            is_edited: false,
            edited_at: None,
            reply_to_id: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn statuses_only_move_forward() {
        use ComplaintStatus::*;
        assert!(Open.can_advance_to(InProgress));
        assert!(Open.can_advance_to(Closed));
        assert!(Resolved.can_advance_to(Resolved));
        assert!(!Resolved.can_advance_to(Open));
        assert!(!Closed.can_advance_to(InProgress));
    }

    #[test]
    fn string_enums_parse_known_tags() {
        assert_eq!(
            "in_progress".parse::<ComplaintStatus>().unwrap(),
            ComplaintStatus::InProgress
        );
        assert_eq!(
            "Noise".parse::<ComplaintCategory>().unwrap(),
            ComplaintCategory::Noise
        );
        let err = "video".parse::<MessageType>().unwrap_err();
        assert!(err.to_string().contains("text, image, file"));
    }

    #[test]
    fn changed_content_marks_message_edited() {
        let stored = chat_message("hello");
        let now = Utc::now().naive_utc();
        let edit = apply_content_edit(&stored, "hello there", now);
        assert_eq!(edit.content, "hello there");
        assert!(edit.is_edited);
        assert_eq!(edit.edited_at, Some(now));
    }

    #[test]
    fn identical_content_keeps_edit_state() {
        let mut stored = chat_message("hello");
        let earlier = Utc::now().naive_utc() - Duration::minutes(5);
        stored.is_edited = true;
        stored.edited_at = Some(earlier);

        let edit = apply_content_edit(&stored, "hello", Utc::now().naive_utc());
        assert!(edit.is_edited);
        assert_eq!(edit.edited_at, Some(earlier));

        let untouched = apply_content_edit(&chat_message("hi"), "hi", Utc::now().naive_utc());
        assert!(!untouched.is_edited);
        assert_eq!(untouched.edited_at, None);
    }

    #[test]
    fn attachment_messages_need_file_and_entity_type() {
        let file = Upload {
            file_name: "leak.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: vec![1, 2, 3],
        };

        let missing_file = AttachmentRequest {
            file: None,
            entity_tag: Some("complaint_message".to_string()),
        };
        assert!(matches!(
            missing_file.validate(MessageType::Image),
            Err(DomainError::Validation(_))
        ));

        let missing_tag = AttachmentRequest {
            file: Some(file.clone()),
            entity_tag: None,
        };
        assert!(matches!(
            missing_tag.validate(MessageType::File),
            Err(DomainError::Validation(_))
        ));

        let complete = AttachmentRequest {
            file: Some(file.clone()),
            entity_tag: Some("complaint_message".to_string()),
        };
        let (_, entity_type) = complete.validate(MessageType::Image).unwrap().unwrap();
        assert_eq!(entity_type, EntityType::ComplaintMessage);

        let text = AttachmentRequest {
            file: Some(file),
            entity_tag: None,
        };
        assert!(text.validate(MessageType::Text).unwrap().is_none());
    }

    #[test]
    fn text_messages_need_content() {
        assert!(validate_content(MessageType::Text, "   ").is_err());
        assert!(validate_content(MessageType::Image, "").is_ok());
    }
}
