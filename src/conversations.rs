//! One conversation per unordered pair of users.
//!
//! Rows are stored with the smaller id in `user1_id`; the table carries a
//! `CHECK (user1_id < user2_id)` and a unique constraint on the pair, so a
//! lookup only ever has to consider one ordering.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use diesel::{
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    PgConnection,
};
use tracing::info;
use uuid::Uuid;

use crate::access::Principal;
use crate::error::{DomainError, DomainResult};
use crate::models::{Conversation, NewConversation};
use crate::schema::{conversations, users};

pub fn canonical_pair(a: Uuid, b: Uuid) -> DomainResult<(Uuid, Uuid)> {
    match a.cmp(&b) {
        Ordering::Less => Ok((a, b)),
        Ordering::Greater => Ok((b, a)),
        Ordering::Equal => Err(DomainError::validation(
            "cannot start a conversation with yourself",
        )),
    }
}

pub fn find_between(
    conn: &mut PgConnection,
    a: Uuid,
    b: Uuid,
) -> DomainResult<Option<Conversation>> {
    let (low, high) = canonical_pair(a, b)?;
    Ok(conversations::table
        .filter(conversations::user1_id.eq(low))
        .filter(conversations::user2_id.eq(high))
        .first(conn)
        .optional()?)
}

pub fn insert_canonical(conn: &mut PgConnection, a: Uuid, b: Uuid) -> DomainResult<Conversation> {
    let (low, high) = canonical_pair(a, b)?;
    let new_conversation = NewConversation {
        id: Uuid::new_v4(),
        user1_id: low,
        user2_id: high,
    };

    match diesel::insert_into(conversations::table)
        .values(&new_conversation)
        .get_result(conn)
    {
        Ok(conversation) => Ok(conversation),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Err(
            DomainError::conflict("a conversation between these users already exists"),
        ),
        Err(err) => Err(err.into()),
    }
}

/// Returns the conversation between `a` and `b`, creating it when missing.
/// The flag is `true` only when this call inserted the row.
pub fn resolve_or_create(
    conn: &mut PgConnection,
    a: Uuid,
    b: Uuid,
) -> DomainResult<(Conversation, bool)> {
    let (low, high) = canonical_pair(a, b)?;

    let existing_users: i64 = users::table
        .filter(users::id.eq_any(vec![low, high]))
        .count()
        .get_result(conn)?;
    if existing_users != 2 {
        return Err(DomainError::NotFound("user"));
    }

    if let Some(conversation) = find_between(conn, low, high)? {
        return Ok((conversation, false));
    }

    // The insert runs in its own savepoint so a lost race leaves the outer
    // transaction usable for the re-read.
    match conn.transaction::<_, DomainError, _>(|conn| insert_canonical(conn, low, high)) {
        Ok(conversation) => {
            info!(conversation_id = %conversation.id, user1_id = %low, user2_id = %high, "conversation created");
            Ok((conversation, true))
        }
        Err(DomainError::Conflict(_)) => {
            let winner = find_between(conn, low, high)?.ok_or(DomainError::NotFound("conversation"))?;
            Ok((winner, false))
        }
        Err(err) => Err(err),
    }
}

/// Moves `last_message_at` forward to `at`; an older timestamp never
/// overwrites a newer one.
pub fn touch_last_message(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    at: NaiveDateTime,
) -> DomainResult<()> {
    diesel::update(
        conversations::table
            .filter(conversations::id.eq(conversation_id))
            .filter(
                conversations::last_message_at
                    .is_null()
                    .or(conversations::last_message_at.lt(at)),
            ),
    )
    .set(conversations::last_message_at.eq(Some(at)))
    .execute(conn)?;
    Ok(())
}

pub fn list_for_user(conn: &mut PgConnection, user_id: Uuid) -> DomainResult<Vec<Conversation>> {
    Ok(conversations::table
        .filter(
            conversations::user1_id
                .eq(user_id)
                .or(conversations::user2_id.eq(user_id)),
        )
        .order((
            conversations::last_message_at.desc().nulls_last(),
            conversations::created_at.desc(),
        ))
        .load(conn)?)
}

pub fn is_participant(conversation: &Conversation, user_id: Uuid) -> bool {
    conversation.user1_id == user_id || conversation.user2_id == user_id
}

pub fn other_participant(conversation: &Conversation, user_id: Uuid) -> Option<Uuid> {
    if conversation.user1_id == user_id {
        Some(conversation.user2_id)
    } else if conversation.user2_id == user_id {
        Some(conversation.user1_id)
    } else {
        None
    }
}

/// Loads a conversation the principal takes part in. Conversations of other
/// users are reported as missing, superusers included.
pub fn visible_conversation(
    conn: &mut PgConnection,
    principal: &Principal,
    conversation_id: Uuid,
) -> DomainResult<Conversation> {
    let conversation: Option<Conversation> = conversations::table
        .find(conversation_id)
        .first(conn)
        .optional()?;
    conversation
        .filter(|conversation| is_participant(conversation, principal.user_id))
        .ok_or(DomainError::NotFound("conversation"))
}
