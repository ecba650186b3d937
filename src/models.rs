use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: String,
    pub is_superuser: bool,
    pub phone: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: String,
    pub is_superuser: bool,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = workspaces)]
#[diesel(belongs_to(User, foreign_key = owner_id))]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub owner_id: Option<Uuid>,
    pub timezone: String,
    pub is_active: bool,
    pub contact_email: String,
    pub contact_phone: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workspaces)]
pub struct NewWorkspace {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub owner_id: Option<Uuid>,
    pub timezone: String,
    pub is_active: bool,
    pub contact_email: String,
    pub contact_phone: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = workspace_memberships)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Workspace))]
pub struct WorkspaceMembership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workspace_memberships)]
pub struct NewWorkspaceMembership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = apartment_units)]
#[diesel(belongs_to(Workspace))]
pub struct ApartmentUnit {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub unit_number: String,
    pub rent_amount_cents: Option<i64>,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
    pub square_footage: Option<i32>,
    pub number_of_bedrooms: Option<i32>,
    pub number_of_bathrooms: Option<f64>,
    pub is_occupied: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = apartment_units)]
pub struct NewApartmentUnit {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub unit_number: String,
    pub rent_amount_cents: Option<i64>,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
    pub square_footage: Option<i32>,
    pub number_of_bedrooms: Option<i32>,
    pub number_of_bathrooms: Option<f64>,
    pub is_occupied: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = unit_tenancies)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(ApartmentUnit, foreign_key = unit_id))]
pub struct UnitTenancy {
    pub id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Uuid,
    pub role: String,
    pub is_primary_resident: bool,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = unit_tenancies)]
pub struct NewUnitTenancy {
    pub id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Uuid,
    pub role: String,
    pub is_primary_resident: bool,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = complaints)]
#[diesel(belongs_to(Workspace))]
pub struct Complaint {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub title: String,
    pub category: String,
    pub description: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = complaints)]
pub struct NewComplaint {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub title: String,
    pub category: String,
    pub description: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = complaint_messages)]
#[diesel(belongs_to(Complaint))]
pub struct ComplaintMessage {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<Uuid>,
    pub is_edited: bool,
    pub edited_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = complaint_messages)]
pub struct NewComplaintMessage {
    pub id: Uuid,
    pub complaint_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub message_type: String,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub created_at: NaiveDateTime,
    pub last_message_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = chat_messages)]
#[diesel(belongs_to(Conversation))]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub is_read: bool,
    pub is_edited: bool,
    pub edited_at: Option<NaiveDateTime>,
    pub reply_to_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub s3_key: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub is_profile_image: bool,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub s3_key: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub is_profile_image: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
