use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::attachments::{self, EntityRef, EntityType};
use crate::auth::{password, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::routes::{form::MultipartForm, to_iso};
use crate::schema::users;
use crate::state::AppState;
use crate::utils::json::classify_nullable;

const USER_ROLES: [&str; 3] = ["owner", "resident", "admin"];

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub is_superuser: bool,
    pub phone: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) async fn user_response(state: &AppState, user: User) -> AppResult<UserResponse> {
    let profile_image_url = attachments::current_profile_image(state, user.id).await?;
    Ok(UserResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        display_name: user.display_name,
        role: user.role,
        is_superuser: user.is_superuser,
        phone: user.phone,
        profile_image_url,
        created_at: to_iso(user.created_at),
        updated_at: to_iso(user.updated_at),
    })
}

fn normalize_role(role: &str) -> AppResult<String> {
    let role = role.trim().to_ascii_lowercase();
    if USER_ROLES.contains(&role.as_str()) {
        Ok(role)
    } else {
        Err(AppError::bad_request(
            "role must be one of: owner, resident, admin",
        ))
    }
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("email must be a valid address"));
    }
    Ok(email)
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub phone: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let accounts: Vec<User> = {
        let mut conn = state.db()?;
        users::table.order(users::username.asc()).load(&mut conn)?
    };

    let mut response = Vec::with_capacity(accounts.len());
    for account in accounts {
        response.push(user_response(&state, account).await?);
    }
    Ok(Json(response))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    if !user.is_superuser {
        return Err(AppError::forbidden("only superusers can register users"));
    }

    let username = payload.username.trim().to_string();
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    if payload.password.len() < 8 {
        return Err(AppError::bad_request(
            "password must be at least 8 characters",
        ));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        display_name: payload
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| username.clone()),
        username,
        email: normalize_email(&payload.email)?,
        password_hash: password::hash_password(&payload.password)?,
        role: normalize_role(payload.role.as_deref().unwrap_or("resident"))?,
        is_superuser: payload.is_superuser,
        phone: payload.phone.filter(|phone| !phone.trim().is_empty()),
    };

    let created: User = {
        let mut conn = state.db()?;
        match diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(&mut conn)
        {
            Ok(created) => created,
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                return Err(AppError::conflict("username or email already in use"));
            }
            Err(err) => return Err(AppError::from(err)),
        }
    };

    info!(user_id = %created.id, created_by = %user.user_id, "user registered");
    Ok((StatusCode::CREATED, Json(user_response(&state, created).await?)))
}

pub async fn get_user(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    let account: User = {
        let mut conn = state.db()?;
        users::table.find(user_id).first(&mut conn)?
    };
    Ok(Json(user_response(&state, account).await?))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateUserChangeset {
    email: Option<String>,
    display_name: Option<String>,
    password_hash: Option<String>,
    role: Option<String>,
    is_superuser: Option<bool>,
    phone: Option<Option<String>>,
}

impl UpdateUserChangeset {
    fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.display_name.is_none()
            && self.password_hash.is_none()
            && self.role.is_none()
            && self.is_superuser.is_none()
            && self.phone.is_none()
    }
}

/// Reads the fields a PATCH body may carry. Role and superuser changes are
/// reserved for superusers.
fn user_changes(body: &Value, actor: &AuthenticatedUser) -> AppResult<UpdateUserChangeset> {
    let mut changes = UpdateUserChangeset::default();
    if let Some(email) = classify_nullable::<String>(body, "email")
        .and_then(|value| value.required("email"))
        .map_err(AppError::bad_request)?
    {
        changes.email = Some(normalize_email(&email)?);
    }
    if let Some(display_name) = classify_nullable::<String>(body, "display_name")
        .and_then(|value| value.required("display_name"))
        .map_err(AppError::bad_request)?
    {
        let trimmed = display_name.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("display_name must not be empty"));
        }
        changes.display_name = Some(trimmed.to_string());
    }
    if let Some(new_password) = classify_nullable::<String>(body, "password")
        .and_then(|value| value.required("password"))
        .map_err(AppError::bad_request)?
    {
        if new_password.len() < 8 {
            return Err(AppError::bad_request(
                "password must be at least 8 characters",
            ));
        }
        changes.password_hash = Some(password::hash_password(&new_password)?);
    }
    changes.phone = classify_nullable::<String>(body, "phone")
        .map_err(AppError::bad_request)?
        .into_change();

    let role = classify_nullable::<String>(body, "role")
        .and_then(|value| value.required("role"))
        .map_err(AppError::bad_request)?;
    let is_superuser = classify_nullable::<bool>(body, "is_superuser")
        .and_then(|value| value.required("is_superuser"))
        .map_err(AppError::bad_request)?;
    if (role.is_some() || is_superuser.is_some()) && !actor.is_superuser {
        return Err(AppError::forbidden(
            "only superusers can change roles or superuser status",
        ));
    }
    changes.role = role.as_deref().map(normalize_role).transpose()?;
    changes.is_superuser = is_superuser;
    Ok(changes)
}

fn apply_user_changes(
    conn: &mut PgConnection,
    user_id: Uuid,
    changes: &UpdateUserChangeset,
) -> AppResult<User> {
    let existing: User = users::table.find(user_id).first(conn)?;
    if changes.is_empty() {
        return Ok(existing);
    }

    match diesel::update(users::table.find(user_id))
        .set((changes, users::updated_at.eq(Utc::now().naive_utc())))
        .get_result(conn)
    {
        Ok(updated) => Ok(updated),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => Err(AppError::conflict("email already in use")),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn update_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<UserResponse>> {
    if user.user_id != user_id && !user.is_superuser {
        return Err(AppError::forbidden("you can only update your own profile"));
    }

    let changes = user_changes(&body, &user)?;
    let updated = {
        let mut conn = state.db()?;
        apply_user_changes(&mut conn, user_id, &changes)?
    };

    Ok(Json(user_response(&state, updated).await?))
}

/// Applies a list of partial updates, each naming its user by `id`. Nothing is
/// written unless every entry applies.
pub async fn bulk_update_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(entries): Json<Vec<Value>>,
) -> AppResult<Json<Vec<UserResponse>>> {
    if !user.is_superuser {
        return Err(AppError::forbidden("only superusers can bulk update users"));
    }

    let mut planned = Vec::with_capacity(entries.len());
    for entry in &entries {
        let user_id = entry
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| AppError::bad_request("every entry needs a valid id"))?;
        planned.push((user_id, user_changes(entry, &user)?));
    }

    let updated: Vec<User> = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            planned
                .iter()
                .map(|(user_id, changes)| apply_user_changes(conn, *user_id, changes))
                .collect()
        })?
    };

    info!(count = updated.len(), updated_by = %user.user_id, "users bulk updated");
    let mut response = Vec::with_capacity(updated.len());
    for account in updated {
        response.push(user_response(&state, account).await?);
    }
    Ok(Json(response))
}

/// Deletes every account in `ids` or none of them, then detaches the files of
/// everything the cascade removed.
async fn delete_accounts(state: &AppState, mut ids: Vec<Uuid>) -> AppResult<usize> {
    ids.sort_unstable();
    ids.dedup();

    let dependents = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let found: i64 = users::table
                .filter(users::id.eq_any(ids.clone()))
                .count()
                .get_result(conn)?;
            if found as usize != ids.len() {
                return Err(AppError::not_found());
            }

            let mut dependents = Vec::new();
            for user_id in &ids {
                dependents.extend(attachments::user_dependents(conn, *user_id)?);
            }
            diesel::delete(users::table.filter(users::id.eq_any(ids.clone()))).execute(conn)?;
            Ok(dependents)
        })?
    };

    attachments::detach_each(state, &dependents).await?;
    Ok(ids.len())
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if !user.is_superuser {
        return Err(AppError::forbidden("only superusers can delete users"));
    }

    delete_accounts(&state, vec![user_id]).await?;
    info!(user_id = %user_id, deleted_by = %user.user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

pub async fn bulk_delete_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BulkDeleteRequest>,
) -> AppResult<StatusCode> {
    if !user.is_superuser {
        return Err(AppError::forbidden("only superusers can delete users"));
    }
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("ids must not be empty"));
    }

    let deleted = delete_accounts(&state, payload.ids).await?;
    info!(count = deleted, deleted_by = %user.user_id, "users bulk deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ProfileImageResponse {
    pub user_id: Uuid,
    pub url: Option<String>,
}

pub async fn upload_profile_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ProfileImageResponse>)> {
    let form = MultipartForm::read(multipart, state.config.max_upload_bytes).await?;
    let upload = form
        .file
        .ok_or_else(|| AppError::bad_request("file field is required"))?;

    let entity = EntityRef::new(EntityType::User, user.user_id);
    let document = attachments::associate(&state, upload, entity, user.user_id, true).await?;
    let url = attachments::presign(&state, &document).await?;

    Ok((
        StatusCode::CREATED,
        Json(ProfileImageResponse {
            user_id: user.user_id,
            url: Some(url),
        }),
    ))
}

pub async fn get_profile_image(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ProfileImageResponse>> {
    {
        let mut conn = state.db()?;
        users::table
            .find(user_id)
            .select(users::id)
            .first::<Uuid>(&mut conn)?;
    }

    let url = attachments::current_profile_image(&state, user_id).await?;
    Ok(Json(ProfileImageResponse { user_id, url }))
}
