use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::{prelude::*, PgConnection};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewRefreshToken, RefreshToken, User},
    routes::users::{user_response, UserResponse},
    schema::{refresh_tokens, users},
    state::AppState,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// `username` may also carry the account's email address.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

type Session = (HeaderMap, Json<LoginResponse>);

fn find_login(conn: &mut PgConnection, login: &str) -> AppResult<Option<User>> {
    let login = login.trim();
    let query = users::table.into_boxed();
    let query = if login.contains('@') {
        query.filter(users::email.eq(login.to_ascii_lowercase()))
    } else {
        query.filter(users::username.eq(login.to_string()))
    };
    Ok(query.first(conn).optional()?)
}

/// Issues an access token and stores a fresh refresh token for `user`. The
/// raw refresh value only ever leaves the server inside the cookie.
fn open_session(conn: &mut PgConnection, state: &AppState, user: &User) -> AppResult<Session> {
    let access_token = state.jwt.generate_token(user)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_refresh_token(&refresh_value),
            issued_at: now.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        refresh_cookie(state, &refresh_value, Some(expires_at))?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Session> {
    let mut conn = state.db()?;
    let user = find_login(&mut conn, &payload.username)?.ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::unauthorized());
    }

    let session = open_session(&mut conn, &state, &user)?;
    info!(user_id = %user.id, "user logged in");
    Ok(session)
}

/// Trades a live refresh cookie for a new session. The presented token is
/// revoked in the same transaction, so each one works exactly once.
pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<Session> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let presented = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;
    let hashed = hash_refresh_token(presented);

    let mut conn = state.db()?;
    let (user_id, session) = conn.transaction::<_, AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let token: RefreshToken = refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(&hashed))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        diesel::update(refresh_tokens::table.find(token.id))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?;

        let user: User = users::table.find(token.user_id).first(conn)?;
        Ok((user.id, open_session(conn, &state, &user)?))
    })?;

    info!(user_id = %user_id, "session refreshed");
    Ok(session)
}

/// Revokes the presented refresh token, or every live token of the caller
/// when the cookie is missing or unknown.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let live = refresh_tokens::table
        .filter(refresh_tokens::user_id.eq(user.user_id))
        .filter(refresh_tokens::revoked_at.is_null());

    let presented = jar
        .as_ref()
        .and_then(|cookies| cookies.get(REFRESH_COOKIE_NAME))
        .map(hash_refresh_token);
    let mut revoked = 0;
    if let Some(hashed) = presented {
        revoked = diesel::update(live.clone().filter(refresh_tokens::token_hash.eq(hashed)))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }
    if revoked == 0 {
        revoked = diesel::update(live)
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
    }
    info!(user_id = %user.user_id, revoked, "user logged out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, refresh_cookie(&state, "", None)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let account: User = {
        let mut conn = state.db()?;
        users::table.find(user.user_id).first(&mut conn)?
    };
    Ok(Json(user_response(&state, account).await?))
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the refresh cookie; `expires_at: None` produces the clearing variant.
fn refresh_cookie(
    state: &AppState,
    value: &str,
    expires_at: Option<DateTime<Utc>>,
) -> AppResult<HeaderValue> {
    let (max_age, expires) = match expires_at {
        Some(expires_at) => (
            ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds(),
            expires_at.to_rfc2822(),
        ),
        None => (0, "Thu, 01 Jan 1970 00:00:00 GMT".to_string()),
    };

    let mut parts = vec![
        format!("{REFRESH_COOKIE_NAME}={value}"),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Strict".to_string(),
        format!("Max-Age={max_age}"),
        format!("Expires={expires}"),
    ];
    if state.config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_hashed_hex() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 64);
        assert_ne!(generate_refresh_token(), token);

        let hashed = hash_refresh_token(&token);
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_refresh_token(&token));
        assert_ne!(hashed, token);
    }
}
