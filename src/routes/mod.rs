use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod chat;
pub mod complaints;
pub mod form;
pub mod health;
pub mod units;
pub mod uploads;
pub mod users;
pub mod workspaces;

/// Headroom for multipart framing and text fields on top of the file limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let users_routes = Router::new()
        .route(
            "/",
            get(users::list_users)
                .post(users::create_user)
                .patch(users::bulk_update_users)
                .delete(users::bulk_delete_users),
        )
        .route("/me/profile-image", post(users::upload_profile_image))
        .route(
            "/:user_id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/:user_id/profile-image", get(users::get_profile_image));

    let workspaces_routes = Router::new()
        .route(
            "/",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route(
            "/:workspace_id",
            get(workspaces::get_workspace)
                .patch(workspaces::update_workspace)
                .delete(workspaces::delete_workspace),
        )
        .route(
            "/:workspace_id/members",
            get(workspaces::list_members).post(workspaces::add_member),
        )
        .route(
            "/:workspace_id/members/:membership_id",
            get(workspaces::get_member)
                .patch(workspaces::update_member)
                .delete(workspaces::remove_member),
        )
        .route(
            "/:workspace_id/units",
            get(units::list_units).post(units::create_unit),
        )
        .route(
            "/:workspace_id/units/:unit_id",
            get(units::get_unit)
                .patch(units::update_unit)
                .delete(units::delete_unit),
        )
        .route(
            "/:workspace_id/units/:unit_id/tenancies",
            get(units::list_tenancies).post(units::create_tenancy),
        )
        .route(
            "/:workspace_id/units/:unit_id/tenancies/:tenancy_id",
            patch(units::update_tenancy).delete(units::delete_tenancy),
        )
        .route(
            "/:workspace_id/complaints",
            get(complaints::list_complaints).post(complaints::create_complaint),
        )
        .route(
            "/:workspace_id/complaints/:complaint_id",
            get(complaints::get_complaint)
                .put(complaints::replace_complaint)
                .patch(complaints::update_complaint)
                .delete(complaints::delete_complaint),
        )
        .route(
            "/:workspace_id/complaints/:complaint_id/resolve",
            post(complaints::resolve_complaint),
        )
        .route(
            "/:workspace_id/complaints/:complaint_id/messages",
            get(complaints::list_messages).post(complaints::create_message),
        )
        .route(
            "/:workspace_id/complaints/:complaint_id/messages/:message_id",
            get(complaints::get_message)
                .put(complaints::update_message)
                .patch(complaints::update_message)
                .delete(complaints::delete_message),
        );

    let conversations_routes = Router::new()
        .route(
            "/",
            get(chat::list_conversations).post(chat::start_conversation),
        )
        .route("/messages", post(chat::send_direct_message))
        .route(
            "/:conversation_id",
            get(chat::get_conversation).delete(chat::delete_conversation),
        )
        .route("/:conversation_id/read", post(chat::mark_read))
        .route(
            "/:conversation_id/messages",
            get(chat::list_messages).post(chat::post_message),
        )
        .route(
            "/:conversation_id/messages/:message_id",
            get(chat::get_message)
                .patch(chat::update_message)
                .delete(chat::delete_message),
        );

    let uploads_routes = Router::new().route(
        "/",
        get(uploads::list_uploads).post(uploads::upload_file),
    );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/workspaces", workspaces_routes)
        .nest("/api/conversations", conversations_routes)
        .nest("/api/uploads", uploads_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
