use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Extension, Json, Router};
use konnect_common::non_api_structs::UserData;
use konnect_common::{
    AuthResponse, HealthResponse, LoginRequest, MessageResponse, NotificationId, RegisterRequest,
    UnreadCount, UserId, UserProfile,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthService;
use crate::connections::Accepted;
use crate::error::{AppError, Result};
use crate::State;

const MIN_PASSWORD_LENGTH: usize = 8;

pub fn app(state: State) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth_routes::register))
        .route("/auth/login", post(auth_routes::login))
        .route("/profile/me", get(profile::me))
        .route("/profile/users/:user_id", get(profile::user))
        .route("/profile/connections", get(profile::connections))
        .route("/profile/connection-requests", get(profile::connection_requests))
        .route("/profile/connect/:user_id", post(profile::connect))
        .route("/profile/accept/:user_id", post(profile::accept))
        .route("/profile/reject/:user_id", delete(profile::reject))
        .route("/profile/disconnect/:user_id", delete(profile::disconnect))
        .route("/profile/connection-status/:user_id", get(profile::connection_status))
        .route("/notifications", get(notifications::list))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/mark-all", patch(notifications::mark_all_read))
        .route("/notifications/:id/read", patch(notifications::mark_read))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// The token must be valid and its user must still exist.
fn current_user(state: &State, headers: &HeaderMap) -> Result<UserId> {
    let me = state.auth().authenticate(headers)?;
    match state.user(&me) {
        Ok(_) => Ok(me),
        Err(AppError::UserNotFound) => Err(AppError::Unauthorized("account no longer exists")),
        Err(e) => Err(e),
    }
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    UserId::parse(raw).ok_or_else(|| AppError::InvalidId(raw.to_string()))
}

fn profiles(users: Vec<UserData>) -> Vec<UserProfile> {
    users.iter().map(UserData::profile).collect()
}

mod auth_routes {
    use super::*;

    pub async fn register(
        Extension(state): Extension<State>,
        payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse> {
        let Json(payload) = payload?;
        let name = payload.name.trim();
        let email = payload.email.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("name must not be empty".into()));
        }
        if !email.contains('@') {
            return Err(AppError::InvalidInput("email address is not valid".into()));
        }
        if payload.password.len() < MIN_PASSWORD_LENGTH {
            return Err(AppError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let user = UserData::new(name, email, AuthService::hash_password(&payload.password)?);
        state.insert_user(&user)?;
        info!("registered user {} ({})", user.id, user.name);
        let token = state.auth().issue_token(&user.id)?;
        Ok((StatusCode::CREATED, Json(AuthResponse { token, user: user.profile() })))
    }

    pub async fn login(
        Extension(state): Extension<State>,
        payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
    ) -> Result<Json<AuthResponse>> {
        let Json(payload) = payload?;
        let user = match state.user_by_email(&payload.email) {
            Ok(user) => user,
            Err(AppError::UserNotFound) => {
                AuthService::verify_password(crate::auth::UNKNOWN_USER_HASH, &payload.password);
                return Err(AppError::Unauthorized("invalid credentials"));
            }
            Err(e) => return Err(e),
        };
        if !AuthService::verify_password(&user.password_hash, &payload.password) {
            return Err(AppError::Unauthorized("invalid credentials"));
        }
        let token = state.auth().issue_token(&user.id)?;
        Ok(Json(AuthResponse { token, user: user.profile() }))
    }
}

mod profile {
    use konnect_common::ConnectionStatus;

    use super::*;

    pub async fn me(Extension(state): Extension<State>, headers: HeaderMap) -> Result<Json<UserProfile>> {
        let me = current_user(&state, &headers)?;
        Ok(Json(state.user(&me)?.profile()))
    }

    pub async fn user(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(user_id): Path<String>,
    ) -> Result<Json<UserProfile>> {
        current_user(&state, &headers)?;
        Ok(Json(state.user(&parse_user_id(&user_id)?)?.profile()))
    }

    pub async fn connections(
        Extension(state): Extension<State>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<UserProfile>>> {
        let me = current_user(&state, &headers)?;
        Ok(Json(profiles(state.connections_of(&me)?)))
    }

    pub async fn connection_requests(
        Extension(state): Extension<State>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<UserProfile>>> {
        let me = current_user(&state, &headers)?;
        Ok(Json(profiles(state.incoming_requests(&me)?)))
    }

    pub async fn connect(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(user_id): Path<String>,
    ) -> Result<Json<MessageResponse>> {
        let me = current_user(&state, &headers)?;
        state.send_connection_request(&me, &parse_user_id(&user_id)?)?;
        Ok(Json(MessageResponse::new("Connection request sent")))
    }

    pub async fn accept(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(user_id): Path<String>,
    ) -> Result<Json<MessageResponse>> {
        let me = current_user(&state, &headers)?;
        let message = match state.accept_connection_request(&me, &parse_user_id(&user_id)?)? {
            Accepted::Connected => "Connection request accepted",
            Accepted::AlreadyConnected => "Already connected",
        };
        Ok(Json(MessageResponse::new(message)))
    }

    pub async fn reject(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(user_id): Path<String>,
    ) -> Result<Json<MessageResponse>> {
        let me = current_user(&state, &headers)?;
        state.reject_connection_request(&me, &parse_user_id(&user_id)?)?;
        Ok(Json(MessageResponse::new("Connection request rejected")))
    }

    pub async fn disconnect(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(user_id): Path<String>,
    ) -> Result<Json<MessageResponse>> {
        let me = current_user(&state, &headers)?;
        state.remove_connection(&me, &parse_user_id(&user_id)?)?;
        Ok(Json(MessageResponse::new("Connection removed")))
    }

    pub async fn connection_status(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(user_id): Path<String>,
    ) -> Result<Json<ConnectionStatus>> {
        let me = current_user(&state, &headers)?;
        Ok(Json(state.connection_status(&me, &parse_user_id(&user_id)?)?))
    }
}

mod notifications {
    use konnect_common::Notification;

    use super::*;

    pub async fn list(
        Extension(state): Extension<State>,
        headers: HeaderMap,
    ) -> Result<Json<Vec<Notification>>> {
        let me = current_user(&state, &headers)?;
        Ok(Json(state.notifications_for(&me)?))
    }

    pub async fn unread_count(
        Extension(state): Extension<State>,
        headers: HeaderMap,
    ) -> Result<Json<UnreadCount>> {
        let me = current_user(&state, &headers)?;
        Ok(Json(UnreadCount { unread_count: state.unread_count(&me)? }))
    }

    pub async fn mark_read(
        Extension(state): Extension<State>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> Result<Json<MessageResponse>> {
        let me = current_user(&state, &headers)?;
        let id = NotificationId::parse(&id).ok_or_else(|| AppError::InvalidId(id.clone()))?;
        state.mark_notification_read(&me, &id)?;
        Ok(Json(MessageResponse::new("Notification marked as read")))
    }

    pub async fn mark_all_read(
        Extension(state): Extension<State>,
        headers: HeaderMap,
    ) -> Result<Json<MessageResponse>> {
        let me = current_user(&state, &headers)?;
        let flipped = state.mark_all_notifications_read(&me)?;
        Ok(Json(MessageResponse::new(format!("{flipped} notifications marked as read"))))
    }
}
