//! Authentication endpoints and the request-identity extractor.
//!
//! A successful login issues a signed bearer token carrying the session id.
//! The token is returned in the body and also set as an httpOnly cookie so
//! browser clients never touch it from script. Every authenticated request
//! revalidates the server-side session, which slides its expiry; a signed
//! token whose session is gone is worthless.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use super::error::ApiError;
use crate::auth::AuthError;
use crate::models::{Session, UserAccount, UserResponse};
use crate::security::EventType;
use crate::AppState;

/// Name of the cookie carrying the bearer token.
pub const TOKEN_COOKIE: &str = "visitdesk_token";

/// Claims embedded in the bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    /// Server-side session this token is bound to.
    pub session_id: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// The authenticated identity behind a request: the account plus the live
/// session the token is bound to.
pub struct CurrentUser {
    pub user: UserAccount,
    pub session: Session,
}

/// [`CurrentUser`] that is additionally an approved admin.
pub struct AdminUser(pub CurrentUser);

fn encode_token(state: &AppState, claims: &Claims) -> Result<String, ApiError> {
    jsonwebtoken::encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(state.config.auth.token_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to sign token");
        ApiError::internal("An internal error occurred")
    })
}

fn decode_token(state: &AppState, token: &str) -> Option<Claims> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.config.auth.token_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Bearer token from the auth cookie, falling back to the Authorization
/// header for non-browser clients.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(TOKEN_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

/// Client IP as reported by the reverse proxy, falling back to "unknown".
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Fingerprint for audit entries, so raw session ids never hit the log.
fn session_fingerprint(session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

fn auth_cookie(token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(TOKEN_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie
}

fn clear_auth_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(TOKEN_COOKIE, "");
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.make_removal();
    cookie
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let ip = client_ip(&parts.headers);
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let Some(claims) = decode_token(state, &token) else {
            state
                .monitor
                .record(
                    EventType::InvalidSession,
                    serde_json::json!({ "ip": ip, "reason": "token rejected" }),
                )
                .await;
            return Err(ApiError::unauthorized("Authentication required"));
        };

        let Some(session) = state.sessions.get(&claims.session_id).await? else {
            state
                .monitor
                .record(
                    EventType::InvalidSession,
                    serde_json::json!({
                        "ip": ip,
                        "session": session_fingerprint(&claims.session_id),
                        "reason": "session missing or expired",
                    }),
                )
                .await;
            return Err(ApiError::unauthorized("Authentication required"));
        };

        // A validly signed token naming someone else's session is a hijack
        // indicator, not a stale login. Both identity fields must agree.
        if session.user_id != claims.sub || session.email != claims.email {
            state
                .monitor
                .record(
                    EventType::SessionMismatch,
                    serde_json::json!({
                        "ip": ip,
                        "token_user": claims.sub,
                        "token_email": claims.email,
                        "session_user": session.user_id,
                        "session_email": session.email,
                        "session": session_fingerprint(&session.id),
                    }),
                )
                .await;
            return Err(ApiError::unauthorized("Authentication required"));
        }

        let user = state
            .accounts
            .find_by_id(&session.user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        Ok(CurrentUser { user, session })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        if !current.user.is_admin {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(current))
    }
}

/// Login endpoint
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let ip = client_ip(&headers);
    let agent = user_agent(&headers);

    let user = match state
        .accounts
        .authenticate(&request.email, &request.password)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            match &e {
                AuthError::AccountLocked { until } => {
                    state
                        .monitor
                        .record(
                            EventType::AccountLocked,
                            serde_json::json!({
                                "email": request.email.to_lowercase(),
                                "ip": ip,
                                "locked_until": until,
                            }),
                        )
                        .await;
                }
                // Only credential-class failures count toward the per-IP
                // bucket; infrastructure errors are not suspicion.
                AuthError::InvalidCredentials | AuthError::NotFound | AuthError::NotApproved => {
                    state
                        .monitor
                        .track_failed_login(&request.email, &ip, &agent)
                        .await;
                }
                _ => {}
            }
            return Err(e.into());
        }
    };

    state
        .monitor
        .track_successful_login(&user.email, &ip, &agent)
        .await;

    let session = state
        .sessions
        .create(&user.id, &user.email, &agent, &ip)
        .await?;

    let now = Utc::now();
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        is_admin: user.is_admin,
        session_id: session.id.clone(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(state.config.auth.token_minutes)).timestamp(),
    };
    let token = encode_token(&state, &claims)?;

    info!(email = %user.email, "User logged in");

    Ok((
        jar.add(auth_cookie(token.clone())),
        Json(LoginResponse {
            token,
            user: UserResponse::from(user),
        }),
    ))
}

/// Logout endpoint
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    current: CurrentUser,
) -> Result<(CookieJar, StatusCode), ApiError> {
    state.sessions.destroy(&current.session.id).await?;
    state
        .monitor
        .record(
            EventType::Logout,
            serde_json::json!({ "email": current.user.email }),
        )
        .await;
    Ok((jar.add(clear_auth_cookie()), StatusCode::NO_CONTENT))
}

/// Self-service registration. The account stays unusable until an admin
/// approves it.
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    if request.email.is_empty() || !request.email.contains('@') {
        return Err(ApiError::validation_field("email", "Invalid email address"));
    }
    if request.name.trim().is_empty() {
        return Err(ApiError::validation_field("name", "Name is required"));
    }

    let user = state
        .accounts
        .register(&request.email, &request.password, &request.name)
        .await?;

    state
        .monitor
        .record(
            EventType::AccountRegistered,
            serde_json::json!({ "email": user.email }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Current user profile
///
/// GET /api/auth/me
pub async fn me(current: CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(current.user))
}

/// Change the current user's password
///
/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .accounts
        .change_password(
            &current.user.email,
            &request.current_password,
            &request.new_password,
        )
        .await?;

    state
        .monitor
        .record(
            EventType::PasswordChanged,
            serde_json::json!({ "email": user.email }),
        )
        .await;

    Ok(Json(UserResponse::from(user)))
}

/// List all accounts (admin)
///
/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.accounts.list().await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

/// Approve a pending account (admin)
///
/// POST /api/users/:id/approve
pub async fn approve_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let target = state
        .accounts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    let user = state.accounts.approve(&target.email).await?;

    state
        .monitor
        .record(
            EventType::AccountApproved,
            serde_json::json!({ "email": user.email, "approved_by": admin.user.email }),
        )
        .await;

    Ok(Json(UserResponse::from(user)))
}

/// Delete an account and revoke its sessions (admin)
///
/// DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let target = state
        .accounts
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    let deleted = state.accounts.delete_account(&target.email).await?;
    state.sessions.destroy_all_for_user(&deleted.id).await?;

    state
        .monitor
        .record(
            EventType::AccountDeleted,
            serde_json::json!({ "email": deleted.email, "deleted_by": admin.user.email }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccountManager, SessionManager};
    use crate::config::Config;
    use crate::security::{AuditEntry, SecurityMonitor};
    use crate::store::RecordStore;

    fn app_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let accounts = Arc::new(AccountManager::new(store.clone()).unwrap());
        let sessions = Arc::new(SessionManager::new(store.clone(), 30));
        let monitor = Arc::new(SecurityMonitor::new(config.audit_log_path(), 10));
        Arc::new(AppState::new(
            config, store, accounts, sessions, monitor, None,
        ))
    }

    fn read_audit(state: &AppState) -> Vec<AuditEntry> {
        // The log file does not exist until the first event lands.
        let content =
            std::fs::read_to_string(state.config.audit_log_path()).unwrap_or_default();
        content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn approved_user(state: &AppState, email: &str) -> crate::models::UserAccount {
        state
            .accounts
            .register(email, "Passw0rd!", "Test User")
            .await
            .unwrap();
        state.accounts.approve(email).await.unwrap()
    }

    #[tokio::test]
    async fn wrong_password_login_lands_in_the_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(&dir);
        approved_user(&state, "bob@example.com").await;

        let result = login(
            State(state.clone()),
            CookieJar::new(),
            HeaderMap::new(),
            Json(LoginRequest {
                email: "bob@example.com".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());

        let entries = read_audit(&state);
        assert!(entries
            .iter()
            .any(|e| e.event_type == EventType::FailedLogin));
    }

    #[tokio::test]
    async fn store_failure_during_login_is_not_counted_as_suspicion() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(&dir);

        // A directory where the collection file should be makes every read
        // of the users collection fail with an infrastructure error.
        std::fs::create_dir(dir.path().join("users.json")).unwrap();

        let result = login(
            State(state.clone()),
            CookieJar::new(),
            HeaderMap::new(),
            Json(LoginRequest {
                email: "bob@example.com".to_string(),
                password: "Passw0rd!".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());

        let entries = read_audit(&state);
        assert!(!entries
            .iter()
            .any(|e| e.event_type == EventType::FailedLogin));
    }

    #[tokio::test]
    async fn token_whose_email_disagrees_with_the_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(&dir);
        let user = approved_user(&state, "bob@example.com").await;
        let session = state
            .sessions
            .create(&user.id, &user.email, "test-agent", "10.0.0.1")
            .await
            .unwrap();

        let now = Utc::now();
        let mut claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            is_admin: false,
            session_id: session.id.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::minutes(60)).timestamp(),
        };

        // A faithful token passes.
        let token = encode_token(&state, &claims).unwrap();
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/api/auth/me")
            .header("Authorization", format!("Bearer {token}"))
            .body(())
            .unwrap()
            .into_parts();
        assert!(CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .is_ok());

        // Same user id and session, different email: hijack indicator.
        claims.email = "mallory@example.com".to_string();
        let token = encode_token(&state, &claims).unwrap();
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/api/auth/me")
            .header("Authorization", format!("Bearer {token}"))
            .body(())
            .unwrap()
            .into_parts();
        assert!(CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .is_err());

        assert!(state
            .monitor
            .alerts()
            .iter()
            .any(|a| a.event_type == EventType::SessionMismatch));
    }
}
