use axum::{
    Extension, Json,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::app::AppState;
use crate::backend::{AuthUser, Backend};
use crate::error::{AppError, StatusResponse};
use crate::model::UserName;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// Session duration in seconds (24 hours)
const SESSION_DURATION: u64 = 24 * 60 * 60;

/// Shown when an account has neither a user name nor an email
pub const DEFAULT_DISPLAY_NAME: &str = "用戶";

/// Session data for an authenticated account
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Account id from the authentication service
    pub user_id: String,

    /// Account email
    pub email: String,

    /// When this session expires
    pub expires_at: SystemTime,
}

/// Active sessions, keyed by session id
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    duration: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::with_duration(Duration::from_secs(SESSION_DURATION))
    }
}

impl SessionStore {
    pub fn with_duration(duration: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            duration,
        }
    }

    /// Create a new session for an account
    ///
    /// # Arguments
    /// * `user` - The account that just signed in
    ///
    /// # Returns
    /// * `String` - A unique session ID
    pub fn create(&self, user: &AuthUser) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user.id.clone(),
            email: user.email.clone(),
            expires_at: SystemTime::now() + self.duration,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.expires_at > SystemTime::now());
        sessions.insert(session_id.clone(), session);

        session_id
    }

    /// Look up a session that has not expired yet
    pub fn validate(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());

        sessions
            .get(session_id)
            .filter(|session| session.expires_at > SystemTime::now())
            .cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration form
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Must repeat `password`
    #[serde(default)]
    pub confirm_password: String,
}

/// Login form; `account` is either an email or a registered user name
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsernameForm {
    #[serde(default)]
    pub user: String,
}

/// The signed-in account as shown in the header bar
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Me {
    pub email: String,
    pub display_name: String,
}

impl RegisterForm {
    fn validate(&self) -> Result<(), AppError> {
        if self.email.trim().is_empty()
            || self.password.is_empty()
            || self.confirm_password.is_empty()
        {
            return Err(AppError::BadRequest(
                "email, password and confirmation are required".to_string(),
            ));
        }
        if self.password != self.confirm_password {
            return Err(AppError::BadRequest("passwords do not match".to_string()));
        }
        Ok(())
    }
}

/// Resolve a login account to an email
///
/// Accounts without `@` are user names and are looked up in the user-name table.
pub async fn resolve_account(backend: &dyn Backend, account: &str) -> Result<String, AppError> {
    let account = account.trim();
    if account.contains('@') {
        return Ok(account.to_string());
    }
    match backend.user_name_by_user(account).await? {
        Some(entry) => Ok(entry.email),
        None => Err(AppError::NotFound(format!("user {}", account))),
    }
}

/// Name shown for an account: its user name, else its email, else [`DEFAULT_DISPLAY_NAME`]
pub async fn display_name(backend: &dyn Backend, email: &str) -> String {
    match backend.user_name_by_email(email).await {
        Ok(Some(entry)) if !entry.user.is_empty() => return entry.user,
        Ok(_) => {}
        Err(e) => warn!("user name lookup for {} failed: {}", email, e),
    }
    if email.is_empty() {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        email.to_string()
    }
}

fn session_cookie(value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .build()
}

/// Handle account registration
///
/// # Returns
/// * `Result<Json<StatusResponse>, AppError>` - Confirmation, or 400 when the form is incomplete
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(form): Json<RegisterForm>,
) -> Result<Json<StatusResponse>, AppError> {
    form.validate()?;
    let user = state.backend.sign_up(form.email.trim(), &form.password).await?;
    info!("registered {}", user.email);
    Ok(Json(StatusResponse::ok(format!("registered {}", user.email))))
}

/// Handle login
///
/// Processes the login form, creates a session and stores its id in an
/// HTTP-only cookie.
///
/// # Arguments
/// * `jar` - Cookie jar for storing the session cookie
/// * `form` - Account (email or user name) and password
///
/// # Returns
/// * `Result<(CookieJar, Json<Me>), AppError>` - The signed-in account, or 401/404
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(form): Json<LoginForm>,
) -> Result<(CookieJar, Json<Me>), AppError> {
    if form.account.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::BadRequest(
            "account and password are required".to_string(),
        ));
    }
    let backend = state.backend.as_ref();
    let email = resolve_account(backend, &form.account).await?;
    let user = backend.sign_in(&email, &form.password).await?;

    let session_id = state.sessions.create(&user);
    info!("{} signed in", user.email);
    let me = Me {
        display_name: display_name(backend, &user.email).await,
        email: user.email,
    };
    Ok((jar.add(session_cookie(session_id)), Json(me)))
}

/// Handle logout
///
/// Drops the session and clears the session cookie.
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<StatusResponse>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(StatusResponse::ok("logged out")))
}

/// User names offered by the login form's autocomplete (email-like names are left out)
pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    let names = state.backend.list_user_names().await?;
    Ok(Json(
        names
            .into_iter()
            .filter(UserName::is_plain_name)
            .map(|entry| entry.user)
            .collect(),
    ))
}

pub async fn handle_me(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Json<Me> {
    Json(Me {
        display_name: display_name(state.backend.as_ref(), &session.email).await,
        email: session.email,
    })
}

/// Register a user name for the signed-in account
///
/// # Errors
/// * 400 when the name is empty
/// * 409 when another account already uses it
pub async fn handle_set_username(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(form): Json<UsernameForm>,
) -> Result<Json<Me>, AppError> {
    let user = form.user.trim();
    if user.is_empty() {
        return Err(AppError::BadRequest("user name is required".to_string()));
    }
    if state.backend.user_name_by_user(user).await?.is_some() {
        return Err(AppError::Conflict(format!("user name {} is taken", user)));
    }
    state
        .backend
        .create_user_name(&UserName {
            user: user.to_string(),
            email: session.email.clone(),
        })
        .await?;
    info!("{} is now {}", session.email, user);

    Ok(Json(Me {
        email: session.email,
        display_name: user.to_string(),
    }))
}

/// Authentication middleware
///
/// Lets the request through when its session cookie is valid and attaches the
/// [`Session`] to the request; answers 401 otherwise.
///
/// # Arguments
/// * `jar` - Cookie jar containing session information
/// * `request` - The incoming request
/// * `next` - Next middleware in the chain
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(session_cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.validate(session_cookie.value()) {
            request.extensions_mut().insert(session);
            return next.run(request).await;
        }
    }

    AppError::Unauthorized("login required".to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;

    fn user() -> AuthUser {
        AuthUser {
            id: "u-1".to_string(),
            email: "amy@example.com".to_string(),
        }
    }

    #[test]
    fn sessions_validate_until_removed() {
        let store = SessionStore::default();
        let id = store.create(&user());
        let session = store.validate(&id).unwrap();
        assert_eq!(session.email, "amy@example.com");
        assert!(store.validate("unknown").is_none());

        store.remove(&id);
        assert!(store.validate(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn expired_sessions_are_rejected() {
        let store = SessionStore::with_duration(Duration::ZERO);
        let id = store.create(&user());
        assert!(store.validate(&id).is_none());
    }

    #[test]
    fn register_form_requires_matching_passwords() {
        let form = RegisterForm {
            email: "amy@example.com".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret2".to_string(),
        };
        assert!(matches!(form.validate(), Err(AppError::BadRequest(_))));

        let form = RegisterForm {
            email: " ".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        };
        assert!(form.validate().is_err());
    }

    #[tokio::test]
    async fn display_name_prefers_user_name() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path(), "/storage").unwrap();
        backend
            .create_user_name(&UserName {
                user: "amy".to_string(),
                email: "amy@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(display_name(&backend, "amy@example.com").await, "amy");
        assert_eq!(
            display_name(&backend, "bob@example.com").await,
            "bob@example.com"
        );
        assert_eq!(display_name(&backend, "").await, DEFAULT_DISPLAY_NAME);
    }

    #[tokio::test]
    async fn user_names_resolve_to_emails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path(), "/storage").unwrap();
        backend
            .create_user_name(&UserName {
                user: "amy".to_string(),
                email: "amy@example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            resolve_account(&backend, "amy").await.unwrap(),
            "amy@example.com"
        );
        assert_eq!(
            resolve_account(&backend, "x@y.z").await.unwrap(),
            "x@y.z"
        );
        assert!(matches!(
            resolve_account(&backend, "nobody").await,
            Err(AppError::NotFound(_))
        ));
    }
}
