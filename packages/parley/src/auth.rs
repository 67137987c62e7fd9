//! Authentication: password accounts with cookie sessions.
//!
//! `auth_middleware` resolves the `parley_session` cookie into an [`AuthUser`]
//! request extension. Public routes (health, metrics, signup/login/logout and
//! the WebSocket endpoint, which verifies its own handshake) pass through.

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use parley_presence::{PresenceError, UserId, VerifyIdentity};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::UserInfo;
use crate::repository::ChatRepository;

pub const SESSION_COOKIE: &str = "parley_session";
const MIN_PASSWORD_LEN: usize = 6;

// =============================================================================
// AuthUser
// =============================================================================

/// Authenticated user, populated by [`auth_middleware`] from the session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserInfo,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

// =============================================================================
// Auth State (shared across middleware and handlers)
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub repository: Arc<ChatRepository>,
    pub auth_config: Arc<AuthConfig>,
}

/// Read the raw session token from the request cookies.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn session_cookie(token: String, config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(config.secure_cookies)
        .build()
}

// =============================================================================
// Auth Middleware
// =============================================================================

pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if is_public_route(&path) {
        return next.run(request).await;
    }

    let Some(token) = session_token(request.headers()) else {
        return ApiError::Unauthorized("Unauthorized - No Token Provided".into()).into_response();
    };

    match auth_state.repository.get_session_user(&token).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(AuthUser { user: user.into() });
            next.run(request).await
        }
        Ok(None) => {
            debug!("Rejected request to {} with invalid session", path);
            ApiError::Unauthorized("Unauthorized - Invalid Token".into()).into_response()
        }
        Err(e) => ApiError::Internal(e).into_response(),
    }
}

fn is_public_route(path: &str) -> bool {
    path == "/health"
        || path.starts_with("/health/")
        || path == "/metrics"
        || path == "/api/ws"
        || path == "/api/auth/signup"
        || path == "/api/auth/login"
        || path == "/api/auth/logout"
}

// =============================================================================
// Handshake verification for real-time connections
// =============================================================================

/// Resolves a WebSocket handshake's session cookie to a user.
#[derive(Clone)]
pub struct SessionVerifier {
    repository: Arc<ChatRepository>,
}

impl SessionVerifier {
    pub fn new(repository: Arc<ChatRepository>) -> Self {
        Self { repository }
    }
}

impl VerifyIdentity for SessionVerifier {
    type Credentials = Option<String>;

    async fn verify_identity(&self, token: &Option<String>) -> Result<UserId, PresenceError> {
        let Some(token) = token else {
            return Err(PresenceError::AuthenticationFailure(
                "no session cookie".into(),
            ));
        };
        match self.repository.get_session_user(token).await {
            Ok(Some(user)) => Ok(UserId::new(user.id)),
            Ok(None) => Err(PresenceError::AuthenticationFailure(
                "invalid or expired session".into(),
            )),
            Err(e) => {
                error!("Session lookup failed during handshake: {}", e);
                Err(PresenceError::AuthenticationFailure(
                    "session lookup failed".into(),
                ))
            }
        }
    }
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))
    }
}

// =============================================================================
// Routes
// =============================================================================

pub fn auth_routes() -> Router<AuthState> {
    Router::new()
        .route("/api/auth/signup", post(signup_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/update-profile", put(update_profile_handler))
        .route("/api/auth/check", get(check_handler))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    full_name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

async fn signup_handler(
    State(state): State<AuthState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<UserInfo>)> {
    if !state.auth_config.allow_registration {
        return Err(ApiError::Forbidden("Registration is disabled".into()));
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(full_name), Some(email), Some(password)) = (
        non_empty(req.full_name),
        non_empty(req.email),
        non_empty(req.password),
    ) else {
        return Err(ApiError::BadRequest("All fields are required".into()));
    };

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if state.repository.get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("Email already exists".into()));
    }

    let user = state
        .repository
        .create_user(&email, &full_name, &password)
        .await?;
    let token = state
        .repository
        .create_session(&user.id, state.auth_config.session_ttl)
        .await?;

    info!(user = %user.id, "New account created");
    let jar = jar.add(session_cookie(token, &state.auth_config));
    Ok((StatusCode::CREATED, jar, Json(user.into())))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login_handler(
    State(state): State<AuthState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<UserInfo>)> {
    let Some(user) = state
        .repository
        .verify_user_password(&req.email, &req.password)
        .await?
    else {
        return Err(ApiError::BadRequest("Invalid credentials".into()));
    };

    let token = state
        .repository
        .create_session(&user.id, state.auth_config.session_ttl)
        .await?;

    debug!(user = %user.id, "Logged in");
    let jar = jar.add(session_cookie(token, &state.auth_config));
    Ok((jar, Json(user.into())))
}

async fn logout_handler(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<serde_json::Value>)> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.repository.delete_session(cookie.value()).await?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((
        jar,
        Json(serde_json::json!({ "message": "Logged out successfully" })),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    profile_pic: Option<String>,
}

async fn update_profile_handler(
    State(state): State<AuthState>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<UserInfo>> {
    let Some(profile_pic) = req.profile_pic.filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::BadRequest("Profile pic is required".into()));
    };

    let user = state
        .repository
        .update_profile_pic(auth.id(), &profile_pic)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user.into()))
}

async fn check_handler(auth: AuthUser) -> Json<UserInfo> {
    Json(auth.user)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::test_helpers::{seed_user, test_repository};
    use axum::http::{Method, Request, header};
    use std::time::Duration;
    use tower::ServiceExt;

    pub(crate) fn test_auth_config() -> AuthConfig {
        AuthConfig {
            session_ttl: Duration::from_secs(3600),
            allow_registration: true,
            secure_cookies: false,
        }
    }

    async fn test_state() -> AuthState {
        AuthState {
            repository: Arc::new(test_repository().await),
            auth_config: Arc::new(test_auth_config()),
        }
    }

    fn app(state: AuthState) -> Router {
        auth_routes()
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_cookie(mut req: Request<Body>, token: &str) -> Request<Body> {
        req.headers_mut().insert(
            header::COOKIE,
            format!("{SESSION_COOKIE}={token}").parse().unwrap(),
        );
        req
    }

    /// Pull the session token out of a Set-Cookie header.
    fn cookie_token(response: &Response) -> Option<String> {
        let raw = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
        let cookie = Cookie::parse(raw.to_string()).ok()?;
        Some(cookie.value().to_string())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn public_routes() {
        assert!(is_public_route("/health"));
        assert!(is_public_route("/health/ready"));
        assert!(is_public_route("/metrics"));
        assert!(is_public_route("/api/ws"));
        assert!(is_public_route("/api/auth/login"));
        assert!(!is_public_route("/api/auth/check"));
        assert!(!is_public_route("/api/auth/update-profile"));
        assert!(!is_public_route("/api/messages/users"));
    }

    #[test]
    fn session_cookie_flags() {
        let mut config = test_auth_config();
        config.secure_cookies = true;
        let cookie = session_cookie("abc".into(), &config);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn session_token_reads_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; parley_session=tok123".parse().unwrap(),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok123"));
        assert!(session_token(&HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn signup_sets_cookie_and_returns_user() {
        let state = test_state().await;
        let response = app(state.clone())
            .oneshot(json_request(
                Method::POST,
                "/api/auth/signup",
                serde_json::json!({
                    "fullName": "Ada Lovelace",
                    "email": "ada@example.com",
                    "password": "engine"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let token = cookie_token(&response).expect("session cookie");
        let body = body_json(response).await;
        assert_eq!(body["fullName"], "Ada Lovelace");
        assert!(body.get("passwordHash").is_none());

        let user = state.repository.get_session_user(&token).await.unwrap();
        assert_eq!(user.unwrap().email, "ada@example.com");
    }

    #[tokio::test]
    async fn signup_validation() {
        let state = test_state().await;
        seed_user(&state.repository, "taken@example.com", "Taken").await;

        let cases = [
            (
                serde_json::json!({"fullName": "A", "email": "a@example.com"}),
                StatusCode::BAD_REQUEST,
            ),
            (
                serde_json::json!({"fullName": "A", "email": "a@example.com", "password": "12345"}),
                StatusCode::BAD_REQUEST,
            ),
            (
                serde_json::json!({"fullName": "A", "email": "taken@example.com", "password": "123456"}),
                StatusCode::CONFLICT,
            ),
        ];
        for (body, expected) in cases {
            let response = app(state.clone())
                .oneshot(json_request(Method::POST, "/api/auth/signup", body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "body: {body}");
            assert!(body_json(response).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn signup_disabled() {
        let mut state = test_state().await;
        let mut config = test_auth_config();
        config.allow_registration = false;
        state.auth_config = Arc::new(config);

        let response = app(state)
            .oneshot(json_request(
                Method::POST,
                "/api/auth/signup",
                serde_json::json!({"fullName": "A", "email": "a@example.com", "password": "123456"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn login_success_and_failure() {
        let state = test_state().await;
        seed_user(&state.repository, "ada@example.com", "Ada").await;

        let ok = app(state.clone())
            .oneshot(json_request(
                Method::POST,
                "/api/auth/login",
                serde_json::json!({"email": "ada@example.com", "password": "password123"}),
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(cookie_token(&ok).is_some());

        let bad = app(state)
            .oneshot(json_request(
                Method::POST,
                "/api/auth/login",
                serde_json::json!({"email": "ada@example.com", "password": "wrong-password"}),
            ))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(bad).await["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn check_requires_session() {
        let state = test_state().await;
        let user = seed_user(&state.repository, "ada@example.com", "Ada").await;
        let token = state
            .repository
            .create_session(&user.id, Duration::from_secs(60))
            .await
            .unwrap();

        let anonymous = app(state.clone())
            .oneshot(get("/api/auth/check"))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let bogus = app(state.clone())
            .oneshot(with_cookie(get("/api/auth/check"), "bogus"))
            .await
            .unwrap();
        assert_eq!(bogus.status(), StatusCode::UNAUTHORIZED);

        let authed = app(state)
            .oneshot(with_cookie(get("/api/auth/check"), &token))
            .await
            .unwrap();
        assert_eq!(authed.status(), StatusCode::OK);
        assert_eq!(body_json(authed).await["id"], user.id);
    }

    #[tokio::test]
    async fn logout_invalidates_session() {
        let state = test_state().await;
        let user = seed_user(&state.repository, "ada@example.com", "Ada").await;
        let token = state
            .repository
            .create_session(&user.id, Duration::from_secs(60))
            .await
            .unwrap();

        let response = app(state.clone())
            .oneshot(with_cookie(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/auth/logout")
                    .body(Body::empty())
                    .unwrap(),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.repository.get_session_user(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_profile() {
        let state = test_state().await;
        let user = seed_user(&state.repository, "ada@example.com", "Ada").await;
        let token = state
            .repository
            .create_session(&user.id, Duration::from_secs(60))
            .await
            .unwrap();

        let missing = app(state.clone())
            .oneshot(with_cookie(
                json_request(Method::PUT, "/api/auth/update-profile", serde_json::json!({})),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let ok = app(state)
            .oneshot(with_cookie(
                json_request(
                    Method::PUT,
                    "/api/auth/update-profile",
                    serde_json::json!({"profilePic": "https://img.example/ada.png"}),
                ),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await["profilePic"], "https://img.example/ada.png");
    }

    #[tokio::test]
    async fn session_verifier_outcomes() {
        let repository = Arc::new(test_repository().await);
        let user = seed_user(&repository, "ada@example.com", "Ada").await;
        let token = repository
            .create_session(&user.id, Duration::from_secs(60))
            .await
            .unwrap();
        let verifier = SessionVerifier::new(repository);

        let verified = verifier.verify_identity(&Some(token)).await.unwrap();
        assert_eq!(verified.as_str(), user.id);

        let missing = verifier.verify_identity(&None).await.unwrap_err();
        assert_eq!(missing.error_code(), "authentication_failure");

        let bogus = verifier
            .verify_identity(&Some("bogus".into()))
            .await
            .unwrap_err();
        assert!(matches!(bogus, PresenceError::AuthenticationFailure(_)));
    }
}
