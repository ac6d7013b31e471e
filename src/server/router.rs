//! HTTP router for dvarapala
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks
//! - Login (`POST /users/auth`)
//! - User and app management behind the authorization gate

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::middleware::{auth_middleware, logging_middleware, AuthGate};
use super::ratelimit::{rate_limit_middleware, RateLimitState, RateLimiter};
use super::response::{json, ApiError};
use crate::accounts::AccountManager;
use crate::auth::{Authenticator, PasswordHasher, TokenManager, VerifiedIdentity};
use crate::database::{CredentialStore, Database};
use crate::error::AuthError;
use crate::models::{
    CreateAppRequest, CreateUserRequest, LoginRequest, LoginResponse, UpdateAppRequest,
    UpdateUserRequest,
};
use crate::otel::{LoginOutcome, Metrics};

/// Shared application state
pub struct AppState<D: Database + CredentialStore + 'static> {
    /// App and user management
    pub accounts: Arc<AccountManager<D>>,

    /// Login flow
    pub authenticator: Arc<Authenticator<D>>,

    /// Authorization gate for protected routes
    pub gate: AuthGate,

    /// Per-client rate limiter, if enabled
    pub rate_limiter: Option<Arc<RateLimiter>>,

    pub metrics: Arc<Metrics>,
}

impl<D: Database + CredentialStore + 'static> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            accounts: Arc::clone(&self.accounts),
            authenticator: Arc::clone(&self.authenticator),
            gate: self.gate.clone(),
            rate_limiter: self.rate_limiter.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<D: Database + CredentialStore + 'static> AppState<D> {
    /// Wire the services around one store
    pub fn new(
        db: Arc<D>,
        tokens: Arc<TokenManager>,
        hasher: PasswordHasher,
        metrics: Arc<Metrics>,
    ) -> Self {
        let accounts = AccountManager::new(Arc::clone(&db), hasher.clone());
        let authenticator = Authenticator::new(db, hasher, Arc::clone(&tokens));
        let gate = AuthGate::new(tokens).with_metrics(Arc::clone(&metrics));

        Self {
            accounts: Arc::new(accounts),
            authenticator: Arc::new(authenticator),
            gate,
            rate_limiter: None,
            metrics,
        }
    }

    /// Enable per-client rate limiting
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Query string of `GET /users`
#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub app_id: Option<i64>,
}

/// Build the main application router
///
/// `GET /health` and `POST /users/auth` are public; everything else sits
/// behind the authorization gate.
pub fn build_router<D: Database + CredentialStore + 'static>(state: AppState<D>) -> Router {
    let protected = Router::new()
        .route(
            "/users",
            post(create_user_handler::<D>).get(list_users_handler::<D>),
        )
        .route("/users/me", get(me_handler::<D>))
        .route(
            "/users/:id",
            get(get_user_handler::<D>)
                .post(update_user_handler::<D>)
                .put(update_user_handler::<D>)
                .delete(delete_user_handler::<D>),
        )
        .route(
            "/apps",
            post(create_app_handler::<D>).get(list_apps_handler::<D>),
        )
        .route(
            "/apps/:id",
            get(get_app_handler::<D>)
                .put(update_app_handler::<D>)
                .delete(delete_app_handler::<D>),
        )
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            auth_middleware,
        ));

    let metrics = Arc::clone(&state.metrics);
    let rate_limit = state.rate_limiter.clone().map(|limiter| RateLimitState {
        limiter,
        metrics: Arc::clone(&metrics),
    });

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/users/auth", post(login_handler::<D>))
        .merge(protected)
        .with_state(state)
        .layer(middleware::from_fn_with_state(metrics, logging_middleware));

    match rate_limit {
        Some(rate_limit) => router.layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        )),
        None => router,
    }
}

// =============================================================================
// Extraction helpers
// =============================================================================

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected request body");
        ApiError::BadRequest("invalid request body".to_string())
    })
}

fn valid_body<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    let body = json_body(payload)?;
    body.validate()?;
    Ok(body)
}

fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ApiError::BadRequest("invalid id".to_string()))
}

// =============================================================================
// Health and Login Handlers
// =============================================================================

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    json(
        StatusCode::OK,
        HealthResponse {
            status: "UP".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}

/// Login handler
///
/// Unknown email and wrong password produce the same 401.
async fn login_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = valid_body(payload)?;

    let outcome = match state.authenticator.authenticate(&req.email, &req.password).await {
        Ok(outcome) => outcome,
        Err(AuthError::InvalidCredentials) => {
            state.metrics.record_login(LoginOutcome::InvalidCredentials);
            return Err(ApiError::InvalidCredentials);
        }
        Err(e) => {
            state.metrics.record_login(LoginOutcome::Error);
            return Err(e.into());
        }
    };

    let user = state.accounts.get_user(outcome.user_id).await.map_err(|e| {
        state.metrics.record_login(LoginOutcome::Error);
        ApiError::from(e)
    })?;

    let expires_at = outcome.expires_at().ok_or_else(|| {
        state.metrics.record_login(LoginOutcome::Error);
        tracing::error!(user_id = outcome.user_id, "Issued token has no valid expiry");
        ApiError::Internal
    })?;

    state.metrics.record_login(LoginOutcome::Success);

    Ok(json(
        StatusCode::OK,
        LoginResponse {
            token: outcome.token,
            expires_at,
            user,
        },
    ))
}

// =============================================================================
// User Handlers
// =============================================================================

/// Create user handler
async fn create_user_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = valid_body(payload)?;
    let user = state.accounts.create_user(req).await?;
    Ok(json(StatusCode::CREATED, user))
}

/// List users handler, optionally filtered by app
async fn list_users_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|_| ApiError::BadRequest("invalid query".to_string()))?;
    let users = state.accounts.list_users(query.app_id).await?;
    Ok(json(StatusCode::OK, users))
}

/// Current user handler
async fn me_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    identity: VerifiedIdentity,
) -> Result<Response, ApiError> {
    if identity.user_id().is_none() {
        tracing::warn!(subject = %identity.subject, "Token subject is not a user ID");
        return Err(ApiError::Unauthorized);
    }

    let record = state
        .authenticator
        .resolve(&identity)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let user = state.accounts.get_user(record.id).await?;
    Ok(json(StatusCode::OK, user))
}

/// Get user handler
async fn get_user_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let user = state.accounts.get_user(path_id(path)?).await?;
    Ok(json(StatusCode::OK, user))
}

/// Update user handler (partial)
async fn update_user_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = path_id(path)?;
    let req = valid_body(payload)?;
    let user = state.accounts.update_user(id, req).await?;
    Ok(json(StatusCode::OK, user))
}

/// Delete user handler
async fn delete_user_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    state.accounts.delete_user(path_id(path)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// App Handlers
// =============================================================================

/// Create app handler
async fn create_app_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    payload: Result<Json<CreateAppRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = valid_body(payload)?;
    let app = state.accounts.create_app(req).await?;
    Ok(json(StatusCode::CREATED, app))
}

/// List apps handler
async fn list_apps_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
) -> Result<Response, ApiError> {
    let apps = state.accounts.list_apps().await?;
    Ok(json(StatusCode::OK, apps))
}

/// Get app handler
async fn get_app_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let app = state.accounts.get_app(path_id(path)?).await?;
    Ok(json(StatusCode::OK, app))
}

/// Update app handler (partial)
async fn update_app_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateAppRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = path_id(path)?;
    let req = valid_body(payload)?;
    let app = state.accounts.update_app(id, req).await?;
    Ok(json(StatusCode::OK, app))
}

/// Delete app handler, removing its users too
async fn delete_app_handler<D: Database + CredentialStore + 'static>(
    State(state): State<AppState<D>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    state.accounts.delete_app(path_id(path)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use axum::http::{header, HeaderValue};
    use axum_test::TestServer;
    use serde_json::{json as body, Value};
    use std::time::Duration;

    const PASSWORD: &str = "correct horse";

    struct Harness {
        server: TestServer,
        tokens: Arc<TokenManager>,
    }

    impl Harness {
        fn bearer(&self, subject: &str) -> HeaderValue {
            let issued = self.tokens.issue(subject).unwrap();
            format!("Bearer {}", issued.token).parse().unwrap()
        }
    }

    async fn create_harness() -> Harness {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let tokens =
            Arc::new(TokenManager::new("router-test-secret", Duration::from_secs(3600)).unwrap());
        let hasher = PasswordHasher::with_cost(1024, 1).unwrap();
        let state = AppState::new(db, Arc::clone(&tokens), hasher, Arc::new(Metrics::default()));

        Harness {
            server: TestServer::new(build_router(state)).unwrap(),
            tokens,
        }
    }

    /// Create an app and a user in it, returning the user ID
    async fn seed_user(harness: &Harness, email: &str) -> i64 {
        let auth = harness.bearer("0");
        let app: Value = harness
            .server
            .post("/apps")
            .add_header(header::AUTHORIZATION, auth.clone())
            .json(&body!({"name": format!("app-{}", email)}))
            .await
            .json();

        let user: Value = harness
            .server
            .post("/users")
            .add_header(header::AUTHORIZATION, auth)
            .json(&body!({
                "app_id": app["data"]["id"],
                "firstname": "Ada",
                "lastname": "Lovelace",
                "email": email,
                "password": PASSWORD,
            }))
            .await
            .json();

        user["data"]["id"].as_i64().unwrap()
    }

    // Test 1: Health endpoint returns UP
    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let harness = create_harness().await;

        let response = harness.server.get("/health").await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["data"]["status"], "UP");
        assert_eq!(body["status"], 200);
        assert!(!body["data"]["version"].as_str().unwrap().is_empty());
    }

    // Test 2: Login returns a token that opens protected routes
    #[tokio::test]
    async fn test_login_then_me() {
        let harness = create_harness().await;
        let user_id = seed_user(&harness, "ada@example.com").await;

        let response = harness
            .server
            .post("/users/auth")
            .json(&body!({"email": "ada@example.com", "password": PASSWORD}))
            .await;
        response.assert_status_ok();

        let login: Value = response.json();
        assert_eq!(login["data"]["user"]["id"], user_id);
        assert!(login["data"].get("password_hash").is_none());
        let token = login["data"]["token"].as_str().unwrap().to_string();

        let me: Value = harness
            .server
            .get("/users/me")
            .add_header(
                header::AUTHORIZATION,
                format!("Bearer {}", token).parse::<axum::http::HeaderValue>().unwrap(),
            )
            .await
            .json();
        assert_eq!(me["data"]["id"], user_id);
        assert_eq!(me["data"]["email"], "ada@example.com");
    }

    // Test 3: Wrong password and unknown email are indistinguishable
    #[tokio::test]
    async fn test_login_failures_identical() {
        let harness = create_harness().await;
        seed_user(&harness, "ada@example.com").await;

        let wrong_password = harness
            .server
            .post("/users/auth")
            .json(&body!({"email": "ada@example.com", "password": "not the one"}))
            .await;
        let unknown_email = harness
            .server
            .post("/users/auth")
            .json(&body!({"email": "nobody@example.com", "password": "not the one"}))
            .await;

        wrong_password.assert_status(StatusCode::UNAUTHORIZED);
        unknown_email.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password.text(), unknown_email.text());
        assert_eq!(
            wrong_password.json::<Value>(),
            body!({"error": "invalid credentials", "status": 401})
        );
    }

    // Test 4: Protected routes require a token
    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let harness = create_harness().await;

        for path in ["/users", "/users/me", "/users/1", "/apps", "/apps/1"] {
            harness
                .server
                .get(path)
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }
    }

    // Test 5: Malformed body and path are 400
    #[tokio::test]
    async fn test_bad_requests() {
        let harness = create_harness().await;
        let auth = harness.bearer("1");

        harness
            .server
            .post("/users/auth")
            .content_type("application/json")
            .bytes("{not json".into())
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        harness
            .server
            .get("/users/abc")
            .add_header(header::AUTHORIZATION, auth.clone())
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let response = harness
            .server
            .post("/apps")
            .add_header(header::AUTHORIZATION, auth)
            .json(&body!({"name": ""}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    // Test 6: User for an unknown app is 400, duplicate email is 409
    #[tokio::test]
    async fn test_create_user_errors() {
        let harness = create_harness().await;
        seed_user(&harness, "ada@example.com").await;
        let auth = harness.bearer("1");

        let unknown_app = harness
            .server
            .post("/users")
            .add_header(header::AUTHORIZATION, auth.clone())
            .json(&body!({
                "app_id": 999,
                "firstname": "Grace",
                "lastname": "Hopper",
                "email": "grace@example.com",
                "password": PASSWORD,
            }))
            .await;
        unknown_app.assert_status(StatusCode::BAD_REQUEST);

        let duplicate = harness
            .server
            .post("/users")
            .add_header(header::AUTHORIZATION, auth)
            .json(&body!({
                "app_id": 1,
                "firstname": "Ada",
                "lastname": "Again",
                "email": "ADA@example.com",
                "password": PASSWORD,
            }))
            .await;
        duplicate.assert_status(StatusCode::CONFLICT);
    }

    // Test 7: Updating and deleting a user
    #[tokio::test]
    async fn test_update_and_delete_user() {
        let harness = create_harness().await;
        let user_id = seed_user(&harness, "ada@example.com").await;
        let auth = harness.bearer("1");
        let path = format!("/users/{}", user_id);

        let updated: Value = harness
            .server
            .put(&path)
            .add_header(header::AUTHORIZATION, auth.clone())
            .json(&body!({"lastname": "King", "status": "disabled"}))
            .await
            .json();
        assert_eq!(updated["data"]["lastname"], "King");
        assert_eq!(updated["data"]["firstname"], "Ada");
        assert_eq!(updated["data"]["status"], "disabled");

        harness
            .server
            .delete(&path)
            .add_header(header::AUTHORIZATION, auth.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        harness
            .server
            .get(&path)
            .add_header(header::AUTHORIZATION, auth)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    // Test 8: Users can be filtered by app
    #[tokio::test]
    async fn test_list_users_by_app() {
        let harness = create_harness().await;
        seed_user(&harness, "ada@example.com").await;
        seed_user(&harness, "grace@example.com").await;
        let auth = harness.bearer("1");

        let all: Value = harness
            .server
            .get("/users")
            .add_header(header::AUTHORIZATION, auth.clone())
            .await
            .json();
        assert_eq!(all["data"].as_array().unwrap().len(), 2);

        let filtered: Value = harness
            .server
            .get("/users")
            .add_query_param("app_id", 1)
            .add_header(header::AUTHORIZATION, auth)
            .await
            .json();
        let users = filtered["data"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["email"], "ada@example.com");
    }

    // Test 9: Deleting an app removes its users
    #[tokio::test]
    async fn test_delete_app_cascades() {
        let harness = create_harness().await;
        let user_id = seed_user(&harness, "ada@example.com").await;
        let auth = harness.bearer("1");

        harness
            .server
            .delete("/apps/1")
            .add_header(header::AUTHORIZATION, auth.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        harness
            .server
            .get(&format!("/users/{}", user_id))
            .add_header(header::AUTHORIZATION, auth)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    // Test 10: Token for a non-numeric subject cannot use /users/me
    #[tokio::test]
    async fn test_me_with_foreign_subject() {
        let harness = create_harness().await;

        harness
            .server
            .get("/users/me")
            .add_header(header::AUTHORIZATION, harness.bearer("service-account"))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
