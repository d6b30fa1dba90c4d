//! HTTP surface of the connect flow
//!
//! Routes:
//!
//! - `GET /auth/connect?userId=` starts a flow for the default provider
//! - `GET /auth/{provider}?userId=` starts a flow for a named provider
//! - `GET /callback?code&state[&realmId]` completes a flow
//! - `GET /healthz` liveness check
//!
//! Handlers only translate between HTTP and [`ConnectFlow`]; every decision
//! about the flow lives there.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::config::{Config, CredentialBackend};
use crate::error::{IntegrationsError, Result};
use crate::oauth::flow::{CallbackParams, ConnectFlow};
use crate::storage::{CookieCredentialStore, CredentialStore, SqliteCredentialStore};

/// Cookie holding the nonce of an in-flight authorization
pub const NONCE_COOKIE: &str = "oauth_state";

/// Path segment that selects the default provider
const DEFAULT_PROVIDER_ALIAS: &str = "connect";

const NONCE_COOKIE_MAX_AGE_MINUTES: i64 = 10;

/// Where callbacks persist credentials
#[derive(Clone)]
pub enum StoreHandle {
    /// One store shared by every request
    Shared(Arc<dyn CredentialStore>),
    /// A [`CookieCredentialStore`] built per callback from the request jar
    Cookie,
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<ConnectFlow>,
    pub store: StoreHandle,
    /// Marks every cookie the service sets as `Secure`
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(flow: ConnectFlow, store: StoreHandle, cookie_secure: bool) -> Self {
        Self {
            flow: Arc::new(flow),
            store,
            cookie_secure,
        }
    }

    /// Builds the state for a validated configuration.
    ///
    /// Opens (and migrates) the SQLite database when that backend is
    /// selected.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = Arc::new(build_http_client()?);
        let flow = ConnectFlow::from_config(config, http)?;

        let store = match config.storage.backend {
            CredentialBackend::Sqlite => {
                let sqlite = match &config.storage.database_path {
                    Some(path) => SqliteCredentialStore::new_with_path(path.clone())?,
                    None => SqliteCredentialStore::new()?,
                };
                tracing::info!(path = %sqlite.path().display(), "Using SQLite credential store");
                StoreHandle::Shared(Arc::new(sqlite))
            }
            CredentialBackend::Cookie => {
                tracing::info!("Using cookie credential store");
                StoreHandle::Cookie
            }
        };

        Ok(Self::new(flow, store, config.storage.cookie_secure))
    }

    fn nonce_cookie(&self, nonce: String) -> Cookie<'static> {
        Cookie::build((NONCE_COOKIE, nonce))
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::minutes(NONCE_COOKIE_MAX_AGE_MINUTES))
            .build()
    }
}

/// HTTP client shared by every provider adapter.
///
/// Per-request timeouts are applied by the adapters; this only bounds
/// connection setup.
pub fn build_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .build()?)
}

/// Builds the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/:provider", get(connect))
        .route("/callback", get(callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    #[serde(rename = "realmId")]
    realm_id: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn connect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<ConnectQuery>,
    jar: CookieJar,
) -> Response {
    let provider = if provider == DEFAULT_PROVIDER_ALIAS {
        Ok(state.flow.default_provider())
    } else {
        state.flow.resolve_provider(&provider)
    };

    let initiated = match provider
        .and_then(|provider| state.flow.initiate(provider, query.user_id.as_deref()))
    {
        Ok(initiated) => initiated,
        Err(e) => return error_response(e),
    };

    let jar = match initiated.nonce_cookie {
        Some(nonce) => jar.add(state.nonce_cookie(nonce)),
        None => jar,
    };

    found(jar, initiated.authorization_url.to_string())
}

async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let params = CallbackParams {
        code: query.code,
        state: query.state,
        realm_id: query.realm_id,
        error: query.error,
        error_description: query.error_description,
        nonce_cookie: jar.get(NONCE_COOKIE).map(|c| c.value().to_string()),
    };

    let (result, jar) = match &state.store {
        StoreHandle::Shared(store) => (state.flow.complete(store.as_ref(), params).await, jar),
        StoreHandle::Cookie => {
            let store = CookieCredentialStore::new(jar, state.cookie_secure);
            let result = state.flow.complete(&store, params).await;
            (result, store.into_jar())
        }
    };

    let jar = jar.remove(Cookie::build(NONCE_COOKIE).path("/"));

    match result {
        Ok(outcome) => found(jar, outcome.redirect),
        Err(e) => (jar, error_response(e)).into_response(),
    }
}

fn found(jar: CookieJar, location: String) -> Response {
    (StatusCode::FOUND, jar, [(header::LOCATION, location)]).into_response()
}

/// Maps flow errors onto status codes. Only validation messages reach the
/// client; anything else is logged and reported generically.
fn error_response(err: anyhow::Error) -> Response {
    match err.downcast_ref::<IntegrationsError>() {
        Some(e) if e.is_validation() => {
            tracing::warn!(error = %e, "Rejected request");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Some(e @ IntegrationsError::UnknownProvider(_)) => {
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        _ => {
            tracing::error!(error = %err, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
