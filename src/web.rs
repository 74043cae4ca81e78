//! Thin HTTP surface over the registry. Handlers translate vendor-shaped
//! requests into registry calls and wrap results in the vendor envelope;
//! no state lives here.

use crate::errors::DustboxError;
use crate::models::{ApiCode, Transport};
use crate::registry::Registry;
use crate::settings::Settings;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<Registry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/private/users/login", post(login))
        .route("/v1/private/users/checkLogin", post(check_login))
        .route("/api/users/token/refresh", post(refresh_token))
        .route("/api/users/logout", post(logout))
        .route("/api/users/{userid}/devices", get(user_devices))
        .route("/api/devices/register", post(register_device))
        .route("/api/devices/transport", post(set_transport))
        .with_state(state)
}

pub async fn serve(settings: Settings, registry: Arc<Registry>) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    let state = AppState {
        settings: Arc::new(settings),
        registry,
    };
    let app = router(state);

    tracing::info!(%addr, "Vendor API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

/// Vendor envelope for successful responses.
fn success(data: Value) -> Response {
    Json(json!({"code": ApiCode::Success.as_str(), "data": data})).into_response()
}

fn failure(code: ApiCode, message: &str) -> Response {
    Json(json!({"code": code.as_str(), "error": message})).into_response()
}

/// Map a domain error onto the vendor code table. Domain rejections keep
/// HTTP 200 with a vendor code in the envelope; backend faults are a 500.
fn domain_error(err: &DustboxError) -> Response {
    match err {
        DustboxError::Expired(what) | DustboxError::Revoked(what) => {
            failure(ApiCode::TokenInvalid, what)
        }
        DustboxError::NotFound(what)
        | DustboxError::Conflict(what)
        | DustboxError::DataFormat(what) => failure(ApiCode::ParamInvalid, what),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"code": ApiCode::Default.as_str(), "error": other.to_string()})),
        )
            .into_response(),
    }
}

/// Error mapping for handlers whose lookup key is the token itself: an
/// unknown token is `ERR_TOKEN_INVALID`, not a parameter problem.
fn token_error(err: &DustboxError) -> Response {
    match err {
        DustboxError::NotFound(what) => failure(ApiCode::TokenInvalid, what),
        other => domain_error(other),
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    userid: String,
    resource: String,
}

/// Login: idempotently registers the account and the calling client
/// session, then mints a fresh credential.
async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let registry = &state.registry;
    if let Err(e) = registry.register_user(&req.userid).await {
        return domain_error(&e);
    }
    if let Err(e) = registry
        .register_client(&req.userid, &state.settings.auth.realm, &req.resource)
        .await
    {
        return domain_error(&e);
    }
    match registry.issue_credential(&req.userid).await {
        Ok(cred) => success(cred.to_client()),
        Err(e) => domain_error(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CheckLoginRequest {
    access_token: String,
}

async fn check_login(
    State(state): State<AppState>,
    Json(req): Json<CheckLoginRequest>,
) -> Response {
    let now = state.registry.now();
    match state.registry.validate_credential(&req.access_token, now).await {
        Ok(user) => success(user.serialize()),
        Err(e) => token_error(&e),
    }
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Response {
    let now = state.registry.now();
    match state.registry.refresh_credential(&req.refresh_token, now).await {
        Ok(cred) => success(cred.to_client()),
        Err(e) => token_error(&e),
    }
}

#[derive(Debug, Deserialize)]
struct LogoutRequest {
    access_token: String,
}

async fn logout(State(state): State<AppState>, Json(req): Json<LogoutRequest>) -> Response {
    match state.registry.revoke_credential(&req.access_token).await {
        Ok(()) => success(Value::Null),
        Err(e) => token_error(&e),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterDeviceRequest {
    userid: String,
    did: String,
    #[serde(rename = "class")]
    device_class: String,
    resource: String,
    name: String,
    #[serde(default)]
    nick: String,
    company: String,
}

/// First-contact device registration: upserts the device record and links
/// it to the owning account.
async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Response {
    let registry = &state.registry;
    if let Err(e) = registry.register_user(&req.userid).await {
        return domain_error(&e);
    }
    let device = match registry
        .register_device(
            &req.did,
            &req.device_class,
            &req.resource,
            &req.name,
            &req.nick,
            &req.company,
        )
        .await
    {
        Ok(device) => device,
        Err(e) => return domain_error(&e),
    };
    if let Err(e) = registry.link_device(&req.userid, &req.did).await {
        return domain_error(&e);
    }
    success(device.serialize())
}

#[derive(Debug, Deserialize)]
struct TransportRequest {
    did: String,
    transport: String,
    connected: bool,
}

async fn set_transport(
    State(state): State<AppState>,
    Json(req): Json<TransportRequest>,
) -> Response {
    let transport: Transport = match req.transport.parse() {
        Ok(t) => t,
        Err(e) => return domain_error(&e),
    };
    match state
        .registry
        .set_device_transport(&req.did, transport, req.connected)
        .await
    {
        Ok(device) => success(device.serialize()),
        Err(e) => domain_error(&e),
    }
}

async fn user_devices(State(state): State<AppState>, Path(userid): Path<String>) -> Response {
    match state.registry.user_devices(&userid).await {
        Ok(devices) => success(Value::Array(
            devices.iter().map(|d| d.serialize()).collect(),
        )),
        Err(e) => domain_error(&e),
    }
}
