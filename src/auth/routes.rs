use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;

use crate::auth::responses::{
    CredentialsRequest, RefreshRequest, TokenPairResponse, ValidateRequest, ValidateResponse,
};
use crate::auth::{AuthError, AuthService, ErrorKind};

type AuthRouteResult<T> = Result<Json<T>, status::Custom<Json<AuthErrorResponse>>>;

#[derive(Debug, serde::Serialize, serde::Deserialize, JsonSchema)]
pub struct AuthErrorResponse {
    pub status: u16,
    pub message: String,
}

#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    service: &State<AuthService>,
    payload: Json<CredentialsRequest>,
) -> AuthRouteResult<TokenPairResponse> {
    let request = normalize(payload.into_inner())?;

    service
        .register(&request.login, &request.password, &request.device_id)
        .await
        .map(|pair| Json(pair.into()))
        .map_err(respond_error)
}

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    service: &State<AuthService>,
    payload: Json<CredentialsRequest>,
) -> AuthRouteResult<TokenPairResponse> {
    let request = normalize(payload.into_inner())?;

    service
        .login(&request.login, &request.password, &request.device_id)
        .await
        .map(|pair| Json(pair.into()))
        .map_err(respond_error)
}

#[openapi(tag = "Auth")]
#[post("/auth/validate", data = "<payload>")]
pub async fn validate(
    service: &State<AuthService>,
    payload: Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    let status = service.validate(payload.access_token.trim());

    Json(ValidateResponse {
        valid: status.is_valid(),
        error: status.rejection().map(|rejection| rejection.to_string()),
    })
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<payload>")]
pub async fn refresh(
    service: &State<AuthService>,
    payload: Json<RefreshRequest>,
) -> AuthRouteResult<TokenPairResponse> {
    let token = payload.refresh_token.trim();
    if token.is_empty() {
        return Err(respond_message(Status::BadRequest, "refresh_token is required"));
    }

    service
        .refresh(token)
        .await
        .map(|pair| Json(pair.into()))
        .map_err(respond_error)
}

/// Trims identifiers and rejects empty fields. Passwords are taken verbatim.
fn normalize(
    request: CredentialsRequest,
) -> Result<CredentialsRequest, status::Custom<Json<AuthErrorResponse>>> {
    let login = request.login.trim().to_string();
    let device_id = request.device_id.trim().to_string();

    if login.is_empty() || request.password.is_empty() || device_id.is_empty() {
        return Err(respond_message(
            Status::BadRequest,
            "login, password and device_id are required",
        ));
    }

    Ok(CredentialsRequest {
        login,
        password: request.password,
        device_id,
    })
}

fn respond_error(err: AuthError) -> status::Custom<Json<AuthErrorResponse>> {
    match err.kind() {
        ErrorKind::Internal => log::error!("auth request failed: {err}"),
        ErrorKind::Transient => log::warn!("auth request hit a backend failure: {err}"),
        _ => log::debug!("auth request rejected: {err}"),
    }
    respond_message(err.status(), &err.public_message())
}

fn respond_message(status: Status, message: &str) -> status::Custom<Json<AuthErrorResponse>> {
    status::Custom(
        status,
        Json(AuthErrorResponse {
            status: status.code,
            message: message.to_string(),
        }),
    )
}
