use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::{
    error::AppError,
    identity::{self, IdentityStrategy},
    models::User,
};

/// The resolved caller. Extracting it gates a handler behind identity resolution:
/// the request is rejected with 401 before the handler body runs.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    PgPool: FromRef<S>,
    Arc<IdentityStrategy>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 1. Establish the caller's email with the configured strategy
        let strategy = Arc::<IdentityStrategy>::from_ref(state);
        let email = strategy.email_from_headers(&parts.headers).await?;

        // 2. Find or create the matching user row
        let pool = PgPool::from_ref(state);
        let user = identity::find_or_create_user(&pool, &email)
            .await
            .map_err(AppError::IdentityStoreError)?;

        Ok(CurrentUser(user))
    }
}

/// A request body read as a JSON object.
///
/// A missing or blank body, a body not sent as JSON, and a JSON value that is not an
/// object all read as `{}`, leaving the field checks to report what is missing. Only a
/// JSON body that fails to parse is rejected here.
pub struct JsonObject(pub Map<String, Value>);

#[async_trait]
impl<S> FromRequest<S> for JsonObject
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = has_json_content_type(req.headers());
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::ValidationError(rejection.body_text()))?;

        object_from_body(is_json, &body).map(JsonObject)
    }
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

fn object_from_body(is_json: bool, body: &[u8]) -> Result<Map<String, Value>, AppError> {
    if !is_json || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Ok(Map::new()),
        Err(err) => Err(AppError::ValidationError(format!(
            "Failed to parse the request body as JSON: {err}"
        ))),
    }
}
