pub mod iap;

use std::sync::Arc;

use axum::http::HeaderMap;
use sqlx::PgPool;

use crate::config::{AuthConfig, AuthMode, ConfigError};
use crate::error::AppError;
use crate::models::User;

pub use iap::{HttpKeySource, IapVerifier, KeyCache};

pub const IAP_ASSERTION_HEADER: &str = "x-goog-iap-jwt-assertion";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

const MISSING_ASSERTION: &str = "Unauthorized: Missing IAP JWT.";
const INVALID_ASSERTION: &str = "Unauthorized: Invalid identity token.";
const MISSING_EMAIL_HEADER: &str =
    "User email header (x-user-email) is missing for non-IAP request.";

/// How the caller's email is established for a request.
pub enum IdentityStrategy {
    /// Only an IAP-signed assertion is accepted.
    VerifiedAssertion(IapVerifier),
    /// An assertion is still verified when one is sent; otherwise the
    /// `x-user-email` header is taken at face value.
    TrustedHeader { verifier: Option<IapVerifier> },
}

impl IdentityStrategy {
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let verifier = match &config.iap_audience {
            Some(audience) => {
                let source = HttpKeySource::new(config.iap_keys_url.clone())
                    .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
                Some(IapVerifier::new(
                    audience.clone(),
                    KeyCache::new(Arc::new(source), config.iap_keys_ttl),
                ))
            }
            None => None,
        };

        match (config.mode, verifier) {
            (AuthMode::Iap, Some(verifier)) => Ok(IdentityStrategy::VerifiedAssertion(verifier)),
            (AuthMode::Iap, None) => Err(ConfigError::MissingAudience),
            (AuthMode::TrustedHeader, verifier) => Ok(IdentityStrategy::TrustedHeader { verifier }),
        }
    }

    fn verifier(&self) -> Option<&IapVerifier> {
        match self {
            IdentityStrategy::VerifiedAssertion(verifier) => Some(verifier),
            IdentityStrategy::TrustedHeader { verifier } => verifier.as_ref(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            IdentityStrategy::VerifiedAssertion(_) => "verified IAP assertion",
            IdentityStrategy::TrustedHeader { verifier: Some(_) } => {
                "IAP assertion or trusted x-user-email header"
            }
            IdentityStrategy::TrustedHeader { verifier: None } => "trusted x-user-email header",
        }
    }

    /// Resolves the caller's email from the request headers.
    pub async fn email_from_headers(&self, headers: &HeaderMap) -> Result<String, AppError> {
        let assertion = headers
            .get(IAP_ASSERTION_HEADER)
            .filter(|value| !value.is_empty());

        if let Some(assertion) = assertion {
            tracing::debug!("Found IAP JWT, attempting to verify");
            let verifier = self.verifier().ok_or_else(|| {
                tracing::warn!("IAP JWT received but no IAP audience is configured");
                AppError::AuthError(INVALID_ASSERTION.to_string())
            })?;
            let token = assertion
                .to_str()
                .map_err(|_| AppError::AuthError(INVALID_ASSERTION.to_string()))?;
            let email = verifier.verify(token).await.map_err(|e| {
                tracing::warn!("Failed to verify identity token: {}", e);
                AppError::AuthError(INVALID_ASSERTION.to_string())
            })?;
            tracing::debug!("IAP user identified: {}", email);
            return Ok(email);
        }

        match self {
            IdentityStrategy::VerifiedAssertion(_) => {
                Err(AppError::AuthError(MISSING_ASSERTION.to_string()))
            }
            IdentityStrategy::TrustedHeader { .. } => headers
                .get(USER_EMAIL_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|email| !email.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AppError::AuthError(MISSING_EMAIL_HEADER.to_string())),
        }
    }
}

/// Local part of the email with anything outside `[A-Za-z0-9_]` replaced by `_`.
pub fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    local
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Looks the user up by email and creates it on first sight.
pub async fn find_or_create_user(pool: &PgPool, email: &str) -> Result<User, sqlx::Error> {
    let existing = sqlx::query_as::<_, User>("SELECT id, username, email FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if let Some(user) = existing {
        return Ok(user);
    }

    // a concurrent first request may have inserted the same email meanwhile
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email) VALUES ($1, $2)
         ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
         RETURNING id, username, email",
    )
    .bind(username_from_email(email))
    .bind(email)
    .fetch_one(pool)
    .await?;

    tracing::info!("Created user {} ({})", user.username, user.email);
    Ok(user)
}
