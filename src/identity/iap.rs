//! Verification of the signed assertion that an identity-aware proxy (IAP)
//! places in `x-goog-iap-jwt-assertion`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_KEYS_URL: &str = "https://www.gstatic.com/iap/verify/public_key";
pub const IAP_ISSUER: &str = "https://cloud.google.com/iap";

/// Key id → PEM-encoded public key.
pub type PublicKeys = HashMap<String, String>;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("failed to fetch IAP public keys: {0}")]
    KeyFetch(String),
    #[error("invalid token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token header carries no key id")]
    MissingKeyId,
    #[error("no IAP public key with id {0:?}")]
    UnknownKey(String),
    #[error("token carries no email claim")]
    MissingEmail,
}

#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<PublicKeys, VerifyError>;
}

pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<PublicKeys, VerifyError> {
        tracing::info!("Fetching IAP public keys from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VerifyError::KeyFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::KeyFetch(format!("{} {}", status, body)));
        }

        response
            .json::<PublicKeys>()
            .await
            .map_err(|e| VerifyError::KeyFetch(e.to_string()))
    }
}

struct CachedKeys {
    keys: Arc<PublicKeys>,
    expires_at: Instant,
}

/// Process-wide cache of IAP public keys.
///
/// Refreshes are not serialized: two requests that both find the cache stale
/// will both fetch, and whichever finishes last is kept.
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    state: RwLock<Option<CachedKeys>>,
}

impl KeyCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Result<Arc<PublicKeys>, VerifyError> {
        match self.fresh() {
            Some(keys) => Ok(keys),
            None => self.refresh().await,
        }
    }

    /// Fetches unconditionally. A failed fetch leaves the previous keys in place.
    pub async fn refresh(&self) -> Result<Arc<PublicKeys>, VerifyError> {
        let keys = Arc::new(self.source.fetch().await?);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = Some(CachedKeys {
            keys: Arc::clone(&keys),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(keys)
    }

    fn fresh(&self) -> Option<Arc<PublicKeys>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .as_ref()
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| Arc::clone(&cached.keys))
    }
}

#[derive(Debug, Deserialize)]
struct IapClaims {
    email: Option<String>,
}

pub struct IapVerifier {
    audience: String,
    keys: KeyCache,
}

impl IapVerifier {
    pub fn new(audience: impl Into<String>, keys: KeyCache) -> Self {
        Self {
            audience: audience.into(),
            keys,
        }
    }

    /// Checks signature, audience, issuer and expiry, and returns the asserted email.
    pub async fn verify(&self, token: &str) -> Result<String, VerifyError> {
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;

        let keys = self.keys.get().await?;
        let pem = keys
            .get(&kid)
            .ok_or_else(|| VerifyError::UnknownKey(kid.clone()))?;
        let key = DecodingKey::from_ec_pem(pem.as_bytes())?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[IAP_ISSUER]);

        let data = decode::<IapClaims>(token, &key, &validation)?;
        data.claims
            .email
            .filter(|email| !email.is_empty())
            .ok_or(VerifyError::MissingEmail)
    }
}
