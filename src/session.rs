//! Spreadsheet service session: credentials, token refresh and HTTP client.
//!
//! One [`Session`] is created at startup and shared (by reference or `Arc`)
//! by every component that talks to the spreadsheet service. The access
//! token it holds is refreshed in place when it expires; concurrent runs
//! serialise on the token lock, so a refresh happens at most once and every
//! later caller reuses the new token.
//!
//! Two credential kinds are supported:
//!
//! * a service-account JSON key (`GOOGLE_SHEETS_CREDENTIALS`), exchanged for
//!   short-lived tokens with the OAuth2 JWT-bearer grant;
//! * a pre-minted bearer token (`GOOGLE_OAUTH_ACCESS_TOKEN`), used as-is and
//!   never refreshed.

use crate::error::{error_chain, CaptureError};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// OAuth scopes requested for service-account tokens.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.readonly",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are treated as expired this long before their real expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Endpoint roots; overridable so tests can point at a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Sheets REST API root. Default: `https://sheets.googleapis.com`.
    pub sheets_api: String,
    /// Spreadsheet document root. Default: `https://docs.google.com`.
    pub docs: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            sheets_api: "https://sheets.googleapis.com".to_string(),
            docs: "https://docs.google.com".to_string(),
        }
    }
}

/// The fields of a service-account key file that the token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse a key from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        serde_json::from_str(json).map_err(|e| {
            CaptureError::InvalidConfig(format!(
                "GOOGLE_SHEETS_CREDENTIALS is not a valid service-account JSON key: {e}"
            ))
        })
    }
}

/// How the session obtains access tokens.
#[derive(Clone)]
pub enum Credentials {
    /// Service-account key; tokens are minted and refreshed on demand.
    ServiceAccount(ServiceAccountKey),
    /// Fixed bearer token supplied by the environment.
    Static(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ServiceAccount(key) => {
                f.debug_tuple("ServiceAccount").field(&key.client_email).finish()
            }
            Credentials::Static(_) => f.debug_tuple("Static").field(&"<redacted>").finish(),
        }
    }
}

impl Credentials {
    /// Read credentials from `GOOGLE_SHEETS_CREDENTIALS`, falling back to
    /// `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, CaptureError> {
        if let Ok(json) = std::env::var("GOOGLE_SHEETS_CREDENTIALS") {
            if !json.trim().is_empty() {
                return ServiceAccountKey::from_json(&json).map(Credentials::ServiceAccount);
            }
        }
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !token.trim().is_empty() {
                return Ok(Credentials::Static(token.trim().to_string()));
            }
        }
        Err(CaptureError::ConfigurationMissing {
            what: "GOOGLE_SHEETS_CREDENTIALS".to_string(),
        })
    }
}

/// Read `SPREADSHEET_ID` from the environment.
pub fn spreadsheet_id_from_env() -> Result<String, CaptureError> {
    match std::env::var("SPREADSHEET_ID") {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        _ => Err(CaptureError::ConfigurationMissing {
            what: "SPREADSHEET_ID".to_string(),
        }),
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    fn is_valid(&self, now: Instant) -> bool {
        !self.value.is_empty()
            && self
                .expires_at
                .map_or(true, |at| now + EXPIRY_SKEW < at)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Shared connection state for one spreadsheet.
pub struct Session {
    spreadsheet_id: String,
    credentials: Credentials,
    endpoints: Endpoints,
    http: Client,
    token: Mutex<Option<AccessToken>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("credentials", &self.credentials)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl Session {
    /// Create a session for `spreadsheet_id` using the default endpoints.
    pub fn new(spreadsheet_id: impl Into<String>, credentials: Credentials) -> Result<Self, CaptureError> {
        Self::with_endpoints(spreadsheet_id, credentials, Endpoints::default())
    }

    /// Create a session against explicit endpoint roots.
    pub fn with_endpoints(
        spreadsheet_id: impl Into<String>,
        credentials: Credentials,
        endpoints: Endpoints,
    ) -> Result<Self, CaptureError> {
        let http = Client::builder()
            .user_agent(concat!("sheetcap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CaptureError::Internal(format!("HTTP client: {e}")))?;

        let token = match &credentials {
            Credentials::Static(value) => Some(AccessToken {
                value: value.clone(),
                expires_at: None,
            }),
            Credentials::ServiceAccount(_) => None,
        };

        let spreadsheet_id = spreadsheet_id.into();
        info!("Session created for spreadsheet {}", spreadsheet_id);

        Ok(Self {
            spreadsheet_id,
            credentials,
            endpoints,
            http,
            token: Mutex::new(token),
        })
    }

    /// Build a session entirely from the environment.
    pub fn from_env() -> Result<Self, CaptureError> {
        let credentials = Credentials::from_env()?;
        let spreadsheet_id = spreadsheet_id_from_env()?;
        Self::new(spreadsheet_id, credentials)
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Return a valid access token, refreshing it first if it has expired.
    ///
    /// Calling this with a still-valid token is a no-op apart from the lock.
    pub async fn access_token(&self) -> Result<String, CaptureError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_valid(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let key = match &self.credentials {
            Credentials::ServiceAccount(key) => key,
            Credentials::Static(_) => {
                return Err(CaptureError::AuthFailed(
                    "static access token is empty".to_string(),
                ))
            }
        };

        info!("Access token missing or expired; refreshing");
        let fresh = self.exchange_assertion(key).await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    /// Forget the cached token so the next call refreshes it.
    pub async fn invalidate_token(&self) {
        if matches!(self.credentials, Credentials::ServiceAccount(_)) {
            *self.token.lock().await = None;
        }
    }

    /// Drop cached credentials. The session must not be used afterwards.
    pub async fn shutdown(&self) {
        self.token.lock().await.take();
        info!("Session for spreadsheet {} closed", self.spreadsheet_id);
    }

    /// Install `value` as the cached token, valid for `ttl`.
    #[cfg(test)]
    pub(crate) async fn seed_token(&self, value: &str, ttl: Duration) {
        *self.token.lock().await = Some(AccessToken {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        });
    }

    /// The cached token, if any, without refreshing.
    #[cfg(test)]
    pub(crate) async fn cached_token(&self) -> Option<String> {
        self.token.lock().await.as_ref().map(|t| t.value.clone())
    }

    async fn exchange_assertion(&self, key: &ServiceAccountKey) -> Result<AccessToken, CaptureError> {
        let assertion = sign_assertion(key, SystemTime::now())?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CaptureError::AuthFailed(format!("token request failed: {}", error_chain(&e))))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                CaptureError::AuthFailed(format!("token response unreadable: {}", error_chain(&e)))
            })?;

        if !status.is_success() {
            warn!("Token endpoint answered HTTP {}", status);
            return Err(CaptureError::AuthFailed(format!(
                "token endpoint answered HTTP {}: {}",
                status.as_u16(),
                crate::pipeline::export::snippet(&body)
            )));
        }

        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| CaptureError::AuthFailed(format!("token response is not JSON: {e}")))?;

        let value = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CaptureError::AuthFailed("token response had no access_token".into()))?;
        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        debug!("Obtained access token valid for {}s", lifetime.as_secs());

        Ok(AccessToken {
            value,
            expires_at: Some(Instant::now() + lifetime),
        })
    }
}

/// Build the RS256-signed JWT assertion for the service-account grant.
fn sign_assertion(key: &ServiceAccountKey, now: SystemTime) -> Result<String, CaptureError> {
    let iat = now
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CaptureError::Internal(format!("system clock before epoch: {e}")))?
        .as_secs();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: SCOPES.join(" "),
        aud: &key.token_uri,
        iat,
        exp: iat + 3600,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| CaptureError::AuthFailed(format!("private key is not a valid RSA PEM: {e}")))?;

    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| CaptureError::AuthFailed(format!("could not sign token assertion: {e}")))
}
