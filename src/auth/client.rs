//! Login client

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::AuthSettings;
use crate::error::{Error, Result};
use crate::session::{Session, SessionStore};

// ─────────────────────────────────────────────────────────────────
// Credentials / Tokens
// ─────────────────────────────────────────────────────────────────

/// Login credentials; the password never appears in Debug output
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Opaque bearer token issued by the auth service
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

// ─────────────────────────────────────────────────────────────────
// Auth Service
// ─────────────────────────────────────────────────────────────────

/// Exchanges credentials for a token
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Auth service backed by `POST {api_url}/users/login`
pub struct HttpAuthService {
    client: reqwest::Client,
    login_url: String,
}

impl HttpAuthService {
    pub fn new(settings: &AuthSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            login_url: format!("{}/users/login", settings.api_url.trim_end_matches('/')),
        })
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken> {
        debug!(url = %self.login_url, email = %credentials.email, "Sending login request");

        let body = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password.expose_secret(),
        });

        let resp = self
            .client
            .post(&self.login_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::authentication_failed(format!("auth service unreachable: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::authentication_failed(format!(
                "login rejected ({}): {}",
                status,
                text.trim()
            )));
        }

        let parsed: LoginResponse = resp
            .json()
            .await
            .map_err(|e| Error::authentication_failed(format!("invalid login response: {}", e)))?;

        match parsed.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(AuthToken::new(token)),
            None => Err(Error::authentication_failed("login response did not contain a token")),
        }
    }
}

/// Log in and persist the resulting token under the credential's email
pub async fn authenticate(
    service: &dyn AuthService,
    store: &SessionStore,
    credentials: &Credentials,
) -> Result<Session> {
    let token = match service.login(credentials).await {
        Ok(token) => token,
        Err(e) => {
            warn!(email = %credentials.email, error = %e, "Login failed");
            return Err(e);
        }
    };

    let session = store.save(&credentials.email, token.as_str())?;
    info!(email = %credentials.email, "Login successful");
    Ok(session)
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
