//! Auth token acquisition.

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use super::models::LoginResponse;
use super::{BackendError, PCloudClient};

/// Opaque token attached to every backend call.
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
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Source of backend auth tokens.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn token(&self) -> Result<AuthToken, BackendError>;
}

/// A pre-issued token supplied through configuration.
pub struct StaticToken(AuthToken);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(AuthToken::new(token))
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn token(&self) -> Result<AuthToken, BackendError> {
        Ok(self.0.clone())
    }
}

/// Username/password login performed on each request.
pub struct PasswordLogin {
    client: PCloudClient,
    username: String,
    password: String,
}

impl PasswordLogin {
    pub fn new(client: PCloudClient, username: String, password: String) -> Self {
        Self {
            client,
            username,
            password,
        }
    }
}

#[async_trait]
impl AuthProvider for PasswordLogin {
    async fn token(&self) -> Result<AuthToken, BackendError> {
        let request = self
            .client
            .http()
            .get(format!("{}/userinfo", self.client.base_url()))
            .query(&[
                ("getauth", "1"),
                ("logout", "1"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ]);
        let login: LoginResponse = self.client.call("userinfo", request).await?;
        if login.auth.is_empty() {
            return Err(BackendError::Malformed("userinfo returned an empty auth".into()));
        }

        info!("Obtained pCloud auth token for {}", self.username);
        Ok(AuthToken::new(login.auth))
    }
}
