//! Credential lookup and placement.
//!
//! Token storage lives outside this crate; the transport only reads the
//! current token at connect time and attaches it to the handshake.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SyncResult;

/// Source of the bearer token used at handshake time.
///
/// Implemented by the host application on top of its secure storage.
#[async_trait]
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Return the current token, or `None` when the user is signed out.
    async fn token(&self) -> SyncResult<Option<String>>;
}

/// Where the token is attached during the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthPlacement {
    /// Socket.IO CONNECT payload: `{"token": "..."}`.
    #[default]
    Payload,
    /// `token` query parameter on the upgrade request.
    Query,
    /// `Authorization: Bearer` header on the upgrade request.
    Header,
}

/// In-memory token store, mostly useful for tests and demos.
#[derive(Default)]
pub struct StaticTokenStore {
    token: RwLock<Option<String>>,
}

impl StaticTokenStore {
    /// Create a store holding `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Create a store with no token (anonymous connect).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the stored token.
    pub async fn set(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

impl fmt::Debug for StaticTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenStore")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenStore for StaticTokenStore {
    async fn token(&self) -> SyncResult<Option<String>> {
        Ok(self.token.read().await.clone())
    }
}

/// Credentials resolved for a single connect attempt.
#[derive(Clone, Default)]
pub(crate) struct Credentials {
    pub(crate) token: Option<String>,
    pub(crate) placement: AuthPlacement,
}

impl Credentials {
    pub(crate) fn new(token: Option<String>, placement: AuthPlacement) -> Self {
        Self { token, placement }
    }

    /// CONNECT payload carried by the Socket.IO handshake, if any.
    pub(crate) fn connect_payload(&self, app_id: &str) -> Option<serde_json::Value> {
        let mut payload = serde_json::Map::new();
        if !app_id.is_empty() {
            payload.insert("appId".to_string(), app_id.into());
        }
        if self.placement == AuthPlacement::Payload
            && let Some(token) = &self.token
        {
            payload.insert("token".to_string(), token.clone().into());
        }
        (!payload.is_empty()).then_some(serde_json::Value::Object(payload))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("placement", &self.placement)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_static_store_roundtrip() {
        let store = StaticTokenStore::new("abc");
        assert_eq!(store.token().await.unwrap().as_deref(), Some("abc"));

        store.set(None).await;
        assert!(store.token().await.unwrap().is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let store = StaticTokenStore::new("super-secret");
        assert!(!format!("{store:?}").contains("super-secret"));

        let creds = Credentials::new(Some("super-secret".into()), AuthPlacement::Header);
        assert!(!format!("{creds:?}").contains("super-secret"));
    }

    #[test]
    fn test_connect_payload_placement() {
        let creds = Credentials::new(Some("t0k".into()), AuthPlacement::Payload);
        assert_eq!(
            creds.connect_payload("app-1"),
            Some(json!({"appId": "app-1", "token": "t0k"}))
        );

        let creds = Credentials::new(Some("t0k".into()), AuthPlacement::Query);
        assert_eq!(creds.connect_payload("app-1"), Some(json!({"appId": "app-1"})));
        assert_eq!(creds.connect_payload(""), None);
    }
}
