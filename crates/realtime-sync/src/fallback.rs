//! HTTP delivery path used when the transport cannot confirm a send.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    error::SyncResult,
    event::{ChannelId, CorrelationId},
};

/// Outbound chat message body.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub content: String,
    pub correlation_id: String,
}

impl OutgoingMessage {
    pub fn new(content: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self {
            content: content.into(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Delivers a chat message over plain HTTP.
///
/// Called at most once per send. Implementations must not retry on their
/// own; the caller decides what to do with a failure.
#[async_trait]
pub trait HttpFallback: Send + Sync + fmt::Debug {
    async fn deliver(&self, channel_id: &ChannelId, message: &OutgoingMessage) -> SyncResult<()>;
}

#[cfg(feature = "http-fallback")]
pub use self::reqwest_fallback::ReqwestFallback;

#[cfg(feature = "http-fallback")]
mod reqwest_fallback {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use tracing::debug;

    use super::{HttpFallback, OutgoingMessage};
    use crate::{
        auth::TokenStore,
        error::{SyncError, SyncResult},
        event::ChannelId,
    };

    /// [`HttpFallback`] that POSTs to `{api_url}/chat/{channel}/messages`.
    pub struct ReqwestFallback {
        client: reqwest::Client,
        api_url: String,
        tokens: Arc<dyn TokenStore>,
    }

    impl ReqwestFallback {
        /// Create a fallback client with the given request timeout.
        pub fn new(
            api_url: impl Into<String>,
            tokens: Arc<dyn TokenStore>,
            timeout: Duration,
        ) -> SyncResult<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| SyncError::config(format!("Failed to build HTTP client: {e}")))?;
            Ok(Self {
                client,
                api_url: api_url.into().trim_end_matches('/').to_string(),
                tokens,
            })
        }

        fn endpoint(&self, channel_id: &ChannelId) -> String {
            format!("{}/chat/{}/messages", self.api_url, channel_id)
        }
    }

    impl std::fmt::Debug for ReqwestFallback {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ReqwestFallback")
                .field("api_url", &self.api_url)
                .finish()
        }
    }

    #[async_trait]
    impl HttpFallback for ReqwestFallback {
        async fn deliver(
            &self,
            channel_id: &ChannelId,
            message: &OutgoingMessage,
        ) -> SyncResult<()> {
            let url = self.endpoint(channel_id);
            let mut request = self.client.post(&url).json(message);
            if let Some(token) = self.tokens.token().await? {
                request = request.bearer_auth(token);
            }

            debug!(url = %url, correlation_id = %message.correlation_id, "Sending via HTTP fallback");
            let response = request
                .send()
                .await
                .map_err(|e| SyncError::http(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::http(format!("HTTP {}: {}", status.as_u16(), body)));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_shape() {
        let id = CorrelationId::new();
        let body = serde_json::to_value(OutgoingMessage::new("hello", &id)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"content": "hello", "correlationId": id.as_str()})
        );
    }
}
