//! Client for the remote sync-configuration endpoint
//!
//! `GET  <server>/api/cloud-config` returns the stored configuration, or
//! `{"enabled": false}` when the user never saved one.
//! `PUT  <server>/api/cloud-config` stores it and answers `{ok, updatedAt}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use shotsync_core::config::{SyncConfiguration, SyncSettings};
use shotsync_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

use crate::transport::{HttpRequest, HttpTransport};

pub const CLOUD_CONFIG_PATH: &str = "/api/cloud-config";

const TARGET: &str = "cloud-config";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishReply {
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Bearer-authenticated client for the configuration API
pub struct CloudConfigClient {
    base_url: String,
    token: String,
    transport: Arc<dyn HttpTransport>,
}

impl CloudConfigClient {
    /// Create a client for `base_url` (e.g. `https://tracker.example`).
    pub fn new(base_url: &str, token: &str, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Configuration("server URL is required".to_string()));
        }
        if token.trim().is_empty() {
            return Err(Error::Configuration("server token is required".to_string()));
        }
        Ok(Self {
            base_url,
            token: token.trim().to_string(),
            transport,
        })
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, CLOUD_CONFIG_PATH)
    }

    /// GET the stored configuration.
    pub async fn fetch(&self) -> Result<SyncConfiguration> {
        let request = HttpRequest::get(self.url())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json");
        let resp = self
            .transport
            .send(request)
            .await
            .map_err(|e| Error::download(TARGET, None, &e.to_string()))?;
        if !resp.is_success() {
            return Err(Error::download(TARGET, Some(resp.status), &resp.text()));
        }

        let mut config: SyncConfiguration = serde_json::from_slice(&resp.body)?;
        config.normalize();
        Ok(config)
    }

    /// PUT `config`, returning the server's update time.
    pub async fn publish(&self, config: &SyncConfiguration) -> Result<Option<DateTime<Utc>>> {
        let mut config = config.clone();
        config.normalize();
        let body = json!({
            "enabled": config.enabled,
            "intervalMinutes": config.interval_minutes,
            "provider": config.provider,
            "config": config.config,
        });

        let request = HttpRequest::put(self.url())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .body(body.to_string());
        let resp = self
            .transport
            .send(request)
            .await
            .map_err(|e| Error::upload(TARGET, None, &e.to_string()))?;
        if !resp.is_success() {
            return Err(Error::upload(TARGET, Some(resp.status), &resp.text()));
        }

        let reply: PublishReply = if resp.body.is_empty() {
            PublishReply { updated_at: None }
        } else {
            serde_json::from_slice(&resp.body)?
        };
        info!("Published sync configuration ({:?})", config.provider);
        Ok(reply.updated_at)
    }

    /// Fetch the remote copy and overwrite the local mirror with it.
    pub async fn refresh_mirror(&self, settings: &SyncSettings) -> Result<SyncConfiguration> {
        let config = self.fetch().await?;
        settings.save(&config)?;
        info!(
            "Mirrored sync configuration (enabled: {}, provider: {:?})",
            config.enabled, config.provider
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpResponse, Method, TransportError};
    use async_trait::async_trait;
    use shotsync_core::config::ProviderKind;
    use shotsync_core::{MemoryStore, SharedStore};
    use std::sync::Mutex;

    struct StubServer {
        reply: HttpResponse,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl StubServer {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: HttpResponse::new(status, body.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for StubServer {
        async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_requires_url_and_token() {
        let server = StubServer::new(200, "{}");
        assert!(CloudConfigClient::new("", "t", server.clone()).is_err());
        assert!(CloudConfigClient::new("https://tracker.example", " ", server).is_err());
    }

    #[tokio::test]
    async fn test_fetch_unset_is_default() {
        let server = StubServer::new(200, r#"{"enabled": false}"#);
        let client = CloudConfigClient::new("https://tracker.example/", "tok", server.clone()).unwrap();

        let config = client.fetch().await.unwrap();
        assert_eq!(config, SyncConfiguration::default());

        let seen = server.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://tracker.example/api/cloud-config");
        assert_eq!(seen[0].header_value("Authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_refresh_mirror_writes_local_copy() {
        let server = StubServer::new(
            200,
            r#"{"enabled": true, "intervalMinutes": 15, "provider": "owncloud",
                "config": {"baseUrl": "https://oc.example"}, "updatedAt": "2024-05-01T10:00:00Z"}"#,
        );
        let client = CloudConfigClient::new("https://tracker.example", "tok", server).unwrap();
        let store: SharedStore = Arc::new(MemoryStore::new());
        let settings = SyncSettings::new(store);

        client.refresh_mirror(&settings).await.unwrap();
        let mirrored = settings.load();
        assert!(mirrored.enabled);
        assert_eq!(mirrored.interval_minutes, 15);
        assert_eq!(mirrored.provider, Some(ProviderKind::OwnCloud));
    }

    #[tokio::test]
    async fn test_publish_sends_put() {
        let server = StubServer::new(200, r#"{"ok": true, "updatedAt": "2024-05-01T10:00:00Z"}"#);
        let client = CloudConfigClient::new("https://tracker.example", "tok", server.clone()).unwrap();
        let config = SyncConfiguration {
            enabled: true,
            interval_minutes: 1,
            provider: Some(ProviderKind::S3),
            ..Default::default()
        };

        let updated = client.publish(&config).await.unwrap();
        assert!(updated.is_some());

        let seen = server.seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::Put);
        let body: serde_json::Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(body["intervalMinutes"], json!(5));
        assert_eq!(body["provider"], json!("s3"));
    }

    #[tokio::test]
    async fn test_fetch_unauthorized() {
        let server = StubServer::new(401, r#"{"error": "unauthorized"}"#);
        let client = CloudConfigClient::new("https://tracker.example", "bad", server).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }
}
