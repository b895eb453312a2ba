//! Sync provider adapters
//!
//! One adapter per protocol family. Every adapter moves the same snapshot
//! document; only addressing and authentication differ.
//!
//! | family          | providers                        | pull |
//! |-----------------|----------------------------------|------|
//! | token bearer    | dropbox, google-drive, onedrive  | dropbox, onedrive |
//! | presigned URL   | s3, gcs, azure-blob              | no |
//! | WebDAV          | webdav, nextcloud, owncloud      | yes |
//! | generic HTTP    | generic-http                     | no |

use base64::Engine;
use serde_json::{json, Value};
use shotsync_core::config::{ProviderFamily, ProviderKind, SyncConfiguration};
use shotsync_core::{Error, Result};
use tracing::{debug, info};
use url::Url;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// Remote path used when none is configured
pub const DEFAULT_REMOTE_PATH: &str = "/vfx-supervision/snapshot.json";
/// Google Drive file name used when none is configured
pub const DEFAULT_DRIVE_FILE_NAME: &str = "vfx-supervision-snapshot.json";

const DROPBOX_UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";
const DROPBOX_DOWNLOAD_URL: &str = "https://content.dropboxapi.com/2/files/download";
const DRIVE_UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart";
const ONEDRIVE_ROOT_URL: &str = "https://graph.microsoft.com/v1.0/me/drive/root:";
const DRIVE_BOUNDARY: &str = "-------314159265358979323846";

const NEXTCLOUD_SEGMENTS: [&str; 3] = ["remote.php", "dav", "files"];
const OWNCLOUD_SEGMENTS: [&str; 2] = ["remote.php", "webdav"];

const JSON_CONTENT_TYPE: &str = "application/json";

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn require<'a>(kind: ProviderKind, field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::Configuration(format!("{}: '{}' is required", kind, field)));
    }
    Ok(value)
}

/// Dropbox, Google Drive and OneDrive (OAuth access token)
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBearerConfig {
    pub kind: ProviderKind,
    pub access_token: String,
    pub path: String,
    /// Google Drive parent folder
    pub folder_id: Option<String>,
    /// Google Drive file name
    pub file_name: String,
}

/// S3, GCS and Azure Blob (pre-authorized upload URL)
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedConfig {
    pub kind: ProviderKind,
    pub url: String,
}

/// WebDAV, Nextcloud and ownCloud (Basic auth)
#[derive(Debug, Clone, PartialEq)]
pub struct WebDavConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub path: String,
}

impl WebDavConfig {
    /// Full resource URL for the snapshot document
    ///
    /// Path segments (the Nextcloud user name included) are percent-encoded.
    pub fn resource_url(&self) -> Result<String> {
        let invalid = |reason: String| {
            Error::Configuration(format!(
                "{}: invalid baseUrl '{}': {}",
                self.kind, self.base_url, reason
            ))
        };
        let mut url = Url::parse(self.base_url.trim()).map_err(|e| invalid(e.to_string()))?;
        // A base that already points into the DAV tree is used as-is
        let in_dav_tree = url.path().contains("/remote.php/");
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid("cannot carry a path".to_string()))?;
            segments.pop_if_empty();
            if !in_dav_tree {
                match self.kind {
                    ProviderKind::Nextcloud => {
                        segments.extend(NEXTCLOUD_SEGMENTS).push(&self.username);
                    }
                    ProviderKind::OwnCloud => {
                        segments.extend(OWNCLOUD_SEGMENTS);
                    }
                    _ => {}
                }
            }
            segments.extend(self.path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url.into())
    }

    fn authorization(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
        )
    }
}

/// Arbitrary endpoint accepting the document via PUT or POST
#[derive(Debug, Clone, PartialEq)]
pub struct GenericHttpConfig {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
}

/// A configured remote store
#[derive(Debug, Clone, PartialEq)]
pub enum SyncProvider {
    TokenBearer(TokenBearerConfig),
    Presigned(PresignedConfig),
    WebDav(WebDavConfig),
    GenericHttp(GenericHttpConfig),
}

/// Outcome of a successful push
#[derive(Debug, Clone)]
pub struct PushReceipt {
    pub provider: ProviderKind,
    pub url: String,
    pub status: u16,
    pub bytes: usize,
    /// Parsed JSON reply, when the remote sent one
    pub response: Option<Value>,
}

impl SyncProvider {
    /// Select and populate the adapter named by `config.provider`.
    ///
    /// Missing fields are left blank here and rejected by [`validate`](Self::validate).
    pub fn from_config(config: &SyncConfiguration) -> Result<Self> {
        let kind = config
            .provider
            .ok_or_else(|| Error::Configuration("no sync provider configured".to_string()))?;
        let field = |name: &str| config.setting(name).unwrap_or_default().to_string();
        let path = config
            .setting("path")
            .map(normalize_path)
            .unwrap_or_else(|| DEFAULT_REMOTE_PATH.to_string());

        let provider = match kind.family() {
            ProviderFamily::TokenBearerHttp => SyncProvider::TokenBearer(TokenBearerConfig {
                kind,
                access_token: field("accessToken"),
                path,
                folder_id: config.setting("folderId").map(str::to_string),
                file_name: config
                    .setting("name")
                    .unwrap_or(DEFAULT_DRIVE_FILE_NAME)
                    .to_string(),
            }),
            ProviderFamily::PresignedUrl => {
                let specific = match kind {
                    ProviderKind::S3 => "presignedUrl",
                    ProviderKind::Gcs => "signedUrl",
                    _ => "sasUrl",
                };
                let url = config
                    .setting(specific)
                    .or_else(|| config.setting("url"))
                    .unwrap_or_default()
                    .to_string();
                SyncProvider::Presigned(PresignedConfig { kind, url })
            }
            ProviderFamily::BasicAuthWebdav => SyncProvider::WebDav(WebDavConfig {
                kind,
                base_url: field("baseUrl"),
                username: field("username"),
                password: config
                    .config
                    .get("password")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                path,
            }),
            ProviderFamily::GenericHttp => {
                let method = match config.setting("method").map(str::to_ascii_uppercase) {
                    None => Method::Put,
                    Some(m) if m == "PUT" => Method::Put,
                    Some(m) if m == "POST" => Method::Post,
                    Some(other) => {
                        return Err(Error::Configuration(format!(
                            "{}: unsupported method '{}'",
                            kind, other
                        )));
                    }
                };
                let headers = match config.config.get("headers") {
                    Some(Value::Object(map)) => map
                        .iter()
                        .filter_map(|(k, v)| match v {
                            Value::String(s) => Some((k.clone(), s.clone())),
                            Value::Null => None,
                            other => Some((k.clone(), other.to_string())),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                SyncProvider::GenericHttp(GenericHttpConfig {
                    url: field("url"),
                    method,
                    headers,
                })
            }
        };
        Ok(provider)
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            SyncProvider::TokenBearer(c) => c.kind,
            SyncProvider::Presigned(c) => c.kind,
            SyncProvider::WebDav(c) => c.kind,
            SyncProvider::GenericHttp(_) => ProviderKind::GenericHttp,
        }
    }

    /// Whether [`pull`](Self::pull) can succeed for this provider
    pub fn supports_pull(&self) -> bool {
        match self {
            SyncProvider::TokenBearer(c) => {
                matches!(c.kind, ProviderKind::Dropbox | ProviderKind::OneDrive)
            }
            SyncProvider::WebDav(_) => true,
            SyncProvider::Presigned(_) | SyncProvider::GenericHttp(_) => false,
        }
    }

    /// Check required fields. Never touches the network.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            SyncProvider::TokenBearer(c) => {
                require(kind, "accessToken", &c.access_token)?;
            }
            SyncProvider::Presigned(c) => {
                require(kind, "url", &c.url)?;
            }
            SyncProvider::WebDav(c) => {
                require(kind, "baseUrl", &c.base_url)?;
                if kind != ProviderKind::WebDav {
                    require(kind, "username", &c.username)?;
                    require(kind, "password", &c.password)?;
                }
            }
            SyncProvider::GenericHttp(c) => {
                require(kind, "url", &c.url)?;
            }
        }
        Ok(())
    }

    /// Request that uploads `payload`
    pub fn push_request(&self, payload: &str) -> Result<HttpRequest> {
        self.validate()?;
        let request = match self {
            SyncProvider::TokenBearer(c) => match c.kind {
                ProviderKind::Dropbox => {
                    let arg = json!({
                        "path": c.path,
                        "mode": "overwrite",
                        "autorename": false,
                        "mute": false,
                        "strict_conflict": false,
                    });
                    HttpRequest::post(DROPBOX_UPLOAD_URL)
                        .header("Authorization", bearer(&c.access_token))
                        .header("Content-Type", "application/octet-stream")
                        .header("Dropbox-API-Arg", arg.to_string())
                        .body(payload.to_string())
                }
                ProviderKind::GoogleDrive => HttpRequest::post(DRIVE_UPLOAD_URL)
                    .header("Authorization", bearer(&c.access_token))
                    .header(
                        "Content-Type",
                        format!("multipart/related; boundary={}", DRIVE_BOUNDARY),
                    )
                    .body(drive_multipart_body(c, payload)),
                _ => HttpRequest::put(format!("{}{}:/content", ONEDRIVE_ROOT_URL, c.path))
                    .header("Authorization", bearer(&c.access_token))
                    .header("Content-Type", JSON_CONTENT_TYPE)
                    .body(payload.to_string()),
            },
            SyncProvider::Presigned(c) => {
                let mut req = HttpRequest::put(c.url.clone()).header("Content-Type", JSON_CONTENT_TYPE);
                if c.kind == ProviderKind::AzureBlob {
                    req = req.header("x-ms-blob-type", "BlockBlob");
                }
                req.body(payload.to_string())
            }
            SyncProvider::WebDav(c) => HttpRequest::put(c.resource_url()?)
                .header("Authorization", c.authorization())
                .header("Content-Type", JSON_CONTENT_TYPE)
                .body(payload.to_string()),
            SyncProvider::GenericHttp(c) => {
                let mut req = HttpRequest::new(c.method, c.url.clone());
                // Configured headers may override the content type
                if !c.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    req = req.header("Content-Type", JSON_CONTENT_TYPE);
                }
                for (name, value) in &c.headers {
                    req = req.header(name.clone(), value.clone());
                }
                req.body(payload.to_string())
            }
        };
        Ok(request)
    }

    /// Request that downloads the stored document
    pub fn pull_request(&self) -> Result<HttpRequest> {
        self.validate()?;
        match self {
            SyncProvider::TokenBearer(c) if c.kind == ProviderKind::Dropbox => {
                Ok(HttpRequest::post(DROPBOX_DOWNLOAD_URL)
                    .header("Authorization", bearer(&c.access_token))
                    .header("Dropbox-API-Arg", json!({ "path": c.path }).to_string()))
            }
            SyncProvider::TokenBearer(c) if c.kind == ProviderKind::OneDrive => Ok(
                HttpRequest::get(format!("{}{}:/content", ONEDRIVE_ROOT_URL, c.path))
                    .header("Authorization", bearer(&c.access_token)),
            ),
            SyncProvider::WebDav(c) => Ok(HttpRequest::get(c.resource_url()?)
                .header("Authorization", c.authorization())),
            _ => Err(Error::PullUnsupported(self.kind().to_string())),
        }
    }

    /// Upload `payload` to the remote store.
    pub async fn push(&self, transport: &dyn HttpTransport, payload: &str) -> Result<PushReceipt> {
        let kind = self.kind();
        let request = self.push_request(payload)?;
        let url = request.url.clone();
        debug!("Pushing {} bytes to {} ({} {})", payload.len(), kind, request.method, url);

        let resp = transport
            .send(request)
            .await
            .map_err(|e| Error::upload(kind.as_str(), None, &e.to_string()))?;
        if !resp.is_success() {
            return Err(Error::upload(kind.as_str(), Some(resp.status), &resp.text()));
        }

        info!("Pushed snapshot to {} ({} bytes, status {})", kind, payload.len(), resp.status);
        Ok(PushReceipt {
            provider: kind,
            url,
            status: resp.status,
            bytes: payload.len(),
            response: parse_reply(&resp),
        })
    }

    /// Download the stored document as text.
    pub async fn pull(&self, transport: &dyn HttpTransport) -> Result<String> {
        let kind = self.kind();
        let request = self.pull_request()?;
        debug!("Pulling from {} ({})", kind, request.url);

        let resp = transport
            .send(request)
            .await
            .map_err(|e| Error::download(kind.as_str(), None, &e.to_string()))?;
        if !resp.is_success() {
            return Err(Error::download(kind.as_str(), Some(resp.status), &resp.text()));
        }

        let text = String::from_utf8(resp.body.to_vec()).map_err(|e| {
            Error::download(kind.as_str(), Some(resp.status), &format!("body is not UTF-8: {}", e))
        })?;
        info!("Pulled {} bytes from {}", text.len(), kind);
        Ok(text)
    }
}

fn parse_reply(resp: &HttpResponse) -> Option<Value> {
    if resp.body.is_empty() {
        return None;
    }
    serde_json::from_slice(&resp.body).ok()
}

/// `multipart/related` body: metadata part, then the document
fn drive_multipart_body(config: &TokenBearerConfig, payload: &str) -> String {
    let mut metadata = json!({
        "name": config.file_name,
        "mimeType": JSON_CONTENT_TYPE,
    });
    if let Some(folder) = &config.folder_id {
        metadata["parents"] = json!([folder]);
    }
    let delimiter = format!("\r\n--{}\r\n", DRIVE_BOUNDARY);
    let close = format!("\r\n--{}--", DRIVE_BOUNDARY);
    format!(
        "{delimiter}Content-Type: application/json; charset=UTF-8\r\n\r\n{metadata}{delimiter}Content-Type: application/json\r\n\r\n{payload}{close}"
    )
}
