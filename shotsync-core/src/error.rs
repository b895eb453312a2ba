//! Error taxonomy shared by the snapshot, history and sync layers.

/// Result type for shotsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of response-body characters kept in remote errors.
pub const BODY_SNIPPET_LIMIT: usize = 512;

/// Errors that can occur while snapshotting, restoring or syncing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A provider is missing a required field (raised before any I/O)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote rejected or failed an upload
    #[error("Upload to {target} failed ({}): {body}", status_label(.status))]
    Upload {
        target: String,
        status: Option<u16>,
        body: String,
    },

    /// Remote rejected or failed a download
    #[error("Download from {target} failed ({}): {body}", status_label(.status))]
    Download {
        target: String,
        status: Option<u16>,
        body: String,
    },

    /// Version id not present in history or storage
    #[error("Version not found: {0}")]
    NotFound(String),

    /// Document is not a well-formed snapshot
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Provider has no download path
    #[error("Provider '{0}' does not support pulling snapshots")]
    PullUnsupported(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an upload error, truncating the response body.
    pub fn upload(target: impl Into<String>, status: Option<u16>, body: &str) -> Self {
        Error::Upload {
            target: target.into(),
            status,
            body: snippet(body),
        }
    }

    /// Build a download error, truncating the response body.
    pub fn download(target: impl Into<String>, status: Option<u16>, body: &str) -> Self {
        Error::Download {
            target: target.into(),
            status,
            body: snippet(body),
        }
    }

    /// HTTP status attached to a remote failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Upload { status, .. } | Error::Download { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no response".to_string(),
    }
}

/// Trim a response body to [`BODY_SNIPPET_LIMIT`] characters.
pub fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_SNIPPET_LIMIT {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(BODY_SNIPPET_LIMIT).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_message_includes_status_and_body() {
        let err = Error::upload("webdav", Some(507), "Insufficient Storage");
        assert_eq!(
            err.to_string(),
            "Upload to webdav failed (507): Insufficient Storage"
        );
        assert_eq!(err.status(), Some(507));
    }

    #[test]
    fn test_transport_error_has_no_status() {
        let err = Error::download("s3", None, "operation timed out");
        assert!(err.to_string().contains("no response"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let cut = snippet(&body);
        assert_eq!(cut.len(), BODY_SNIPPET_LIMIT + 3);
        assert!(cut.ends_with("..."));
    }
}
