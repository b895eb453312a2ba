//! Shotsync remote synchronization
//!
//! Pushes and pulls the snapshot document to remote stores:
//! - HTTP transport seam (`reqwest` in production)
//! - Provider adapters (token bearer, presigned URL, WebDAV family, generic HTTP)
//! - Interval-gated auto-sync scheduler and its driver loop
//! - Client for the remote sync-configuration API

pub mod transport;
pub mod providers;
pub mod scheduler;
pub mod cloud_config;

pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport, TransportError};
pub use providers::{PushReceipt, SyncProvider, DEFAULT_REMOTE_PATH};
pub use scheduler::{decide, run, AutoSync, SyncStatus, TickDecision, TickOutcome};
pub use cloud_config::CloudConfigClient;
