//! Transport clients for the transcription service.
//!
//! Two interchangeable protocol implementations share the [`Uploader`]
//! contract: the streaming socket delivers the transcript inline, the
//! two-phase HTTP upload yields a remote id whose transcript is fetched
//! later through [`ResultFetcher`].

use std::path::Path;
use std::sync::Arc;

use crate::db::path_repo::{ApiMode, Transport};
use crate::error::TransportError;

pub mod audio;
pub mod http;
pub mod retry;
pub mod stream;

pub use http::HttpApiClient;
pub use retry::RetryPolicy;
pub use stream::StreamingClient;

/// What an upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Transcript text delivered inline by the transport.
    Transcript(String),
    /// Remote file id; the transcript must be fetched later by polling.
    Accepted(String),
}

/// Uploads one file to the remote service.
pub trait Uploader: Send + Sync {
    fn upload(&self, file: &Path, language: Option<&str>)
        -> Result<UploadOutcome, TransportError>;
}

/// Fetches the transcript for a previously uploaded file.
pub trait ResultFetcher: Send + Sync {
    /// `Some(text)` when the transcript is ready; the caller owns the
    /// attempt budget.
    fn fetch_transcript(&self, remote_id: &str) -> Option<String>;
}

/// Builds the upload client for a watched path's transport config.
pub fn client_for(transport: &Transport, retry: RetryPolicy) -> Arc<dyn Uploader> {
    match transport {
        Transport::Hosted {
            api_key,
            mode: ApiMode::Streaming,
        } => Arc::new(StreamingClient::hosted(api_key.clone(), retry)),
        Transport::Hosted {
            api_key,
            mode: ApiMode::Http,
        } => Arc::new(HttpApiClient::new(api_key.clone(), retry)),
        Transport::Server { uri } => Arc::new(StreamingClient::server(uri.clone(), retry)),
    }
}
