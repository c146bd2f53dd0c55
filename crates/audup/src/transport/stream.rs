//! Streaming transport: one persistent socket per upload, transcript
//! delivered inline in the final server frame.

use std::path::Path;

use log::debug;
use tungstenite::Message;

use crate::error::TransportError;
use crate::transport::audio::{self, CHUNK_SIZE};
use crate::transport::retry::RetryPolicy;
use crate::transport::{UploadOutcome, Uploader};

/// Hosted streaming endpoint; the API key and language are query params.
pub const HOSTED_STREAM_URL: &str = "wss://app.banafo.ai/api/v1/transcripts/pre-recorded";

/// Language sent to the hosted endpoint when a path has none configured.
const DEFAULT_LANGUAGE: &str = "en-US";

enum StreamTarget {
    /// Hosted API: composes the URL per upload and waits for the greeting.
    Hosted { base: String, api_key: String },
    /// Self-hosted server: fixed URI, no greeting frame.
    Server { uri: String },
}

pub struct StreamingClient {
    target: StreamTarget,
    retry: RetryPolicy,
}

impl StreamingClient {
    /// Client for the hosted API, authenticated by API key.
    pub fn hosted(api_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            target: StreamTarget::Hosted {
                base: HOSTED_STREAM_URL.to_string(),
                api_key: api_key.into(),
            },
            retry,
        }
    }

    /// Hosted client against a non-default endpoint (tests).
    pub fn hosted_at(base: impl Into<String>, api_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            target: StreamTarget::Hosted {
                base: base.into(),
                api_key: api_key.into(),
            },
            retry,
        }
    }

    /// Client for a self-hosted transcription server.
    pub fn server(uri: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            target: StreamTarget::Server { uri: uri.into() },
            retry,
        }
    }

    fn endpoint(&self, language: Option<&str>) -> (String, bool) {
        match &self.target {
            StreamTarget::Hosted { base, api_key } => {
                let language = match language {
                    Some(l) if !l.is_empty() => l,
                    _ => DEFAULT_LANGUAGE,
                };
                (
                    format!("{}?apiKey={}&languageCode={}", base, api_key, language),
                    true,
                )
            }
            StreamTarget::Server { uri } => (uri.clone(), false),
        }
    }

    /// One full connect-send-receive exchange.
    fn attempt(
        &self,
        url: &str,
        expect_greeting: bool,
        payload: &[u8],
    ) -> Result<String, TransportError> {
        let (mut socket, _response) =
            tungstenite::connect(url).map_err(|e| TransportError::Connect {
                endpoint: url.to_string(),
                detail: e.to_string(),
            })?;

        if expect_greeting {
            let greeting = socket
                .read()
                .map_err(|e| TransportError::Stream(format!("greeting: {}", e)))?;
            debug!("Server greeting: {}", greeting);
        }

        for chunk in payload.chunks(CHUNK_SIZE) {
            socket
                .send(Message::Binary(chunk.to_vec()))
                .map_err(|e| TransportError::Stream(format!("send: {}", e)))?;
        }

        let response = socket
            .read()
            .map_err(|e| TransportError::Stream(format!("receive: {}", e)))?;
        socket
            .send(Message::Text("Done".into()))
            .map_err(|e| TransportError::Stream(format!("finish: {}", e)))?;
        let _ = socket.close(None);

        parse_transcript(response)
    }
}

/// Extracts the `text` field from the server's final JSON frame.
fn parse_transcript(message: Message) -> Result<String, TransportError> {
    let raw = message
        .into_text()
        .map_err(|e| TransportError::BadResponse(e.to_string()))?;

    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| TransportError::BadResponse(e.to_string()))?;

    value
        .get("text")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| TransportError::BadResponse(format!("no 'text' field in: {}", raw)))
}

impl Uploader for StreamingClient {
    fn upload(
        &self,
        file: &Path,
        language: Option<&str>,
    ) -> Result<UploadOutcome, TransportError> {
        let pcm = audio::read_wav(file)?;
        let payload = audio::encode_payload(&pcm);
        let (url, expect_greeting) = self.endpoint(language);

        debug!(
            "Streaming {} ({} samples at {} Hz) to {}",
            file.display(),
            pcm.samples.len(),
            pcm.sample_rate,
            url
        );

        self.retry
            .run("streaming upload", || {
                self.attempt(&url, expect_greeting, &payload)
            })
            .map(UploadOutcome::Transcript)
    }
}
