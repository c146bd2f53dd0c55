//! Two-phase HTTP transport: register the file to obtain a remote id,
//! then PUT the bytes. Transcripts are fetched later by polling.

use std::path::Path;
use std::time::Duration;

use log::{debug, error, info};
use reqwest::blocking::{multipart, Client};
use reqwest::StatusCode;

use crate::error::TransportError;
use crate::transport::retry::RetryPolicy;
use crate::transport::{ResultFetcher, UploadOutcome, Uploader};

/// Hosted API base URL.
pub const HOSTED_API_BASE: &str = "https://app.banafo.ai";

const UPLOAD_PATH: &str = "/api/v1/file";
const TRANSCRIPT_PATH: &str = "/api/v1/transcripts";

pub struct HttpApiClient {
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    client: Client,
}

impl HttpApiClient {
    pub fn new(api_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_base(HOSTED_API_BASE, api_key, retry)
    }

    /// Client against a non-default base URL (tests, self-hosted gateways).
    pub fn with_base(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
            client,
        }
    }

    /// Phase one: POST file metadata, returning the remote file id.
    fn register_file(&self, file: &Path, language: Option<&str>) -> Result<String, TransportError> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut body = serde_json::json!({ "fileName": file_name });
        if let Some(language) = language.filter(|l| !l.is_empty()) {
            body["languageCode"] = serde_json::Value::from(language);
        }

        let url = format!("{}{}", self.base_url, UPLOAD_PATH);

        self.retry.run("file registration", || {
            let response = self
                .client
                .post(&url)
                .header("accept", "application/json")
                .header("x-api-key", &self.api_key)
                .json(&body)
                .send()
                .map_err(TransportError::Http)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Rejected {
                    what: "file registration",
                    status: status.as_u16(),
                    body: response.text().unwrap_or_default(),
                });
            }

            let value: serde_json::Value = response.json().map_err(TransportError::Http)?;
            value
                .get("fileId")
                .and_then(|id| id.as_str())
                .filter(|id| !id.is_empty())
                .map(|id| id.to_string())
                .ok_or_else(|| TransportError::BadResponse(format!("no 'fileId' in: {}", value)))
        })
    }

    /// Phase two: PUT the raw bytes under the remote id.
    fn put_file(&self, file: &Path, file_id: &str) -> Result<(), TransportError> {
        let url = format!("{}{}/{}", self.base_url, UPLOAD_PATH, file_id);

        self.retry.run("file upload", || {
            let part = multipart::Part::file(file)
                .map_err(|e| TransportError::BadResponse(format!("multipart: {}", e)))?
                .mime_str("audio/x-wav")
                .map_err(|e| TransportError::BadResponse(format!("multipart: {}", e)))?;
            let form = multipart::Form::new().part("theFile", part);

            let response = self
                .client
                .put(&url)
                .header("accept", "application/json")
                .header("x-api-key", &self.api_key)
                .header("x-start-byte", "0")
                .multipart(form)
                .send()
                .map_err(TransportError::Http)?;

            let status = response.status();
            if status != StatusCode::OK {
                return Err(TransportError::Rejected {
                    what: "file upload",
                    status: status.as_u16(),
                    body: response.text().unwrap_or_default(),
                });
            }
            Ok(())
        })
    }
}

impl Uploader for HttpApiClient {
    fn upload(
        &self,
        file: &Path,
        language: Option<&str>,
    ) -> Result<UploadOutcome, TransportError> {
        let file_id = self.register_file(file, language)?;
        debug!("Registered {} as remote file {}", file.display(), file_id);

        self.put_file(file, &file_id)?;
        info!("Uploaded {} (remote id {})", file.display(), file_id);

        Ok(UploadOutcome::Accepted(file_id))
    }
}

impl ResultFetcher for HttpApiClient {
    /// Single GET; the caller owns the attempt budget.
    fn fetch_transcript(&self, remote_id: &str) -> Option<String> {
        let url = format!("{}{}/{}", self.base_url, TRANSCRIPT_PATH, remote_id);

        let response = self
            .client
            .get(&url)
            .header("accept", "text/plain")
            .header("x-api-key", &self.api_key)
            .send();

        match response {
            Ok(response) if response.status() == StatusCode::OK => response.text().ok(),
            Ok(response) => {
                debug!(
                    "No transcript for {} yet (status {})",
                    remote_id,
                    response.status()
                );
                None
            }
            Err(e) => {
                error!("Transcript fetch for {} failed: {}", remote_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    /// Minimal one-request HTTP responder on a local port.
    fn respond_once(listener: TcpListener, status_line: &'static str, body: &'static str) {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let trimmed = line.trim();
                if let Some(value) = trimmed
                    .to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .map(|v| v.trim().to_string())
                {
                    content_length = value.parse().unwrap_or(0);
                }
                if trimmed.is_empty() {
                    break;
                }
            }
            if content_length > 0 {
                let mut body_buf = vec![0u8; content_length];
                reader.read_exact(&mut body_buf).unwrap();
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
    }

    fn local_client(port: u16, attempts: u32) -> HttpApiClient {
        HttpApiClient::with_base(
            format!("http://127.0.0.1:{}", port),
            "test-key",
            RetryPolicy::immediate(attempts),
        )
    }

    #[test]
    fn test_register_file_parses_file_id() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        respond_once(listener, "200 OK", r#"{"fileId":"abc-123"}"#);

        let client = local_client(port, 1);
        let id = client
            .register_file(Path::new("/tmp/call.wav"), Some("en-US"))
            .unwrap();
        assert_eq!(id, "abc-123");
    }

    #[test]
    fn test_register_file_rejects_missing_id() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        respond_once(listener, "200 OK", r#"{"status":"ok"}"#);

        let client = local_client(port, 1);
        let result = client.register_file(Path::new("/tmp/call.wav"), None);
        assert!(matches!(
            result,
            Err(TransportError::RetriesExhausted { .. })
        ));
    }

    #[test]
    fn test_fetch_transcript_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        respond_once(listener, "200 OK", "hello world");

        let client = local_client(port, 1);
        assert_eq!(
            client.fetch_transcript("abc-123").as_deref(),
            Some("hello world")
        );
    }

    #[test]
    fn test_fetch_transcript_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        respond_once(listener, "404 Not Found", "");

        let client = local_client(port, 1);
        assert!(client.fetch_transcript("abc-123").is_none());
    }

    #[test]
    fn test_unreachable_server_exhausts_retries() {
        // Bind then drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = local_client(port, 3);
        let result = client.register_file(Path::new("/tmp/call.wav"), None);
        match result {
            Err(TransportError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }
}
