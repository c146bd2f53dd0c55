//! Test harness for isolated pipeline runs.
//!
//! Provides temporary input/output directories, an in-memory ledger and
//! wav fixtures with a known duration, plus a duration probe that reads
//! the fixture header instead of shelling out to ffprobe.

#![allow(dead_code)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use audup::db::path_repo::{self, PathConfig, Transport, WatchedPath};
use audup::db::Database;
use audup::media::AudioConverter;
use audup::MediaError;

/// Isolated environment for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Watched input directory (trailing separator).
    pub input_dir: String,
    /// Transcript output directory.
    pub txt_dir: PathBuf,
    /// In-memory ledger.
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input = base.join("input");
        let txt_dir = base.join("txt");
        std::fs::create_dir_all(&input).expect("Failed to create input dir");
        std::fs::create_dir_all(&txt_dir).expect("Failed to create txt dir");

        let input_dir = format!("{}{}", input.display(), std::path::MAIN_SEPARATOR);
        let db = Database::open_in_memory().expect("Failed to open ledger");

        Self {
            temp_dir,
            input_dir,
            txt_dir,
            db,
        }
    }

    /// Writes a mono 16-bit PCM wav of the given duration (silence).
    pub fn write_wav(&self, name: &str, sample_rate: u32, seconds: f64) -> PathBuf {
        let path = Path::new(&self.input_dir).join(name);
        let samples = (f64::from(sample_rate) * seconds) as u32;
        std::fs::write(&path, build_wav_bytes(sample_rate, samples)).expect("write wav");
        path
    }

    /// Registers a streaming-server path over the input directory.
    pub fn insert_server_path(&self, uri: &str) -> WatchedPath {
        let mut config = PathConfig::new(
            self.input_dir.clone(),
            Transport::Server {
                uri: uri.to_string(),
            },
        );
        config.result_dir = self.txt_dir.display().to_string();
        let id = path_repo::upsert(&self.db, &config).expect("upsert path");
        path_repo::find_by_id(&self.db, id)
            .expect("load path")
            .expect("path exists")
    }

    /// Registers a hosted path (HTTP or streaming mode).
    pub fn insert_hosted_path(
        &self,
        api_key: &str,
        mode: path_repo::ApiMode,
        result_attempts: u32,
    ) -> WatchedPath {
        let mut config = PathConfig::new(
            self.input_dir.clone(),
            Transport::Hosted {
                api_key: api_key.to_string(),
                mode,
            },
        );
        config.language = Some("en-US".to_string());
        config.result_dir = self.txt_dir.display().to_string();
        config.result_interval = 1;
        config.result_attempts = result_attempts;
        let id = path_repo::upsert(&self.db, &config).expect("upsert path");
        path_repo::find_by_id(&self.db, id)
            .expect("load path")
            .expect("path exists")
    }
}

/// Duration probe that trusts the fixture's wav header.
pub struct HeaderProbe;

impl AudioConverter for HeaderProbe {
    fn probe_duration(&self, path: &Path) -> Option<f64> {
        let mut header = [0u8; 44];
        let mut file = std::fs::File::open(path).ok()?;
        file.read_exact(&mut header).ok()?;

        let rate = u32::from_le_bytes(header[24..28].try_into().ok()?);
        let data_len = u32::from_le_bytes(header[40..44].try_into().ok()?);
        if rate == 0 {
            return None;
        }
        Some(f64::from(data_len) / (f64::from(rate) * 2.0))
    }

    fn transcode_to_wav(&self, input: &Path, _output: &Path) -> Result<(), MediaError> {
        Err(MediaError::ToolFailed {
            tool: "ffmpeg",
            path: input.to_path_buf(),
            detail: "transcoding is not expected in integration tests".into(),
        })
    }
}

pub fn header_probe() -> Arc<dyn AudioConverter> {
    Arc::new(HeaderProbe)
}

/// Minimal RIFF/WAVE container: 44-byte header plus silent PCM samples.
fn build_wav_bytes(sample_rate: u32, samples: u32) -> Vec<u8> {
    let data_len = samples * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");

    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());

    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    bytes
}
