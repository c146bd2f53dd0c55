//! Streaming payload framing.
//!
//! The wire format is a fixed header `[rate:u32 LE][byte_len:u32 LE]`
//! followed by the samples as float32 LE, normalized from 16-bit signed
//! PCM (divide by 32768). The payload is sent in fixed-size chunks.

use std::fs::File;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::TransportError;

/// Chunk size for the streaming send loop, shared by all variants.
pub const CHUNK_SIZE: usize = 1_000_000;

/// Decoded mono PCM audio ready for framing.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Reads a mono 16-bit wav file into normalized float samples.
pub fn read_wav(path: &Path) -> Result<PcmAudio, TransportError> {
    let mut file = File::open(path).map_err(|e| TransportError::ReadWav {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let (header, data) = wav::read(&mut file).map_err(|e| TransportError::ReadWav {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    if header.channel_count != 1 {
        return Err(TransportError::WavLayout {
            path: path.to_path_buf(),
            detail: format!("expected mono, got {} channels", header.channel_count),
        });
    }

    let samples = match data {
        wav::BitDepth::Sixteen(raw) => raw
            .into_iter()
            .map(|s| f32::from(s) / 32768.0)
            .collect::<Vec<f32>>(),
        other => {
            return Err(TransportError::WavLayout {
                path: path.to_path_buf(),
                detail: format!("expected 16-bit PCM, got {:?}", other),
            })
        }
    };

    Ok(PcmAudio {
        sample_rate: header.sampling_rate,
        samples,
    })
}

/// Encodes the header + sample buffer into one contiguous payload.
pub fn encode_payload(audio: &PcmAudio) -> Vec<u8> {
    let byte_len = audio.samples.len() * 4;
    let mut buf = Vec::with_capacity(8 + byte_len);

    // Writes into a Vec cannot fail.
    buf.write_u32::<LittleEndian>(audio.sample_rate).unwrap();
    buf.write_u32::<LittleEndian>(byte_len as u32).unwrap();
    for sample in &audio.samples {
        buf.write_f32::<LittleEndian>(*sample).unwrap();
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    /// Writes a minimal mono 16-bit wav file for tests.
    pub(crate) fn write_test_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
        let mut file = File::create(path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut file).unwrap();
    }

    #[test]
    fn test_read_wav_normalizes_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 16_000, &[0, 16384, -16384, 32767, -32768]);

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.samples.len(), 5);
        assert_eq!(audio.samples[0], 0.0);
        assert_eq!(audio.samples[1], 0.5);
        assert_eq!(audio.samples[2], -0.5);
        assert!(audio.samples[3] < 1.0);
        assert_eq!(audio.samples[4], -1.0);
    }

    #[test]
    fn test_read_wav_rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 2, 16_000, 16);
        let mut file = File::create(&path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(vec![0, 0]), &mut file).unwrap();

        assert!(matches!(
            read_wav(&path),
            Err(TransportError::WavLayout { .. })
        ));
    }

    #[test]
    fn test_read_wav_missing_file() {
        assert!(matches!(
            read_wav(Path::new("/no/such/file.wav")),
            Err(TransportError::ReadWav { .. })
        ));
    }

    #[test]
    fn test_encode_payload_header() {
        let audio = PcmAudio {
            sample_rate: 16_000,
            samples: vec![0.0, 0.5, -0.5],
        };
        let payload = encode_payload(&audio);
        assert_eq!(payload.len(), 8 + 12);

        let mut cursor = Cursor::new(&payload);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 16_000);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 12);
        assert_eq!(cursor.read_f32::<LittleEndian>().unwrap(), 0.0);
        assert_eq!(cursor.read_f32::<LittleEndian>().unwrap(), 0.5);
        assert_eq!(cursor.read_f32::<LittleEndian>().unwrap(), -0.5);
    }

    #[test]
    fn test_payload_chunking_boundaries() {
        // 300k samples -> 1.2 MB + 8 byte header: exactly two chunks.
        let audio = PcmAudio {
            sample_rate: 16_000,
            samples: vec![0.0; 300_000],
        };
        let payload = encode_payload(&audio);
        let chunks: Vec<&[u8]> = payload.chunks(CHUNK_SIZE).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), payload.len() - CHUNK_SIZE);
    }
}
