//! WAV container I/O restricted to 8 kHz / mono / 8-bit G.711.
//!
//! Readers walk RIFF chunks looking for `fmt ` and `data`; writers emit a
//! fixed 44-byte header with a placeholder `data` size that is rewritten in
//! place on close, so the file is streamable before its final length is known.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::g711::Variant;

pub const HEADER_LEN: u64 = 44;

/// Parsed WAV `fmt ` chunk fields, already validated against the PBX's
/// supported envelope (8 kHz, mono, 8-bit, μ-law or A-law).
#[derive(Debug, Clone, Copy)]
pub struct WavFormat {
    pub variant: Variant,
}

/// In-memory result of reading a WAV file: validated format plus the raw
/// G.711 payload bytes from the `data` chunk.
#[derive(Debug, Clone)]
pub struct WavFile {
    pub format: WavFormat,
    pub samples: Vec<u8>,
}

fn read_exact_or_err<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(Error::from)
}

/// Read and validate a WAV file, returning its G.711 variant and raw samples.
pub fn read_wav<R: Read + Seek>(mut r: R) -> Result<WavFile> {
    let mut riff_header = [0u8; 12];
    read_exact_or_err(&mut r, &mut riff_header)?;
    if &riff_header[0..4] != b"RIFF" || &riff_header[8..12] != b"WAVE" {
        return Err(Error::NotRiff);
    }

    let mut format: Option<WavFormat> = None;
    let mut samples: Option<Vec<u8>> = None;

    loop {
        let mut chunk_header = [0u8; 8];
        match r.read_exact(&mut chunk_header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::from(e)),
        }
        let chunk_id = &chunk_header[0..4];
        let chunk_size = u32::from_le_bytes(chunk_header[4..8].try_into().unwrap()) as usize;

        if chunk_id == b"fmt " {
            if chunk_size < 16 {
                return Err(Error::FmtChunkTooSmall(chunk_size));
            }
            let mut body = vec![0u8; chunk_size];
            read_exact_or_err(&mut r, &mut body)?;
            let audio_format = u16::from_le_bytes(body[0..2].try_into().unwrap());
            let num_channels = u16::from_le_bytes(body[2..4].try_into().unwrap());
            let sample_rate = u32::from_le_bytes(body[4..8].try_into().unwrap());
            let bits_per_sample = u16::from_le_bytes(body[14..16].try_into().unwrap());

            let variant = Variant::from_wav_audio_format(audio_format)
                .ok_or(Error::UnsupportedAudioFormat(audio_format))?;
            if num_channels != 1 {
                return Err(Error::UnsupportedChannels(num_channels));
            }
            if sample_rate != 8000 {
                return Err(Error::UnsupportedSampleRate(sample_rate));
            }
            if bits_per_sample != 8 {
                return Err(Error::UnsupportedBitsPerSample(bits_per_sample));
            }
            format = Some(WavFormat { variant });
            if chunk_size % 2 == 1 {
                r.seek(SeekFrom::Current(1))?;
            }
        } else if chunk_id == b"data" {
            let mut body = vec![0u8; chunk_size];
            read_exact_or_err(&mut r, &mut body)?;
            samples = Some(body);
            if chunk_size % 2 == 1 {
                r.seek(SeekFrom::Current(1))?;
            }
        } else {
            // Unknown chunk: skip it, padded to an even length per the RIFF spec.
            let skip = chunk_size + (chunk_size % 2);
            r.seek(SeekFrom::Current(skip as i64))?;
        }
    }

    let format = format.ok_or(Error::MissingFmtChunk)?;
    let samples = samples.ok_or(Error::MissingDataChunk)?;
    Ok(WavFile { format, samples })
}

fn write_header<W: Write>(w: &mut W, variant: Variant, data_bytes: u32) -> Result<()> {
    let byte_rate: u32 = 8000; // 8kHz * 1 channel * 8 bits / 8
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_bytes).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&variant.wav_audio_format().to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // mono
    header.extend_from_slice(&8000u32.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // block align
    header.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_bytes.to_le_bytes());
    debug_assert_eq!(header.len() as u64, HEADER_LEN);
    w.write_all(&header)?;
    Ok(())
}

/// A WAV file opened for append-only writing with a rewrite-on-close header.
///
/// The header is written with a zero `dataBytes` placeholder at `open()`, the
/// caller appends raw G.711 bytes via `write_samples`, and `close()` seeks
/// back to byte 0 and rewrites the header with the true size before closing.
pub struct WavWriter<F> {
    file: Option<F>,
    variant: Variant,
    data_bytes: u32,
}

impl WavWriter<std::fs::File> {
    /// Open (creating parent directories as needed) a WAV file for writing.
    pub fn create(path: impl AsRef<Path>, variant: Variant) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755));
            }
        }
        let mut file = std::fs::File::create(path)?;
        write_header(&mut file, variant, 0)?;
        Ok(Self {
            file: Some(file),
            variant,
            data_bytes: 0,
        })
    }
}

impl<F: Write + Seek> WavWriter<F> {
    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn data_bytes(&self) -> u32 {
        self.data_bytes
    }

    /// Append raw companded samples to the data chunk.
    pub fn write_samples(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::AlreadyClosed)?;
        file.write_all(bytes)?;
        self.data_bytes = self.data_bytes.saturating_add(bytes.len() as u32);
        Ok(())
    }

    /// Rewrite the header with the true data size and close the file.
    /// Idempotent: a second call is a no-op that returns `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        write_header(&mut file, self.variant, self.data_bytes)?;
        file.flush()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl<F> Drop for WavWriter<F> {
    fn drop(&mut self) {
        // Best-effort: a writer dropped without an explicit close leaves a
        // file with a zero-length header but valid data, which is still
        // parseable up to the declared length by permissive readers. We do
        // not attempt I/O in Drop since it cannot report errors usefully.
    }
}

/// Conventional on-disk path for a per-call recording.
pub fn recording_path(data_dir: impl AsRef<Path>, call_id: &str, now: (i32, u32, u32)) -> PathBuf {
    let (year, month, day) = now;
    data_dir
        .as_ref()
        .join("recordings")
        .join(format!("{year:04}"))
        .join(format!("{month:02}"))
        .join(format!("{day:02}"))
        .join(format!("call_{call_id}.wav"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_mulaw() {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let mut w = WavWriter {
                file: Some(cursor),
                variant: Variant::Mulaw,
                data_bytes: 0,
            };
            w.write_samples(&[0xFFu8; 160]).unwrap();
            w.close().unwrap();
        }
        assert_eq!(buf.len() as u64, HEADER_LEN + 160);
        let parsed = read_wav(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.format.variant, Variant::Mulaw);
        assert_eq!(parsed.samples.len(), 160);
        assert!(parsed.samples.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn header_data_size_matches_written_bytes() {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let mut w = WavWriter {
                file: Some(cursor),
                variant: Variant::Mulaw,
                data_bytes: 0,
            };
            for _ in 0..50 {
                w.write_samples(&[0u8; 160]).unwrap();
            }
            w.close().unwrap();
        }
        assert_eq!(buf.len() as u64, HEADER_LEN + 8000);
        let data_size = u32::from_le_bytes(buf[40..44].try_into().unwrap());
        assert_eq!(data_size, 8000);
    }

    #[test]
    fn rejects_non_riff() {
        let buf = vec![0u8; 44];
        assert!(matches!(read_wav(Cursor::new(buf)), Err(Error::NotRiff)));
    }

    #[test]
    fn rejects_wrong_sample_rate() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&36u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&16000u32.to_le_bytes()); // wrong rate
        buf.extend_from_slice(&16000u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&0u32.to_le_bytes());
        let err = read_wav(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSampleRate(16000)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut buf = Vec::new();
        let cursor = Cursor::new(&mut buf);
        let mut w = WavWriter {
            file: Some(cursor),
            variant: Variant::Alaw,
            data_bytes: 0,
        };
        w.write_samples(&[0xD5; 10]).unwrap();
        w.close().unwrap();
        assert!(w.is_closed());
        w.close().unwrap(); // no-op, must not error or panic
    }
}
