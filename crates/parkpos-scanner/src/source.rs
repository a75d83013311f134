//! Keystroke sources feeding the scanner service.
//!
//! A USB barcode scanner in keyboard-wedge mode is just a fast typist, so a
//! source only has to yield characters. Timing is measured by the service
//! when each character arrives.
//!
//! `next_key()` is polled inside `tokio::select!`, so implementations must be
//! cancel-safe: a key is either returned or stays buffered for the next call.

#![allow(async_fn_in_trait)]

use std::collections::VecDeque;
use std::path::PathBuf;

use parkpos_core::config::InputSource;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, Stdin};

use crate::error::SourceError;
use crate::mock::MockScanner;

/// Character stream from a scanner.
pub trait KeystrokeSource: Send {
    async fn open(&mut self) -> Result<(), SourceError>;

    /// Next character. Errors mean the source must be reopened.
    async fn next_key(&mut self) -> Result<char, SourceError>;

    /// Release the handle. Idempotent.
    async fn close(&mut self);

    /// Human readable source name, used in logs and events.
    fn describe(&self) -> String;
}

/// Incremental UTF-8 decoding of a byte stream into characters.
#[derive(Debug, Default)]
struct KeyDecoder {
    bytes: Vec<u8>,
    keys: VecDeque<char>,
}

impl KeyDecoder {
    async fn next_from<R>(&mut self, reader: &mut R, name: &str) -> Result<char, SourceError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(key) = self.keys.pop_front() {
                return Ok(key);
            }

            let mut chunk = [0u8; 256];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(SourceError::disconnected(name));
            }
            self.bytes.extend_from_slice(&chunk[..n]);
            self.decode();
        }
    }

    fn decode(&mut self) {
        loop {
            match std::str::from_utf8(&self.bytes) {
                Ok(text) => {
                    self.keys.extend(text.chars());
                    self.bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.bytes[..valid]) {
                        self.keys.extend(text.chars());
                    }
                    match e.error_len() {
                        // Invalid sequence; it will fail validation downstream
                        Some(len) => {
                            self.keys.push_back(char::REPLACEMENT_CHARACTER);
                            self.bytes.drain(..valid + len);
                        }
                        // Incomplete sequence; wait for the rest
                        None => {
                            self.bytes.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.keys.clear();
    }
}

/// Keyboard-wedge scanner typing into the process's standard input.
///
/// A terminal in canonical mode delivers whole lines, so every key of a line
/// arrives at once. That is fine for scanners that send a terminator.
#[derive(Debug, Default)]
pub struct StdinSource {
    stdin: Option<Stdin>,
    decoder: KeyDecoder,
}

impl StdinSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeystrokeSource for StdinSource {
    async fn open(&mut self) -> Result<(), SourceError> {
        self.stdin = Some(tokio::io::stdin());
        Ok(())
    }

    async fn next_key(&mut self) -> Result<char, SourceError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SourceError::disconnected("stdin"))?;
        self.decoder.next_from(stdin, "stdin").await
    }

    async fn close(&mut self) {
        self.stdin = None;
        self.decoder.clear();
    }

    fn describe(&self) -> String {
        "stdin".to_string()
    }
}

/// Scanner exposed as a character device (`/dev/ttyACM0`, `/dev/hidraw0`
/// behind a line discipline).
#[derive(Debug)]
pub struct DeviceSource {
    path: PathBuf,
    file: Option<File>,
    decoder: KeyDecoder,
}

impl DeviceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            decoder: KeyDecoder::default(),
        }
    }
}

impl KeystrokeSource for DeviceSource {
    async fn open(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| SourceError::unavailable(self.describe(), e.to_string()))?;
        self.file = Some(file);
        Ok(())
    }

    async fn next_key(&mut self) -> Result<char, SourceError> {
        let name = self.describe();
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SourceError::disconnected(name.clone()))?;
        self.decoder.next_from(file, &name).await
    }

    async fn close(&mut self) {
        self.file = None;
        self.decoder.clear();
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Concrete source used by the service.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyKeystrokeSource {
    Stdin(StdinSource),
    Device(DeviceSource),
    Mock(MockScanner),
}

impl AnyKeystrokeSource {
    pub fn from_input(input: &InputSource) -> Self {
        match input {
            InputSource::Stdin => Self::Stdin(StdinSource::new()),
            InputSource::Device { path } => Self::Device(DeviceSource::new(path.clone())),
        }
    }
}

impl From<MockScanner> for AnyKeystrokeSource {
    fn from(scanner: MockScanner) -> Self {
        Self::Mock(scanner)
    }
}

impl KeystrokeSource for AnyKeystrokeSource {
    async fn open(&mut self) -> Result<(), SourceError> {
        match self {
            Self::Stdin(s) => s.open().await,
            Self::Device(s) => s.open().await,
            Self::Mock(s) => s.open().await,
        }
    }

    async fn next_key(&mut self) -> Result<char, SourceError> {
        match self {
            Self::Stdin(s) => s.next_key().await,
            Self::Device(s) => s.next_key().await,
            Self::Mock(s) => s.next_key().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Stdin(s) => s.close().await,
            Self::Device(s) => s.close().await,
            Self::Mock(s) => s.close().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Stdin(s) => s.describe(),
            Self::Device(s) => s.describe(),
            Self::Mock(s) => s.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decoder_handles_split_utf8() {
        let bytes = "ñA".as_bytes().to_vec();
        let mut decoder = KeyDecoder::default();

        decoder.bytes.extend_from_slice(&bytes[..1]);
        decoder.decode();
        assert!(decoder.keys.is_empty());

        decoder.bytes.extend_from_slice(&bytes[1..]);
        decoder.decode();
        assert_eq!(decoder.keys.iter().collect::<String>(), "ñA");
    }

    #[tokio::test]
    async fn test_decoder_replaces_invalid_bytes() {
        let mut reader: &[u8] = &[b'A', 0xFF, b'B'];
        let mut decoder = KeyDecoder::default();
        let mut keys = String::new();
        for _ in 0..3 {
            keys.push(decoder.next_from(&mut reader, "test").await.unwrap());
        }
        assert_eq!(keys, "A\u{FFFD}B");

        let err = decoder.next_from(&mut reader, "test").await.unwrap_err();
        assert!(matches!(err, SourceError::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_device_source_reads_file() {
        let path = std::env::temp_dir().join(format!("parkpos-scan-{}", std::process::id()));
        tokio::fs::write(&path, b"T-00099\n").await.unwrap();

        let mut source = DeviceSource::new(&path);
        source.open().await.unwrap();
        let mut keys = String::new();
        while let Ok(key) = source.next_key().await {
            keys.push(key);
        }
        assert_eq!(keys, "T-00099\n");

        source.close().await;
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_device_source_missing_path() {
        let mut source = DeviceSource::new("/nonexistent/ttyACM9");
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[test]
    fn test_from_input() {
        let source = AnyKeystrokeSource::from_input(&InputSource::Device {
            path: PathBuf::from("/dev/ttyACM0"),
        });
        assert_eq!(source.describe(), "/dev/ttyACM0");
        assert_eq!(AnyKeystrokeSource::from_input(&InputSource::Stdin).describe(), "stdin");
    }
}
