/// Payload consumers
///
/// A sink sees only payloads the receive sequencer accepted, in order. It is
/// told to start over when a gap forces a resynchronization and to finish
/// when the announced transfer size has been reached. Sink failures are
/// local to the sink and leave the protocol state untouched.
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::contracts::FileInfo;
use crate::errors::{LinkError, Result};

/// Length of the CRC32 trailer appended by `RandomSource`
pub const CRC_TRAILER_LEN: usize = 4;

pub trait PayloadSink: Send {
    /// Metadata for the transfer that follows
    fn on_info(&mut self, _info: &FileInfo) -> Result<()> {
        Ok(())
    }

    /// Consume the next in-order payload
    fn write(&mut self, payload: &[u8]) -> Result<()>;

    /// Drop everything written since the stream (re)started
    fn reset(&mut self) -> Result<()>;

    /// The announced transfer is complete
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: PayloadSink + ?Sized> PayloadSink for Box<S> {
    fn on_info(&mut self, info: &FileInfo) -> Result<()> {
        (**self).on_info(info)
    }

    fn write(&mut self, payload: &[u8]) -> Result<()> {
        (**self).write(payload)
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Writes the received stream to a file, truncating on reset
pub struct FileSink {
    path: PathBuf,
    file: File,
    written: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl PayloadSink for FileSink {
    fn on_info(&mut self, info: &FileInfo) -> Result<()> {
        info!(
            file = %info.name,
            size_kb = info.total_size / 1024,
            dest = %self.path.display(),
            "receiving file"
        );
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.file.write_all(payload)?;
        self.written += payload.len() as u64;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.written = 0;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        info!(dest = %self.path.display(), bytes = self.written, "file received");
        Ok(())
    }
}

/// Logs each payload and counts what arrived
#[derive(Debug, Default)]
pub struct LogSink {
    chunks: u64,
    bytes: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl PayloadSink for LogSink {
    fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.chunks += 1;
        self.bytes += payload.len() as u64;
        debug!(chunk = self.chunks, len = payload.len(), total = self.bytes, "payload received");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.chunks = 0;
        self.bytes = 0;
        Ok(())
    }
}

/// Verifies the CRC32 trailer of each payload, then forwards the body
pub struct ChecksumSink<S> {
    inner: S,
    verified: u64,
}

impl<S: PayloadSink> ChecksumSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, verified: 0 }
    }

    pub fn verified(&self) -> u64 {
        self.verified
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

/// Split `chunk` into body and trailer and check the trailer
pub fn verify_crc_trailer(chunk: &[u8]) -> Result<&[u8]> {
    if chunk.len() < CRC_TRAILER_LEN {
        return Err(LinkError::MalformedMessage(format!(
            "chunk of {} bytes has no CRC32 trailer",
            chunk.len()
        )));
    }
    let (body, trailer) = chunk.split_at(chunk.len() - CRC_TRAILER_LEN);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(LinkError::IntegrityCheckFailed { expected, actual });
    }
    Ok(body)
}

impl<S: PayloadSink> PayloadSink for ChecksumSink<S> {
    fn on_info(&mut self, info: &FileInfo) -> Result<()> {
        self.inner.on_info(info)
    }

    fn write(&mut self, payload: &[u8]) -> Result<()> {
        let body = verify_crc_trailer(payload)?;
        self.verified += 1;
        self.inner.write(body)
    }

    fn reset(&mut self) -> Result<()> {
        self.verified = 0;
        self.inner.reset()
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.finish()
    }
}
