/// Payload producers
///
/// Reads happen outside the send window lock; only the resulting buffer is
/// handed to the window.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::contracts::FileInfo;
use crate::errors::{LinkError, Result};
use crate::sink::CRC_TRAILER_LEN;

pub trait PayloadSource: Send {
    /// Next chunk of at most `max_len` bytes, `None` once exhausted
    fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>>;

    /// Return to the first chunk
    fn rewind(&mut self) -> Result<()>;

    /// Metadata announced with `INFO` before the first chunk
    fn info(&self) -> Option<FileInfo> {
        None
    }
}

impl<S: PayloadSource + ?Sized> PayloadSource for Box<S> {
    fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        (**self).next_chunk(max_len)
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn info(&self) -> Option<FileInfo> {
        (**self).info()
    }
}

/// Random test data; every chunk ends with a CRC32 of its body
pub struct RandomSource {
    rng: StdRng,
    chunk_size: usize,
    limit: Option<u64>,
    produced: u64,
}

impl RandomSource {
    /// `chunk_size` includes the 4-byte trailer; `limit` caps the chunk count
    pub fn new(chunk_size: usize, limit: Option<u64>) -> Self {
        Self::with_rng(StdRng::from_entropy(), chunk_size, limit)
    }

    pub fn with_seed(seed: u64, chunk_size: usize, limit: Option<u64>) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), chunk_size, limit)
    }

    fn with_rng(rng: StdRng, chunk_size: usize, limit: Option<u64>) -> Self {
        Self {
            rng,
            chunk_size: chunk_size.max(CRC_TRAILER_LEN + 1),
            limit,
            produced: 0,
        }
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl PayloadSource for RandomSource {
    fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        if self.chunk_size > max_len {
            return Err(LinkError::PayloadTooLarge {
                size: self.chunk_size,
                max: max_len,
            });
        }

        let mut body = vec![0u8; self.chunk_size - CRC_TRAILER_LEN];
        self.rng.fill_bytes(&mut body);

        let mut chunk = BytesMut::with_capacity(self.chunk_size);
        chunk.put_slice(&body);
        chunk.put_u32_le(crc32fast::hash(&body));
        self.produced += 1;
        Ok(Some(chunk.freeze()))
    }

    fn rewind(&mut self) -> Result<()> {
        self.produced = 0;
        Ok(())
    }
}

/// Reads a file front to back
pub struct FileSource {
    path: PathBuf,
    file: File,
    info: FileInfo,
}

impl FileSource {
    /// # Errors
    /// Fails when the file cannot be opened, is empty, or is too large for
    /// the 32-bit size carried by `INFO`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Err(LinkError::Io(format!("empty send file: {}", path.display())));
        }
        let total_size = u32::try_from(size).map_err(|_| LinkError::PayloadTooLarge {
            size: size as usize,
            max: u32::MAX as usize,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path,
            file,
            info: FileInfo::new(total_size, name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u32 {
        self.info.total_size
    }
}

impl PayloadSource for FileSource {
    fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        let mut buf = Vec::with_capacity(max_len);
        (&mut self.file).take(max_len as u64).read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(buf)))
    }

    fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn info(&self) -> Option<FileInfo> {
        Some(self.info.clone())
    }
}
