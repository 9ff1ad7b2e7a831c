use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::{EdfError, Result};

/// Random-access byte range reads over a recording.
///
/// The cache engine issues many small aligned reads, so implementations
/// must be cheap to call repeatedly. Returning fewer bytes than
/// requested is an error; the caller never sees a partial buffer.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`.
    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Total length of the underlying resource in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local file source.
pub struct FileSource {
    file: Mutex<File>,
    length: u64,
}

impl FileSource {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path).await.map_err(|e| {
            EdfError::FileNotFound(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let length = file.metadata().await?.len();

        Ok(Self { file: Mutex::new(file), length })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; length];
        let mut got = 0;
        while got < length {
            let n = file.read(&mut buf[got..]).await?;
            if n == 0 {
                return Err(EdfError::ShortRead { requested: length, got });
            }
            got += n;
        }

        Ok(buf)
    }

    fn len(&self) -> u64 {
        self.length
    }
}

/// HTTP source backed by `Range: bytes=` requests.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    length: u64,
}

impl HttpSource {
    /// Probe the URL for its total length and range support.
    pub async fn open(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let client = reqwest::Client::new();

        let response = client
            .head(&url)
            .send()
            .await
            .map_err(|e| EdfError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EdfError::Http(format!("HEAD {} -> {}", url, response.status())));
        }

        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| EdfError::Http(format!("{}: no content length", url)))?;

        debug!("opened http source {} ({} bytes)", url, length);

        Ok(Self { client, url, length })
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let range = format!("bytes={}-{}", offset, offset + length as u64 - 1);

        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()
            .await
            .map_err(|e| EdfError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EdfError::Http(format!("GET {} -> {}", self.url, response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| EdfError::Http(e.to_string()))?;

        if body.len() < length {
            return Err(EdfError::ShortRead { requested: length, got: body.len() });
        }

        // 服务器忽略Range时会返回整个文件
        Ok(body[..length].to_vec())
    }

    fn len(&self) -> u64 {
        self.length
    }
}

/// In-process byte buffer source, used by tests and for recordings the
/// host already holds in memory.
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let start = offset as usize;
        let end = start + length;
        if end > self.bytes.len() {
            return Err(EdfError::ShortRead {
                requested: length,
                got: self.bytes.len().saturating_sub(start),
            });
        }

        Ok(self.bytes[start..end].to_vec())
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}
