use bytes::Bytes;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes sniffed to guess a content type
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A file about to be hashed, uploaded or packaged
#[derive(Debug, Clone)]
pub struct LocalFile {
    name: String,
    size: u64,
    content_type: Option<String>,
    source: FileSource,
}

impl LocalFile {
    /// Opens a file on disk, taking its name and size from the filesystem
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        let mut head = vec![0u8; SNIFF_LEN.min(metadata.len() as usize)];
        let mut file = tokio::fs::File::open(path).await?;
        file.read_exact(&mut head).await?;

        Ok(Self {
            name,
            size: metadata.len(),
            content_type: infer::get(&head).map(|t| t.mime_type().to_string()),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Wraps an in-memory buffer, e.g. an object fetched from a URL
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let head = &data[..SNIFF_LEN.min(data.len())];
        Self {
            name: name.into(),
            size: data.len() as u64,
            content_type: infer::get(head).map(|t| t.mime_type().to_string()),
            source: FileSource::Memory(data),
        }
    }

    /// Same content under another name
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Path on disk, `None` for in-memory content
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Path(path) => Some(path),
            FileSource::Memory(_) => None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Sequential reader for blocking contexts
    pub fn blocking_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            FileSource::Path(path) => Ok(Box::new(std::fs::File::open(path)?)),
            FileSource::Memory(data) => Ok(Box::new(Cursor::new(data.clone()))),
        }
    }

    /// Reads `[start, end)`; short files are an `UnexpectedEof` error
    pub async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        if end < start || end > self.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}..{} is outside {} ({} bytes)",
                    start, end, self.name, self.size
                ),
            ));
        }

        match &self.source {
            FileSource::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(io::SeekFrom::Start(start)).await?;
                let mut buffer = vec![0u8; (end - start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
            FileSource::Memory(data) => Ok(data.slice(start as usize..end as usize)),
        }
    }

    pub async fn read_all(&self) -> io::Result<Bytes> {
        match &self.source {
            FileSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            FileSource::Memory(data) => Ok(data.clone()),
        }
    }
}
