use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

/// A CSV payload that can be read from the start any number of times.
///
/// Ingestion walks the payload once per step instead of holding it in
/// memory, so every call to `open` must yield an independent reader
/// positioned at byte zero of the same, unchanged content.
pub trait CsvSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// An upload staged to a temporary file. The file is removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    size_bytes: u64,
}

impl StagedFile {
    /// Write `data` to a new temp file under `dir`.
    pub async fn stage(data: impl AsRef<[u8]> + Send + 'static, dir: PathBuf) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::stage_blocking(data.as_ref(), &dir))
            .await
            .map_err(io::Error::other)?
    }

    fn stage_blocking(data: &[u8], dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".csv")
            .tempfile_in(dir)?;
        file.write_all(data)?;
        file.flush()?;

        Ok(Self {
            path: file.into_temp_path(),
            size_bytes: data.len() as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl CsvSource for StagedFile {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }
}

/// A payload already held in memory, mostly useful for tests and small inputs.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    data: Arc<Vec<u8>>,
}

impl InMemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(data.into()),
        }
    }
}

impl CsvSource for InMemorySource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(SharedBytes(self.data.clone()))))
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
