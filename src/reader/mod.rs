//! Line reader over a dump byte stream.
//!
//! The import runs two passes over the same dump: one to build the schema and
//! one to write rows. [`DumpReader::reset`] is the join point between them and
//! may have to reopen the underlying source when it cannot seek (compressed
//! files, pipes, remote objects).

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read buffer for dump files. Dumps are mostly long INSERT lines.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compression format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Detect compression format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Wrap a reader with the matching decompressor.
    pub fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            Compression::None => reader,
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// An opened dump stream.
pub enum SourceStream {
    Seekable(Box<dyn ReadSeek>),
    Stream(Box<dyn Read + Send>),
}

/// Resolves a dump location into a readable stream.
///
/// `open` may be called more than once: a reset of a non-seekable stream
/// opens the source again from the beginning.
pub trait DumpSource: Send + Sync {
    fn open(&self) -> io::Result<SourceStream>;

    /// Human-readable location, used in logs and error messages.
    fn describe(&self) -> String;

    /// Total size in bytes when known up front (drives progress bars).
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

/// A dump on the local filesystem, optionally compressed.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    compression: Compression,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compression = Compression::from_path(&path);
        Self { path, compression }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl DumpSource for FileSource {
    fn open(&self) -> io::Result<SourceStream> {
        let file = File::open(&self.path)?;
        match self.compression {
            Compression::None => Ok(SourceStream::Seekable(Box::new(file))),
            other => Ok(SourceStream::Stream(other.wrap_reader(Box::new(file))?)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn size_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

/// An in-memory dump. Tests and embedded callers use it.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Arc<[u8]>,
    seekable: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into().into(),
            seekable: true,
        }
    }

    /// Present the data as a forward-only stream, so reset has to reopen.
    pub fn non_seekable(mut self) -> Self {
        self.seekable = false;
        self
    }
}

impl DumpSource for MemorySource {
    fn open(&self) -> io::Result<SourceStream> {
        let cursor = Cursor::new(ArcBytes(self.data.clone()));
        if self.seekable {
            Ok(SourceStream::Seekable(Box::new(cursor)))
        } else {
            Ok(SourceStream::Stream(Box::new(cursor)))
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

enum Inner {
    Seekable(BufReader<Box<dyn ReadSeek>>),
    Stream(BufReader<Box<dyn Read + Send>>),
}

impl Inner {
    fn from_stream(stream: SourceStream) -> Self {
        match stream {
            SourceStream::Seekable(r) => Inner::Seekable(BufReader::with_capacity(READ_BUFFER_SIZE, r)),
            SourceStream::Stream(r) => Inner::Stream(BufReader::with_capacity(READ_BUFFER_SIZE, r)),
        }
    }

    fn read_until(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            Inner::Seekable(r) => r.read_until(b'\n', buf),
            Inner::Stream(r) => r.read_until(b'\n', buf),
        }
    }
}

/// Incremental line reader that tracks line number and byte offset.
pub struct DumpReader {
    source: Box<dyn DumpSource>,
    inner: Inner,
    line_number: u64,
    offset: u64,
    eof: bool,
    /// The last line returned had invalid UTF-8 replaced
    lossy: bool,
    buf: Vec<u8>,
    progress_fn: Option<Box<dyn Fn(u64) + Send>>,
}

impl DumpReader {
    pub fn open(source: Box<dyn DumpSource>) -> io::Result<Self> {
        let inner = Inner::from_stream(source.open()?);
        Ok(Self {
            source,
            inner,
            line_number: 0,
            offset: 0,
            eof: false,
            lossy: false,
            buf: Vec::with_capacity(1024),
            progress_fn: None,
        })
    }

    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open(Box::new(FileSource::new(path)))
    }

    /// Called with the byte offset after each line.
    pub fn with_progress<F: Fn(u64) + Send + 'static>(mut self, f: F) -> Self {
        self.progress_fn = Some(Box::new(f));
        self
    }

    /// Next line including its terminator, or `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; dumps of mixed-encoding
    /// databases are common and one bad byte must not stop the import.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        self.lossy = false;
        if self.eof {
            return Ok(None);
        }
        self.buf.clear();
        let n = self.inner.read_until(&mut self.buf)?;
        if n == 0 {
            self.eof = true;
            return Ok(None);
        }
        self.line_number += 1;
        self.offset += n as u64;
        if let Some(ref f) = self.progress_fn {
            f(self.offset);
        }
        let line = match String::from_utf8(std::mem::take(&mut self.buf)) {
            Ok(s) => s,
            Err(e) => {
                self.lossy = true;
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Ok(Some(line))
    }

    /// True if the line last returned by [`read_line`](Self::read_line)
    /// contained invalid UTF-8
    pub fn last_line_lossy(&self) -> bool {
        self.lossy
    }

    /// Rewind to offset 0.
    ///
    /// Seeks when the stream supports it; otherwise (or when the seek fails)
    /// the source is opened again. Counters and the EOF flag are cleared either
    /// way.
    pub fn reset(&mut self) -> io::Result<()> {
        let rewound = match &mut self.inner {
            Inner::Seekable(r) => match r.seek(SeekFrom::Start(0)) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("seek failed on {}, reopening: {}", self.source.describe(), e);
                    false
                }
            },
            Inner::Stream(_) => false,
        };
        if !rewound {
            tracing::debug!("reopening {} for another pass", self.source.describe());
            self.inner = Inner::from_stream(self.source.open()?);
        }
        self.line_number = 0;
        self.offset = 0;
        self.eof = false;
        self.lossy = false;
        Ok(())
    }

    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}
