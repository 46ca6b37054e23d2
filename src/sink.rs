//! Output sinks for encoded examples
//!
//! One sink per role. Sinks are append-only; a failed write is reported as
//! `SinkWriteFailure` and the generator stops, since partial output cannot
//! be trusted.
//!
//! Record files hold a sequence of `u64` little-endian lengths each followed
//! by one [`Example::encode`] payload. Paths ending in `.gz` are written
//! through gzp's block-parallel gzip.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read as IoRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result as AnyResult};
use flate2::read::MultiGzDecoder;
use flate2::Compression;
use gzp::{deflate::Gzip, ZBuilder, ZWriter};

use crate::error::{PileupError, Result};
use crate::example::Example;

/// Destination of one role's examples
pub trait ExampleSink: Send {
    fn write(&mut self, example: &Example) -> Result<()>;

    /// Flush and finalize; further writes are errors
    fn close(&mut self) -> Result<()>;
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Collects examples in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    examples: Arc<Mutex<Vec<Example>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn examples(&self) -> Vec<Example> {
        match self.examples.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Move the collected examples out, leaving the sink empty
    pub fn take(&self) -> Vec<Example> {
        match self.examples.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.examples.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExampleSink for MemorySink {
    fn write(&mut self, example: &Example) -> Result<()> {
        let mut guard = self
            .examples
            .lock()
            .map_err(|e| PileupError::sink(&example.role, e))?;
        guard.push(example.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Record file sink
// ============================================================================

enum RecordWriter {
    Plain(BufWriter<File>),
    Gzip(Box<dyn ZWriter>),
}

impl RecordWriter {
    fn as_write(&mut self) -> &mut dyn Write {
        match self {
            Self::Plain(w) => w,
            Self::Gzip(w) => w,
        }
    }
}

/// Length-prefixed example records on disk
pub struct RecordFileSink {
    path: PathBuf,
    writer: Option<RecordWriter>,
    written: usize,
}

impl RecordFileSink {
    /// Create (truncate) the file; `.gz` paths are compressed
    pub fn create<P: AsRef<Path>>(path: P, compression_threads: usize) -> AnyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create example file {}", path.display()))?;
        let buffered = BufWriter::with_capacity(1024 * 1024, file);

        let writer = if path.extension().map_or(false, |ext| ext == "gz") {
            RecordWriter::Gzip(
                ZBuilder::<Gzip, _>::new()
                    .num_threads(compression_threads.max(1))
                    .compression_level(Compression::fast())
                    .from_writer(buffered),
            )
        } else {
            RecordWriter::Plain(buffered)
        };

        Ok(Self {
            path,
            writer: Some(writer),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far
    pub fn written(&self) -> usize {
        self.written
    }
}

impl ExampleSink for RecordFileSink {
    fn write(&mut self, example: &Example) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            PileupError::sink(
                &example.role,
                format!("{} is already closed", self.path.display()),
            )
        })?;
        let payload = example.encode();
        let out = writer.as_write();
        out.write_all(&(payload.len() as u64).to_le_bytes())
            .and_then(|_| out.write_all(&payload))
            .map_err(|e| PileupError::sink(&example.role, e))?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let role = self.path.display().to_string();
        match self.writer.take() {
            Some(RecordWriter::Plain(mut w)) => w.flush().map_err(|e| PileupError::sink(role, e)),
            Some(RecordWriter::Gzip(mut w)) => w.finish().map_err(|e| PileupError::sink(role, e)),
            None => Ok(()),
        }
    }
}

impl Drop for RecordFileSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                log::error!("Failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Read back the raw payloads of a record file (gzip detected by extension)
pub fn read_record_file<P: AsRef<Path>>(path: P) -> AnyResult<Vec<Vec<u8>>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open example file {}", path.display()))?;
    let mut reader: Box<dyn IoRead> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut records = Vec::new();
    let mut len_buf = [0u8; 8];
    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read record length"),
        }
        let len = u64::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .with_context(|| format!("Truncated record {} in {}", records.len(), path.display()))?;
        records.push(payload);
    }
    Ok(records)
}

// ============================================================================
// Shared sink
// ============================================================================

/// Serializes appends from several workers into one underlying sink
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn ExampleSink>>>,
}

impl SharedSink {
    pub fn new(sink: Box<dyn ExampleSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }
}

impl ExampleSink for SharedSink {
    fn write(&mut self, example: &Example) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| PileupError::sink(&example.role, e))?;
        guard.write(example)
    }

    fn close(&mut self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| PileupError::sink("shared", e))?;
        guard.close()
    }
}
