//! Output sinks: incremental NDJSON stream, raw provenance log, final snapshot

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

/// Destination for records as they are produced.
///
/// `flush` is called at window boundaries so a crash loses at most the
/// window in flight.
pub trait RecordSink<T: ?Sized> {
    fn emit(&mut self, record: &T) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory sink
impl<T: Clone> RecordSink<T> for Vec<T> {
    fn emit(&mut self, record: &T) -> io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

enum LineWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl LineWriter {
    fn inner(&mut self) -> &mut dyn Write {
        match self {
            Self::Plain(w) => w,
            Self::Gzip(w) => w,
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Self::Plain(mut w) => w.flush(),
            Self::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Newline-delimited JSON writer; gzip when the path ends in `.gz`.
pub struct NdjsonSink {
    writer: LineWriter,
    path: PathBuf,
    lines: u64,
}

impl std::fmt::Debug for NdjsonSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSink")
            .field("path", &self.path)
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

impl NdjsonSink {
    /// Create (truncate) `path`
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::open(path, File::create(path)?)
    }

    /// Append to `path`, creating it if needed. Gzip output gains a new member.
    pub fn append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::open(path, file)
    }

    fn open(path: &Path, file: File) -> io::Result<Self> {
        let buf = BufWriter::new(file);
        let writer = if is_gzip(path) {
            LineWriter::Gzip(GzEncoder::new(buf, Compression::default()))
        } else {
            LineWriter::Plain(buf)
        };
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written by this sink (not counting pre-existing content)
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn write_value<T: Serialize + ?Sized>(&mut self, value: &T) -> io::Result<()> {
        let out = self.writer.inner();
        serde_json::to_writer(&mut *out, value).map_err(io::Error::other)?;
        out.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Flush and close; returns lines written.
    pub fn finish(self) -> io::Result<u64> {
        let lines = self.lines;
        self.writer.finish()?;
        Ok(lines)
    }
}

impl<T: Serialize + ?Sized> RecordSink<T> for NdjsonSink {
    fn emit(&mut self, record: &T) -> io::Result<()> {
        self.write_value(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.inner().flush()
    }
}

/// Append-only log of raw API payloads, one JSON object per line.
#[derive(Debug)]
pub struct ProvenanceLog {
    sink: NdjsonSink,
}

impl ProvenanceLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            sink: NdjsonSink::append(path)?,
        })
    }

    pub fn finish(self) -> io::Result<u64> {
        self.sink.finish()
    }
}

impl RecordSink<serde_json::Value> for ProvenanceLog {
    fn emit(&mut self, record: &serde_json::Value) -> io::Result<()> {
        self.sink.write_value(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        RecordSink::<serde_json::Value>::flush(&mut self.sink)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Write `records` as NDJSON to `path` atomically (tmp file, then rename).
pub fn write_snapshot<T: Serialize>(path: &Path, records: &[T]) -> io::Result<u64> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "snapshot path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    // Clean up stale tmp file
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    // Gzip detection follows the final name, not the .tmp
    let mut sink = NdjsonSink::open(path, File::create(&tmp_path)?)?;
    for record in records {
        sink.write_value(record)?;
    }
    let lines = sink.finish()?;
    fs::rename(&tmp_path, path)?;
    Ok(lines)
}

/// Remove stale .tmp files in the output directory
pub fn cleanup_tmp_files(output_dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
