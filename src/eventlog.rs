//! Append-only inference event log

use crate::features::FeatureVector;
use crate::{ServeError, ServeResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Endpoint recorded on every prediction event
pub const PREDICT_PATH: &str = "/predict";

/// Outcome of one prediction request, written as a single JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceLogRecord {
    /// Seconds since the Unix epoch
    pub ts: f64,
    /// Fresh per request
    pub request_id: Uuid,
    /// Endpoint that served the request
    pub path: String,
    /// Wall time from receipt to response, whole milliseconds
    pub latency_ms: u64,
    /// Batch size
    pub n: usize,
    /// Rolling window means right after this request's rows were added
    pub rolling_means: FeatureVector,
    /// Drift of `rolling_means` against the training baseline
    pub drift_proxy: f64,
    /// Classes predicted in this batch only
    pub pred_counts: BTreeMap<i64, usize>,
}

/// Destination for inference events.
///
/// Implementations must keep records in call order and never interleave
/// partial lines between concurrent callers.
pub trait EventSink: Send + Sync {
    /// Persist one record
    fn append(&self, record: &InferenceLogRecord) -> ServeResult<()>;
}

/// JSON-lines file sink.
///
/// A failed write drops the handle so the next append reopens the file, and
/// a partially written line is terminated before the next record goes out.
pub struct JsonlSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

#[derive(Default)]
struct SinkState {
    file: Option<File>,
    /// The file may end in the middle of a line
    torn: bool,
}

impl JsonlSink {
    /// Nothing is touched on disk until the first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> ServeResult<(File, bool)> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ServeError::LogWrite(format!("{}: {e}", parent.display())))?;
        }
        tracing::info!("Opening inference log {}", self.path.display());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ServeError::LogWrite(format!("{}: {e}", self.path.display())))?;
        let torn = ends_mid_line(&file)
            .map_err(|e| ServeError::LogWrite(format!("{}: {e}", self.path.display())))?;
        if torn {
            tracing::warn!("Inference log {} ends mid-line", self.path.display());
        }
        Ok((file, torn))
    }
}

fn ends_mid_line(mut file: &File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Write one newline-terminated line, first closing any line a previous
/// failed write left open.
fn write_line<W: Write>(out: &mut W, line: &[u8], torn: &mut bool) -> io::Result<()> {
    let result = (|| {
        if *torn {
            out.write_all(b"\n")?;
        }
        out.write_all(line)?;
        out.flush()
    })();
    *torn = result.is_err();
    result
}

impl EventSink for JsonlSink {
    fn append(&self, record: &InferenceLogRecord) -> ServeResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| ServeError::LogWrite(e.to_string()))?;
        line.push('\n');

        let mut state = self.state.lock();
        let mut file = match state.file.take() {
            Some(file) => file,
            None => {
                let (file, torn) = self.open()?;
                state.torn |= torn;
                file
            }
        };

        write_line(&mut file, line.as_bytes(), &mut state.torn)
            .map_err(|e| ServeError::LogWrite(format!("{}: {e}", self.path.display())))?;
        state.file = Some(file);
        Ok(())
    }
}

/// In-memory sink for embedding and tests
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<InferenceLogRecord>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn records(&self) -> Vec<InferenceLogRecord> {
        self.records.lock().clone()
    }

    /// Records appended so far
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True before the first append
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn append(&self, record: &InferenceLogRecord) -> ServeResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Read a JSON-lines log back, skipping blank lines.
///
/// A missing file reads as empty. Lines that do not parse, such as the tail
/// of an interrupted write, are skipped with a warning.
pub fn read_records(path: impl AsRef<Path>) -> ServeResult<Vec<InferenceLogRecord>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ServeError::LogWrite(format!("{}: {e}", path.display()))),
    };

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ServeError::LogWrite(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping corrupt line {} in {}: {e}", i + 1, path.display())
            }
        }
    }
    Ok(records)
}
