//! Append-only JSON trace file writer.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::error;

/// One output file path, shared by every trace setting that targets it
///
/// Supports two emission modes that may be intermixed for the same path:
/// indexed mode writes each flush to a fresh `<path>.<n>` file, aggregate
/// mode appends every flush to the bare `<path>` file as one growing JSON
/// array. Writes are best-effort; failures are logged and swallowed.
pub struct TraceFile {
    path: String,
    index: AtomicU64,
    // Opened on first aggregate write; the closing bracket is written on drop.
    aggregate: Mutex<Option<File>>,
}

impl TraceFile {
    /// Create a writer for `path`; no file is opened until the first write
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            index: AtomicU64::new(0),
            aggregate: Mutex::new(None),
        }
    }

    /// The configured file path
    pub fn file_name(&self) -> &str {
        &self.path
    }

    /// Persist one batch of trace fragments
    ///
    /// With `to_index_file` the batch becomes a complete JSON array in a
    /// newly indexed file; otherwise it is appended to the aggregate file,
    /// which is opened (and its `[` written) on the first call.
    pub fn save_traces(&self, stream: &str, to_index_file: bool) {
        if to_index_file {
            let index = self.index.fetch_add(1, Ordering::SeqCst);
            let file_name = format!("{}.{}", self.path, index);
            if let Err(err) = Self::write_indexed(&file_name, stream) {
                error!("failed creating trace file {}: {}", file_name, err);
            }
        } else {
            let mut aggregate = self.aggregate.lock().unwrap();
            if let Err(err) = Self::write_aggregate(&self.path, &mut aggregate, stream) {
                error!("failed creating trace file {}: {}", self.path, err);
            }
        }
    }

    fn write_indexed(file_name: &str, stream: &str) -> std::io::Result<()> {
        let mut file = File::create(file_name)?;
        file.write_all(b"[")?;
        file.write_all(stream.as_bytes())?;
        file.write_all(b"]")?;
        Ok(())
    }

    fn write_aggregate(
        path: &str,
        aggregate: &mut Option<File>,
        stream: &str,
    ) -> std::io::Result<()> {
        match aggregate {
            None => {
                let mut file = File::create(path)?;
                file.write_all(b"[")?;
                file.write_all(stream.as_bytes())?;
                *aggregate = Some(file);
            }
            Some(file) => {
                file.write_all(b",")?;
                file.write_all(stream.as_bytes())?;
            }
        }
        Ok(())
    }
}

impl Drop for TraceFile {
    fn drop(&mut self) {
        let aggregate = match self.aggregate.get_mut() {
            Ok(aggregate) => aggregate,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = aggregate.as_mut() {
            if let Err(err) = file.write_all(b"]") {
                error!("failed closing trace file {}: {}", self.path, err);
            }
        }
    }
}
