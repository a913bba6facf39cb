//! Shared mock host runtime for the integration tests.
#![allow(dead_code)]

use infertrace::{InferenceHost, TensorEvent, TraceHandle, TraceLevel};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A host runtime that mints sequential trace ids and owns a test clock
pub struct MockHost {
    next_id: AtomicU64,
    clock_ns: AtomicU64,
    fail_create: AtomicBool,
    fail_copy: AtomicBool,
    created_levels: Mutex<Vec<TraceLevel>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            clock_ns: AtomicU64::new(0),
            fail_create: AtomicBool::new(false),
            fail_copy: AtomicBool::new(false),
            created_levels: Mutex::new(Vec::new()),
        })
    }

    pub fn set_clock_ns(&self, ns: u64) {
        self.clock_ns.store(ns, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_copy(&self, fail: bool) {
        self.fail_copy.store(fail, Ordering::SeqCst);
    }

    /// Capture levels of every trace the subsystem asked the host to create
    pub fn created_levels(&self) -> Vec<TraceLevel> {
        self.created_levels.lock().unwrap().clone()
    }
}

impl InferenceHost for MockHost {
    fn create_trace(&self, level: TraceLevel) -> infertrace::Result<Box<dyn TraceHandle>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(infertrace::TraceError::host("trace handle creation failed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created_levels.lock().unwrap().push(level);
        Ok(Box::new(MockHandle::root(id)))
    }

    fn steady_timestamp_ns(&self) -> u64 {
        self.clock_ns.load(Ordering::SeqCst)
    }

    fn copy_to_host(&self, tensor: &TensorEvent<'_>) -> infertrace::Result<Vec<u8>> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(infertrace::TraceError::device_copy("device copy failed"));
        }
        Ok(tensor.data.to_vec())
    }
}

/// The host's view of one (sub-)trace, cheap to clone for callbacks
#[derive(Clone)]
pub struct MockHandle {
    id: u64,
    parent_id: u64,
    model_name: String,
    model_version: i64,
    request_id: String,
}

impl MockHandle {
    pub fn root(id: u64) -> Self {
        Self::new(id, 0, "m", 1, "")
    }

    pub fn new(
        id: u64,
        parent_id: u64,
        model_name: &str,
        model_version: i64,
        request_id: &str,
    ) -> Self {
        Self {
            id,
            parent_id,
            model_name: model_name.to_string(),
            model_version,
            request_id: request_id.to_string(),
        }
    }
}

impl TraceHandle for MockHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn parent_id(&self) -> u64 {
        self.parent_id
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }

    fn model_version(&self) -> i64 {
        self.model_version
    }

    fn request_id(&self) -> String {
        self.request_id.clone()
    }
}

/// Read a trace file and parse it as a JSON array
pub fn read_trace_array(path: &str) -> Vec<serde_json::Value> {
    let contents = std::fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("reading {}: {}", path, err));
    let parsed: serde_json::Value = serde_json::from_str(&contents)
        .unwrap_or_else(|err| panic!("parsing {}: {}", path, err));
    parsed.as_array().cloned().expect("trace file is not an array")
}
