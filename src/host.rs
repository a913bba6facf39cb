//! The seam between the tracing subsystem and the host inference runtime.
//!
//! The host runtime owns the request lifecycle: it decides when to ask for a
//! trace, mints the per-request trace handles (including nested child
//! handles), and invokes the activity callbacks as a request moves through
//! admission, queueing and compute. This module defines the two traits the
//! host implements and the plain data types that cross the boundary.
//!
//! The shared "user pointer" of the callback contract is an
//! [`Arc<Trace>`](crate::trace::Trace): the host receives it from
//! [`TraceManager::sample_trace`](crate::manager::TraceManager::sample_trace)
//! and forwards a clone to every callback for the root trace and all of its
//! children.

use crate::config::TraceLevel;
use crate::Result;
use std::fmt;

/// Host-runtime services the tracing subsystem depends on
pub trait InferenceHost: Send + Sync {
    /// Create the host-side inference-trace object for a sampled request
    ///
    /// The returned handle is the root of the request's trace tree; its id
    /// keys the root activity stream. Errors abort the sample.
    fn create_trace(&self, level: TraceLevel) -> Result<Box<dyn TraceHandle>>;

    /// Current value of the monotonic clock activity timestamps are drawn
    /// from, in nanoseconds
    fn steady_timestamp_ns(&self) -> u64;

    /// Copy a device-resident tensor payload into host memory
    ///
    /// Only invoked when [`TensorEvent::memory_type`] is [`MemoryType::Gpu`].
    fn copy_to_host(&self, tensor: &TensorEvent<'_>) -> Result<Vec<u8>>;
}

/// The host's view of one (sub-)trace
///
/// Metadata accessors may be called from any thread while the request is in
/// flight.
pub trait TraceHandle: Send + Sync {
    /// Unique id of this trace within the host runtime
    fn id(&self) -> u64;

    /// Id of the parent trace; 0 for the root
    fn parent_id(&self) -> u64;

    /// Name of the model served by this request
    fn model_name(&self) -> String;

    /// Version of the model served by this request
    fn model_version(&self) -> i64;

    /// Client-supplied request id, empty when absent
    fn request_id(&self) -> String;
}

/// A named event in the lifecycle of an inference request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceActivity {
    RequestStart,
    QueueStart,
    ComputeStart,
    ComputeInputEnd,
    ComputeOutputStart,
    ComputeEnd,
    RequestEnd,
    TensorQueueInput,
    TensorBackendInput,
    TensorBackendOutput,
    CustomActivity,
}

impl TraceActivity {
    /// Canonical wire name of the activity
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceActivity::RequestStart => "REQUEST_START",
            TraceActivity::QueueStart => "QUEUE_START",
            TraceActivity::ComputeStart => "COMPUTE_START",
            TraceActivity::ComputeInputEnd => "COMPUTE_INPUT_END",
            TraceActivity::ComputeOutputStart => "COMPUTE_OUTPUT_START",
            TraceActivity::ComputeEnd => "COMPUTE_END",
            TraceActivity::RequestEnd => "REQUEST_END",
            TraceActivity::TensorQueueInput => "TENSOR_QUEUE_INPUT",
            TraceActivity::TensorBackendInput => "TENSOR_BACKEND_INPUT",
            TraceActivity::TensorBackendOutput => "TENSOR_BACKEND_OUTPUT",
            TraceActivity::CustomActivity => "CUSTOM_ACTIVITY",
        }
    }

    /// Whether this activity carries a tensor payload
    pub fn is_tensor(&self) -> bool {
        matches!(
            self,
            TraceActivity::TensorQueueInput
                | TraceActivity::TensorBackendInput
                | TraceActivity::TensorBackendOutput
        )
    }
}

impl fmt::Display for TraceActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Element type of a traced tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Fp32,
    Fp64,
    Bytes,
    Bf16,
    Invalid,
}

impl DataType {
    /// Canonical dtype name used in trace output
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Uint8 => "UINT8",
            DataType::Uint16 => "UINT16",
            DataType::Uint32 => "UINT32",
            DataType::Uint64 => "UINT64",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Fp16 => "FP16",
            DataType::Fp32 => "FP32",
            DataType::Fp64 => "FP64",
            DataType::Bytes => "BYTES",
            DataType::Bf16 => "BF16",
            DataType::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a tensor payload resides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Cpu,
    CpuPinned,
    Gpu,
}

/// A tensor payload delivered with a tensor activity
#[derive(Debug, Clone, Copy)]
pub struct TensorEvent<'a> {
    /// Tensor name
    pub name: &'a str,
    /// Element type
    pub datatype: DataType,
    /// Raw payload bytes, in `memory_type` memory
    pub data: &'a [u8],
    /// Tensor shape
    pub shape: &'a [i64],
    /// Memory kind the payload resides in
    pub memory_type: MemoryType,
    /// Device ordinal for device memory
    pub memory_type_id: i64,
}

impl<'a> TensorEvent<'a> {
    /// Number of elements described by the shape
    pub fn element_count(&self) -> usize {
        self.shape
            .iter()
            .map(|d| (*d).max(0) as usize)
            .product()
    }
}
