//! Inference request tracing for model-serving runtimes.
//!
//! `infertrace` samples a configurable subset of inference requests,
//! collects timestamped lifecycle activities and optional tensor payloads
//! across a request's nested sub-traces, and emits the result either as a
//! native JSON trace stream persisted to indexed files or as spans shipped
//! to a distributed-tracing collector over OTLP/HTTP.
//!
//! The subsystem is built for hot reconfiguration under live traffic:
//! settings can be replaced per model or globally at any time, per-model
//! settings may override any subset of fields and inherit the rest, and
//! traces sampled under a setting keep batching into that setting's file
//! even after the setting has been replaced in the registry.
//!
//! # Quick Start
//!
//! ```no_run
//! use infertrace::{TraceConfig, TraceLevel, TraceManager, TraceSettingUpdate};
//! # use infertrace::{InferenceHost, TraceHandle, TensorEvent, TraceLevel as L};
//! # struct Runtime;
//! # impl InferenceHost for Runtime {
//! #     fn create_trace(&self, _: L) -> infertrace::Result<Box<dyn TraceHandle>> { unimplemented!() }
//! #     fn steady_timestamp_ns(&self) -> u64 { 0 }
//! #     fn copy_to_host(&self, _: &TensorEvent<'_>) -> infertrace::Result<Vec<u8>> { unimplemented!() }
//! # }
//!
//! # fn main() -> infertrace::Result<()> {
//! # let runtime = std::sync::Arc::new(Runtime);
//! let manager = TraceManager::new(
//!     runtime,
//!     TraceConfig::default()
//!         .with_level(TraceLevel::TIMESTAMPS)
//!         .with_rate(100)
//!         .with_filepath("trace.json"),
//! );
//!
//! // At request admission:
//! if let Some(trace) = manager.sample_trace("resnet") {
//!     // hand `trace` to the request so lifecycle callbacks reach it
//! }
//!
//! // At runtime, tighten sampling for one model:
//! manager.update_trace_setting("resnet", &TraceSettingUpdate::default().with_rate(10))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`manager`] - setting registry, update protocol and sampling entry point
//! - [`setting`] - effective setting snapshots and the per-setting sampler
//! - [`trace`] - per-request aggregation of activities and tensor payloads
//! - [`file`] - indexed and aggregate JSON trace files
//! - [`host`] - the traits the embedding runtime implements
//! - [`config`] - configuration types and the partial-update encoding
//! - [`error`] - error types and the propagation policy
//!
//! The `otel` feature (enabled by default) provides the OpenTelemetry trace
//! mode through an OTLP/HTTP exporter. Without it, OpenTelemetry-mode
//! settings remain configurable but span operations are logged as
//! unsupported and dropped.

pub mod config;
pub mod error;
pub mod file;
pub mod host;
pub mod manager;
#[cfg(feature = "otel")]
pub mod otel;
pub mod setting;
pub mod trace;

pub use config::{FieldUpdate, TraceConfig, TraceConfigMap, TraceLevel, TraceMode, TraceSettingUpdate};
pub use error::TraceError;
pub use host::{DataType, InferenceHost, MemoryType, TensorEvent, TraceActivity, TraceHandle};
pub use manager::TraceManager;
pub use setting::{TraceSetting, TraceSettingSnapshot};
pub use trace::Trace;

pub type Result<T> = std::result::Result<T, TraceError>;
