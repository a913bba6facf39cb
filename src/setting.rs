//! Effective trace settings and the per-setting sampler.
//!
//! A [`TraceSetting`] is an immutable snapshot of one effective
//! configuration. Hot reconfiguration never mutates a published setting;
//! the manager allocates a replacement and swaps the registry pointer, so
//! traces sampled under the old snapshot keep batching and flushing against
//! it until the last of them is released. The only mutable state is the
//! sampler bookkeeping behind the internal mutex.

use crate::config::{TraceConfigMap, TraceLevel, TraceMode};
use crate::file::TraceFile;
use crate::host::InferenceHost;
use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Which fields of a setting are explicit overrides rather than inherited
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SpecifiedFields {
    pub level: bool,
    pub rate: bool,
    pub count: bool,
    pub log_frequency: bool,
    pub filepath: bool,
    pub mode: bool,
    pub config_map: bool,
}

impl SpecifiedFields {
    // The core fields decide whether a model fully overrides, partially
    // inherits, or fully inherits; mode and config_map do not participate.
    pub(crate) fn all_core(&self) -> bool {
        self.level && self.rate && self.count && self.log_frequency && self.filepath
    }

    pub(crate) fn none_core(&self) -> bool {
        !(self.level || self.rate || self.count || self.log_frequency || self.filepath)
    }
}

/// Mutable sampler bookkeeping, guarded by the setting mutex
struct SamplerState {
    /// Total candidates seen, with wrapping arithmetic
    sample: u64,
    /// Remaining trace budget; negative means unlimited
    count: i32,
    /// Traces created against a finite budget
    created: u64,
    /// Traces whose buffered fragments have been accepted
    collected: u64,
    /// Samples buffered in `trace_stream` since the last file flush
    sample_in_stream: u32,
    /// Accumulating JSON buffer (TRITON mode)
    trace_stream: String,
}

/// A serializable view of one setting's current values
///
/// `count` reports the live remaining budget, which is what administrative
/// settings queries are expected to show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSettingSnapshot {
    pub level: TraceLevel,
    pub rate: u32,
    pub count: i32,
    pub log_frequency: u32,
    pub filepath: String,
    pub mode: TraceMode,
    pub config_map: TraceConfigMap,
}

/// One effective trace configuration plus its sampler
///
/// Shared by the manager registry and by every in-flight [`Trace`] sampled
/// under it. Dropping the last reference flushes any buffered fragments to
/// the setting's file.
pub struct TraceSetting {
    level: TraceLevel,
    rate: u32,
    log_frequency: u32,
    file: Arc<TraceFile>,
    mode: TraceMode,
    config_map: TraceConfigMap,
    specified: SpecifiedFields,
    invalid_reason: Option<String>,
    state: Mutex<SamplerState>,
}

impl TraceSetting {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        level: TraceLevel,
        rate: u32,
        count: i32,
        log_frequency: u32,
        file: Arc<TraceFile>,
        mode: TraceMode,
        config_map: TraceConfigMap,
        specified: SpecifiedFields,
    ) -> Self {
        let invalid_reason = if level.is_disabled() {
            Some("tracing is disabled".to_string())
        } else if rate == 0 {
            Some("sample rate must be non-zero".to_string())
        } else if mode == TraceMode::Triton && file.file_name().is_empty() {
            Some("trace file name is not given".to_string())
        } else {
            None
        };

        Self {
            level,
            rate,
            log_frequency,
            file,
            mode,
            config_map,
            specified,
            invalid_reason,
            state: Mutex::new(SamplerState {
                sample: 0,
                count,
                created: 0,
                collected: 0,
                sample_in_stream: 0,
                trace_stream: String::new(),
            }),
        }
    }

    /// Whether traces may be sampled under this setting
    pub fn valid(&self) -> bool {
        self.invalid_reason.is_none()
    }

    /// Why the setting is invalid, empty when it is valid
    pub fn reason(&self) -> &str {
        self.invalid_reason.as_deref().unwrap_or("")
    }

    /// Capture level
    pub fn level(&self) -> TraceLevel {
        self.level
    }

    /// Sampling rate
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Remaining trace budget; negative means unlimited
    pub fn count(&self) -> i32 {
        self.state.lock().unwrap().count
    }

    /// Traces created against a finite budget since the setting took effect
    pub fn created(&self) -> u64 {
        self.state.lock().unwrap().created
    }

    /// Buffered samples per indexed file; 0 disables rotation
    pub fn log_frequency(&self) -> u32 {
        self.log_frequency
    }

    /// Output file path
    pub fn filepath(&self) -> &str {
        self.file.file_name()
    }

    /// Emission mode
    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Per-mode options
    pub fn config_map(&self) -> &TraceConfigMap {
        &self.config_map
    }

    pub(crate) fn specified(&self) -> &SpecifiedFields {
        &self.specified
    }

    pub(crate) fn trace_file(&self) -> &Arc<TraceFile> {
        &self.file
    }

    /// Current values as a serializable snapshot
    pub fn snapshot(&self) -> TraceSettingSnapshot {
        TraceSettingSnapshot {
            level: self.level,
            rate: self.rate,
            count: self.count(),
            log_frequency: self.log_frequency,
            filepath: self.file.file_name().to_string(),
            mode: self.mode,
            config_map: self.config_map.clone(),
        }
    }

    /// Consider one request for tracing
    ///
    /// Every `rate`-th candidate becomes a trace while the budget lasts.
    /// An exhausted budget (count 0) suppresses creation but candidates are
    /// still counted. Returns the shared trace holder on success.
    pub(crate) fn sample_trace(
        self: Arc<Self>,
        host: &Arc<dyn InferenceHost>,
    ) -> Option<Arc<Trace>> {
        let create = {
            let mut state = self.state.lock().unwrap();
            if !self.valid() {
                return None;
            }
            state.sample = state.sample.wrapping_add(1);
            let mut create = state.sample % u64::from(self.rate) == 0;
            if create {
                match state.count.cmp(&0) {
                    Ordering::Equal => create = false,
                    Ordering::Greater => {
                        state.count -= 1;
                        state.created += 1;
                    }
                    Ordering::Less => {}
                }
            }
            create
        };
        if !create {
            return None;
        }
        match Trace::create(self, host) {
            Ok(trace) => Some(trace),
            Err(err) => {
                error!("creating inference trace object: {}", err);
                None
            }
        }
    }

    /// Accept the buffered fragments of one released trace
    ///
    /// Appends the per-sub-trace streams to the accumulating buffer and
    /// flushes the buffer to an indexed file when either the budget has
    /// drained completely or `log_frequency` samples are buffered. The file
    /// write happens outside the setting mutex.
    pub(crate) fn write_trace(&self, streams: &HashMap<u64, String>) {
        let flushed = {
            let mut state = self.state.lock().unwrap();
            if state.sample_in_stream != 0 {
                state.trace_stream.push(',');
            }
            state.sample_in_stream += 1;
            state.collected += 1;

            let mut remaining = streams.len();
            for stream in streams.values() {
                state.trace_stream.push_str(stream);
                remaining -= 1;
                if remaining != 0 {
                    state.trace_stream.push(',');
                }
            }

            let drained = state.count == 0 && state.collected == state.sample;
            let rotate =
                self.log_frequency != 0 && state.sample_in_stream >= self.log_frequency;
            if drained || rotate {
                state.sample_in_stream = 0;
                Some(std::mem::take(&mut state.trace_stream))
            } else {
                None
            }
        };

        if let Some(stream) = flushed {
            self.file.save_traces(&stream, true);
        }
    }
}

impl Drop for TraceSetting {
    fn drop(&mut self) {
        // Flush whatever is still buffered; indexed iff rotation was on.
        if self.mode == TraceMode::Triton {
            let state = match self.state.get_mut() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if state.sample_in_stream != 0 {
                self.file
                    .save_traces(&state.trace_stream, self.log_frequency != 0);
            }
        }
    }
}
