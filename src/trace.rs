//! Per-request trace aggregation.
//!
//! A [`Trace`] is created for every sampled request and shared, through an
//! `Arc`, between the root trace handle and any nested child handles the
//! host creates for the same request. Activity callbacks append JSON
//! fragments to per-sub-trace streams (TRITON mode) or events to a single
//! server span (OpenTelemetry mode). When the host releases the last
//! handle the aggregator is dropped, which either hands the buffered
//! streams to the setting it was sampled under or ends the span.

use crate::config::{TraceLevel, TraceMode};
use crate::host::{DataType, InferenceHost, MemoryType, TensorEvent, TraceActivity, TraceHandle};
use crate::setting::TraceSetting;
use crate::Result;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

#[cfg(feature = "otel")]
use crate::otel::OtelTracer;
#[cfg(feature = "otel")]
use opentelemetry::trace::Span as _;
#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use std::time::Duration;

/// Aggregator for one sampled request and its nested sub-traces
///
/// The host forwards a clone of the `Arc<Trace>` with every activity
/// callback; dropping the last clone finalizes the trace.
pub struct Trace {
    trace_id: u64,
    setting: Arc<TraceSetting>,
    host: Arc<dyn InferenceHost>,
    root: Box<dyn TraceHandle>,
    // Wall clock minus the host steady clock, captured once at creation so
    // event translation cannot drift over the trace lifetime.
    time_offset_ns: i64,
    #[cfg(feature = "otel")]
    tracer: Option<OtelTracer>,
    inner: Mutex<TraceInner>,
}

struct TraceInner {
    /// Per-sub-trace JSON fragment streams, keyed by sub-trace id
    streams: HashMap<u64, String>,
    #[cfg(feature = "otel")]
    span: Option<opentelemetry_sdk::trace::Span>,
}

impl Trace {
    /// Create the aggregator and the host-side root trace object
    pub(crate) fn create(
        setting: Arc<TraceSetting>,
        host: &Arc<dyn InferenceHost>,
    ) -> Result<Arc<Self>> {
        #[cfg(feature = "otel")]
        let tracer = match setting.mode() {
            TraceMode::OpenTelemetry => Some(OtelTracer::from_config(setting.config_map())?),
            TraceMode::Triton => None,
        };
        #[cfg(not(feature = "otel"))]
        if setting.mode() == TraceMode::OpenTelemetry {
            error!("unsupported trace mode: {}", setting.mode());
        }

        let root = host.create_trace(setting.level())?;
        let trace_id = root.id();
        let wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        let time_offset_ns = wall_ns - host.steady_timestamp_ns() as i64;

        Ok(Arc::new(Self {
            trace_id,
            setting,
            host: Arc::clone(host),
            root,
            time_offset_ns,
            #[cfg(feature = "otel")]
            tracer,
            inner: Mutex::new(TraceInner {
                streams: HashMap::new(),
                #[cfg(feature = "otel")]
                span: None,
            }),
        }))
    }

    /// Id of the root trace handle
    pub fn id(&self) -> u64 {
        self.trace_id
    }

    /// The host-side root trace object
    pub fn root_handle(&self) -> &dyn TraceHandle {
        self.root.as_ref()
    }

    /// The setting this trace was sampled under
    pub fn setting(&self) -> &Arc<TraceSetting> {
        &self.setting
    }

    /// Record an extra named timestamp against the root trace
    ///
    /// Used by frontends for events the host core does not see, for example
    /// wire receive and send times. A no-op unless the capture level
    /// includes timestamps.
    pub fn capture_timestamp(&self, name: &str, timestamp_ns: u64) {
        if !self.setting.level().contains(TraceLevel::TIMESTAMPS) {
            return;
        }
        match self.setting.mode() {
            TraceMode::Triton => {
                let mut inner = self.inner.lock().unwrap();
                let stream = stream_mut(&mut inner.streams, self.trace_id);
                append_timestamp(stream, self.trace_id, name, timestamp_ns);
            }
            TraceMode::OpenTelemetry => {
                self.add_span_event(name, timestamp_ns);
            }
        }
    }

    /// Record a lifecycle activity reported by the host
    ///
    /// `REQUEST_START` additionally serializes the sub-trace identity
    /// header (TRITON) or populates the span attributes (OpenTelemetry).
    pub fn record_activity(
        &self,
        handle: &dyn TraceHandle,
        activity: TraceActivity,
        timestamp_ns: u64,
    ) {
        let id = handle.id();
        match self.setting.mode() {
            TraceMode::Triton => {
                let mut inner = self.inner.lock().unwrap();
                let stream = stream_mut(&mut inner.streams, id);
                if activity == TraceActivity::RequestStart {
                    let _ = write!(
                        stream,
                        "{{\"id\":{},\"model_name\":{},\"model_version\":{}",
                        id,
                        json_string(&handle.model_name()),
                        handle.model_version()
                    );
                    let request_id = handle.request_id();
                    if !request_id.is_empty() {
                        let _ = write!(stream, ",\"request_id\":{}", json_string(&request_id));
                    }
                    let parent_id = handle.parent_id();
                    if parent_id != 0 {
                        let _ = write!(stream, ",\"parent_id\":{}", parent_id);
                    }
                    stream.push_str("},");
                }
                append_timestamp(stream, id, activity.as_str(), timestamp_ns);
            }
            TraceMode::OpenTelemetry => {
                self.record_span_activity(handle, activity, timestamp_ns);
            }
        }
    }

    /// Record a tensor payload reported by the host
    ///
    /// Device-resident payloads are copied to host memory first; a failed
    /// copy drops the event. Tensor tracing only exists in TRITON mode.
    pub fn record_tensor_activity(
        &self,
        handle: &dyn TraceHandle,
        activity: TraceActivity,
        tensor: &TensorEvent<'_>,
    ) {
        if !activity.is_tensor() {
            error!("unsupported activity: {}", activity);
            return;
        }
        if tensor.datatype == DataType::Invalid {
            error!("unsupported datatype for tensor {}", tensor.name);
            return;
        }

        let copied;
        let data: &[u8] = match tensor.memory_type {
            MemoryType::Gpu => match self.host.copy_to_host(tensor) {
                Ok(buffer) => {
                    copied = buffer;
                    &copied
                }
                Err(err) => {
                    error!("copying buffer into host memory: {}", err);
                    return;
                }
            },
            _ => tensor.data,
        };

        match self.setting.mode() {
            TraceMode::OpenTelemetry => {
                error!(
                    "Tensor level tracing is not supported by the mode: {}",
                    self.setting.mode()
                );
            }
            TraceMode::Triton => {
                let mut inner = self.inner.lock().unwrap();
                let stream = stream_mut(&mut inner.streams, handle.id());
                let _ = write!(
                    stream,
                    "{{\"id\":{},\"activity\":\"{}\",\"tensor\":{{\"name\":{},\"data\":\"",
                    handle.id(),
                    activity.as_str(),
                    json_string(tensor.name)
                );
                append_tensor_data(stream, tensor.datatype, data, tensor.element_count());
                stream.push_str("\",\"shape\":\"");
                for (i, dim) in tensor.shape.iter().enumerate() {
                    if i > 0 {
                        stream.push(',');
                    }
                    let _ = write!(stream, "{}", dim);
                }
                let _ = write!(stream, "\",\"dtype\":\"{}\"}}}}", tensor.datatype.as_str());
            }
        }
    }

    #[cfg(feature = "otel")]
    fn record_span_activity(
        &self,
        handle: &dyn TraceHandle,
        activity: TraceActivity,
        timestamp_ns: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(span) = self.ensure_span(&mut inner, timestamp_ns) else {
            return;
        };
        if activity == TraceActivity::RequestStart {
            span.set_attribute(KeyValue::new("triton.model_name", handle.model_name()));
            span.set_attribute(KeyValue::new("triton.model_version", handle.model_version()));
            span.set_attribute(KeyValue::new(
                "triton.trace_parent_id",
                handle.parent_id() as i64,
            ));
            span.set_attribute(KeyValue::new("triton.trace_request_id", handle.request_id()));
        }
        let wall = self.wall_time(timestamp_ns);
        span.add_event_with_timestamp(
            activity.as_str(),
            wall,
            vec![KeyValue::new(
                "triton.steady_timestamp_ns",
                timestamp_ns as i64,
            )],
        );
    }

    #[cfg(not(feature = "otel"))]
    fn record_span_activity(
        &self,
        _handle: &dyn TraceHandle,
        _activity: TraceActivity,
        _timestamp_ns: u64,
    ) {
        error!("unsupported trace mode: {}", self.setting.mode());
    }

    #[cfg(feature = "otel")]
    fn add_span_event(&self, name: &str, timestamp_ns: u64) {
        let mut inner = self.inner.lock().unwrap();
        let wall = self.wall_time(timestamp_ns);
        let Some(span) = self.ensure_span(&mut inner, timestamp_ns) else {
            return;
        };
        span.add_event_with_timestamp(
            name.to_string(),
            wall,
            vec![KeyValue::new(
                "triton.steady_timestamp_ns",
                timestamp_ns as i64,
            )],
        );
    }

    #[cfg(not(feature = "otel"))]
    fn add_span_event(&self, _name: &str, _timestamp_ns: u64) {
        error!("unsupported trace mode: {}", self.setting.mode());
    }

    /// Open the span on the first observed activity
    #[cfg(feature = "otel")]
    fn ensure_span<'a>(
        &self,
        inner: &'a mut TraceInner,
        timestamp_ns: u64,
    ) -> Option<&'a mut opentelemetry_sdk::trace::Span> {
        if inner.span.is_none() {
            let tracer = self.tracer.as_ref()?;
            inner.span = Some(tracer.start_span(self.wall_time(timestamp_ns)));
        }
        inner.span.as_mut()
    }

    /// Translate a host steady-clock timestamp to wall clock
    #[cfg(feature = "otel")]
    fn wall_time(&self, timestamp_ns: u64) -> SystemTime {
        let ns = self
            .time_offset_ns
            .saturating_add(timestamp_ns as i64)
            .max(0) as u64;
        UNIX_EPOCH + Duration::from_nanos(ns)
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        match self.setting.mode() {
            TraceMode::Triton => {
                let inner = match self.inner.get_mut() {
                    Ok(inner) => inner,
                    Err(poisoned) => poisoned.into_inner(),
                };
                self.setting.write_trace(&inner.streams);
            }
            TraceMode::OpenTelemetry => {
                #[cfg(feature = "otel")]
                {
                    let inner = match self.inner.get_mut() {
                        Ok(inner) => inner,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if let Some(span) = inner.span.as_mut() {
                        span.end();
                    }
                }
            }
        }
    }
}

/// Select or create the fragment stream for a sub-trace, separating any
/// existing content with a comma
fn stream_mut(streams: &mut HashMap<u64, String>, id: u64) -> &mut String {
    let stream = streams.entry(id).or_default();
    if !stream.is_empty() {
        stream.push(',');
    }
    stream
}

fn append_timestamp(stream: &mut String, id: u64, name: &str, timestamp_ns: u64) {
    let _ = write!(
        stream,
        "{{\"id\":{},\"timestamps\":[{{\"name\":\"{}\",\"ns\":{}}}]}}",
        id, name, timestamp_ns
    );
}

/// JSON-escape a user-provided string, quotes included
fn json_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

macro_rules! push_scalars {
    ($out:expr, $data:expr, $count:expr, $ty:ty) => {{
        const SIZE: usize = std::mem::size_of::<$ty>();
        for (i, chunk) in $data.chunks_exact(SIZE).take($count).enumerate() {
            if i > 0 {
                $out.push(',');
            }
            let mut buf = [0u8; SIZE];
            buf.copy_from_slice(chunk);
            let _ = write!($out, "{}", <$ty>::from_ne_bytes(buf));
        }
    }};
}

/// Serialize a tensor payload into the `data` field
///
/// Numeric types render as comma-separated decimals, booleans as
/// `true`/`false`, BYTES as length-prefixed quoted entries. FP16 and BF16
/// payloads are emitted empty until a binary-blob representation lands.
fn append_tensor_data(out: &mut String, datatype: DataType, data: &[u8], element_count: usize) {
    match datatype {
        DataType::Bool => {
            for (i, byte) in data.iter().take(element_count).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(if *byte == 0 { "false" } else { "true" });
            }
        }
        DataType::Uint8 => push_scalars!(out, data, element_count, u8),
        DataType::Uint16 => push_scalars!(out, data, element_count, u16),
        DataType::Uint32 => push_scalars!(out, data, element_count, u32),
        DataType::Uint64 => push_scalars!(out, data, element_count, u64),
        DataType::Int8 => push_scalars!(out, data, element_count, i8),
        DataType::Int16 => push_scalars!(out, data, element_count, i16),
        DataType::Int32 => push_scalars!(out, data, element_count, i32),
        DataType::Int64 => push_scalars!(out, data, element_count, i64),
        DataType::Fp32 => push_scalars!(out, data, element_count, f32),
        DataType::Fp64 => push_scalars!(out, data, element_count, f64),
        // FP16 / BF16 travel as binary blobs elsewhere; no text form yet.
        DataType::Fp16 | DataType::Bf16 => {}
        DataType::Bytes => {
            let mut offset = 0usize;
            for i in 0..element_count {
                if offset + std::mem::size_of::<u32>() > data.len() {
                    return;
                }
                let mut len_buf = [0u8; 4];
                len_buf.copy_from_slice(&data[offset..offset + 4]);
                let len = u32::from_ne_bytes(len_buf) as usize;
                offset += 4;
                if offset + len > data.len() {
                    return;
                }
                if i > 0 {
                    out.push(',');
                }
                out.push_str("\\\"");
                out.push_str(&String::from_utf8_lossy(&data[offset..offset + len]));
                out.push_str("\\\"");
                offset += len;
            }
        }
        // Rejected before serialization starts.
        DataType::Invalid => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceConfigMap;
    use crate::file::TraceFile;
    use crate::host::testing::{MockHandle, MockHost};
    use crate::setting::SpecifiedFields;

    fn triton_trace(level: TraceLevel, path: &str) -> Arc<Trace> {
        let setting = Arc::new(TraceSetting::new(
            level,
            1,
            -1,
            0,
            Arc::new(TraceFile::new(path)),
            TraceMode::Triton,
            TraceConfigMap::new(),
            SpecifiedFields::default(),
        ));
        let host: Arc<dyn InferenceHost> = MockHost::new();
        setting.sample_trace(&host).unwrap()
    }

    fn stream_of(trace: &Trace, id: u64) -> String {
        trace.inner.lock().unwrap().streams[&id].clone()
    }

    #[test]
    fn test_request_start_emits_identity_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let trace = triton_trace(TraceLevel::TIMESTAMPS, &path);

        let handle = MockHandle::new(trace.id(), 0, "resnet", 3, "req-7");
        trace.record_activity(&handle, TraceActivity::RequestStart, 42);

        assert_eq!(
            stream_of(&trace, trace.id()),
            format!(
                "{{\"id\":{id},\"model_name\":\"resnet\",\"model_version\":3,\
                 \"request_id\":\"req-7\"}},\
                 {{\"id\":{id},\"timestamps\":[{{\"name\":\"REQUEST_START\",\"ns\":42}}]}}",
                id = trace.id()
            )
        );
    }

    #[test]
    fn test_child_header_carries_parent_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let trace = triton_trace(TraceLevel::TIMESTAMPS, &path);

        let child = MockHandle::new(99, trace.id(), "ensemble_step", 1, "");
        trace.record_activity(&child, TraceActivity::RequestStart, 5);

        let stream = stream_of(&trace, 99);
        assert!(stream.contains(&format!("\"parent_id\":{}", trace.id())));
        assert!(!stream.contains("request_id"));
    }

    #[test]
    fn test_activities_for_one_sub_trace_are_comma_separated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let trace = triton_trace(TraceLevel::TIMESTAMPS, &path);

        let handle = MockHandle::new(trace.id(), 0, "m", 1, "");
        trace.record_activity(&handle, TraceActivity::QueueStart, 10);
        trace.record_activity(&handle, TraceActivity::ComputeStart, 20);

        assert_eq!(
            stream_of(&trace, trace.id()),
            format!(
                "{{\"id\":{id},\"timestamps\":[{{\"name\":\"QUEUE_START\",\"ns\":10}}]}},\
                 {{\"id\":{id},\"timestamps\":[{{\"name\":\"COMPUTE_START\",\"ns\":20}}]}}",
                id = trace.id()
            )
        );
    }

    #[test]
    fn test_capture_timestamp_requires_timestamp_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();

        let trace = triton_trace(TraceLevel::TENSORS, &path);
        trace.capture_timestamp("HTTP_RECV_START", 1);
        assert!(trace.inner.lock().unwrap().streams.is_empty());

        let trace = triton_trace(TraceLevel::TIMESTAMPS, &path);
        trace.capture_timestamp("HTTP_RECV_START", 1);
        assert!(stream_of(&trace, trace.id()).contains("HTTP_RECV_START"));
    }

    #[test]
    fn test_model_name_is_json_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let trace = triton_trace(TraceLevel::TIMESTAMPS, &path);

        let handle = MockHandle::new(trace.id(), 0, "model \"v2\"", 1, "");
        trace.record_activity(&handle, TraceActivity::RequestStart, 1);
        assert!(stream_of(&trace, trace.id()).contains("\"model_name\":\"model \\\"v2\\\"\""));
    }

    fn tensor_stream(datatype: DataType, data: &[u8], shape: &[i64]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let trace = triton_trace(TraceLevel::TENSORS, &path);
        let handle = MockHandle::new(trace.id(), 0, "m", 1, "");
        trace.record_tensor_activity(
            &handle,
            TraceActivity::TensorQueueInput,
            &TensorEvent {
                name: "input0",
                datatype,
                data,
                shape,
                memory_type: MemoryType::Cpu,
                memory_type_id: 0,
            },
        );
        let result = trace
            .inner
            .lock()
            .unwrap()
            .streams
            .get(&trace.id())
            .cloned()
            .unwrap_or_default();
        result
    }

    #[test]
    fn test_tensor_int32_payload() {
        let data: Vec<u8> = [1i32, -2, 3].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let stream = tensor_stream(DataType::Int32, &data, &[3]);
        assert!(stream.contains("\"activity\":\"TENSOR_QUEUE_INPUT\""));
        assert!(stream.contains("\"data\":\"1,-2,3\""));
        assert!(stream.contains("\"shape\":\"3\""));
        assert!(stream.contains("\"dtype\":\"INT32\""));
    }

    #[test]
    fn test_tensor_bool_payload() {
        let stream = tensor_stream(DataType::Bool, &[1, 0, 2], &[3]);
        assert!(stream.contains("\"data\":\"true,false,true\""));
    }

    #[test]
    fn test_tensor_fp32_payload() {
        let data: Vec<u8> = [1.5f32, 2.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let stream = tensor_stream(DataType::Fp32, &data, &[2]);
        assert!(stream.contains("\"data\":\"1.5,2\""));
    }

    #[test]
    fn test_tensor_fp16_payload_is_empty() {
        let stream = tensor_stream(DataType::Fp16, &[0, 1, 2, 3], &[2]);
        assert!(stream.contains("\"data\":\"\""));
        assert!(stream.contains("\"dtype\":\"FP16\""));
        assert!(stream.contains("\"shape\":\"2\""));
    }

    #[test]
    fn test_tensor_bytes_payload() {
        let mut data = Vec::new();
        for entry in ["ab", "cde"] {
            data.extend_from_slice(&(entry.len() as u32).to_ne_bytes());
            data.extend_from_slice(entry.as_bytes());
        }
        let stream = tensor_stream(DataType::Bytes, &data, &[2]);
        assert!(stream.contains("\"data\":\"\\\"ab\\\",\\\"cde\\\"\""));
    }

    #[test]
    fn test_tensor_bytes_overflow_stops_silently() {
        // Second entry claims more bytes than the payload carries.
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_ne_bytes());
        data.extend_from_slice(b"ab");
        data.extend_from_slice(&100u32.to_ne_bytes());
        data.extend_from_slice(b"cd");
        let stream = tensor_stream(DataType::Bytes, &data, &[2]);
        assert!(stream.contains("\"data\":\"\\\"ab\\\"\""));
        // The fragment still closes as well-formed JSON.
        assert!(stream.ends_with("}"));
        assert!(serde_json::from_str::<serde_json::Value>(&stream).is_ok());
    }

    #[test]
    fn test_tensor_non_tensor_activity_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let trace = triton_trace(TraceLevel::TENSORS, &path);
        let handle = MockHandle::new(trace.id(), 0, "m", 1, "");
        trace.record_tensor_activity(
            &handle,
            TraceActivity::ComputeStart,
            &TensorEvent {
                name: "input0",
                datatype: DataType::Int8,
                data: &[1],
                shape: &[1],
                memory_type: MemoryType::Cpu,
                memory_type_id: 0,
            },
        );
        assert!(trace.inner.lock().unwrap().streams.is_empty());
    }

    #[test]
    fn test_tensor_device_copy_failure_drops_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json").display().to_string();
        let setting = Arc::new(TraceSetting::new(
            TraceLevel::TENSORS,
            1,
            -1,
            0,
            Arc::new(TraceFile::new(&path)),
            TraceMode::Triton,
            TraceConfigMap::new(),
            SpecifiedFields::default(),
        ));
        let mock = MockHost::new();
        mock.fail_copy.store(true, std::sync::atomic::Ordering::SeqCst);
        let host: Arc<dyn InferenceHost> = mock;
        let trace = setting.sample_trace(&host).unwrap();

        let handle = MockHandle::new(trace.id(), 0, "m", 1, "");
        trace.record_tensor_activity(
            &handle,
            TraceActivity::TensorBackendInput,
            &TensorEvent {
                name: "input0",
                datatype: DataType::Int8,
                data: &[1, 2],
                shape: &[2],
                memory_type: MemoryType::Gpu,
                memory_type_id: 0,
            },
        );
        assert!(trace.inner.lock().unwrap().streams.is_empty());
    }

    #[cfg(feature = "otel")]
    mod otel {
        use super::*;
        use opentelemetry::trace::SpanKind;
        use opentelemetry::Value;
        use opentelemetry_sdk::testing::trace::InMemorySpanExporter;

        fn otel_trace(exporter: InMemorySpanExporter, offset_ns: i64) -> Arc<Trace> {
            let setting = Arc::new(TraceSetting::new(
                TraceLevel::TIMESTAMPS,
                1,
                -1,
                0,
                Arc::new(TraceFile::new("")),
                TraceMode::OpenTelemetry,
                TraceConfigMap::new(),
                SpecifiedFields::default(),
            ));
            let host: Arc<dyn InferenceHost> = MockHost::new();
            let root = host.create_trace(TraceLevel::TIMESTAMPS).unwrap();
            let trace_id = root.id();
            Arc::new(Trace {
                trace_id,
                setting,
                host,
                root,
                time_offset_ns: offset_ns,
                tracer: Some(OtelTracer::with_exporter(exporter)),
                inner: Mutex::new(TraceInner {
                    streams: HashMap::new(),
                    span: None,
                }),
            })
        }

        fn attr_value(span: &opentelemetry_sdk::export::trace::SpanData, key: &str) -> Option<Value> {
            span.attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.clone())
        }

        #[test]
        fn test_request_start_populates_span() {
            let exporter = InMemorySpanExporter::default();
            let trace = otel_trace(exporter.clone(), 1_000);

            let handle = MockHandle::new(trace.id(), 0, "resnet", 3, "req-7");
            trace.record_activity(&handle, TraceActivity::RequestStart, 5);
            trace.record_activity(&handle, TraceActivity::ComputeStart, 9);
            drop(trace);

            let spans = exporter.get_finished_spans().unwrap();
            assert_eq!(spans.len(), 1);
            let span = &spans[0];
            assert_eq!(span.name, "InferRequest");
            assert_eq!(span.span_kind, SpanKind::Server);
            assert_eq!(
                span.start_time,
                UNIX_EPOCH + Duration::from_nanos(1_005)
            );
            assert_eq!(
                attr_value(span, "triton.model_name"),
                Some(Value::from("resnet"))
            );
            assert_eq!(
                attr_value(span, "triton.model_version"),
                Some(Value::from(3i64))
            );
            assert_eq!(
                attr_value(span, "triton.trace_parent_id"),
                Some(Value::from(0i64))
            );
            assert_eq!(
                attr_value(span, "triton.trace_request_id"),
                Some(Value::from("req-7"))
            );

            let events: Vec<_> = span.events.iter().collect();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].name, "REQUEST_START");
            assert_eq!(events[1].name, "COMPUTE_START");
            assert_eq!(events[1].timestamp, UNIX_EPOCH + Duration::from_nanos(1_009));
        }

        #[test]
        fn test_capture_timestamp_becomes_span_event() {
            let exporter = InMemorySpanExporter::default();
            let trace = otel_trace(exporter.clone(), 0);
            trace.capture_timestamp("HTTP_SEND_END", 77);
            drop(trace);

            let spans = exporter.get_finished_spans().unwrap();
            assert_eq!(spans.len(), 1);
            let events: Vec<_> = spans[0].events.iter().collect();
            assert_eq!(events[0].name, "HTTP_SEND_END");
            assert_eq!(
                events[0]
                    .attributes
                    .iter()
                    .find(|kv| kv.key.as_str() == "triton.steady_timestamp_ns")
                    .map(|kv| kv.value.clone()),
                Some(Value::from(77i64))
            );
        }

        #[test]
        fn test_tensor_activity_unsupported_in_otel_mode() {
            let exporter = InMemorySpanExporter::default();
            let trace = otel_trace(exporter.clone(), 0);
            let handle = MockHandle::new(trace.id(), 0, "m", 1, "");
            trace.record_tensor_activity(
                &handle,
                TraceActivity::TensorQueueInput,
                &TensorEvent {
                    name: "input0",
                    datatype: DataType::Int8,
                    data: &[1],
                    shape: &[1],
                    memory_type: MemoryType::Cpu,
                    memory_type_id: 0,
                },
            );
            drop(trace);

            // No span is opened for a dropped tensor event.
            assert!(exporter.get_finished_spans().unwrap().is_empty());
        }
    }
}
