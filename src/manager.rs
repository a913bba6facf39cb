//! Registry of global and per-model trace settings.
//!
//! The manager owns the update protocol for hot reconfiguration, the shared
//! trace-file cache, and the sampling entry point the host runtime calls at
//! request admission. Updates are serialized by one writer mutex; readers
//! take a second, short-lived mutex only long enough to clone the
//! applicable setting reference, then operate on that snapshot without any
//! registry lock. Settings are never mutated in place: every update
//! allocates a replacement so traces sampled under the old snapshot keep
//! their configuration and output file until released.

use crate::config::{FieldUpdate, TraceConfig, TraceSettingUpdate};
use crate::error::TraceError;
use crate::file::TraceFile;
use crate::host::{InferenceHost, TensorEvent, TraceActivity, TraceHandle};
use crate::setting::{SpecifiedFields, TraceSetting};
use crate::trace::Trace;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// The setting registry, guarded by the reader mutex
struct Registry {
    global: Arc<TraceSetting>,
    models: HashMap<String, Arc<TraceSetting>>,
}

/// Update-side bookkeeping, guarded by the writer mutex
struct UpdateState {
    /// Models whose setting inherits at least one, but not all, of the core
    /// fields from the global setting
    fallback_used_models: HashSet<String>,
    /// Shared trace files keyed by path; weak so a file dies with its last
    /// owning setting
    trace_files: HashMap<String, Weak<TraceFile>>,
}

/// Global and per-model trace settings, plus the sampling entry point
///
/// Created once at startup; the manager can always be constructed, even
/// with tracing disabled, so settings can be turned on later at runtime.
pub struct TraceManager {
    host: Arc<dyn InferenceHost>,
    /// The immutable startup values; fallback for global updates
    global_default: Arc<TraceSetting>,
    registry: Mutex<Registry>,
    update_state: Mutex<UpdateState>,
}

impl TraceManager {
    /// Create the manager with startup defaults
    ///
    /// Both the default and the initial global setting take the startup
    /// values with every field treated as inherited.
    pub fn new(host: Arc<dyn InferenceHost>, config: TraceConfig) -> Self {
        let file = Arc::new(TraceFile::new(config.filepath.clone()));
        let make = || {
            TraceSetting::new(
                config.level,
                config.rate,
                config.count,
                config.log_frequency,
                Arc::clone(&file),
                config.mode,
                config.config_map.clone(),
                SpecifiedFields::default(),
            )
        };
        let global_default = Arc::new(make());
        let global = Arc::new(make());

        let mut trace_files = HashMap::new();
        trace_files.insert(config.filepath, Arc::downgrade(&file));

        Self {
            host,
            global_default,
            registry: Mutex::new(Registry {
                global,
                models: HashMap::new(),
            }),
            update_state: Mutex::new(UpdateState {
                fallback_used_models: HashSet::new(),
                trace_files,
            }),
        }
    }

    /// Apply a partial setting update
    ///
    /// An empty `model_name` updates the global setting and re-resolves
    /// every model that partially inherits from it, so inherited fields
    /// observe the change. Returns an error for invalid settings unless the
    /// update disables tracing.
    pub fn update_trace_setting(
        &self,
        model_name: &str,
        update: &TraceSettingUpdate,
    ) -> Result<()> {
        let mut state = self.update_state.lock().unwrap();

        self.update_internal(&mut state, model_name, update)?;
        if model_name.is_empty() {
            // A default-constructed update re-resolves only inherited
            // fields. The set is copied because the loop may shrink it.
            let fallback_models: Vec<String> =
                state.fallback_used_models.iter().cloned().collect();
            let noop = TraceSettingUpdate::default();
            for name in fallback_models {
                self.update_internal(&mut state, &name, &noop)?;
            }
        }
        Ok(())
    }

    fn update_internal(
        &self,
        state: &mut UpdateState,
        model_name: &str,
        update: &TraceSettingUpdate,
    ) -> Result<()> {
        // Snapshot the current and fallback settings. The writer mutex is
        // held, so nobody else can swap registry entries underneath us.
        let (current, fallback) = {
            let registry = self.registry.lock().unwrap();
            if model_name.is_empty() {
                (
                    Some(Arc::clone(&registry.global)),
                    Arc::clone(&self.global_default),
                )
            } else {
                (
                    registry.models.get(model_name).cloned(),
                    Arc::clone(&registry.global),
                )
            }
        };
        let current = current.as_deref();

        let (level, level_specified) = resolve_field(
            &update.level,
            current.map(|c| (c.level(), c.specified().level)),
            fallback.level(),
        );
        let (rate, rate_specified) = resolve_field(
            &update.rate,
            current.map(|c| (c.rate(), c.specified().rate)),
            fallback.rate(),
        );
        // The count fallback is the live remaining budget, so an inherited
        // budget keeps draining across updates instead of resetting.
        let (count, count_specified) = resolve_field(
            &update.count,
            current.map(|c| (c.count(), c.specified().count)),
            fallback.count(),
        );
        let (log_frequency, log_frequency_specified) = resolve_field(
            &update.log_frequency,
            current.map(|c| (c.log_frequency(), c.specified().log_frequency)),
            fallback.log_frequency(),
        );
        let (filepath, filepath_specified) = resolve_field(
            &update.filepath,
            current.map(|c| (c.filepath().to_string(), c.specified().filepath)),
            fallback.filepath().to_string(),
        );
        let (mode, mode_specified) = resolve_field(
            &update.mode,
            current.map(|c| (c.mode(), c.specified().mode)),
            fallback.mode(),
        );
        let (config_map, config_map_specified) = resolve_field(
            &update.config_map,
            current.map(|c| (c.config_map().clone(), c.specified().config_map)),
            fallback.config_map().clone(),
        );

        let specified = SpecifiedFields {
            level: level_specified,
            rate: rate_specified,
            count: count_specified,
            log_frequency: log_frequency_specified,
            filepath: filepath_specified,
            mode: mode_specified,
            config_map: config_map_specified,
        };

        if !model_name.is_empty() {
            if specified.all_core() {
                state.fallback_used_models.remove(model_name);
            } else if specified.none_core() {
                // Nothing overridden any more: the model reverts to the
                // global setting outright.
                state.fallback_used_models.remove(model_name);
                let mut registry = self.registry.lock().unwrap();
                registry.models.remove(model_name);
                return Ok(());
            } else {
                state.fallback_used_models.insert(model_name.to_string());
            }
        }

        // Resolve the output file through the weak cache. A dead entry is
        // treated as absent and replaced, never resurrected.
        let file = match state.trace_files.get(&filepath).and_then(Weak::upgrade) {
            Some(file) => file,
            None => {
                let file = Arc::new(TraceFile::new(filepath.clone()));
                state
                    .trace_files
                    .insert(filepath.clone(), Arc::downgrade(&file));
                file
            }
        };

        let setting = Arc::new(TraceSetting::new(
            level,
            rate,
            count,
            log_frequency,
            file,
            mode,
            config_map,
            specified,
        ));
        // The only invalid setting allowed is one that disables tracing.
        if !setting.valid() && !level.is_disabled() {
            return Err(TraceError::invalid_argument(format!(
                "Attempting to set invalid trace setting: {}",
                setting.reason()
            )));
        }

        // Swap the registry pointer under the reader mutex. In-flight
        // traces keep their reference to the replaced snapshot.
        {
            let mut registry = self.registry.lock().unwrap();
            if model_name.is_empty() {
                registry.global = setting;
            } else {
                registry.models.insert(model_name.to_string(), setting);
            }
        }

        Ok(())
    }

    /// The setting that currently applies to `model_name`
    pub fn trace_setting(&self, model_name: &str) -> Arc<TraceSetting> {
        let registry = self.registry.lock().unwrap();
        registry
            .models
            .get(model_name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&registry.global))
    }

    /// Consider one request for tracing
    ///
    /// Picks the applicable setting under a brief registry lock, then asks
    /// its sampler. The returned holder is shared with the host's root and
    /// child trace handles.
    pub fn sample_trace(&self, model_name: &str) -> Option<Arc<Trace>> {
        let setting = self.trace_setting(model_name);
        setting.sample_trace(&self.host)
    }

    /// Host callback: an activity occurred on a (sub-)trace
    pub fn trace_activity(
        handle: &dyn TraceHandle,
        activity: TraceActivity,
        timestamp_ns: u64,
        trace: &Arc<Trace>,
    ) {
        trace.record_activity(handle, activity, timestamp_ns);
    }

    /// Host callback: a tensor payload is available on a (sub-)trace
    pub fn trace_tensor_activity(
        handle: &dyn TraceHandle,
        activity: TraceActivity,
        tensor: &TensorEvent<'_>,
        trace: &Arc<Trace>,
    ) {
        trace.record_tensor_activity(handle, activity, tensor);
    }

    /// Host callback: a (sub-)trace handle is released
    ///
    /// Consumes the host trace object and this handle's clone of the shared
    /// holder; the trace finalizes when the last clone drops.
    pub fn trace_release(handle: Box<dyn TraceHandle>, trace: Arc<Trace>) {
        if handle.parent_id() == 0 {
            debug!("releasing root trace {}", handle.id());
        }
        drop(trace);
        drop(handle);
    }
}

/// Merge one field of an update with the current override state and the
/// fallback value, yielding the effective value and its specified bit
fn resolve_field<T: Clone>(
    update: &FieldUpdate<T>,
    current: Option<(T, bool)>,
    fallback: T,
) -> (T, bool) {
    match update {
        FieldUpdate::Clear => (fallback, false),
        FieldUpdate::Set(value) => (value.clone(), true),
        FieldUpdate::Keep => match current {
            Some((value, true)) => (value, true),
            _ => (fallback, false),
        },
    }
}
