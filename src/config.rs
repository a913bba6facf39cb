//! Trace configuration surface.
//!
//! A trace setting is described by seven fields: capture level, sampling
//! rate, remaining trace budget, log frequency, output file path, trace mode
//! and the per-mode option map. Settings support partial overrides: a
//! per-model setting may pin any subset of fields and inherit the rest from
//! the global setting, which in turn inherits unpinned fields from the
//! startup defaults. Updates therefore carry, per field, one of three
//! intents: set a new override, clear an existing override, or keep the
//! field as it is. [`FieldUpdate`] encodes exactly those three intents.
//!
//! All types here are plain data with serde support so embedders can expose
//! them through their own configuration files and admin endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Bitmask describing what a sampled trace captures
///
/// The zero value disables tracing entirely; `TIMESTAMPS` and `TENSORS` can
/// be combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceLevel(u32);

impl TraceLevel {
    /// Tracing disabled
    pub const DISABLED: TraceLevel = TraceLevel(0);
    /// Capture activity timestamps
    pub const TIMESTAMPS: TraceLevel = TraceLevel(1);
    /// Capture tensor payloads
    pub const TENSORS: TraceLevel = TraceLevel(1 << 1);

    /// Whether any of the bits in `other` are set
    pub fn contains(self, other: TraceLevel) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no capture bit is set
    pub fn is_disabled(self) -> bool {
        self.0 == 0
    }
}

impl Default for TraceLevel {
    fn default() -> Self {
        TraceLevel::DISABLED
    }
}

impl BitOr for TraceLevel {
    type Output = TraceLevel;

    fn bitor(self, rhs: TraceLevel) -> TraceLevel {
        TraceLevel(self.0 | rhs.0)
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_disabled() {
            return write!(f, "OFF");
        }
        let mut first = true;
        for (bit, name) in [
            (TraceLevel::TIMESTAMPS, "TIMESTAMPS"),
            (TraceLevel::TENSORS, "TENSORS"),
        ] {
            if self.contains(bit) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut level = TraceLevel::DISABLED;
        for part in s.split(',') {
            match part.trim().to_uppercase().as_str() {
                "OFF" | "DISABLED" => {}
                "TIMESTAMPS" => level = level | TraceLevel::TIMESTAMPS,
                "TENSORS" => level = level | TraceLevel::TENSORS,
                other => return Err(format!("Invalid trace level: {}", other)),
            }
        }
        Ok(level)
    }
}

/// Where collected traces are emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Native JSON trace stream persisted to indexed files
    #[default]
    Triton,
    /// Spans shipped to an external collector over OTLP/HTTP
    OpenTelemetry,
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceMode::Triton => write!(f, "TRITON"),
            TraceMode::OpenTelemetry => write!(f, "OPENTELEMETRY"),
        }
    }
}

impl FromStr for TraceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRITON" => Ok(TraceMode::Triton),
            "OPENTELEMETRY" | "OTEL" => Ok(TraceMode::OpenTelemetry),
            other => Err(format!("Invalid trace mode: {}", other)),
        }
    }
}

/// Free-form per-mode options, keyed by the mode they apply to
///
/// In OpenTelemetry mode the `url` option overrides the collector endpoint;
/// unrecognized options are ignored.
pub type TraceConfigMap = HashMap<TraceMode, HashMap<String, String>>;

/// Startup defaults for the trace subsystem
///
/// These values seed both the immutable default setting and the initial
/// global setting, with every field treated as inherited (no overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Capture level
    pub level: TraceLevel,
    /// One in every `rate` candidate requests becomes a trace
    pub rate: u32,
    /// Total trace budget; negative means unlimited
    pub count: i32,
    /// Buffered samples per indexed file; 0 disables rotation
    pub log_frequency: u32,
    /// Output file path (TRITON mode)
    pub filepath: String,
    /// Emission mode
    pub mode: TraceMode,
    /// Per-mode options
    pub config_map: TraceConfigMap,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            level: TraceLevel::DISABLED,
            rate: 1000,
            count: -1,
            log_frequency: 0,
            filepath: String::new(),
            mode: TraceMode::Triton,
            config_map: TraceConfigMap::new(),
        }
    }
}

impl TraceConfig {
    /// Set the capture level
    pub fn with_level(mut self, level: TraceLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the sampling rate
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Set the trace budget
    pub fn with_count(mut self, count: i32) -> Self {
        self.count = count;
        self
    }

    /// Set the log frequency
    pub fn with_log_frequency(mut self, log_frequency: u32) -> Self {
        self.log_frequency = log_frequency;
        self
    }

    /// Set the output file path
    pub fn with_filepath(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = filepath.into();
        self
    }

    /// Set the emission mode
    pub fn with_mode(mut self, mode: TraceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set a per-mode option
    pub fn with_option(
        mut self,
        mode: TraceMode,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config_map
            .entry(mode)
            .or_default()
            .insert(name.into(), value.into());
        self
    }
}

/// One field of a trace-setting update
///
/// `Set` installs an explicit override, `Clear` removes the override so the
/// field falls back to inheritance, `Keep` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldUpdate<T> {
    /// Install a new override value
    Set(T),
    /// Remove the override; the field reverts to its fallback
    Clear,
    /// No change requested for this field
    Keep,
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Keep
    }
}

impl<T> FieldUpdate<T> {
    /// Whether this update carries a new value
    pub fn is_set(&self) -> bool {
        matches!(self, FieldUpdate::Set(_))
    }

    /// The new value, if any
    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(value) => Some(value),
            _ => None,
        }
    }
}

/// A partial update to one trace setting
///
/// Defaults to a no-op for every field. Applying a default-constructed
/// update re-resolves inherited fields against the current fallback, which
/// is how global changes are propagated to partially-overriding models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSettingUpdate {
    pub level: FieldUpdate<TraceLevel>,
    pub rate: FieldUpdate<u32>,
    pub count: FieldUpdate<i32>,
    pub log_frequency: FieldUpdate<u32>,
    pub filepath: FieldUpdate<String>,
    pub mode: FieldUpdate<TraceMode>,
    pub config_map: FieldUpdate<TraceConfigMap>,
}

impl TraceSettingUpdate {
    /// Override the capture level
    pub fn with_level(mut self, level: TraceLevel) -> Self {
        self.level = FieldUpdate::Set(level);
        self
    }

    /// Override the sampling rate
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = FieldUpdate::Set(rate);
        self
    }

    /// Override the trace budget
    pub fn with_count(mut self, count: i32) -> Self {
        self.count = FieldUpdate::Set(count);
        self
    }

    /// Override the log frequency
    pub fn with_log_frequency(mut self, log_frequency: u32) -> Self {
        self.log_frequency = FieldUpdate::Set(log_frequency);
        self
    }

    /// Override the output file path
    pub fn with_filepath(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = FieldUpdate::Set(filepath.into());
        self
    }

    /// Override the emission mode
    pub fn with_mode(mut self, mode: TraceMode) -> Self {
        self.mode = FieldUpdate::Set(mode);
        self
    }

    /// Override the per-mode options
    pub fn with_config_map(mut self, config_map: TraceConfigMap) -> Self {
        self.config_map = FieldUpdate::Set(config_map);
        self
    }

    /// Clear the capture-level override
    pub fn clear_level(mut self) -> Self {
        self.level = FieldUpdate::Clear;
        self
    }

    /// Clear the sampling-rate override
    pub fn clear_rate(mut self) -> Self {
        self.rate = FieldUpdate::Clear;
        self
    }

    /// Clear the trace-budget override
    pub fn clear_count(mut self) -> Self {
        self.count = FieldUpdate::Clear;
        self
    }

    /// Clear the log-frequency override
    pub fn clear_log_frequency(mut self) -> Self {
        self.log_frequency = FieldUpdate::Clear;
        self
    }

    /// Clear the file-path override
    pub fn clear_filepath(mut self) -> Self {
        self.filepath = FieldUpdate::Clear;
        self
    }

    /// Clear the mode override
    pub fn clear_mode(mut self) -> Self {
        self.mode = FieldUpdate::Clear;
        self
    }

    /// Clear the option-map override
    pub fn clear_config_map(mut self) -> Self {
        self.config_map = FieldUpdate::Clear;
        self
    }
}
