//! Compiled-in defaults for the hazard classifier, channel windows and the
//! polling loop.
//!
//! Everything here can be overridden at runtime through
//! [`crate::node::NodeConfig`] and [`crate::hazard::Thresholds`]; these values
//! are what a freshly flashed node starts with.

// ── Hazard thresholds ───────────────────────────────────────────────

/// Average probe temperature (°C) above which the temperature rule fires.
pub const TEMPERATURE_LIMIT_C: f32 = 50.0;

/// Relative humidity (%) below which the dry-air rule fires.
pub const HUMIDITY_FLOOR_PCT: f32 = 30.0;

/// MQ-2 raw ADC reading above which the smoke/gas rule fires.
pub const GAS_LIMIT_RAW: f32 = 400.0;

/// MQ-7 reading above which the CO rule fires.
pub const CO_LIMIT_PPM: f32 = 20.0;

/// The CO rule adds `floor(co / CO_WEIGHT_DIVISOR)` points, not a flat 1.
pub const CO_WEIGHT_DIVISOR: f32 = 20.0;

/// Allowed spread (°C) between any single probe and the probe average.
pub const PROBE_DEVIATION_C: f32 = 5.0;

// ── Channel windows (samples) ───────────────────────────────────────

pub const TEMPERATURE_WINDOW: usize = 25;
pub const HUMIDITY_WINDOW: usize = 25;
pub const PRESSURE_WINDOW: usize = 25;
/// Gas channels are only lightly smoothed so spikes still register quickly.
pub const GAS_WINDOW: usize = 5;
pub const CO_WINDOW: usize = 5;

// ── Probes ──────────────────────────────────────────────────────────

/// Maximum number of DS18B20 probes tracked on the one-wire bus.
pub const MAX_PROBES: usize = 4;

// ── Polling loop ────────────────────────────────────────────────────

/// Tick period in milliseconds. Must stay above the DS18B20 12-bit
/// conversion time (750 ms) because conversions are pipelined across ticks.
pub const SAMPLE_INTERVAL_MS: u64 = 1000;

/// A status record goes to the RS-485 master every this many ticks.
pub const REPORT_EVERY_TICKS: u32 = 2;

// ── Identity ────────────────────────────────────────────────────────

/// Identity used when nothing valid has been persisted.
pub const DEFAULT_DEVICE_ID: &str = "firenode";
