//! Sensor node context.
//!
//! [`SensorNode`] owns one [`MovingAverage`] per channel and turns a tick's
//! raw [`Reading`] into a smoothed [`Snapshot`] plus its hazard
//! [`Assessment`]. The polling loop holds exactly one node and drives it once
//! per tick; nothing here blocks or touches hardware.
//!
//! Probe policy: a probe with no sample this tick keeps its filter history
//! but sits out the temperature average and the deviation check until it
//! reports again.

use heapless::Vec;
use serde::Serialize;

use crate::defaults::{
    CO_WINDOW, GAS_WINDOW, HUMIDITY_WINDOW, MAX_PROBES, PRESSURE_WINDOW, TEMPERATURE_WINDOW,
};
use crate::filter::{FilterError, MovingAverage};
use crate::hazard::{classify, Assessment, HazardInputs, Thresholds};

/// Per-probe values, indexed by probe number.
pub type ProbeValues = Vec<Option<f32>, MAX_PROBES>;

/// Window size for each channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelWindows {
    pub temperature: usize,
    pub humidity: usize,
    pub pressure: usize,
    pub gas: usize,
    pub co: usize,
}

impl Default for ChannelWindows {
    fn default() -> Self {
        Self {
            temperature: TEMPERATURE_WINDOW,
            humidity: HUMIDITY_WINDOW,
            pressure: PRESSURE_WINDOW,
            gas: GAS_WINDOW,
            co: CO_WINDOW,
        }
    }
}

/// Runtime configuration for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeConfig {
    pub windows: ChannelWindows,
    pub thresholds: Thresholds,
}

/// Raw samples acquired during one tick, already unit-converted.
#[derive(Debug, Clone, Default)]
pub struct Reading {
    /// MQ-2 raw ADC value; `None` if the conversion failed
    pub gas: Option<f32>,
    /// MQ-7 raw ADC value; `None` if the conversion failed
    pub co: Option<f32>,
    /// BME280 relative humidity (%); `None` if the read failed
    pub humidity: Option<f32>,
    /// BME280 pressure (hPa); `None` if the read failed
    pub pressure: Option<f32>,
    /// One entry per probe (°C); `None` if that probe failed this tick
    pub probes: ProbeValues,
}

/// Smoothed channel outputs and the resulting assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Mean of the active probes' smoothed temperatures
    pub avg_temperature: Option<f32>,
    /// Smoothed temperature per probe; `None` for probes sitting out this tick
    pub probes: ProbeValues,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
    pub gas: Option<f32>,
    pub co: Option<f32>,
    pub assessment: Assessment,
}

struct Probe {
    filter: MovingAverage,
    /// Whether this probe delivered a sample on the latest tick
    active: bool,
}

/// All per-channel filter state for one node.
pub struct SensorNode {
    thresholds: Thresholds,
    gas: MovingAverage,
    co: MovingAverage,
    humidity: MovingAverage,
    pressure: MovingAverage,
    probes: Vec<Probe, MAX_PROBES>,
}

impl SensorNode {
    /// Build a node tracking `probe_count` temperature probes.
    ///
    /// Probe counts above [`MAX_PROBES`] are clamped.
    pub fn new(config: NodeConfig, probe_count: usize) -> Result<Self, FilterError> {
        let windows = config.windows;

        if probe_count > MAX_PROBES {
            log::warn!(
                "{} probes detected, tracking only the first {}",
                probe_count,
                MAX_PROBES
            );
        }

        let mut probes = Vec::new();
        for _ in 0..probe_count.min(MAX_PROBES) {
            let probe = Probe {
                filter: MovingAverage::new(windows.temperature)?,
                active: false,
            };
            let _ = probes.push(probe);
        }

        Ok(Self {
            thresholds: config.thresholds,
            gas: MovingAverage::new(windows.gas)?,
            co: MovingAverage::new(windows.co)?,
            humidity: MovingAverage::new(windows.humidity)?,
            pressure: MovingAverage::new(windows.pressure)?,
            probes,
        })
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Feed one tick of raw samples through the filters and classify.
    pub fn tick(&mut self, reading: &Reading) -> Snapshot {
        if let Some(g) = reading.gas {
            self.gas.update(g);
        }
        if let Some(c) = reading.co {
            self.co.update(c);
        }

        if let Some(h) = reading.humidity {
            self.humidity.update(h);
        }
        if let Some(p) = reading.pressure {
            self.pressure.update(p);
        }

        for (i, probe) in self.probes.iter_mut().enumerate() {
            match reading.probes.get(i).copied().flatten() {
                Some(t) => {
                    probe.filter.update(t);
                    probe.active = true;
                }
                None => probe.active = false,
            }
        }

        self.snapshot()
    }

    /// Current outputs without feeding a new sample.
    pub fn snapshot(&self) -> Snapshot {
        let mut probes = ProbeValues::new();
        let mut active: Vec<f32, MAX_PROBES> = Vec::new();

        for probe in &self.probes {
            let value = if probe.active {
                probe.filter.current_value().ok()
            } else {
                None
            };
            if let Some(t) = value {
                let _ = active.push(t);
            }
            let _ = probes.push(value);
        }

        let avg_temperature = if active.is_empty() {
            None
        } else {
            Some(active.iter().sum::<f32>() / active.len() as f32)
        };

        let humidity = self.humidity.current_value().ok();
        let gas = self.gas.current_value().ok();
        let co = self.co.current_value().ok();

        let inputs = HazardInputs {
            avg_temperature,
            probe_temperatures: &active,
            humidity,
            gas: gas.unwrap_or(0.0),
            co: co.unwrap_or(0.0),
        };
        let assessment = classify(&inputs, &self.thresholds);

        Snapshot {
            avg_temperature,
            probes,
            humidity,
            pressure: self.pressure.current_value().ok(),
            gas,
            co,
            assessment,
        }
    }
}
