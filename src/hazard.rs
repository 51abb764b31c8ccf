//! Threshold-based hazard classifier.
//!
//! Each rule independently adds to an integer score, which is then mapped to
//! a [`HazardLevel`]. No state is carried between ticks: the same inputs
//! always produce the same [`Assessment`].
//!
//! The CO rule is weighted: it adds `floor(co / co_weight_divisor)` points
//! rather than 1, so a high CO reading alone can reach `Fire`.

use serde::Serialize;

use crate::defaults::{
    CO_LIMIT_PPM, CO_WEIGHT_DIVISOR, GAS_LIMIT_RAW, HUMIDITY_FLOOR_PCT, PROBE_DEVIATION_C,
    TEMPERATURE_LIMIT_C,
};

/// Minimum score for [`HazardLevel::Fire`].
pub const FIRE_SCORE: u32 = 4;
/// Exact score for [`HazardLevel::Alert`].
pub const ALERT_SCORE: u32 = 3;
/// Exact score for [`HazardLevel::Caution`].
pub const CAUTION_SCORE: u32 = 2;

/// Ordinal hazard level reported to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum HazardLevel {
    Normal = 0,
    Caution = 1,
    Alert = 2,
    Fire = 3,
}

impl HazardLevel {
    /// Map an accumulated score to a level (evaluated high to low).
    pub fn from_score(score: u32) -> Self {
        if score >= FIRE_SCORE {
            HazardLevel::Fire
        } else if score == ALERT_SCORE {
            HazardLevel::Alert
        } else if score == CAUTION_SCORE {
            HazardLevel::Caution
        } else {
            HazardLevel::Normal
        }
    }

    /// Numeric code used in the status record.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Classifier thresholds. [`Thresholds::DEFAULT`] holds the field values
/// from [`crate::defaults`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// Average temperature (°C) must exceed this.
    pub temperature_c: f32,
    /// Humidity (%) must fall below this.
    pub humidity_pct: f32,
    /// Primary gas raw reading must exceed this.
    pub gas_raw: f32,
    /// CO reading must exceed this.
    pub co_ppm: f32,
    /// CO points = floor(co / co_weight_divisor). Expected to be positive.
    pub co_weight_divisor: f32,
    /// A probe further than this (°C) from the average adds a point.
    pub probe_deviation_c: f32,
}

impl Thresholds {
    pub const DEFAULT: Self = Self {
        temperature_c: TEMPERATURE_LIMIT_C,
        humidity_pct: HUMIDITY_FLOOR_PCT,
        gas_raw: GAS_LIMIT_RAW,
        co_ppm: CO_LIMIT_PPM,
        co_weight_divisor: CO_WEIGHT_DIVISOR,
        probe_deviation_c: PROBE_DEVIATION_C,
    };
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Channel values for one classification.
pub struct HazardInputs<'a> {
    /// Average over active probes; `None` when no probe reported.
    pub avg_temperature: Option<f32>,
    /// Latest temperature of each active probe, in probe index order.
    pub probe_temperatures: &'a [f32],
    /// Smoothed humidity; `None` until the environmental sensor has data.
    pub humidity: Option<f32>,
    /// Primary gas (MQ-2) intensity, raw ADC units.
    pub gas: f32,
    /// Secondary gas (MQ-7) CO concentration.
    pub co: f32,
}

/// Result of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub score: u32,
    pub level: HazardLevel,
}

/// Accumulate the hazard score for `inputs`.
///
/// With no average temperature the temperature and probe-deviation rules are
/// skipped; with no humidity the dry-air rule is skipped.
pub fn score(inputs: &HazardInputs, thresholds: &Thresholds) -> u32 {
    let mut score: u32 = 0;

    if let Some(avg) = inputs.avg_temperature {
        if avg > thresholds.temperature_c {
            score += 1;
        }
    }

    if let Some(humidity) = inputs.humidity {
        if humidity < thresholds.humidity_pct {
            score += 1;
        }
    }

    if inputs.gas > thresholds.gas_raw {
        score += 1;
    }

    if inputs.co > thresholds.co_ppm {
        // Saturating float-to-int cast; co is positive here
        let weight = (inputs.co / thresholds.co_weight_divisor) as u32;
        score = score.saturating_add(weight);
    }

    if let Some(avg) = inputs.avg_temperature {
        // One deviating probe is enough
        let deviates = inputs
            .probe_temperatures
            .iter()
            .any(|&t| (t - avg).abs() > thresholds.probe_deviation_c);
        if deviates {
            score = score.saturating_add(1);
        }
    }

    score
}

/// Score `inputs` and map the score to a hazard level.
pub fn classify(inputs: &HazardInputs, thresholds: &Thresholds) -> Assessment {
    let score = score(inputs, thresholds);
    Assessment {
        score,
        level: HazardLevel::from_score(score),
    }
}
