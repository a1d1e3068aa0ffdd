//! config.rs — immutable engine configuration
//!
//! Physical constants and search tuning live here as explicit config structs
//! injected into the propagation model and the positioning search, so that
//! different floors/deployments can run different tuning with no shared
//! mutable state. Defaults carry the standard indoor values; every field is
//! overridable from TOML.

use rf_types::Band;
use serde::{Deserialize, Serialize};

// ── Band coefficients ─────────────────────────────────────────────────────────

/// Fixed per-band propagation constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandCoefficients {
    /// Carrier frequency, MHz
    pub frequency_mhz: f64,
    /// Indoor path-loss exponent scaled into the FSPL term
    pub attenuation_factor: f64,
    /// Flat penetration loss added to the FSPL term, dB
    pub penetration_factor: f64,
    /// Maximum useful distance, meters — used only by the positioning
    /// search when deriving per-detection tolerance
    pub d_max_m: f64,
}

/// Band → coefficients, exhaustively matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandTable {
    pub band_24: BandCoefficients,
    pub band_5: BandCoefficients,
    pub band_6: BandCoefficients,
}

impl BandTable {
    pub fn get(&self, band: Band) -> &BandCoefficients {
        match band {
            Band::TwoPointFour => &self.band_24,
            Band::Five => &self.band_5,
            Band::Six => &self.band_6,
        }
    }
}

impl Default for BandTable {
    fn default() -> Self {
        Self {
            band_24: BandCoefficients {
                frequency_mhz: 2400.0,
                attenuation_factor: 3.0,
                penetration_factor: 0.0,
                d_max_m: 40.0,
            },
            band_5: BandCoefficients {
                frequency_mhz: 5000.0,
                attenuation_factor: 3.3,
                penetration_factor: 2.0,
                d_max_m: 30.0,
            },
            band_6: BandCoefficients {
                frequency_mhz: 6000.0,
                attenuation_factor: 3.5,
                penetration_factor: 3.0,
                d_max_m: 25.0,
            },
        }
    }
}

// ── Propagation model config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub bands: BandTable,
    /// RSSI below this becomes the `RSSI_INVISIBLE` sentinel, dBm
    pub rssi_cutoff: f64,
    /// Flat per-band correction added to every modeled RSSI (2.4/5/6 order), dB
    pub fixed_correction: [f64; 3],
    /// When false the wall-attenuation step is skipped entirely
    /// (free-space-only build)
    pub calculate_walls: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            bands: BandTable::default(),
            rssi_cutoff: -90.0,
            fixed_correction: [0.0, 0.0, 0.0],
            calculate_walls: true,
        }
    }
}

// ── Positioning search config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Detections older than this relative to the newest one are dropped;
    /// a query whose newest detection exceeds it relative to now is stale
    pub info_aging_secs: i64,
    /// Per-detection tolerance clamp bounds, dB
    pub c_min: f64,
    pub c_max: f64,
    /// Adaptive tolerance bounds
    pub min_accuracy: f64,
    pub max_accuracy: f64,
    /// Tolerance adjustment steps
    pub step_small: f64,
    pub step_big: f64,
    /// Target result-count band
    pub result_len_small: usize,
    pub result_len_big: usize,
    /// Multiplier applied to the target band when only one sensor is usable
    pub one_sensor_result_len: usize,
    /// Assumed device transmit parameters for FSPL inversion
    pub assumed_tx_power_dbm: f64,
    pub assumed_tx_gain_db: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            info_aging_secs: 60,
            c_min: 0.5,
            c_max: 3.0,
            min_accuracy: 0.1,
            max_accuracy: 5.0,
            step_small: 0.1,
            step_big: 0.5,
            result_len_small: 3,
            result_len_big: 30,
            one_sensor_result_len: 3,
            assumed_tx_power_dbm: 17.0,
            assumed_tx_gain_db: 1.0,
        }
    }
}

// ── Combined engine config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub search: SearchConfig,
}
