//! # rf-types
//!
//! Shared value types for the indoor RF coverage + positioning engine.
//!
//! These types are used by:
//! - `rf-engine`: the coverage-matrix generator and positioning search
//! - `rf-cli`: floor description loading and row export
//! - the surrounding service: persisting `PointRow`/`MatrixRow` and feeding
//!   live `DeviceDetection`s into a positioning query
//!
//! ## Coordinate Conventions
//!
//! - **Grid frame**: x/y are floor-local cell indices (integers at rest,
//!   f64 mid-computation); `x_m = x * cell_size_m`
//! - **Heights**: z is always meters above the floor plane
//! - **RSSI**: dBm floats, rounded to 1 decimal at the model boundary
//!
//! ## Sentinels
//!
//! `RSSI_INVISIBLE` and `DISTANCE_INVISIBLE` are never ordinary dBm/meter
//! values. Callers must exclude them from averaging and statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Sentinels ─────────────────────────────────────────────────────────────────

/// RSSI stored when the modeled signal falls below the visibility cutoff.
pub const RSSI_INVISIBLE: f64 = -999.0;

/// Distance stored when a cell×sensor pair is invisible on every band.
pub const DISTANCE_INVISIBLE: f64 = -1.0;

// ── 3D Vector / Point ─────────────────────────────────────────────────────────

/// 3D vector in the floor-local frame: x/y in grid cells, z in meters.
/// Serves both as a point and as a displacement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0 }
    }

    pub fn sub(&self, other: &Vector) -> Vector {
        Vector::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// 2D length of the x/y projection
    pub fn len_2d(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

// ── Band ──────────────────────────────────────────────────────────────────────

/// Wi-Fi frequency band. Dispatch is always an exhaustive match — never an
/// if/else chain on raw frequency values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "2.4GHz")]
    TwoPointFour,
    #[serde(rename = "5GHz")]
    Five,
    #[serde(rename = "6GHz")]
    Six,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::TwoPointFour, Band::Five, Band::Six];

    /// Stable index into per-band `[f64; 3]` triples (2.4 / 5 / 6 order).
    pub fn index(self) -> usize {
        match self {
            Band::TwoPointFour => 0,
            Band::Five => 1,
            Band::Six => 2,
        }
    }
}

// ── Wall ──────────────────────────────────────────────────────────────────────

/// One wall segment of a floor. Endpoints in grid cells, thickness in meters,
/// attenuation per band in dB per full-thickness traversal.
/// Immutable snapshot for the duration of one matrix build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wall {
    pub id: u32,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Wall thickness, meters
    pub thickness_m: f64,
    /// Attenuation in dB when the path crosses exactly one thickness
    pub attenuation_24: f64,
    pub attenuation_5: f64,
    pub attenuation_6: f64,
}

impl Wall {
    pub fn attenuation(&self, band: Band) -> f64 {
        match band {
            Band::TwoPointFour => self.attenuation_24,
            Band::Five => self.attenuation_5,
            Band::Six => self.attenuation_6,
        }
    }

    pub fn p1(&self) -> Vector {
        Vector::new(self.x1, self.y1, 0.0)
    }

    pub fn p2(&self) -> Vector {
        Vector::new(self.x2, self.y2, 0.0)
    }
}

// ── Sensor / Antenna ──────────────────────────────────────────────────────────

/// Antenna gain pair for one azimuth bucket of a radiation diagram.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AntennaGain {
    pub horizontal_db: f64,
    pub vertical_db: f64,
}

/// Measured radiation diagram: azimuth-degree bucket → gain pair.
/// Buckets are populated on a 10° or 15° step; which one is detected from
/// the populated keys at lookup time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadiationDiagram {
    pub buckets: BTreeMap<u16, AntennaGain>,
}

impl RadiationDiagram {
    pub fn get(&self, bucket_deg: u16) -> Option<&AntennaGain> {
        self.buckets.get(&(bucket_deg % 360))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// One access-point radio on a floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: u32,
    /// Position in grid cells
    pub x: f64,
    pub y: f64,
    /// Antenna height, meters
    pub z_m: f64,
    /// Per-band deployment correction factors, dB
    #[serde(default)]
    pub correction_24: f64,
    #[serde(default)]
    pub correction_5: f64,
    #[serde(default)]
    pub correction_6: f64,
    /// Flat receive antenna gain, dB — used when no diagram applies
    #[serde(default)]
    pub rx_ant_gain_db: f64,
    /// Mounting rotation added to computed azimuths, degrees
    #[serde(default)]
    pub azimuth_offset_deg: i32,
    /// Mounting tilt added to computed plunge angles, degrees
    #[serde(default)]
    pub plunge_offset_deg: i32,
    /// Optional measured radiation diagram
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<RadiationDiagram>,
}

impl Sensor {
    pub fn correction(&self, band: Band) -> f64 {
        match band {
            Band::TwoPointFour => self.correction_24,
            Band::Five => self.correction_5,
            Band::Six => self.correction_6,
        }
    }

    pub fn position(&self) -> Vector {
        Vector::new(self.x, self.y, self.z_m)
    }
}

// ── Client parameters ─────────────────────────────────────────────────────────

/// Assumed transmit characteristics of the device being modeled/located.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientParams {
    /// Transmit power, dBm
    pub tx_power_dbm: f64,
    /// Transmit antenna gain, dB
    pub tx_gain_db: f64,
    /// Assumed device height above the floor, meters
    pub z_m: f64,
}

impl Default for ClientParams {
    fn default() -> Self {
        Self { tx_power_dbm: 17.0, tx_gain_db: 1.0, z_m: 1.0 }
    }
}

// ── Grid specification ────────────────────────────────────────────────────────

/// Cell grid covering one floor. Bounds are inclusive cell indices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridSpec {
    /// Edge length of one square cell, meters
    pub cell_size_m: f64,
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl GridSpec {
    /// Derive the grid from floor-plan pixel dimensions and a pixels-per-meter
    /// scale. Returns `None` for zero/negative width, height, scale or cell
    /// size — the caller decides how to surface that.
    pub fn from_floor(
        width_px: u32,
        height_px: u32,
        scale_px_per_m: f64,
        cell_size_m: f64,
    ) -> Option<GridSpec> {
        if width_px == 0 || height_px == 0 || scale_px_per_m <= 0.0 || cell_size_m <= 0.0 {
            return None;
        }
        let cells_x = (width_px as f64 / (scale_px_per_m * cell_size_m)).ceil() as i32;
        let cells_y = (height_px as f64 / (scale_px_per_m * cell_size_m)).ceil() as i32;
        Some(GridSpec {
            cell_size_m,
            min_x: 0,
            min_y: 0,
            max_x: (cells_x - 1).max(0),
            max_y: (cells_y - 1).max(0),
        })
    }

    pub fn cells_x(&self) -> i64 {
        (self.max_x - self.min_x + 1) as i64
    }

    pub fn cells_y(&self) -> i64 {
        (self.max_y - self.min_y + 1) as i64
    }

    pub fn cell_count(&self) -> i64 {
        self.cells_x() * self.cells_y()
    }

    /// Convert a cell index to meters
    pub fn to_meters(&self, cell: i32) -> f64 {
        cell as f64 * self.cell_size_m
    }
}

// ── Matrix rows ───────────────────────────────────────────────────────────────

/// One distinct grid cell visited during a matrix build.
/// `id` is dense and assigned in first-visit (row-major) order,
/// scoped to a single build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointRow {
    pub id: u32,
    pub map_id: u32,
    pub x: i32,
    pub y: i32,
}

/// Modeled signal for one (cell, sensor) pair.
/// `rssi_*` is `RSSI_INVISIBLE` when below the visibility cutoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatrixRow {
    pub point_id: u32,
    pub sensor_id: u32,
    pub rssi_24: f64,
    pub rssi_5: f64,
    pub rssi_6: f64,
    /// Cell-to-sensor distance, meters; `DISTANCE_INVISIBLE` when the pair
    /// is invisible on every band
    pub distance_m: f64,
}

impl MatrixRow {
    pub fn rssi(&self, band: Band) -> f64 {
        match band {
            Band::TwoPointFour => self.rssi_24,
            Band::Five => self.rssi_5,
            Band::Six => self.rssi_6,
        }
    }

    pub fn is_visible(&self, band: Band) -> bool {
        self.rssi(band) != RSSI_INVISIBLE
    }
}

/// One lazily-produced record of the coverage sweep: a matrix row plus the
/// cell coordinates and a first-visit marker, so a streaming consumer can
/// emit the `PointRow` exactly once without materializing the whole matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatrixPoint {
    pub x: i32,
    pub y: i32,
    /// True on the first record emitted for this cell
    pub first_visit: bool,
    pub row: MatrixRow,
}

// ── Device detection ──────────────────────────────────────────────────────────

/// One recent RSSI observation of a device by one sensor.
/// Transient — supplied per positioning query, never owned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDetection {
    pub sensor_id: u32,
    /// Observed signal strength, dBm
    pub rssi_dbm: f64,
    /// Band the detection was made on; `None` when the capture layer could
    /// not tell (the search falls back to 2.4 GHz channel 6)
    #[serde(default)]
    pub band: Option<Band>,
    #[serde(default)]
    pub channel: Option<u8>,
    pub last_contact: DateTime<Utc>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_from_floor_rejects_degenerate_dimensions() {
        assert!(GridSpec::from_floor(0, 500, 40.0, 0.25).is_none());
        assert!(GridSpec::from_floor(1000, 0, 40.0, 0.25).is_none());
        assert!(GridSpec::from_floor(1000, 500, 0.0, 0.25).is_none());
        assert!(GridSpec::from_floor(1000, 500, -40.0, 0.25).is_none());
        assert!(GridSpec::from_floor(1000, 500, 40.0, 0.0).is_none());
        assert!(GridSpec::from_floor(1000, 500, 40.0, -0.25).is_none());
    }

    #[test]
    fn grid_from_floor_derives_cell_bounds() {
        // 40 px/m at 0.25 m cells: 10 px per cell
        let grid = GridSpec::from_floor(1000, 500, 40.0, 0.25).unwrap();
        assert_eq!((grid.min_x, grid.min_y), (0, 0));
        assert_eq!((grid.max_x, grid.max_y), (99, 49));
        assert_eq!(grid.cell_count(), 100 * 50);

        // Partial trailing cell rounds up
        let grid = GridSpec::from_floor(1005, 500, 40.0, 0.25).unwrap();
        assert_eq!(grid.max_x, 100);

        // Floor smaller than one cell still yields a single cell
        let grid = GridSpec::from_floor(3, 3, 40.0, 0.25).unwrap();
        assert_eq!((grid.max_x, grid.max_y), (0, 0));
        assert_eq!(grid.cell_count(), 1);
    }
}
