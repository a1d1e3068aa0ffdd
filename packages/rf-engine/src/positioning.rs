//! positioning.rs — fingerprint search over a built coverage matrix
//!
//! Maps a device's live RSSI readings back to candidate grid cells:
//! gather → freshness filter → band/channel pick → per-detection tolerance
//! windows → adaptive tolerance loop against the matrix snapshot → ordered
//! candidate points in meters.
//!
//! Queries are read-only over an immutable [`MatrixSnapshot`]; concurrent
//! queries for different devices share no mutable state. A matrix build
//! must be atomically swapped in before queries read it (single-writer,
//! multi-reader discipline at the caller).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rf_types::{Band, DeviceDetection, MatrixRow, PointRow, RSSI_INVISIBLE};
use tracing::{debug, info, warn};

use crate::config::{BandCoefficients, EngineConfig, SearchConfig};
use crate::coverage::CoverageMatrix;
use crate::error::PositioningError;

// ── Matrix snapshot ───────────────────────────────────────────────────────────

/// Immutable, query-optimized view of one floor's persisted matrix.
#[derive(Debug, Clone)]
pub struct MatrixSnapshot {
    cell_size_m: f64,
    /// Ordered by dense point id
    points: Vec<PointRow>,
    /// sensor_id → point_id → row
    by_sensor: HashMap<u32, HashMap<u32, MatrixRow>>,
}

impl MatrixSnapshot {
    pub fn new(cell_size_m: f64, points: Vec<PointRow>, rows: &[MatrixRow]) -> Self {
        let mut by_sensor: HashMap<u32, HashMap<u32, MatrixRow>> = HashMap::new();
        for row in rows {
            by_sensor.entry(row.sensor_id).or_default().insert(row.point_id, *row);
        }
        let mut points = points;
        points.sort_by_key(|p| p.id);
        Self { cell_size_m, points, by_sensor }
    }

    pub fn from_matrix(matrix: &CoverageMatrix, cell_size_m: f64) -> Self {
        Self::new(cell_size_m, matrix.points.clone(), &matrix.rows)
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    fn rssi(&self, sensor_id: u32, point_id: u32, band: Band) -> Option<f64> {
        self.by_sensor.get(&sensor_id)?.get(&point_id).map(|r| r.rssi(band))
    }
}

// ── Query outcome ─────────────────────────────────────────────────────────────

/// Positioning answer: ordered candidate cells in meters plus how tight the
/// final acceptance window was.
#[derive(Debug, Clone)]
pub struct LocateOutcome {
    pub candidates: Vec<(f64, f64)>,
    /// Final tolerance the search settled on
    pub tolerance: f64,
    pub usable_sensors: usize,
    /// Set when fewer than 3 sensors contributed
    pub reduced_confidence: bool,
}

/// One detection's acceptance window. `shape` is the FSPL-derived delta in
/// `[c_min, c_max]`; the effective half-width at tolerance `tol` is
/// `shape · tol / c_max`, so the window tightens and widens with the loop.
struct Window {
    sensor_id: u32,
    center: f64,
    shape: f64,
}

impl Window {
    fn contains(&self, rssi: f64, tol: f64, c_max: f64) -> bool {
        (rssi - self.center).abs() <= self.shape * tol / c_max
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Channel-based accuracy correction: low channels read slightly hot, high
/// channels slightly cold.
fn channel_correction(channel: u8) -> f64 {
    match channel {
        1..=4 => -0.1,
        9..=14 => 0.1,
        _ => 0.0,
    }
}

/// Invert the FSPL relation to estimate distance (m) from an observed RSSI.
fn estimate_distance(rssi_dbm: f64, bc: &BandCoefficients, cfg: &SearchConfig) -> f64 {
    let path_loss = cfg.assumed_tx_power_dbm + cfg.assumed_tx_gain_db - rssi_dbm;
    let exponent = (path_loss - 20.0 * bc.frequency_mhz.log10() - bc.penetration_factor + 24.0)
        / (10.0 * bc.attenuation_factor);
    10f64.powf(exponent)
}

/// FSPL-derived tolerance for one detection, clamped to `[c_min, c_max]`:
/// near detections (small distance) get the widest window, detections close
/// to the band's useful range get the narrowest.
fn tolerance_delta(rssi_dbm: f64, bc: &BandCoefficients, cfg: &SearchConfig) -> f64 {
    let distance = estimate_distance(rssi_dbm, bc, cfg);
    ((1.0 - distance / bc.d_max_m) * cfg.c_max).clamp(cfg.c_min, cfg.c_max)
}

// ── Main query ────────────────────────────────────────────────────────────────

/// Locate a device on a floor from its recent per-sensor detections.
///
/// `accuracy` forces a single pass at that tolerance; `None` runs the
/// adaptive loop. Results are cell centers converted to meters, ordered by
/// point id.
pub fn locate(
    snapshot: &MatrixSnapshot,
    mac: &str,
    detections: &[DeviceDetection],
    accuracy: Option<f64>,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<LocateOutcome, PositioningError> {
    let search = &cfg.search;

    // 1. Gather — `max()` is None exactly when there are no detections
    let Some(max_ts) = detections.iter().map(|d| d.last_contact).max() else {
        return Err(PositioningError::NotFound { mac: mac.to_string() });
    };

    // 2. Freshness filter
    let aging = Duration::seconds(search.info_aging_secs);
    if now.signed_duration_since(max_ts) > aging {
        warn!(mac, "newest detection is outside the freshness window");
        return Err(PositioningError::StaleData {
            mac: mac.to_string(),
            aging_secs: search.info_aging_secs,
        });
    }
    let fresh: Vec<&DeviceDetection> = detections
        .iter()
        .filter(|d| max_ts.signed_duration_since(d.last_contact) <= aging)
        .collect();
    if fresh.len() < detections.len() {
        debug!(mac, dropped = detections.len() - fresh.len(), "aged-out detections dropped");
    }

    // 3. Band/channel pick
    let band = fresh.iter().find_map(|d| d.band).unwrap_or(Band::TwoPointFour);
    let channel = fresh.iter().find_map(|d| d.channel).unwrap_or(6);
    let bc = cfg.model.bands.get(band);
    let correction = channel_correction(channel);

    // 4. Per-detection acceptance windows
    let windows: Vec<Window> = fresh
        .iter()
        .filter(|d| d.rssi_dbm != RSSI_INVISIBLE)
        .map(|d| Window {
            sensor_id: d.sensor_id,
            center: d.rssi_dbm + correction,
            shape: tolerance_delta(d.rssi_dbm, bc, search),
        })
        .collect();
    if windows.is_empty() {
        return Err(PositioningError::NoMatch);
    }

    let usable_sensors = {
        let mut ids: Vec<u32> = windows.iter().map(|w| w.sensor_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    };
    let reduced_confidence = usable_sensors < 3;
    if reduced_confidence {
        warn!(mac, usable_sensors, "fewer than 3 usable sensors, reduced accuracy");
    }

    // Candidate cells whose matrix RSSI satisfies every window at `tol`
    let query = |tol: f64| -> Vec<u32> {
        snapshot
            .points
            .iter()
            .filter(|p| {
                windows.iter().all(|w| match snapshot.rssi(w.sensor_id, p.id, band) {
                    Some(rssi) if rssi != RSSI_INVISIBLE => {
                        w.contains(rssi, tol, search.c_max)
                    }
                    _ => false,
                })
            })
            .map(|p| p.id)
            .collect()
    };

    let finish = |ids: Vec<u32>, tol: f64| -> LocateOutcome {
        let candidates: Vec<(f64, f64)> = ids
            .iter()
            .filter_map(|id| snapshot.points.iter().find(|p| p.id == *id))
            .map(|p| {
                (p.x as f64 * snapshot.cell_size_m, p.y as f64 * snapshot.cell_size_m)
            })
            .collect();
        info!(mac, candidates = candidates.len(), tolerance = tol, "positioning result");
        LocateOutcome { candidates, tolerance: tol, usable_sensors, reduced_confidence }
    };

    // 5. Tolerance search
    let (mut small, mut big) = (search.result_len_small, search.result_len_big);
    if usable_sensors == 1 {
        small *= search.one_sensor_result_len;
        big *= search.one_sensor_result_len;
    }

    // Caller-supplied fixed accuracy: single pass, no loop
    if let Some(fixed) = accuracy {
        let tol = fixed.clamp(search.min_accuracy, search.max_accuracy);
        let ids = query(tol);
        if ids.is_empty() {
            return Err(PositioningError::NoMatch);
        }
        return Ok(finish(ids, tol));
    }

    let mut tol = search.max_accuracy;
    let mut last_nonempty: Option<(Vec<u32>, f64)> = None;
    // Tolerance can ping-pong around the target band on discrete grids;
    // bound the loop and fall back to the last non-empty result.
    for _ in 0..200 {
        let ids = query(tol);
        let n = ids.len();
        if n > 0 {
            last_nonempty = Some((ids.clone(), tol));
        }

        if n >= small && n <= big {
            return Ok(finish(ids, tol));
        }

        if n > big {
            if tol <= search.min_accuracy {
                // Bound reached; accept the tightest result we can produce
                return Ok(finish(ids, tol));
            }
            let step = if n > big * 4 { search.step_big } else { search.step_small };
            tol = (tol - step).max(search.min_accuracy);
        } else {
            // Too few. Tightening overshot to zero → keep the previous set.
            if n == 0 {
                if let Some((ids, tol)) = last_nonempty.take() {
                    debug!(mac, "tightening emptied the result, keeping last non-empty set");
                    return Ok(finish(ids, tol));
                }
                if tol >= search.max_accuracy {
                    return Err(PositioningError::NoMatch);
                }
            }
            if tol >= search.max_accuracy {
                // Can't widen further; a small non-empty set is still an answer
                return Ok(finish(ids, tol));
            }
            let step = if n == 0 { search.step_big } else { search.step_small };
            tol = (tol + step).min(search.max_accuracy);
        }
    }

    match last_nonempty {
        Some((ids, tol)) => Ok(finish(ids, tol)),
        None => Err(PositioningError::NoMatch),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::build_coverage_matrix;
    use rf_types::{ClientParams, GridSpec, Sensor};

    fn sensor(id: u32, x: f64, y: f64) -> Sensor {
        Sensor {
            id,
            x,
            y,
            z_m: 2.5,
            correction_24: 0.0,
            correction_5: 0.0,
            correction_6: 0.0,
            rx_ant_gain_db: 0.0,
            azimuth_offset_deg: 0,
            plunge_offset_deg: 0,
            diagram: None,
        }
    }

    fn build_snapshot() -> (MatrixSnapshot, CoverageMatrix) {
        let grid = GridSpec { cell_size_m: 0.25, min_x: 0, min_y: 0, max_x: 9, max_y: 9 };
        let sensors = vec![sensor(1, 2.0, 2.0), sensor(2, 7.0, 2.0), sensor(3, 5.0, 8.0)];
        let matrix = build_coverage_matrix(
            1,
            grid,
            ClientParams::default(),
            &[],
            &sensors,
            &crate::config::ModelConfig::default(),
        );
        (MatrixSnapshot::from_matrix(&matrix, grid.cell_size_m), matrix)
    }

    fn detection(sensor_id: u32, rssi: f64, ts: DateTime<Utc>) -> DeviceDetection {
        DeviceDetection {
            sensor_id,
            rssi_dbm: rssi,
            band: Some(Band::TwoPointFour),
            channel: Some(6),
            last_contact: ts,
        }
    }

    #[test]
    fn empty_detections_is_not_found() {
        let (snapshot, _) = build_snapshot();
        let cfg = EngineConfig::default();
        let err = locate(&snapshot, "aa:bb:cc:dd:ee:ff", &[], None, &cfg, Utc::now()).unwrap_err();
        assert!(matches!(err, PositioningError::NotFound { .. }));
    }

    #[test]
    fn stale_detections_are_rejected() {
        let (snapshot, _) = build_snapshot();
        let cfg = EngineConfig::default();
        let now = Utc::now();
        let old = now - Duration::seconds(cfg.search.info_aging_secs + 30);
        let dets = vec![detection(1, -50.0, old)];
        let err = locate(&snapshot, "aa:bb:cc:dd:ee:ff", &dets, None, &cfg, now).unwrap_err();
        assert!(matches!(err, PositioningError::StaleData { .. }));
    }

    #[test]
    fn aged_out_detections_are_dropped_but_query_proceeds() {
        let (snapshot, matrix) = build_snapshot();
        let cfg = EngineConfig::default();
        let now = Utc::now();

        let target = matrix.points.iter().find(|p| p.x == 4 && p.y == 4).unwrap();
        let mut dets: Vec<DeviceDetection> = matrix
            .rows
            .iter()
            .filter(|r| r.point_id == target.id)
            .map(|r| detection(r.sensor_id, r.rssi_24, now))
            .collect();
        // One ancient detection from a sensor that would otherwise conflict
        dets.push(detection(1, -20.0, now - Duration::seconds(cfg.search.info_aging_secs + 100)));

        let outcome =
            locate(&snapshot, "aa:bb:cc:dd:ee:ff", &dets, Some(0.5), &cfg, now).unwrap();
        assert!(!outcome.candidates.is_empty());
    }

    #[test]
    fn positioning_round_trip_recovers_the_cell() {
        let (snapshot, matrix) = build_snapshot();
        let cfg = EngineConfig::default();
        let now = Utc::now();

        let target = matrix.points.iter().find(|p| p.x == 4 && p.y == 4).unwrap();
        let dets: Vec<DeviceDetection> = matrix
            .rows
            .iter()
            .filter(|r| r.point_id == target.id)
            .map(|r| detection(r.sensor_id, r.rssi_24, now))
            .collect();
        assert_eq!(dets.len(), 3);

        let outcome =
            locate(&snapshot, "aa:bb:cc:dd:ee:ff", &dets, Some(0.5), &cfg, now).unwrap();
        assert!(!outcome.reduced_confidence);

        let expected = (4.0 * 0.25, 4.0 * 0.25);
        assert!(
            outcome
                .candidates
                .iter()
                .any(|c| (c.0 - expected.0).abs() < 1e-9 && (c.1 - expected.1).abs() < 1e-9),
            "true cell missing from candidates: {:?}",
            outcome.candidates
        );
    }

    #[test]
    fn adaptive_loop_returns_bounded_result() {
        let (snapshot, matrix) = build_snapshot();
        let cfg = EngineConfig::default();
        let now = Utc::now();

        let target = matrix.points.iter().find(|p| p.x == 6 && p.y == 3).unwrap();
        let dets: Vec<DeviceDetection> = matrix
            .rows
            .iter()
            .filter(|r| r.point_id == target.id)
            .map(|r| detection(r.sensor_id, r.rssi_24, now))
            .collect();

        let outcome = locate(&snapshot, "aa:bb:cc:dd:ee:ff", &dets, None, &cfg, now).unwrap();
        assert!(!outcome.candidates.is_empty());
        assert!(outcome.tolerance >= cfg.search.min_accuracy);
        assert!(outcome.tolerance <= cfg.search.max_accuracy);
    }

    #[test]
    fn single_sensor_query_is_reduced_confidence() {
        let (snapshot, matrix) = build_snapshot();
        let cfg = EngineConfig::default();
        let now = Utc::now();

        let target = matrix.points.iter().find(|p| p.x == 4 && p.y == 4).unwrap();
        let row = matrix
            .rows
            .iter()
            .find(|r| r.point_id == target.id && r.sensor_id == 1)
            .unwrap();
        let dets = vec![detection(1, row.rssi_24, now)];

        let outcome = locate(&snapshot, "aa:bb:cc:dd:ee:ff", &dets, None, &cfg, now).unwrap();
        assert!(outcome.reduced_confidence);
        assert_eq!(outcome.usable_sensors, 1);
        assert!(!outcome.candidates.is_empty());
    }

    #[test]
    fn tolerance_delta_is_always_clamped() {
        let cfg = EngineConfig::default();
        let bc = cfg.model.bands.get(Band::TwoPointFour);
        for rssi in [-10.0, -30.0, -55.0, -70.0, -85.0, -110.0, -150.0, 5.0] {
            let delta = tolerance_delta(rssi, bc, &cfg.search);
            assert!(
                delta >= cfg.search.c_min && delta <= cfg.search.c_max,
                "delta {delta} out of [{}, {}] for rssi {rssi}",
                cfg.search.c_min,
                cfg.search.c_max
            );
        }
    }

    #[test]
    fn channel_correction_bands() {
        assert_eq!(channel_correction(1), -0.1);
        assert_eq!(channel_correction(4), -0.1);
        assert_eq!(channel_correction(6), 0.0);
        assert_eq!(channel_correction(9), 0.1);
        assert_eq!(channel_correction(14), 0.1);
        assert_eq!(channel_correction(36), 0.0);
    }

    #[test]
    fn no_overlapping_windows_is_no_match() {
        let (snapshot, _) = build_snapshot();
        let cfg = EngineConfig::default();
        let now = Utc::now();
        // Physically inconsistent: both sensors at maximum strength at once
        let dets = vec![detection(1, -5.0, now), detection(2, -5.0, now)];
        let err = locate(&snapshot, "aa:bb:cc:dd:ee:ff", &dets, Some(0.2), &cfg, now).unwrap_err();
        assert_eq!(err, PositioningError::NoMatch);
    }
}
