//! coverage.rs — grid-based coverage matrix generator
//!
//! Sweeps every cell of a floor grid against every sensor and produces the
//! Point/Matrix dataset for one build:
//! - [`CoverageSweep`]: lazy pull-based iterator in row-major order, dense
//!   first-visit point ids — lets a consumer stream-insert without holding
//!   the whole matrix in memory
//! - [`build_coverage_matrix`]: single-pass collection with build stats
//! - [`build_coverage_matrix_parallel`]: row-range partitioning on scoped
//!   worker threads, deterministic row-major merge, dense ids assigned as a
//!   post-merge pass (id order depends on global visitation order)
//!
//! Point/Matrix row sets are produced atomically per (floor, build) and are
//! immutable once built; a new build fully replaces the prior set.

use std::time::Instant;

use rf_types::{
    ClientParams, GridSpec, MatrixPoint, MatrixRow, PointRow, Sensor, Wall, DISTANCE_INVISIBLE,
    RSSI_INVISIBLE,
};
use serde::Serialize;
use tracing::info;

use crate::config::ModelConfig;
use crate::propagation;

// ── Build output ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildStats {
    pub cells: u64,
    pub rows: u64,
    pub sensors: usize,
    pub elapsed_ms: u64,
}

/// Full Point/Matrix dataset for one floor build.
#[derive(Debug, Clone)]
pub struct CoverageMatrix {
    pub floor_id: u32,
    pub points: Vec<PointRow>,
    pub rows: Vec<MatrixRow>,
    pub stats: BuildStats,
}

// ── Lazy sweep ────────────────────────────────────────────────────────────────

/// Lazy row-major sweep over (cell × sensor) pairs.
///
/// Yields one [`MatrixPoint`] per pair; the record for the first sensor at
/// each cell carries `first_visit = true` and a freshly assigned dense
/// point id. Finite, one pass; construct a new sweep to restart.
pub struct CoverageSweep<'a> {
    grid: GridSpec,
    client: ClientParams,
    walls: &'a [Wall],
    sensors: &'a [Sensor],
    cfg: &'a ModelConfig,
    x: i32,
    y: i32,
    sensor_idx: usize,
    next_point_id: u32,
    current_point_id: u32,
}

impl<'a> CoverageSweep<'a> {
    pub fn new(
        grid: GridSpec,
        client: ClientParams,
        walls: &'a [Wall],
        sensors: &'a [Sensor],
        cfg: &'a ModelConfig,
    ) -> Self {
        Self {
            grid,
            client,
            walls,
            sensors,
            cfg,
            x: grid.min_x,
            y: grid.min_y,
            sensor_idx: 0,
            next_point_id: 0,
            current_point_id: 0,
        }
    }

    fn record(&self, sensor: &Sensor, point_id: u32, first_visit: bool) -> MatrixPoint {
        let cell = self.grid.cell_size_m;
        let dx = (self.x as f64 - sensor.x) * cell;
        let dy = (self.y as f64 - sensor.y) * cell;
        let dz = self.client.z_m - sensor.z_m;
        let distance_m = dx.hypot(dy).hypot(dz);

        let rssi = propagation::cell_rssi(
            self.x as f64,
            self.y as f64,
            distance_m,
            &self.client,
            sensor,
            self.walls,
            cell,
            self.cfg,
        );
        let all_invisible = rssi.iter().all(|r| *r == RSSI_INVISIBLE);

        MatrixPoint {
            x: self.x,
            y: self.y,
            first_visit,
            row: MatrixRow {
                point_id,
                sensor_id: sensor.id,
                rssi_24: rssi[0],
                rssi_5: rssi[1],
                rssi_6: rssi[2],
                distance_m: if all_invisible { DISTANCE_INVISIBLE } else { distance_m },
            },
        }
    }
}

impl<'a> Iterator for CoverageSweep<'a> {
    type Item = MatrixPoint;

    fn next(&mut self) -> Option<MatrixPoint> {
        if self.sensors.is_empty() || self.y > self.grid.max_y {
            return None;
        }

        let first_visit = self.sensor_idx == 0;
        if first_visit {
            self.current_point_id = self.next_point_id;
            self.next_point_id += 1;
        }
        let record = self.record(&self.sensors[self.sensor_idx], self.current_point_id, first_visit);

        self.sensor_idx += 1;
        if self.sensor_idx == self.sensors.len() {
            self.sensor_idx = 0;
            self.x += 1;
            if self.x > self.grid.max_x {
                self.x = self.grid.min_x;
                self.y += 1;
            }
        }
        Some(record)
    }
}

// ── Serial build ──────────────────────────────────────────────────────────────

/// Build the full coverage matrix for one floor in a single pass.
pub fn build_coverage_matrix(
    floor_id: u32,
    grid: GridSpec,
    client: ClientParams,
    walls: &[Wall],
    sensors: &[Sensor],
    cfg: &ModelConfig,
) -> CoverageMatrix {
    let started = Instant::now();
    let mut points = Vec::with_capacity(grid.cell_count() as usize);
    let mut rows = Vec::with_capacity((grid.cell_count() as usize) * sensors.len());

    if sensors.is_empty() {
        // Degenerate floor: points only, nothing to model
        let mut id = 0u32;
        for y in grid.min_y..=grid.max_y {
            for x in grid.min_x..=grid.max_x {
                points.push(PointRow { id, map_id: floor_id, x, y });
                id += 1;
            }
        }
    } else {
        for mp in CoverageSweep::new(grid, client, walls, sensors, cfg) {
            if mp.first_visit {
                points.push(PointRow {
                    id: mp.row.point_id,
                    map_id: floor_id,
                    x: mp.x,
                    y: mp.y,
                });
            }
            rows.push(mp.row);
        }
    }

    let stats = BuildStats {
        cells: points.len() as u64,
        rows: rows.len() as u64,
        sensors: sensors.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        floor_id,
        cells = stats.cells,
        rows = stats.rows,
        sensors = stats.sensors,
        elapsed_ms = stats.elapsed_ms,
        "coverage matrix built"
    );
    CoverageMatrix { floor_id, points, rows, stats }
}

// ── Parallel build ────────────────────────────────────────────────────────────

/// Build the matrix with the grid partitioned into row ranges across scoped
/// worker threads. Chunk outputs are merged in row-major order and dense
/// point ids are assigned in a post-merge pass, so the result is identical
/// to the serial build.
pub fn build_coverage_matrix_parallel(
    floor_id: u32,
    grid: GridSpec,
    client: ClientParams,
    walls: &[Wall],
    sensors: &[Sensor],
    cfg: &ModelConfig,
    workers: usize,
) -> CoverageMatrix {
    let workers = workers.max(1);
    let rows_total = grid.cells_y();
    if workers == 1 || sensors.is_empty() || rows_total <= 1 {
        return build_coverage_matrix(floor_id, grid, client, walls, sensors, cfg);
    }

    let started = Instant::now();
    let chunk = ((rows_total as usize) + workers - 1) / workers;

    let mut ranges = Vec::new();
    let mut y0 = grid.min_y;
    while y0 <= grid.max_y {
        let y1 = (y0 + chunk as i32 - 1).min(grid.max_y);
        ranges.push((y0, y1));
        y0 = y1 + 1;
    }

    let merged: Vec<MatrixPoint> = std::thread::scope(|scope| {
        let handles: Vec<_> = ranges
            .iter()
            .map(|&(lo, hi)| {
                scope.spawn(move || {
                    let sub = GridSpec { min_y: lo, max_y: hi, ..grid };
                    CoverageSweep::new(sub, client, walls, sensors, cfg).collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("coverage worker panicked"))
            .collect()
    });

    // Post-merge dense id pass: ids depend on global visitation order
    let mut points = Vec::with_capacity(grid.cell_count() as usize);
    let mut rows = Vec::with_capacity(merged.len());
    let mut next_id = 0u32;
    let mut current_id = 0u32;
    for mp in merged {
        if mp.first_visit {
            current_id = next_id;
            next_id += 1;
            points.push(PointRow { id: current_id, map_id: floor_id, x: mp.x, y: mp.y });
        }
        rows.push(MatrixRow { point_id: current_id, ..mp.row });
    }

    let stats = BuildStats {
        cells: points.len() as u64,
        rows: rows.len() as u64,
        sensors: sensors.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        floor_id,
        workers,
        cells = stats.cells,
        rows = stats.rows,
        elapsed_ms = stats.elapsed_ms,
        "coverage matrix built (parallel)"
    );
    CoverageMatrix { floor_id, points, rows, stats }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_10x10() -> GridSpec {
        GridSpec { cell_size_m: 0.25, min_x: 0, min_y: 0, max_x: 9, max_y: 9 }
    }

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

    #[test]
    fn matrix_is_complete() {
        let sensors = vec![sensor(1, 2.0, 2.0), sensor(2, 7.0, 7.0)];
        let m = build_coverage_matrix(
            42,
            grid_10x10(),
            ClientParams::default(),
            &[],
            &sensors,
            &ModelConfig::default(),
        );
        assert_eq!(m.points.len(), 100);
        assert_eq!(m.rows.len(), 200);
        // Dense, monotonically assigned ids in row-major first-visit order
        for (i, p) in m.points.iter().enumerate() {
            assert_eq!(p.id, i as u32);
            assert_eq!(p.map_id, 42);
        }
        assert_eq!((m.points[0].x, m.points[0].y), (0, 0));
        assert_eq!((m.points[10].x, m.points[10].y), (0, 1));
    }

    #[test]
    fn single_sensor_peak_and_monotone_decay() {
        let sensors = vec![sensor(1, 5.0, 5.0)];
        let m = build_coverage_matrix(
            1,
            grid_10x10(),
            ClientParams::default(),
            &[],
            &sensors,
            &ModelConfig::default(),
        );

        let rssi_at = |x: i32, y: i32| -> f64 {
            let p = m.points.iter().find(|p| p.x == x && p.y == y).unwrap();
            m.rows.iter().find(|r| r.point_id == p.id).unwrap().rssi_24
        };

        // Peak at the sensor cell
        let peak = rssi_at(5, 5);
        for row in &m.rows {
            if row.rssi_24 != RSSI_INVISIBLE {
                assert!(row.rssi_24 <= peak, "cell beats the sensor cell: {}", row.rssi_24);
            }
        }

        // Strictly decreasing along the +x ray until invisible
        let mut prev = peak;
        for x in 6..=9 {
            let v = rssi_at(x, 5);
            if v == RSSI_INVISIBLE {
                break;
            }
            assert!(v < prev, "rssi not decaying at x={x}: {v} >= {prev}");
            prev = v;
        }
    }

    #[test]
    fn sweep_is_lazy_and_row_major() {
        let sensors = vec![sensor(1, 2.0, 2.0), sensor(2, 7.0, 7.0)];
        let client = ClientParams::default();
        let cfg = ModelConfig::default();
        let mut sweep = CoverageSweep::new(grid_10x10(), client, &[], &sensors, &cfg);

        let a = sweep.next().unwrap();
        let b = sweep.next().unwrap();
        let c = sweep.next().unwrap();
        assert!(a.first_visit && (a.x, a.y) == (0, 0) && a.row.sensor_id == 1);
        assert!(!b.first_visit && b.row.sensor_id == 2);
        assert!(c.first_visit && (c.x, c.y) == (1, 0));
        assert_eq!(c.row.point_id, 1);
    }

    #[test]
    fn parallel_build_matches_serial() {
        let sensors = vec![sensor(1, 2.0, 2.0), sensor(2, 7.0, 3.0), sensor(3, 4.0, 8.0)];
        let walls = vec![Wall {
            id: 1,
            x1: 5.0,
            y1: 0.0,
            x2: 5.0,
            y2: 9.0,
            thickness_m: 0.2,
            attenuation_24: 5.0,
            attenuation_5: 7.0,
            attenuation_6: 8.0,
        }];
        let cfg = ModelConfig::default();
        let client = ClientParams::default();

        let serial = build_coverage_matrix(7, grid_10x10(), client, &walls, &sensors, &cfg);
        let parallel =
            build_coverage_matrix_parallel(7, grid_10x10(), client, &walls, &sensors, &cfg, 4);

        assert_eq!(serial.points.len(), parallel.points.len());
        assert_eq!(serial.rows.len(), parallel.rows.len());
        for (s, p) in serial.points.iter().zip(parallel.points.iter()) {
            assert_eq!((s.id, s.x, s.y), (p.id, p.x, p.y));
        }
        for (s, p) in serial.rows.iter().zip(parallel.rows.iter()) {
            assert_eq!((s.point_id, s.sensor_id), (p.point_id, p.sensor_id));
            assert_eq!(s.rssi_24, p.rssi_24);
            assert_eq!(s.rssi_5, p.rssi_5);
            assert_eq!(s.rssi_6, p.rssi_6);
        }
    }

    #[test]
    fn empty_sensor_list_still_emits_points() {
        let m = build_coverage_matrix(
            1,
            grid_10x10(),
            ClientParams::default(),
            &[],
            &[],
            &ModelConfig::default(),
        );
        assert_eq!(m.points.len(), 100);
        assert!(m.rows.is_empty());
    }
}
