//! main.rs — coverage build + positioning CLI
//!
//! Thin operational surface over `rf-engine`:
//!   - `build`: load a floor description (TOML), sweep the grid, write
//!     point/matrix rows as JSON for the surrounding service to persist
//!   - `locate`: reload saved rows and run a positioning query against a
//!     detections file
//!   - `demo`: build a small floor, synthesize noisy detections from a known
//!     cell, and check that the search recovers it
//!
//! The engine itself never touches files or HTTP; all I/O lives here.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use tracing::{info, warn};

use rf_engine::{
    build_coverage_matrix, build_coverage_matrix_parallel, locate, ConfigError, EngineConfig,
    MatrixSnapshot,
};
use rf_types::{
    Band, ClientParams, DeviceDetection, GridSpec, MatrixRow, PointRow, Sensor, Wall,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rf-cli", about = "Indoor RF coverage matrix + positioning")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the coverage matrix for a floor and write the row files
    Build {
        /// Floor description TOML
        #[arg(short, long)]
        floor: PathBuf,
        /// Output path for point rows
        #[arg(long, default_value = "points.json")]
        out_points: PathBuf,
        /// Output path for matrix rows
        #[arg(long, default_value = "matrix.json")]
        out_matrix: PathBuf,
        /// Worker threads for the grid sweep (1 = serial)
        #[arg(long, default_value = "1")]
        workers: usize,
    },
    /// Run a positioning query against previously written row files
    Locate {
        #[arg(short, long)]
        floor: PathBuf,
        #[arg(long, default_value = "points.json")]
        points: PathBuf,
        #[arg(long, default_value = "matrix.json")]
        matrix: PathBuf,
        /// Detections JSON (array of DeviceDetection)
        #[arg(short, long)]
        detections: PathBuf,
        /// Device MAC, for logging and errors
        #[arg(short, long)]
        mac: String,
        /// Fixed tolerance: single pass instead of the adaptive loop
        #[arg(long)]
        accuracy: Option<f64>,
    },
    /// Synthetic end-to-end check: build, perturb, locate
    Demo {
        /// Ground-truth cell
        #[arg(long, default_value = "4")]
        cell_x: i32,
        #[arg(long, default_value = "4")]
        cell_y: i32,
        /// Gaussian RSSI noise sigma, dB (0 = exact readings)
        #[arg(long, default_value = "0.5")]
        noise_db: f64,
    },
}

// ── Floor description file ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FloorFile {
    floor: FloorSection,
    #[serde(default)]
    client: Option<ClientParams>,
    #[serde(default)]
    walls: Vec<Wall>,
    #[serde(default)]
    sensors: Vec<Sensor>,
    #[serde(default)]
    engine: EngineConfig,
}

#[derive(Debug, Deserialize)]
struct FloorSection {
    id: u32,
    width_px: u32,
    height_px: u32,
    scale_px_per_m: f64,
    cell_size_m: f64,
}

fn load_floor(path: &PathBuf) -> Result<(FloorFile, GridSpec)> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read floor file {}", path.display()))?;
    let file: FloorFile = toml::from_str(&raw)
        .with_context(|| format!("invalid floor file {}", path.display()))?;

    let f = &file.floor;
    if f.cell_size_m <= 0.0 {
        bail!(ConfigError::InvalidCellSize(f.cell_size_m));
    }
    let grid = GridSpec::from_floor(f.width_px, f.height_px, f.scale_px_per_m, f.cell_size_m)
        .ok_or(ConfigError::InvalidFloor {
            width_px: f.width_px,
            height_px: f.height_px,
            scale_px_per_m: f.scale_px_per_m,
        })?;
    Ok((file, grid))
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rf_cli=info,rf_engine=info".into()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Build { floor, out_points, out_matrix, workers } => {
            run_build(&floor, &out_points, &out_matrix, workers)
        }
        Command::Locate { floor, points, matrix, detections, mac, accuracy } => {
            run_locate(&floor, &points, &matrix, &detections, &mac, accuracy)
        }
        Command::Demo { cell_x, cell_y, noise_db } => run_demo(cell_x, cell_y, noise_db),
    }
}

fn run_build(
    floor_path: &PathBuf,
    out_points: &PathBuf,
    out_matrix: &PathBuf,
    workers: usize,
) -> Result<()> {
    let (file, grid) = load_floor(floor_path)?;
    let client = file.client.unwrap_or_default();
    info!(
        "🗺  Building floor {} — {}×{} cells, {} walls, {} sensors",
        file.floor.id,
        grid.cells_x(),
        grid.cells_y(),
        file.walls.len(),
        file.sensors.len()
    );

    let matrix = if workers > 1 {
        build_coverage_matrix_parallel(
            file.floor.id,
            grid,
            client,
            &file.walls,
            &file.sensors,
            &file.engine.model,
            workers,
        )
    } else {
        build_coverage_matrix(
            file.floor.id,
            grid,
            client,
            &file.walls,
            &file.sensors,
            &file.engine.model,
        )
    };

    fs::write(out_points, serde_json::to_vec_pretty(&matrix.points)?)
        .with_context(|| format!("cannot write {}", out_points.display()))?;
    fs::write(out_matrix, serde_json::to_vec_pretty(&matrix.rows)?)
        .with_context(|| format!("cannot write {}", out_matrix.display()))?;
    info!(
        "💾 Wrote {} point rows → {}, {} matrix rows → {}",
        matrix.points.len(),
        out_points.display(),
        matrix.rows.len(),
        out_matrix.display()
    );
    Ok(())
}

fn run_locate(
    floor_path: &PathBuf,
    points_path: &PathBuf,
    matrix_path: &PathBuf,
    detections_path: &PathBuf,
    mac: &str,
    accuracy: Option<f64>,
) -> Result<()> {
    let (file, grid) = load_floor(floor_path)?;

    let points: Vec<PointRow> = serde_json::from_slice(
        &fs::read(points_path).with_context(|| format!("cannot read {}", points_path.display()))?,
    )?;
    let rows: Vec<MatrixRow> = serde_json::from_slice(
        &fs::read(matrix_path).with_context(|| format!("cannot read {}", matrix_path.display()))?,
    )?;
    let detections: Vec<DeviceDetection> = serde_json::from_slice(
        &fs::read(detections_path)
            .with_context(|| format!("cannot read {}", detections_path.display()))?,
    )?;

    let snapshot = MatrixSnapshot::new(grid.cell_size_m, points, &rows);
    info!("📡 Locating {mac} with {} detections over {} points", detections.len(), snapshot.point_count());

    let outcome = locate(&snapshot, mac, &detections, accuracy, &file.engine, Utc::now())?;
    if outcome.reduced_confidence {
        warn!("result has reduced confidence ({} usable sensors)", outcome.usable_sensors);
    }
    for (x_m, y_m) in &outcome.candidates {
        println!("{x_m:.2} {y_m:.2}");
    }
    info!(
        "🎯 {} candidate cell(s) at tolerance {:.1}",
        outcome.candidates.len(),
        outcome.tolerance
    );
    Ok(())
}

// ── Demo ──────────────────────────────────────────────────────────────────────

/// Build a 20×20 demo floor with three sensors and one interior wall, place
/// a device at the requested cell, synthesize detections from the cell's own
/// matrix rows (optionally perturbed with Gaussian noise), and see whether
/// the adaptive search gets the cell back.
fn run_demo(cell_x: i32, cell_y: i32, noise_db: f64) -> Result<()> {
    let grid = GridSpec { cell_size_m: 0.25, min_x: 0, min_y: 0, max_x: 19, max_y: 19 };
    let sensors = vec![
        demo_sensor(1, 3.0, 3.0),
        demo_sensor(2, 16.0, 4.0),
        demo_sensor(3, 9.0, 17.0),
    ];
    let walls = vec![Wall {
        id: 1,
        x1: 10.0,
        y1: 0.0,
        x2: 10.0,
        y2: 12.0,
        thickness_m: 0.2,
        attenuation_24: 5.0,
        attenuation_5: 7.0,
        attenuation_6: 8.0,
    }];
    let cfg = EngineConfig::default();

    if cell_x < grid.min_x || cell_x > grid.max_x || cell_y < grid.min_y || cell_y > grid.max_y {
        bail!("cell ({cell_x}, {cell_y}) is outside the demo grid");
    }

    let matrix = build_coverage_matrix_parallel(
        99,
        grid,
        ClientParams::default(),
        &walls,
        &sensors,
        &cfg.model,
        4,
    );

    let target = matrix
        .points
        .iter()
        .find(|p| p.x == cell_x && p.y == cell_y)
        .context("target cell missing from the build")?;

    let noise = if noise_db > 0.0 {
        Some(Normal::new(0.0, noise_db).context("invalid noise sigma")?)
    } else {
        None
    };
    let mut rng = rand::thread_rng();
    let now = Utc::now();

    let detections: Vec<DeviceDetection> = matrix
        .rows
        .iter()
        .filter(|r| r.point_id == target.id && r.is_visible(Band::TwoPointFour))
        .map(|r| DeviceDetection {
            sensor_id: r.sensor_id,
            rssi_dbm: r.rssi_24 + noise.map_or(0.0, |n| n.sample(&mut rng)),
            band: Some(Band::TwoPointFour),
            channel: Some(6),
            last_contact: now,
        })
        .collect();
    info!(
        "📡 Device at cell ({cell_x}, {cell_y}) seen by {} sensor(s), noise σ = {noise_db} dB",
        detections.len()
    );

    let snapshot = MatrixSnapshot::from_matrix(&matrix, grid.cell_size_m);
    let outcome = locate(&snapshot, "de:mo:de:mo:de:mo", &detections, None, &cfg, now)?;

    let truth = (grid.to_meters(cell_x), grid.to_meters(cell_y));
    let recovered = outcome
        .candidates
        .iter()
        .any(|c| (c.0 - truth.0).abs() < 1e-9 && (c.1 - truth.1).abs() < 1e-9);
    let best_error = outcome
        .candidates
        .iter()
        .map(|c| (c.0 - truth.0).hypot(c.1 - truth.1))
        .fold(f64::INFINITY, f64::min);

    info!(
        "🎯 {} candidate(s), tolerance {:.1}, true cell {} (closest candidate {:.2} m off)",
        outcome.candidates.len(),
        outcome.tolerance,
        if recovered { "recovered" } else { "NOT in set" },
        best_error
    );
    Ok(())
}

fn demo_sensor(id: u32, x: f64, y: f64) -> Sensor {
    Sensor {
        id,
        x,
        y,
        z_m: 2.5,
        correction_24: 0.0,
        correction_5: 0.0,
        correction_6: 0.0,
        rx_ant_gain_db: 2.0,
        azimuth_offset_deg: 0,
        plunge_offset_deg: 0,
        diagram: None,
    }
}
