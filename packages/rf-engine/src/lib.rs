//! # rf-engine
//!
//! RF coverage modeling + positioning core for the indoor suite.
//!
//! Components, leaf-first:
//! - [`geometry`]: 2D/3D primitives for wall intersection and attenuation
//!   path lengths — pure math, no I/O
//! - [`propagation`]: FSPL + antenna gain + wall attenuation → per-band RSSI
//! - [`coverage`]: full-grid sweep producing `PointRow`/`MatrixRow` sets
//! - [`positioning`]: adaptive RSSI-window search over a built matrix
//!
//! The engine is a library consumed by the surrounding service. It never
//! touches HTTP, SQL, or image encoding: floor/wall/sensor records come in,
//! point/matrix rows and candidate positions go out. All tuning lives in
//! [`config::EngineConfig`] — injected, never process-wide globals.

pub mod config;
pub mod coverage;
pub mod error;
pub mod geometry;
pub mod positioning;
pub mod propagation;

pub use config::{BandCoefficients, BandTable, EngineConfig, ModelConfig, SearchConfig};
pub use coverage::{build_coverage_matrix, build_coverage_matrix_parallel, CoverageMatrix, CoverageSweep};
pub use error::{ConfigError, PositioningError};
pub use positioning::{locate, LocateOutcome, MatrixSnapshot};
