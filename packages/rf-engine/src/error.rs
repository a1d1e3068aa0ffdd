//! error.rs — typed engine errors
//!
//! Matrix-build problems are local and recoverable (clamped, defaulted, or
//! logged); only floor-description validation surfaces as `ConfigError`.
//! Positioning failures are returned to the caller as typed results, never
//! panics.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid floor dimensions: width={width_px}px height={height_px}px scale={scale_px_per_m}px/m")]
    InvalidFloor {
        width_px: u32,
        height_px: u32,
        scale_px_per_m: f64,
    },
    #[error("cell size must be positive, got {0} m")]
    InvalidCellSize(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum PositioningError {
    /// The device has no detections on the target floor.
    #[error("no detections for device {mac}")]
    NotFound { mac: String },
    /// Even the most recent detection is older than the freshness window.
    #[error("detections for device {mac} are older than the {aging_secs}s freshness window")]
    StaleData { mac: String, aging_secs: i64 },
    /// The adaptive search exhausted its accuracy bounds with zero matches,
    /// even after falling back to the last non-empty result.
    #[error("adaptive search exhausted accuracy bounds with no matching cells")]
    NoMatch,
}
