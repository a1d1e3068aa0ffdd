//! propagation.rs — FSPL propagation model with wall and antenna corrections
//!
//! Converts geometry + RF parameters into per-band RSSI:
//! 1. Free-space path loss per band (distance floored at 1 m)
//! 2. Antenna gain: radiation-diagram lookup when the sensor carries one,
//!    flat rx gain otherwise
//! 3. Wall attenuation accumulated over every wall the sightline crosses,
//!    with an early exit once all bands are below the visibility cutoff
//! 4. Fixed per-band correction, rounding to 1 decimal, cutoff → sentinel

use rf_types::{Band, ClientParams, Sensor, Vector, Wall, RSSI_INVISIBLE};
use tracing::warn;

use crate::config::ModelConfig;
use crate::geometry;

// ── Free-space path loss ──────────────────────────────────────────────────────

/// FSPL in dB: `20·log10(f) + 10·a·log10(max(d, 1)) + p − 24`.
/// Distance is floored at 1 m to keep `log10` away from zero.
pub fn fspl(
    frequency_mhz: f64,
    attenuation_factor: f64,
    penetration_factor: f64,
    distance_m: f64,
) -> f64 {
    20.0 * frequency_mhz.log10()
        + 10.0 * attenuation_factor * distance_m.max(1.0).log10()
        + penetration_factor
        - 24.0
}

/// Round to 1 decimal — the resolution RSSI is stored at.
pub fn round_dbm(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ── Antenna gain ──────────────────────────────────────────────────────────────

/// Receive antenna gain toward `client_pt`, dB.
///
/// With a radiation diagram: snap the sensor→client azimuth and plunge to
/// the diagram's angular step (10° or 15°, detected from the populated
/// keys), average the horizontal/vertical gain pair of each bucket, then
/// average the two axes. Any lookup failure falls back to the flat rx gain;
/// an unsupported step logs a warning and does the same.
fn antenna_gain(sensor: &Sensor, client_pt: &Vector) -> f64 {
    let Some(diagram) = sensor.diagram.as_ref() else {
        return sensor.rx_ant_gain_db;
    };
    if diagram.is_empty() {
        return sensor.rx_ant_gain_db;
    }

    let step = if diagram.buckets.contains_key(&10) {
        10u16
    } else if diagram.buckets.contains_key(&15) {
        15u16
    } else {
        warn!(
            sensor_id = sensor.id,
            "radiation diagram has an unsupported angular step, using flat rx gain"
        );
        return sensor.rx_ant_gain_db;
    };

    let to_client = client_pt.sub(&sensor.position());
    let azimuth = geometry::azimuth_deg(&to_client, sensor.azimuth_offset_deg);
    let plunge = geometry::plunge_deg(&to_client, sensor.plunge_offset_deg);

    let snap = |deg: i32| -> u16 {
        let s = step as i32;
        (((deg + s / 2) / s) * s).rem_euclid(360) as u16
    };

    match (diagram.get(snap(azimuth)), diagram.get(snap(plunge))) {
        (Some(h), Some(v)) => {
            let gain_h = (h.horizontal_db + h.vertical_db) / 2.0;
            let gain_v = (v.horizontal_db + v.vertical_db) / 2.0;
            (gain_h + gain_v) / 2.0
        }
        _ => sensor.rx_ant_gain_db,
    }
}

// ── RSSI composition ──────────────────────────────────────────────────────────

/// Free-space RSSI for the three bands (2.4/5/6 order), before walls:
/// `tx_power + tx_gain − fspl + sensor correction + antenna gain`.
pub fn free_space_rssi(
    client: &ClientParams,
    sensor: &Sensor,
    client_pt: &Vector,
    distance_m: f64,
    cfg: &ModelConfig,
) -> [f64; 3] {
    let gain = antenna_gain(sensor, client_pt);
    Band::ALL.map(|band| {
        let bc = cfg.bands.get(band);
        client.tx_power_dbm + client.tx_gain_db
            - fspl(bc.frequency_mhz, bc.attenuation_factor, bc.penetration_factor, distance_m)
            + sensor.correction(band)
            + gain
    })
}

/// Accumulated wall loss for the three bands (negative dB).
///
/// Stops scanning remaining walls once every band's running loss is already
/// at or below the cutoff — further walls only subtract, so the signal
/// cannot become visible again. Performance optimization, not correctness.
pub fn walls_attenuation(
    client_x: f64,
    client_y: f64,
    walls: &[Wall],
    sensor: &Sensor,
    client: &ClientParams,
    cell_size_m: f64,
    cfg: &ModelConfig,
) -> [f64; 3] {
    let client_pt = Vector::new(client_x, client_y, client.z_m);
    let sensor_pt = sensor.position();
    let mut loss = [0.0f64; 3];

    for wall in walls {
        let path = geometry::wall_path_length_through(
            &client_pt,
            &sensor_pt,
            &wall.p1(),
            &wall.p2(),
            wall.thickness_m,
            cell_size_m,
        );
        if path <= 0.0 {
            continue;
        }
        for band in Band::ALL {
            loss[band.index()] -= wall.attenuation(band) * (path / wall.thickness_m);
        }
        if loss.iter().all(|l| *l <= cfg.rssi_cutoff) {
            break;
        }
    }
    loss
}

/// Final per-band RSSI at one cell for one sensor, rounded to 1 decimal;
/// values below the cutoff become `RSSI_INVISIBLE`.
pub fn cell_rssi(
    client_x: f64,
    client_y: f64,
    distance_m: f64,
    client: &ClientParams,
    sensor: &Sensor,
    walls: &[Wall],
    cell_size_m: f64,
    cfg: &ModelConfig,
) -> [f64; 3] {
    let client_pt = Vector::new(client_x, client_y, client.z_m);
    let free_space = free_space_rssi(client, sensor, &client_pt, distance_m, cfg);
    let wall_loss = if cfg.calculate_walls {
        walls_attenuation(client_x, client_y, walls, sensor, client, cell_size_m, cfg)
    } else {
        [0.0; 3]
    };

    Band::ALL.map(|band| {
        let i = band.index();
        let rssi = round_dbm(free_space[i] + wall_loss[i] + cfg.fixed_correction[i]);
        if rssi < cfg.rssi_cutoff {
            RSSI_INVISIBLE
        } else {
            rssi
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rf_types::{AntennaGain, RadiationDiagram};

    fn sensor_at(x: f64, y: f64) -> Sensor {
        Sensor {
            id: 1,
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

    #[test]
    fn fspl_is_monotone_in_distance() {
        let distances = [1.0, 1.5, 3.0, 7.0, 15.0, 40.0, 120.0];
        for pair in distances.windows(2) {
            let near = fspl(2400.0, 3.0, 0.0, pair[0]);
            let far = fspl(2400.0, 3.0, 0.0, pair[1]);
            assert!(near < far, "fspl({}) = {near} !< fspl({}) = {far}", pair[0], pair[1]);
        }
    }

    #[test]
    fn fspl_floors_distance_at_one_meter() {
        let at_zero = fspl(2400.0, 3.0, 0.0, 0.0);
        let at_one = fspl(2400.0, 3.0, 0.0, 1.0);
        assert!(at_zero.is_finite());
        assert_eq!(at_zero, at_one);
    }

    #[test]
    fn cutoff_replaces_rssi_with_sentinel() {
        let cfg = ModelConfig::default();
        let client = ClientParams::default();
        let sensor = sensor_at(0.0, 0.0);
        // 4 km out on a 0.25 m grid: far below any cutoff on every band
        let rssi = cell_rssi(16000.0, 0.0, 4000.0, &client, &sensor, &[], 0.25, &cfg);
        for band in Band::ALL {
            assert_eq!(rssi[band.index()], RSSI_INVISIBLE);
        }
    }

    #[test]
    fn visible_rssi_is_rounded_to_one_decimal() {
        let cfg = ModelConfig::default();
        let client = ClientParams::default();
        let sensor = sensor_at(0.0, 0.0);
        let rssi = cell_rssi(4.0, 0.0, 1.0, &client, &sensor, &[], 0.25, &cfg);
        for band in Band::ALL {
            let v = rssi[band.index()];
            assert!(v > cfg.rssi_cutoff, "band {band:?} unexpectedly invisible: {v}");
            assert!((v * 10.0 - (v * 10.0).round()).abs() < 1e-9, "not 1-decimal: {v}");
        }
    }

    #[test]
    fn wall_between_client_and_sensor_attenuates() {
        let cfg = ModelConfig::default();
        let client = ClientParams::default();
        let sensor = sensor_at(0.0, 0.0);
        let wall = Wall {
            id: 1,
            x1: 5.0,
            y1: -4.0,
            x2: 5.0,
            y2: 4.0,
            thickness_m: 0.2,
            attenuation_24: 6.0,
            attenuation_5: 8.0,
            attenuation_6: 9.0,
        };
        let open = cell_rssi(10.0, 0.0, 2.5, &client, &sensor, &[], 0.25, &cfg);
        let blocked = cell_rssi(10.0, 0.0, 2.5, &client, &sensor, &[wall], 0.25, &cfg);
        for band in Band::ALL {
            let i = band.index();
            assert!(
                blocked[i] < open[i],
                "band {band:?}: {} !< {}",
                blocked[i],
                open[i]
            );
        }
        // Perpendicular crossing: at least one full thickness of loss, plus
        // a little extra for the sightline's vertical rise through the wall
        let loss_24 = open[0] - blocked[0];
        assert!((5.9..12.0).contains(&loss_24), "2.4 GHz wall loss off: {loss_24}");
    }

    #[test]
    fn calculate_walls_flag_disables_attenuation() {
        let mut cfg = ModelConfig::default();
        cfg.calculate_walls = false;
        let client = ClientParams::default();
        let sensor = sensor_at(0.0, 0.0);
        let wall = Wall {
            id: 1,
            x1: 5.0,
            y1: -4.0,
            x2: 5.0,
            y2: 4.0,
            thickness_m: 0.2,
            attenuation_24: 6.0,
            attenuation_5: 8.0,
            attenuation_6: 9.0,
        };
        let a = cell_rssi(10.0, 0.0, 2.5, &client, &sensor, &[wall], 0.25, &cfg);
        let b = cell_rssi(10.0, 0.0, 2.5, &client, &sensor, &[], 0.25, &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn unsupported_diagram_step_falls_back_to_flat_gain() {
        let mut with_bad_diagram = sensor_at(0.0, 0.0);
        let mut buckets = std::collections::BTreeMap::new();
        // 7° step: neither bucket 10 nor 15 exists
        buckets.insert(7u16, AntennaGain { horizontal_db: 9.0, vertical_db: 9.0 });
        with_bad_diagram.diagram = Some(RadiationDiagram { buckets });

        let flat = sensor_at(0.0, 0.0);
        let pt = Vector::new(8.0, 3.0, 1.0);
        let cfg = ModelConfig::default();
        let client = ClientParams::default();
        let a = free_space_rssi(&client, &with_bad_diagram, &pt, 2.0, &cfg);
        let b = free_space_rssi(&client, &flat, &pt, 2.0, &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn diagram_gain_is_axis_average() {
        let mut sensor = sensor_at(0.0, 0.0);
        let mut buckets = std::collections::BTreeMap::new();
        for deg in (0..360).step_by(10) {
            buckets.insert(deg as u16, AntennaGain { horizontal_db: 4.0, vertical_db: 2.0 });
        }
        sensor.diagram = Some(RadiationDiagram { buckets });

        let flat = sensor_at(0.0, 0.0); // rx_ant_gain_db = 2.0
        let pt = Vector::new(8.0, 3.0, 1.0);
        let cfg = ModelConfig::default();
        let client = ClientParams::default();
        let with_diagram = free_space_rssi(&client, &sensor, &pt, 2.0, &cfg);
        let with_flat = free_space_rssi(&client, &flat, &pt, 2.0, &cfg);
        // Uniform (4+2)/2 = 3 dB diagram vs 2 dB flat gain: +1 dB everywhere
        for i in 0..3 {
            assert!((with_diagram[i] - with_flat[i] - 1.0).abs() < 1e-9);
        }
    }
}
