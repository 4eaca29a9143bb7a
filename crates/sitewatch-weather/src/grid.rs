//! Latitude/longitude to KMA forecast grid conversion.
//!
//! The KMA short-range forecast and nowcast endpoints address locations by
//! `(nx, ny)` on a 5 km Lambert Conformal Conic grid.

use std::f64::consts::PI;

use crate::types::{Coordinates, GridPoint};

const EARTH_RADIUS_KM: f64 = 6371.00877;
const GRID_SPACING_KM: f64 = 5.0;
const STANDARD_PARALLEL_1: f64 = 30.0;
const STANDARD_PARALLEL_2: f64 = 60.0;
const ORIGIN_LON: f64 = 126.0;
const ORIGIN_LAT: f64 = 38.0;
const ORIGIN_X: f64 = 43.0;
const ORIGIN_Y: f64 = 136.0;

const DEG_TO_RAD: f64 = PI / 180.0;

/// Projection parameters derived from the constants above.
struct Projection {
    re: f64,
    sn: f64,
    sf: f64,
    ro: f64,
}

impl Projection {
    fn kma() -> Self {
        let re = EARTH_RADIUS_KM / GRID_SPACING_KM;
        let slat1 = STANDARD_PARALLEL_1 * DEG_TO_RAD;
        let slat2 = STANDARD_PARALLEL_2 * DEG_TO_RAD;
        let olat = ORIGIN_LAT * DEG_TO_RAD;

        let sn = (PI * 0.25 + slat2 * 0.5).tan() / (PI * 0.25 + slat1 * 0.5).tan();
        let sn = (slat1.cos() / slat2.cos()).ln() / sn.ln();
        let sf = (PI * 0.25 + slat1 * 0.5).tan().powf(sn) * slat1.cos() / sn;
        let ro = re * sf / (PI * 0.25 + olat * 0.5).tan().powf(sn);

        Self { re, sn, sf, ro }
    }
}

/// Convert coordinates to the KMA grid cell containing them.
pub fn to_grid(coordinates: Coordinates) -> GridPoint {
    let p = Projection::kma();

    let ra = p.re * p.sf / (PI * 0.25 + coordinates.latitude * DEG_TO_RAD * 0.5).tan().powf(p.sn);

    let mut theta = coordinates.longitude * DEG_TO_RAD - ORIGIN_LON * DEG_TO_RAD;
    if theta > PI {
        theta -= 2.0 * PI;
    }
    if theta < -PI {
        theta += 2.0 * PI;
    }
    theta *= p.sn;

    let x = (ra * theta.sin() + ORIGIN_X + 0.5).floor();
    let y = (p.ro - ra * theta.cos() + ORIGIN_Y + 0.5).floor();

    GridPoint {
        nx: x as i32,
        ny: y as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(lat: f64, lon: f64) -> (i32, i32) {
        let g = to_grid(Coordinates::new(lat, lon));
        (g.nx, g.ny)
    }

    #[test]
    fn test_origin_maps_to_origin_cell() {
        assert_eq!(grid(38.0, 126.0), (43, 136));
    }

    #[test]
    fn test_seoul_city_hall() {
        assert_eq!(grid(37.5665, 126.9780), (60, 127));
    }

    #[test]
    fn test_busan() {
        assert_eq!(grid(35.1796, 129.0756), (98, 76));
    }

    #[test]
    fn test_jeju() {
        assert_eq!(grid(33.4996, 126.5312), (53, 38));
    }

    #[test]
    fn test_cheorwon() {
        assert_eq!(grid(38.1467, 127.3133), (65, 139));
    }

    #[test]
    fn test_nearby_points_share_cell() {
        assert_eq!(grid(37.5665, 126.9780), grid(37.5670, 126.9785));
    }
}
