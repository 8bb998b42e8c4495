/**
 * Angle and distance helpers sized for the radio horizon of the Legacy
 * protocol (a few kilometers around the receiver).
 *
 * Positions decoded from the air interface are folded against a reference
 * location (see `decode::legacy`), so every geometric question the alarm
 * engine asks lives on a locally flat Earth: an equirectangular projection
 * with the meridian convergence corrected by `cos(latitude)` is accurate to
 * well under a meter at these ranges.
 *
 * Trigonometry comes in two flavours:
 *
 * - a quarter-wave sine table with linear interpolation and a polynomial
 *   arctangent, both good to ~0.1°, for the per-sweep scoring paths;
 * - `libm` for the reference paths and as ground truth in the tests.
 */
use once_cell::sync::Lazy;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const MPS_PER_KNOT: f32 = 0.514444;
pub const KNOT_PER_MPS: f32 = 1.943_844;
pub const FEET_PER_METER: f32 = 3.28084;
pub const FPM_PER_MPS: f32 = 196.850;

/// Sine of 0..90° sampled every quarter degree
static SIN_TABLE: Lazy<[f32; 361]> = Lazy::new(|| {
    let mut table = [0f32; 361];
    for (i, v) in table.iter_mut().enumerate() {
        *v = libm::sinf((i as f32 * 0.25).to_radians());
    }
    table
});

/// Normalize an angle to [0, 360)
pub fn wrap_360(deg: f32) -> f32 {
    let r = deg % 360.0;
    if r < 0.0 {
        r + 360.0
    } else {
        r
    }
}

/// Normalize an angle to [-180, 180)
pub fn wrap_180(deg: f32) -> f32 {
    wrap_360(deg + 180.0) - 180.0
}

/// Table-interpolated sine, argument in degrees
pub fn sin_deg(deg: f32) -> f32 {
    let a = wrap_360(deg);
    let (a, sign) = if a >= 180.0 { (a - 180.0, -1.0) } else { (a, 1.0) };
    let a = if a > 90.0 { 180.0 - a } else { a };
    let pos = a * 4.0;
    let i = pos as usize;
    let v = if i >= 360 {
        SIN_TABLE[360]
    } else {
        let frac = pos - i as f32;
        SIN_TABLE[i] + frac * (SIN_TABLE[i + 1] - SIN_TABLE[i])
    };
    sign * v
}

/// Table-interpolated cosine, argument in degrees
pub fn cos_deg(deg: f32) -> f32 {
    sin_deg(deg + 90.0)
}

// Polynomial arctangent on [-1, 1], in degrees; the coefficients are the
// 0.2447/0.0663 radian pair from the classic second-order approximation,
// maximum error below 0.09°.
fn atan_deg_unit(z: f32) -> f32 {
    let az = z.abs();
    45.0 * z - z * (az - 1.0) * (14.02 + 3.80 * az)
}

/// Four-quadrant arctangent, result in (-180, 180], degrees
pub fn atan2_deg(y: f32, x: f32) -> f32 {
    if x == 0.0 && y == 0.0 {
        return 0.0;
    }
    if x.abs() >= y.abs() {
        let a = atan_deg_unit(y / x);
        if x >= 0.0 {
            a
        } else if y >= 0.0 {
            a + 180.0
        } else {
            a - 180.0
        }
    } else {
        let a = atan_deg_unit(x / y);
        if y >= 0.0 {
            90.0 - a
        } else {
            -90.0 - a
        }
    }
}

/// Compass bearing in [0, 360) of the (north, east) displacement
pub fn bearing_deg(north: f32, east: f32) -> f32 {
    wrap_360(atan2_deg(east, north))
}

/**
 * Equirectangular projection anchored at a reference latitude.
 *
 * The scale factor is sampled once per GNSS update; targets live within
 * ~9 km of the reference (the folding ambiguity of the wire format), where
 * the error against the haversine distance stays below one part in 10⁴.
 */
#[derive(Debug, Clone, Copy)]
pub struct FlatEarth {
    lon_scale: f64,
}

impl FlatEarth {
    pub fn new(latitude: f64) -> Self {
        FlatEarth {
            lon_scale: libm::cos(latitude.to_radians()),
        }
    }

    /// (north, east) displacement in meters from `from` to `to`,
    /// both (latitude, longitude) in degrees
    pub fn offsets(&self, from: (f64, f64), to: (f64, f64)) -> (f32, f32) {
        let north = (to.0 - from.0).to_radians() * EARTH_RADIUS_M;
        let east =
            (to.1 - from.1).to_radians() * EARTH_RADIUS_M * self.lon_scale;
        (north as f32, east as f32)
    }

    /// Slant-free ground distance (m) and compass bearing (°) to a target
    pub fn distance_bearing(
        &self,
        from: (f64, f64),
        to: (f64, f64),
    ) -> (f32, f32) {
        let (north, east) = self.offsets(from, to);
        (libm::hypotf(north, east), bearing_deg(north, east))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let d_lat = (lat2 - lat1).to_radians();
        let d_lon = (lon2 - lon1).to_radians();
        let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
            + lat1.to_radians().cos()
                * lat2.to_radians().cos()
                * (d_lon / 2.0).sin()
                * (d_lon / 2.0).sin();
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }

    #[test]
    fn sine_table_against_libm() {
        let mut deg = -720.0f32;
        while deg < 720.0 {
            assert_abs_diff_eq!(
                sin_deg(deg),
                libm::sinf(deg.to_radians()),
                epsilon = 2e-4
            );
            assert_abs_diff_eq!(
                cos_deg(deg),
                libm::cosf(deg.to_radians()),
                epsilon = 2e-4
            );
            deg += 0.37;
        }
    }

    #[test]
    fn atan2_against_libm() {
        let mut t = -180.0f32;
        while t < 180.0 {
            let (y, x) = (libm::sinf(t.to_radians()), libm::cosf(t.to_radians()));
            let err = wrap_180(
                atan2_deg(y, x) - libm::atan2f(y, x).to_degrees(),
            );
            assert!(err.abs() < 0.1, "atan2 off by {err} at {t}");
            t += 0.73;
        }
        assert_eq!(atan2_deg(0.0, 0.0), 0.0);
    }

    #[test]
    fn bearing_quadrants() {
        assert_abs_diff_eq!(bearing_deg(1.0, 0.0), 0.0, epsilon = 0.1);
        assert_abs_diff_eq!(bearing_deg(0.0, 1.0), 90.0, epsilon = 0.1);
        assert_abs_diff_eq!(bearing_deg(-1.0, 0.0), 180.0, epsilon = 0.1);
        assert_abs_diff_eq!(bearing_deg(0.0, -1.0), 270.0, epsilon = 0.1);
    }

    #[test]
    fn wrap_conventions() {
        assert_eq!(wrap_360(-90.0), 270.0);
        assert_eq!(wrap_360(720.0), 0.0);
        assert_eq!(wrap_180(190.0), -170.0);
        assert_eq!(wrap_180(-190.0), 170.0);
    }

    #[test]
    fn flat_earth_against_haversine() {
        let fe = FlatEarth::new(48.0);
        let from = (48.0, 8.0);
        let to = (48.003, 8.01);
        let (dist, _) = fe.distance_bearing(from, to);
        let reference = haversine(from.0, from.1, to.0, to.1);
        assert_relative_eq!(dist as f64, reference, max_relative = 1e-3);
    }

    #[test]
    fn head_on_scenario_distance() {
        // 0.01° of longitude at 48°N is a bit more than 740 m
        let fe = FlatEarth::new(48.0);
        let (dist, bearing) =
            fe.distance_bearing((48.0, 8.0), (48.0, 8.01));
        assert_relative_eq!(dist, 744.0, max_relative = 1e-3);
        assert_abs_diff_eq!(bearing, 90.0, epsilon = 0.1);
    }
}
