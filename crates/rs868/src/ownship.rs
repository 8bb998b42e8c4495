/**
 * Own-aircraft state: GNSS fix intake, turn and climb estimation, the
 * airborne decision, and the velocity projection broadcast on the wire.
 *
 * The projection turns the current course, speed and turn rate into four
 * (north, east) velocity samples in quarter-m/s, taken at −1.5 s, +2 s,
 * +5.5 s and +9 s around now: the heading is stepped by `turn_rate × Δt`
 * for each sample. Receivers treat the four points as a spline of our
 * short-term trajectory. Wind is *not* applied: the samples are
 * ground-referenced, matching what other units expect.
 */
use tracing::debug;

use crate::geom::{self, FPM_PER_MPS, MPS_PER_KNOT};
use crate::track::Track;

/// Relative sample times of the broadcast velocity spline, seconds
pub const PROJECTION_SAMPLES: [f32; 4] = [-1.5, 2.0, 5.5, 9.0];

/// The projection result is reused for this long unless the position
/// updates first
pub const PROJECTION_CACHE_MS: u64 = 400;

pub const AIRBORNE_SPEED_KT: f32 = 4.0;
pub const AIRBORNE_VS_FPM: f32 = 200.0;
pub const AIRBORNE_VS_SUSTAIN_MS: u64 = 5_000;
pub const AIRBORNE_ALT_DELTA_M: f32 = 30.0;

/// One position/velocity solution from the GNSS collaborator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssFix {
    /// WGS84 degrees
    pub latitude: f64,
    /// WGS84 degrees
    pub longitude: f64,
    /// Meters above mean sea level
    pub altitude: f32,
    /// Meters
    pub geoid_separation: f32,
    /// Degrees true
    pub course: f32,
    /// Knots
    pub speed: f32,
    /// UTC seconds
    pub utc_seconds: u32,
    /// Monotonic milliseconds the fix was taken at
    pub millis: u64,
}

/// Fold a GNSS solution into the own track, advancing the two-sample
/// history and re-estimating the turn rate
pub fn update_from_fix(own: &mut Track, fix: &GnssFix) {
    if own.gnsstime_ms != 0 {
        own.prev_gnsstime_ms = own.gnsstime_ms;
        own.prev_course = own.course;
    }
    own.latitude = fix.latitude;
    own.longitude = fix.longitude;
    own.altitude = fix.altitude;
    own.geoid_separation = fix.geoid_separation;
    own.course = geom::wrap_360(fix.course);
    own.speed = fix.speed;
    own.timestamp = fix.utc_seconds;
    own.gnsstime_ms = fix.millis;

    if own.prev_gnsstime_ms != 0 && own.gnsstime_ms > own.prev_gnsstime_ms {
        let dt =
            (own.gnsstime_ms - own.prev_gnsstime_ms) as f32 / 1000.0;
        if dt <= 4.0 {
            own.turn_rate =
                geom::wrap_180(own.course - own.prev_course) / dt;
        } else {
            // history too old to differentiate
            own.turn_rate = 0.0;
        }
    }
}

/**
 * Fill `ns`/`ew`/`smult` of a track from its course, speed and turn rate.
 *
 * Recomputes only when the cached result is older than
 * [`PROJECTION_CACHE_MS`] or the position updated since. The scale
 * exponent is the smallest one that fits the quarter-m/s speed into a
 * signed byte; the encoded climb rate shares it.
 */
pub fn project(own: &mut Track, now_ms: u64) {
    if own.proj_time_ms != 0
        && now_ms.saturating_sub(own.proj_time_ms) < PROJECTION_CACHE_MS
        && own.gnsstime_ms <= own.proj_time_ms
    {
        return;
    }
    own.proj_time_ms = now_ms;

    let speed_q = ((own.speed * MPS_PER_KNOT * 4.0).round() as i32)
        .clamp(0, 0x3ff);
    let mut smult = 0u8;
    while (speed_q >> smult) > 0x7f && smult < 3 {
        smult += 1;
    }
    own.smult = smult;

    for (i, dt) in PROJECTION_SAMPLES.iter().enumerate() {
        let heading = own.course + own.turn_rate * dt;
        let n = speed_q as f32 * geom::cos_deg(heading);
        let e = speed_q as f32 * geom::sin_deg(heading);
        own.ns[i] = ((n.round() as i32) >> smult).clamp(-128, 127) as i8;
        own.ew[i] = ((e.round() as i32) >> smult).clamp(-128, 127) as i8;
    }
}

/// Barometer-less climb estimate from successive altitude samples
#[derive(Debug, Default)]
pub struct ClimbEstimator {
    last: Option<(u64, f32)>,
}

impl ClimbEstimator {
    /// Feed an altitude sample (m) and get ft/min back once two samples
    /// far enough apart exist
    pub fn update(&mut self, altitude: f32, now_ms: u64) -> Option<f32> {
        let result = match self.last {
            Some((ms, alt)) if now_ms > ms && now_ms - ms >= 250 => {
                let dt = (now_ms - ms) as f32 / 1000.0;
                Some((altitude - alt) / dt * FPM_PER_MPS)
            }
            Some(_) => return None, // keep the previous sample
            None => None,
        };
        self.last = Some((now_ms, altitude));
        result
    }
}

/**
 * Airborne decision: flying means any of ground speed above 4 kt, a climb
 * or sink beyond 200 fpm sustained for five seconds, or a pressure
 * altitude more than 30 m away from the ground baseline.
 */
#[derive(Debug, Default)]
pub struct AirborneEstimator {
    baseline_alt: Option<f32>,
    vs_exceed_since: Option<u64>,
}

impl AirborneEstimator {
    pub fn update(&mut self, own: &Track, now_ms: u64) -> bool {
        let mut airborne = false;

        if own.speed > AIRBORNE_SPEED_KT {
            airborne = true;
        }

        if own.vertical_speed.abs() > AIRBORNE_VS_FPM {
            let since = *self.vs_exceed_since.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) >= AIRBORNE_VS_SUSTAIN_MS {
                airborne = true;
            }
        } else {
            self.vs_exceed_since = None;
        }

        if let Some(baseline) = self.baseline_alt {
            if (own.altitude - baseline).abs() > AIRBORNE_ALT_DELTA_M {
                airborne = true;
            }
        }

        if !airborne {
            // on the ground: keep tracking the field elevation
            self.baseline_alt = Some(own.altitude);
        } else if own.airborne != airborne {
            debug!(altitude = own.altitude, "airborne");
        }
        airborne
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fix(course: f32, speed: f32, millis: u64) -> GnssFix {
        GnssFix {
            latitude: 48.0,
            longitude: 8.0,
            altitude: 800.0,
            geoid_separation: 48.0,
            course,
            speed,
            utc_seconds: 1_700_000_000,
            millis,
        }
    }

    #[test]
    fn turn_rate_from_history() {
        let mut own = Track::default();
        update_from_fix(&mut own, &fix(90.0, 80.0, 1000));
        assert_eq!(own.prev_gnsstime_ms, 0);
        update_from_fix(&mut own, &fix(94.0, 80.0, 3000));
        assert_abs_diff_eq!(own.turn_rate, 2.0, epsilon = 1e-3);
        // across the north wrap
        update_from_fix(&mut own, &fix(358.0, 80.0, 4000));
        update_from_fix(&mut own, &fix(4.0, 80.0, 5000));
        assert_abs_diff_eq!(own.turn_rate, 6.0, epsilon = 1e-3);
    }

    #[test]
    fn straight_flight_projection() {
        let mut own = Track {
            course: 90.0,
            speed: 80.0, // 41.2 m/s, 165 quarter-m/s
            ..Track::default()
        };
        project(&mut own, 1000);
        assert_eq!(own.smult, 1);
        for i in 0..4 {
            assert_abs_diff_eq!(own.ew_mps(i), 41.2, epsilon = 0.6);
            assert_abs_diff_eq!(own.ns_mps(i), 0.0, epsilon = 0.6);
        }
    }

    #[test]
    fn turning_projection_steps_heading() {
        let mut own = Track {
            course: 0.0,
            speed: 60.0, // 30.9 m/s
            turn_rate: 10.0,
            ..Track::default()
        };
        project(&mut own, 1000);
        // at +9 s the heading is 90°: mostly east
        assert!(own.ew_mps(3) > 28.0);
        assert!(own.ns_mps(3).abs() < 3.0);
        // at -1.5 s the heading was -15°: mostly north, slightly west
        assert!(own.ns_mps(0) > 28.0);
        assert!(own.ew_mps(0) < -5.0);
    }

    #[test]
    fn projection_cache() {
        let mut own = Track {
            course: 0.0,
            speed: 60.0,
            ..Track::default()
        };
        project(&mut own, 1000);
        own.course = 180.0;
        project(&mut own, 1200);
        // cached: still pointing north
        assert!(own.ns_mps(1) > 0.0);
        project(&mut own, 1500);
        assert!(own.ns_mps(1) < 0.0);
    }

    #[test]
    fn cache_invalidated_by_position_update() {
        let mut own = Track {
            course: 0.0,
            speed: 60.0,
            ..Track::default()
        };
        project(&mut own, 1000);
        own.course = 180.0;
        own.gnsstime_ms = 1100;
        project(&mut own, 1200);
        assert!(own.ns_mps(1) < 0.0);
    }

    #[test]
    fn airborne_by_speed() {
        let mut est = AirborneEstimator::default();
        let mut own = Track::default();
        own.speed = 2.0;
        assert!(!est.update(&own, 0));
        own.speed = 12.0;
        assert!(est.update(&own, 100));
    }

    #[test]
    fn airborne_by_sustained_climb() {
        let mut est = AirborneEstimator::default();
        let mut own = Track::default();
        own.vertical_speed = 400.0;
        assert!(!est.update(&own, 0));
        assert!(!est.update(&own, 3000));
        assert!(est.update(&own, 6000));
        // a blip resets the sustain window
        own.vertical_speed = 0.0;
        assert!(!est.update(&own, 7000));
        own.vertical_speed = 400.0;
        assert!(!est.update(&own, 8000));
    }

    #[test]
    fn airborne_by_altitude_change() {
        let mut est = AirborneEstimator::default();
        let mut own = Track::default();
        own.altitude = 450.0;
        assert!(!est.update(&own, 0));
        own.altitude = 490.0;
        assert!(est.update(&own, 1000));
    }

    #[test]
    fn climb_estimator() {
        let mut est = ClimbEstimator::default();
        assert_eq!(est.update(500.0, 0), None);
        let vs = est.update(502.0, 1000).unwrap();
        assert_abs_diff_eq!(vs, 2.0 * FPM_PER_MPS, epsilon = 0.5);
    }
}
