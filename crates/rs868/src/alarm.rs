/**
 * ## Collision alarm engine
 *
 * Each sweep scores every tracked aircraft against the own aircraft and
 * produces an [`AlarmLevel`]. Three interchangeable scorers exist, chosen
 * once at startup from the settings:
 *
 * - `Distance`: pure proximity buckets with a vertical-offset penalty;
 * - `Vector`: time-to-impact along the relative velocity, falling back to
 *   `Distance` when either aircraft is circling;
 * - `Legacy`: reserved, scores nothing yet.
 *
 * Scoring also fills the derived geometry of the track (distance, bearing,
 * altitude offsets) that the NMEA exporter reads.
 *
 * Alert hysteresis: every track carries, next to the computed
 * `alarm_level`, the `alert_level` tier the next sound has to reach. Firing
 * a sound raises it one above the current alarm; a receding target lowers
 * it to one above wherever it receded to. A target bouncing between two
 * adjacent tiers therefore sounds once, not on every bounce.
 */
use serde::{Deserialize, Serialize};

use crate::geom::{self, FlatEarth, MPS_PER_KNOT};
use crate::track::Track;

/// Radius inside which targets are reported over NMEA at all, meters
pub const ALARM_ZONE_NONE: f32 = 10_000.0;
pub const ALARM_ZONE_CLOSE: f32 = 1_000.0;
pub const ALARM_ZONE_LOW: f32 = 700.0;
pub const ALARM_ZONE_IMPORTANT: f32 = 400.0;
pub const ALARM_ZONE_URGENT: f32 = 250.0;

/// Time-to-impact buckets of the vector scorer, seconds
pub const ALARM_TIME_CLOSE: f32 = 30.0;
pub const ALARM_TIME_LOW: f32 = 15.0;
pub const ALARM_TIME_IMPORTANT: f32 = 9.0;
pub const ALARM_TIME_URGENT: f32 = 8.0;

/// Width of one approach-angle band, degrees
pub const ALARM_VECTOR_ANGLE: f32 = 10.0;
/// Minimum relative speed the vector scorer considers, m/s
pub const ALARM_VECTOR_SPEED: f32 = 2.0;
/// Turn rate above which an aircraft counts as circling, °/s
pub const CIRCLING_TURN_RATE: f32 = 3.0;

/// Meters of slant range one meter of vertical offset is worth
pub const VERTICAL_SLOPE: f32 = 5.0;
/// Dead band applied to altitude differences, meters
pub const VERTICAL_SLACK: f32 = 60.0;
/// Vertical offset beyond which no alarm is raised, meters
pub const VERTICAL_SEPARATION: f32 = 300.0;
/// Vertical window of plain traffic reporting, meters
pub const VERTICAL_VISIBILITY_RANGE: f32 = 500.0;

/// Horizontal and vertical envelope inside which a stealthy target is
/// still reported (fuzzified) below alarm
pub const STEALTH_DISTANCE: f32 = 2_000.0;
pub const STEALTH_VERTICAL: f32 = 300.0;

/// Threat tier of a target, most severe last
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Default)]
#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmLevel {
    #[default]
    None = 0,
    Close = 1,
    Low = 2,
    Important = 3,
    Urgent = 4,
}

impl AlarmLevel {
    /// Level as exported in PFLAA/PFLAU: the internal `Close` tier is
    /// collapsed into 0
    pub fn nmea_level(self) -> u8 {
        (self as u8).saturating_sub(1)
    }
}

/// Scorer selector, fixed at engine construction
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmAlgorithm {
    None = 0,
    #[default]
    Distance = 1,
    Vector = 2,
    /// Reserved for the manufacturer's scoring; currently never alarms
    Legacy = 3,
}

/**
 * Altitude difference between two aircraft, adjusted for where their climb
 * rates take them over the next ten seconds (only when that motion is
 * converging), then passed through the [`VERTICAL_SLACK`] dead band.
 *
 * The result never exceeds the raw difference in magnitude.
 */
pub fn adj_alt_diff(own: &Track, other: &Track) -> f32 {
    let vsr = (other.vertical_speed - own.vertical_speed)
        .clamp(-1000.0, 1000.0);
    // fpm over 10 s, converted to meters
    let predicted = vsr * 0.05;
    let mut d = other.altitude - own.altitude;
    if d > 0.0 && predicted < 0.0 {
        d = (d + predicted).max(0.0);
    } else if d < 0.0 && predicted > 0.0 {
        d = (d + predicted).min(0.0);
    }
    if d.abs() <= VERTICAL_SLACK {
        0.0
    } else {
        d - VERTICAL_SLACK * d.signum()
    }
}

/**
 * Refresh the derived geometry of `other` relative to `own` and score it
 * with the selected algorithm. Applies the receding half of the alert
 * hysteresis; the sounding half is [`note_sound`].
 */
pub fn rescore(
    algorithm: AlarmAlgorithm,
    own: &Track,
    other: &mut Track,
    fe: &FlatEarth,
    now_ms: u64,
) {
    let (distance, bearing) = fe.distance_bearing(
        (own.latitude, own.longitude),
        (other.latitude, other.longitude),
    );
    other.distance = distance;
    other.bearing = bearing;
    other.alt_diff = other.altitude - own.altitude;
    other.adj_alt_diff = adj_alt_diff(own, other);
    other.adj_distance = distance + VERTICAL_SLOPE * other.adj_alt_diff.abs();

    other.alarm_level = match algorithm {
        AlarmAlgorithm::None => AlarmLevel::None,
        AlarmAlgorithm::Distance => alarm_distance(other),
        AlarmAlgorithm::Vector => alarm_vector(own, other, now_ms),
        // reserved, see settings
        AlarmAlgorithm::Legacy => AlarmLevel::None,
    };

    if (other.alarm_level as u8) < other.alert_level {
        other.alert_level = other.alarm_level as u8 + 1;
    }
}

/// Record that a sound fired for this track at its current alarm level
pub fn note_sound(track: &mut Track) {
    track.alert_level = track.alarm_level as u8 + 1;
}

/// Whether the current alarm is allowed to sound for this track
pub fn wants_sound(track: &Track) -> bool {
    track.alarm_level > AlarmLevel::Close
        && track.alarm_level as u8 > track.alert_level
}

fn alarm_distance(other: &Track) -> AlarmLevel {
    if other.distance > 2.0 * ALARM_ZONE_CLOSE
        || other.alt_diff.abs() > 2.0 * VERTICAL_SEPARATION
    {
        return AlarmLevel::None;
    }
    if other.adj_alt_diff.abs() >= VERTICAL_SEPARATION {
        return AlarmLevel::None;
    }
    let eff_dist =
        other.distance + VERTICAL_SLOPE * other.adj_alt_diff.abs();
    if eff_dist < ALARM_ZONE_URGENT {
        AlarmLevel::Urgent
    } else if eff_dist < ALARM_ZONE_IMPORTANT {
        AlarmLevel::Important
    } else if eff_dist < ALARM_ZONE_LOW {
        AlarmLevel::Low
    } else if eff_dist < ALARM_ZONE_CLOSE {
        AlarmLevel::Close
    } else {
        AlarmLevel::None
    }
}

fn alarm_vector(own: &Track, other: &Track, now_ms: u64) -> AlarmLevel {
    // need a velocity history for ourselves and a fresh sample from them
    if own.prev_gnsstime_ms == 0 {
        return AlarmLevel::None;
    }
    if now_ms.saturating_sub(other.gnsstime_ms) > 3_000 {
        return AlarmLevel::None;
    }
    if other.distance > 2.0 * ALARM_ZONE_CLOSE
        || other.alt_diff.abs() > 2.0 * VERTICAL_SEPARATION
    {
        return AlarmLevel::None;
    }
    let closing = (own.speed + other.speed) * MPS_PER_KNOT;
    if closing <= 0.0 || other.distance / closing > ALARM_TIME_CLOSE {
        return AlarmLevel::None;
    }
    if own.turn_rate.abs() > CIRCLING_TURN_RATE
        || other.turn_rate.abs() > CIRCLING_TURN_RATE
    {
        // relative velocity is meaningless in a thermal
        return alarm_distance(other);
    }

    let rel_n = (own.vn_kt() - other.vn_kt()) * MPS_PER_KNOT;
    let rel_e = (own.ve_kt() - other.ve_kt()) * MPS_PER_KNOT;
    let rel_speed = libm::hypotf(rel_n, rel_e);
    if rel_speed < ALARM_VECTOR_SPEED {
        return AlarmLevel::None;
    }

    let time_to_impact = (other.distance
        + VERTICAL_SLOPE * other.adj_alt_diff.abs())
        / rel_speed;
    let time_band = if time_to_impact < ALARM_TIME_URGENT {
        0
    } else if time_to_impact < ALARM_TIME_IMPORTANT {
        1
    } else if time_to_impact < ALARM_TIME_LOW {
        2
    } else if time_to_impact < ALARM_TIME_CLOSE {
        3
    } else {
        return AlarmLevel::None;
    };

    let approach = geom::bearing_deg(rel_n, rel_e);
    let delta = geom::wrap_180(approach - other.bearing).abs();
    let angle_band = if delta <= ALARM_VECTOR_ANGLE {
        0
    } else if delta <= 2.0 * ALARM_VECTOR_ANGLE {
        1
    } else if delta <= 3.0 * ALARM_VECTOR_ANGLE {
        2
    } else {
        return AlarmLevel::None;
    };

    match time_band + angle_band {
        0 => AlarmLevel::Urgent,
        1 => AlarmLevel::Important,
        2 => AlarmLevel::Low,
        3 => AlarmLevel::Close,
        _ => AlarmLevel::None,
    }
}
