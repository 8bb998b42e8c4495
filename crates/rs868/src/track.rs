use std::fmt;

use serde::Serialize;

use crate::alarm::AlarmLevel;
use crate::decode::{Address, AddressType, AircraftType, Protocol};
use crate::geom;

/**
 * One aircraft known to the system, own aircraft included.
 *
 * A track mixes three kinds of state:
 *
 * - fields refreshed from the radio (or from GNSS for the own aircraft):
 *   position, velocity, identity and privacy flags;
 * - a two-sample history (`prev_course`, `prev_gnsstime_ms`) feeding the
 *   turn-rate estimate;
 * - fields derived by the alarm sweep: geometry relative to the own
 *   aircraft and the current alarm / last-sounded alert tiers.
 *
 * The four `ns`/`ew` pairs are the velocity spline broadcast on the wire:
 * quarter-m/s north and east components sampled around now
 * (approximately −1.5 s, +2 s, +5.5 s and +9 s), all right-shifted by the
 * shared scale exponent `smult`.
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub address: Address,
    pub addr_type: AddressType,
    #[serde(skip)]
    pub protocol: Protocol,

    /// WGS84 degrees
    pub latitude: f64,
    /// WGS84 degrees
    pub longitude: f64,
    /// Meters above mean sea level
    pub altitude: f32,
    #[serde(skip)]
    pub geoid_separation: f32,
    /// Ground track, degrees true
    pub course: f32,
    /// Ground speed, knots
    pub speed: f32,
    /// Feet per minute
    pub vertical_speed: f32,
    /// Degrees per second, positive clockwise
    pub turn_rate: f32,

    pub aircraft_type: AircraftType,
    pub airborne: bool,
    pub stealth: bool,
    pub no_track: bool,

    /// UTC seconds of the last update
    pub timestamp: u32,
    #[serde(skip)]
    pub gnsstime_ms: u64,
    #[serde(skip)]
    pub prev_gnsstime_ms: u64,
    #[serde(skip)]
    pub proj_time_ms: u64,
    #[serde(skip)]
    pub prev_course: f32,

    #[serde(skip)]
    pub ns: [i8; 4],
    #[serde(skip)]
    pub ew: [i8; 4],
    /// Shared scale exponent of ns/ew and the encoded climb rate (0..3)
    #[serde(skip)]
    pub smult: u8,

    /// Signal strength of the last reception, dBm
    pub rssi: i8,

    // derived by the alarm sweep, relative to the own aircraft
    /// Ground distance, meters
    pub distance: f32,
    /// Compass bearing from the own aircraft, degrees
    pub bearing: f32,
    /// Altitude difference (target minus own), meters
    pub alt_diff: f32,
    /// Altitude difference adjusted for convergence, meters
    #[serde(skip)]
    pub adj_alt_diff: f32,
    /// Distance plus slope-weighted vertical offset, meters
    #[serde(skip)]
    pub adj_distance: f32,
    pub alarm_level: AlarmLevel,
    /// Hysteresis floor: tier the next sound must reach, 0..=5
    #[serde(skip)]
    pub alert_level: u8,
}

impl Default for Track {
    fn default() -> Self {
        Track {
            address: Address(0),
            addr_type: AddressType::Random,
            protocol: Protocol::Legacy,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            geoid_separation: 0.0,
            course: 0.0,
            speed: 0.0,
            vertical_speed: 0.0,
            turn_rate: 0.0,
            aircraft_type: AircraftType::Unknown,
            airborne: false,
            stealth: false,
            no_track: false,
            timestamp: 0,
            gnsstime_ms: 0,
            prev_gnsstime_ms: 0,
            proj_time_ms: 0,
            prev_course: 0.0,
            ns: [0; 4],
            ew: [0; 4],
            smult: 0,
            rssi: 0,
            distance: 0.0,
            bearing: 0.0,
            alt_diff: 0.0,
            adj_alt_diff: 0.0,
            adj_distance: 0.0,
            alarm_level: AlarmLevel::None,
            alert_level: 0,
        }
    }
}

impl Track {
    /// Seconds since the last update
    pub fn age(&self, now: u32) -> u32 {
        now.saturating_sub(self.timestamp)
    }

    /// North velocity sample in m/s, scale applied
    pub fn ns_mps(&self, i: usize) -> f32 {
        ((self.ns[i] as i32) << self.smult) as f32 / 4.0
    }

    /// East velocity sample in m/s, scale applied
    pub fn ew_mps(&self, i: usize) -> f32 {
        ((self.ew[i] as i32) << self.smult) as f32 / 4.0
    }

    /// North component of the ground speed, knots
    pub fn vn_kt(&self) -> f32 {
        self.speed * geom::cos_deg(self.course)
    }

    /// East component of the ground speed, knots
    pub fn ve_kt(&self) -> f32 {
        self.speed * geom::sin_deg(self.course)
    }

    /// Vertical speed in m/s
    pub fn vs_mps(&self) -> f32 {
        self.vertical_speed / geom::FPM_PER_MPS
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " Address:       {} ({:?})", self.address, self.addr_type)?;
        writeln!(f, "  Type:         {:?}", self.aircraft_type)?;
        writeln!(
            f,
            "  Position:     {:.5} {:.5} at {:.0} m",
            self.latitude, self.longitude, self.altitude
        )?;
        writeln!(
            f,
            "  Velocity:     {:.0}° {:.1} kt {:+.0} fpm",
            self.course, self.speed, self.vertical_speed
        )?;
        if self.stealth || self.no_track {
            writeln!(
                f,
                "  Privacy:      stealth={} no_track={}",
                self.stealth, self.no_track
            )?;
        }
        if self.alarm_level > AlarmLevel::None {
            writeln!(
                f,
                "  Alarm:        {:?} at {:.0} m bearing {:.0}°",
                self.alarm_level, self.distance, self.bearing
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_samples_scale() {
        let track = Track {
            ns: [100, 50, -100, 0],
            ew: [0, -50, 4, 8],
            smult: 1,
            ..Track::default()
        };
        assert_eq!(track.ns_mps(0), 50.0);
        assert_eq!(track.ns_mps(2), -50.0);
        assert_eq!(track.ew_mps(1), -25.0);
        assert_eq!(track.ew_mps(3), 4.0);
    }

    #[test]
    fn speed_components() {
        let track = Track {
            course: 90.0,
            speed: 80.0,
            ..Track::default()
        };
        assert!((track.ve_kt() - 80.0).abs() < 0.1);
        assert!(track.vn_kt().abs() < 0.1);
    }

    #[test]
    fn age_saturates() {
        let track = Track {
            timestamp: 1000,
            ..Track::default()
        };
        assert_eq!(track.age(1030), 30);
        assert_eq!(track.age(990), 0);
    }
}
