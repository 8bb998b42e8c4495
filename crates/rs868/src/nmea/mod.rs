pub mod config;

use std::fmt::Write;

use crate::alarm::{
    AlarmLevel, ALARM_ZONE_NONE, STEALTH_DISTANCE, STEALTH_VERTICAL,
    VERTICAL_VISIBILITY_RANGE,
};
use crate::geom::{self, FEET_PER_METER};
use crate::settings::Settings;
use crate::track::Track;
use crate::traffic::TrafficTable;

/**
 * ## NMEA output
 *
 * Every export tick produces exactly one `$PFLAU` summary and up to
 * [`MAX_NMEA_OBJECTS`] `$PFLAA` sentences, most alarming first. Lower-rate
 * sentences ride along: `$PGRMZ` with the pressure altitude, a `$PSRFH`
 * heartbeat every ten summaries, and the `$PFLAE`/`$PFLAV` handshake
 * roughly every 73 seconds (the cadence deployed units answer version
 * queries with).
 *
 * A target makes the list when it alarms, sits inside the visibility
 * envelope ([`ALARM_ZONE_NONE`] horizontally, [`VERTICAL_VISIBILITY_RANGE`]
 * vertically), or is the followed device. Stealth on either side degrades
 * the report: outside [`STEALTH_DISTANCE`]/[`STEALTH_VERTICAL`] and below
 * alarm the target is dropped entirely, otherwise its altitude offset is
 * quantized to 256 m steps and course and speed are blanked.
 */
pub const MAX_NMEA_OBJECTS: usize = 12;

/// Milliseconds between `$PFLAE`/`$PFLAV` handshakes
pub const HANDSHAKE_INTERVAL_MS: u64 = 73_000;

/// `$PSRFH` heartbeat period, in PFLAU ticks
pub const HEARTBEAT_TICKS: u32 = 10;

/// Output sink for finished sentences (`$…*HH\r\n` included)
pub trait NmeaSink {
    fn send(&mut self, sentence: &str);
}

/// XOR checksum over the characters between `$` and `*`
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

// Append "*HH\r\n" to a sentence built after the leading '$'
fn finish(buf: &mut String) {
    let sum = checksum(&buf[1..]);
    let _ = write!(buf, "*{sum:02X}\r\n");
}

/// Engine-side status the exporter cannot read off the table
#[derive(Debug, Clone, Copy)]
pub struct ExportStatus {
    pub fix: bool,
    pub tx_enabled: bool,
    /// Rolling frame counters, for the heartbeat
    pub rx_total: u32,
    pub tx_total: u32,
    pub battery_cv: u16,
    pub now_ms: u64,
}

#[derive(Debug)]
pub struct Exporter {
    buf: String,
    pflau_ticks: u32,
    next_handshake_ms: u64,
}

impl Default for Exporter {
    fn default() -> Self {
        Exporter {
            buf: String::with_capacity(256),
            pflau_ticks: 0,
            next_handshake_ms: 0,
        }
    }
}

/// What a PFLAA line should say about a target after privacy rules
struct Report<'a> {
    track: &'a Track,
    alt_diff: f32,
    course: f32,
    speed: f32,
    climb_mps: f32,
}

fn stealth_report<'a>(
    track: &'a Track,
    own_stealth: bool,
) -> Option<Report<'a>> {
    if !(track.stealth || own_stealth) {
        return Some(Report {
            track,
            alt_diff: track.alt_diff,
            course: track.course,
            speed: track.speed,
            climb_mps: track.vs_mps(),
        });
    }
    if track.alarm_level <= AlarmLevel::Close
        && (track.distance > STEALTH_DISTANCE
            || track.alt_diff.abs() > STEALTH_VERTICAL)
    {
        return None;
    }
    // quantize the altitude offset, blank the velocity
    let fuzzed = (((track.alt_diff as i32) & !0xff) + 128) as f32;
    Some(Report {
        track,
        alt_diff: fuzzed,
        course: 0.0,
        speed: 0.0,
        climb_mps: 0.0,
    })
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One export tick: PFLAU (always), PFLAA per selected target (only
    /// with a fix), plus the lower-rate sentences
    pub fn export(
        &mut self,
        own: &Track,
        table: &TrafficTable,
        settings: &Settings,
        status: &ExportStatus,
        out: &mut dyn NmeaSink,
    ) {
        // selection: indices of reportable tracks, most alarming first,
        // follow_id outranking everything, closest first within a level
        let mut order: Vec<&Track> = table
            .iter()
            .filter(|t| {
                t.alarm_level > AlarmLevel::None
                    || (t.distance < ALARM_ZONE_NONE
                        && t.adj_alt_diff.abs() < VERTICAL_VISIBILITY_RANGE)
                    || (settings.follow_id.0 != 0
                        && t.address == settings.follow_id)
            })
            .collect();
        order.sort_by(|a, b| {
            let a_follow = a.address == settings.follow_id
                && settings.follow_id.0 != 0;
            let b_follow = b.address == settings.follow_id
                && settings.follow_id.0 != 0;
            b_follow
                .cmp(&a_follow)
                .then(b.alarm_level.cmp(&a.alarm_level))
                .then(a.adj_distance.total_cmp(&b.adj_distance))
        });

        let reports: Vec<Report> = order
            .iter()
            .filter_map(|t| stealth_report(t, settings.stealth))
            .collect();

        if settings.nmea_legacy {
            self.pflau(own, table, settings, status, reports.first(), out);
            if status.fix {
                // when the list overflows, the highest-priority target is
                // already in PFLAU and its PFLAA slot is saved
                let skip_hp = reports.len() >= MAX_NMEA_OBJECTS;
                for report in reports
                    .iter()
                    .skip(skip_hp as usize)
                    .take(MAX_NMEA_OBJECTS)
                {
                    self.pflaa(report, out);
                }
            }
        }

        if settings.nmea_sensors {
            self.pgrmz(own, status, out);
        }

        if settings.nmea_private {
            self.pflau_ticks += 1;
            if self.pflau_ticks >= HEARTBEAT_TICKS {
                self.pflau_ticks = 0;
                self.heartbeat(own, settings, status, out);
            }
            if status.now_ms >= self.next_handshake_ms {
                self.next_handshake_ms =
                    status.now_ms + HANDSHAKE_INTERVAL_MS;
                self.handshake(out);
            }
        }
    }

    fn pflau(
        &mut self,
        own: &Track,
        table: &TrafficTable,
        settings: &Settings,
        status: &ExportStatus,
        priority: Option<&Report>,
        out: &mut dyn NmeaSink,
    ) {
        self.buf.clear();
        let gps = if status.fix {
            if own.airborne {
                2
            } else {
                1
            }
        } else {
            0
        };
        let tx = status.tx_enabled as u8;
        let rx = table.len();
        let power = settings.tx_power;
        match priority {
            Some(report) if status.fix => {
                let rel_bearing =
                    geom::wrap_180(report.track.bearing - own.course);
                let alarm_type =
                    if report.track.alarm_level > AlarmLevel::None {
                        2
                    } else {
                        0
                    };
                let _ = write!(
                    self.buf,
                    "$PFLAU,{rx},{tx},{gps},{power},{},{rel_bearing:.0},{alarm_type},{:.0},{:.0},{}",
                    report.track.alarm_level.nmea_level(),
                    report.alt_diff,
                    report.track.distance,
                    report.track.address.to_string().to_uppercase(),
                );
            }
            _ => {
                let _ = write!(
                    self.buf,
                    "$PFLAU,{rx},{tx},{gps},{power},0,,0,,,"
                );
            }
        }
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    fn pflaa(&mut self, report: &Report, out: &mut dyn NmeaSink) {
        let track = report.track;
        let north = track.distance * geom::cos_deg(track.bearing);
        let east = track.distance * geom::sin_deg(track.bearing);
        self.buf.clear();
        let _ = write!(
            self.buf,
            "$PFLAA,{},{north:.0},{east:.0},{:.0},{},{},{:.0},,{:.0},{:.1},{:X}",
            track.alarm_level.nmea_level(),
            report.alt_diff,
            track.addr_type.to_wire(),
            track.address.to_string().to_uppercase(),
            report.course,
            report.speed,
            report.climb_mps,
            track.aircraft_type.to_wire(),
        );
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    fn pgrmz(
        &mut self,
        own: &Track,
        status: &ExportStatus,
        out: &mut dyn NmeaSink,
    ) {
        self.buf.clear();
        let alt_ft = own.altitude * FEET_PER_METER;
        let quality = if status.fix { 3 } else { 0 };
        let _ = write!(self.buf, "$PGRMZ,{alt_ft:.0},f,{quality}");
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    fn heartbeat(
        &mut self,
        own: &Track,
        settings: &Settings,
        status: &ExportStatus,
        out: &mut dyn NmeaSink,
    ) {
        self.buf.clear();
        let _ = write!(
            self.buf,
            "$PSRFH,{},{},{},{},{}",
            own.address.to_string().to_uppercase(),
            settings.protocol as u8,
            status.rx_total,
            status.tx_total,
            status.battery_cv,
        );
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    fn handshake(&mut self, out: &mut dyn NmeaSink) {
        self.buf.clear();
        self.buf.push_str("$PFLAE,A,0,0");
        finish(&mut self.buf);
        out.send(&self.buf);

        self.buf.clear();
        let _ = write!(
            self.buf,
            "$PFLAV,A,2.4,6.09,RS868-{}",
            env!("CARGO_PKG_VERSION")
        );
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    /// `$PSRFI`: raw frame dump for debugging receivers
    pub fn debug_raw(
        &mut self,
        now_ms: u64,
        bytes: &[u8],
        rssi: i8,
        out: &mut dyn NmeaSink,
    ) {
        self.buf.clear();
        let _ = write!(
            self.buf,
            "$PSRFI,{now_ms},{rssi},{}",
            hex::encode(bytes)
        );
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    /// `$PSRFL`: decoded track dump for debugging receivers
    pub fn debug_decoded(
        &mut self,
        track: &Track,
        out: &mut dyn NmeaSink,
    ) {
        self.buf.clear();
        let _ = write!(
            self.buf,
            "$PSRFL,{},{},{:.5},{:.5},{:.0},{:.0},{:.1},{}",
            track.address,
            track.addr_type.to_wire(),
            track.latitude,
            track.longitude,
            track.altitude,
            track.course,
            track.speed,
            track.rssi,
        );
        finish(&mut self.buf);
        out.send(&self.buf);
    }

    /// `$PSRFE`: recoverable error notice
    pub fn error_notice(&mut self, text: &str, out: &mut dyn NmeaSink) {
        self.buf.clear();
        let _ = write!(self.buf, "$PSRFE,{text}");
        finish(&mut self.buf);
        out.send(&self.buf);
    }
}
