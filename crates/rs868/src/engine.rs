use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::alarm::{AlarmAlgorithm, AlarmLevel};
use crate::decode::{
    legacy, xxtea, Address, AddressType, DecodeError, Reference,
};
use crate::geom::FlatEarth;
use crate::nmea::{self, config::ConfigError, ExportStatus, NmeaSink};
use crate::ownship::{
    self, AirborneEstimator, ClimbEstimator, GnssFix,
};
use crate::settings::{Settings, SettingsStore};
use crate::track::Track;
use crate::traffic::{Insert, TrafficTable};

/**
 * ## The engine
 *
 * One owning value ties the core together: the own track, the tracking
 * table, the settings snapshot and all the counters and deadlines of the
 * cooperative loop. The host calls [`Engine::tick`] every ~100 ms with
 * its collaborators; one tick runs, in order: barometer and GNSS intake,
 * turn/climb/airborne estimation, the slot-gated transmission, the
 * receive pipeline, the 2-second traffic sweep with its single
 * aggregated sound decision, and the NMEA export.
 *
 * Everything recoverable stays recoverable: every error kind of the
 * receive path ends as a log line (and optionally a `$PSRFE` notice),
 * never as an aborted loop.
 */

/// Sweep period of the tracking table
pub const SWEEP_INTERVAL_MS: u64 = 2_000;

/// Cadence of wind estimator polls
pub const WIND_INTERVAL_MS: u64 = 666;

/// Floor of the randomized transmission interval (ceiling is +400 ms)
pub const TX_INTERVAL_MS: u64 = 800;

/// A fix older than this suspends transmission and decoding
pub const FIX_TIMEOUT_MS: u64 = 3_000;

/// Diagnostics word broadcast in the gps field, as reported by deployed
/// units
const GPS_STATUS: u16 = 0x356;

// seed of the multiplicative mixer when used as a plain scrambler
const SCRAMBLE_SEED: u32 = 0x2545f491;

/// Recoverable error kinds of the receive and transmit pipelines
#[derive(Error, Debug, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Address filtered by `ignore_id`
    #[error("address filtered")]
    Ignored,
    /// Our own address heard from another transmitter
    #[error("own address received")]
    OwnAddress,
    /// Raw payload equals our last transmission
    #[error("own transmission echoed")]
    TxLoopback,
    /// No insertion policy admitted the target
    #[error("table full")]
    TableFull,
    /// No (recent enough) GNSS fix
    #[error("no fix")]
    NoFix,
    #[error("radio: {0}")]
    RadioFault(String),
}

/// One received frame with its signal strength
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub bytes: [u8; legacy::FRAME_LEN],
    pub rssi: i8,
}

pub trait Gnss {
    fn fix(&mut self) -> Option<GnssFix>;
}

pub trait Radio {
    /// Whether the PPS-synchronised schedule currently allows transmitting
    fn slot_open(&mut self) -> bool;
    fn transmit(
        &mut self,
        frame: &[u8; legacy::FRAME_LEN],
    ) -> Result<(), EngineError>;
    fn receive(&mut self) -> Option<ReceivedFrame>;
}

pub trait Baro {
    /// Pressure-derived climb rate, ft/min
    fn vertical_speed(&mut self) -> Option<f32>;
}

pub trait WindEstimator {
    /// Best current wind estimate, (north, east) knots
    fn best(&mut self) -> (f32, f32);
}

pub trait SoundSink {
    fn notify(&mut self, level: AlarmLevel);
}

pub trait Clock {
    /// Monotonic milliseconds
    fn millis(&self) -> u64;
    /// UTC seconds
    fn now(&self) -> u32;
}

/// The collaborators one tick runs against
pub struct Peripherals<'a> {
    pub gnss: &'a mut dyn Gnss,
    pub radio: &'a mut dyn Radio,
    pub baro: &'a mut dyn Baro,
    pub wind: &'a mut dyn WindEstimator,
    pub sound: &'a mut dyn SoundSink,
    pub nmea: &'a mut dyn NmeaSink,
    pub clock: &'a dyn Clock,
}

pub struct Engine {
    pub own: Track,
    pub table: TrafficTable,
    pub settings: Settings,
    exporter: nmea::Exporter,
    fe: FlatEarth,
    airborne: AirborneEstimator,
    climb: ClimbEstimator,
    last_tx: Option<[u8; legacy::FRAME_LEN]>,
    rx_count: u32,
    tx_count: u32,
    next_sweep_ms: u64,
    next_tx_ms: u64,
    fix_valid: bool,
    last_fix_ms: u64,
    wind: (f32, f32),
    last_wind_ms: u64,
    reboot_pending: bool,
    battery_cv: u16,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        if settings.alarm == AlarmAlgorithm::Legacy {
            warn!("legacy alarm selected: reserved, never alarms");
        }
        let own = Track {
            address: settings.address,
            addr_type: settings.addr_type,
            aircraft_type: settings.aircraft_type,
            stealth: settings.stealth,
            no_track: settings.no_track,
            ..Track::default()
        };
        Engine {
            own,
            table: TrafficTable::new(),
            settings,
            exporter: nmea::Exporter::new(),
            fe: FlatEarth::new(0.0),
            airborne: AirborneEstimator::default(),
            climb: ClimbEstimator::default(),
            last_tx: None,
            rx_count: 0,
            tx_count: 0,
            next_sweep_ms: 0,
            next_tx_ms: 0,
            fix_valid: false,
            last_fix_ms: 0,
            wind: (0.0, 0.0),
            last_wind_ms: 0,
            reboot_pending: false,
            battery_cv: 370,
        }
    }

    /// Latest wind estimate handed over by the collaborator
    pub fn wind(&self) -> (f32, f32) {
        self.wind
    }

    /// A configuration sentence asked for a restart
    pub fn reboot_pending(&self) -> bool {
        self.reboot_pending
    }

    /// One pass of the cooperative loop
    pub fn tick(&mut self, io: &mut Peripherals) {
        let millis = io.clock.millis();
        let now = io.clock.now();

        let baro_vs = io.baro.vertical_speed();

        if let Some(fix) = io.gnss.fix() {
            self.fix_valid = true;
            self.last_fix_ms = millis;
            ownship::update_from_fix(&mut self.own, &fix);
            self.fe = FlatEarth::new(fix.latitude);
            if let Some(vs) = baro_vs {
                self.own.vertical_speed = vs;
            } else if let Some(vs) =
                self.climb.update(fix.altitude, fix.millis)
            {
                self.own.vertical_speed = vs;
            }
            self.own.airborne = self.airborne.update(&self.own, millis);
            if millis.saturating_sub(self.last_wind_ms)
                >= WIND_INTERVAL_MS
            {
                self.wind = io.wind.best();
                self.last_wind_ms = millis;
            }
            self.transmit(io.radio, millis);
        } else if millis.saturating_sub(self.last_fix_ms) > FIX_TIMEOUT_MS
        {
            self.fix_valid = false;
        }

        self.receive(io, now, millis);

        if millis >= self.next_sweep_ms {
            self.next_sweep_ms = millis + SWEEP_INTERVAL_MS;
            let loudest = self.table.sweep(
                &self.own,
                self.settings.alarm,
                &self.fe,
                now,
                millis,
            );
            if loudest > AlarmLevel::None {
                io.sound.notify(loudest);
            }
        }

        let status = ExportStatus {
            fix: self.fix_valid,
            tx_enabled: self.fix_valid,
            rx_total: self.rx_count,
            tx_total: self.tx_count,
            battery_cv: self.battery_cv,
            now_ms: millis,
        };
        self.exporter.export(
            &self.own,
            &self.table,
            &self.settings,
            &status,
            io.nmea,
        );
    }

    /// Transmit pipeline: rate gate, radio slot gate, project, encode.
    /// The cipher is keyed on the GNSS second of the own track, not on
    /// the local clock, so a frame sent at a slot boundary still
    /// encrypts with the second it reports.
    fn transmit(&mut self, radio: &mut dyn Radio, millis: u64) {
        if millis < self.next_tx_ms || !radio.slot_open() {
            return;
        }
        ownship::project(&mut self.own, millis);
        let timestamp = self.own.timestamp;
        let frame = match legacy::encode(&self.own, timestamp, GPS_STATUS)
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!("encode failed: {e}");
                return;
            }
        };
        match radio.transmit(&frame) {
            Ok(()) => {
                self.last_tx = Some(frame);
                self.tx_count = self.tx_count.wrapping_add(1);
                let jitter = xxtea::obscure(millis as u32, SCRAMBLE_SEED)
                    as u64
                    % 401;
                self.next_tx_ms = millis + TX_INTERVAL_MS + jitter;
                trace!(tx = self.tx_count, "frame transmitted");
            }
            Err(e) => warn!("radio fault: {e}"),
        }
    }

    /// Receive pipeline: drain the radio, decode, filter, insert
    fn receive(&mut self, io: &mut Peripherals, now: u32, millis: u64) {
        while let Some(frame) = io.radio.receive() {
            self.rx_count = self.rx_count.wrapping_add(1);
            if self.settings.nmea_private && self.settings.nmea_debug_raw
            {
                self.exporter.debug_raw(
                    millis,
                    &frame.bytes,
                    frame.rssi,
                    io.nmea,
                );
            }
            match self.process_frame(&frame, now, millis, io.nmea) {
                Ok(outcome) => {
                    trace!(?outcome, "frame accepted");
                }
                Err(EngineError::Decode(DecodeError::Parity)) => {
                    debug!("frame dropped: bad parity");
                    if self.settings.nmea_private {
                        self.exporter
                            .error_notice("bad parity", io.nmea);
                    }
                }
                Err(e) => debug!("frame dropped: {e}"),
            }
        }
    }

    fn process_frame(
        &mut self,
        frame: &ReceivedFrame,
        now: u32,
        millis: u64,
        nmea: &mut dyn NmeaSink,
    ) -> Result<Insert, EngineError> {
        if !self.fix_valid {
            // without a fix there is no reference to unfold positions
            return Err(EngineError::NoFix);
        }
        if self.last_tx == Some(frame.bytes) {
            return Err(EngineError::TxLoopback);
        }

        // the address travels in the clear ahead of the payload
        let address = Address(u32::from_le_bytes([
            frame.bytes[0],
            frame.bytes[1],
            frame.bytes[2],
            0,
        ]));
        if self.settings.ignore_id.0 != 0
            && address == self.settings.ignore_id
        {
            return Err(EngineError::Ignored);
        }
        if address == self.own.address {
            self.anonymise(millis);
            return Err(EngineError::OwnAddress);
        }

        let reference = Reference {
            latitude: self.own.latitude,
            longitude: self.own.longitude,
            geoid_separation: self.own.geoid_separation,
            timestamp: now,
        };
        let mut track = legacy::decode(&frame.bytes, &reference)?;
        track.gnsstime_ms = millis;
        track.rssi = frame.rssi;
        crate::alarm::rescore(
            self.settings.alarm,
            &self.own,
            &mut track,
            &self.fe,
            millis,
        );
        track.alert_level = 0;

        if self.settings.nmea_private && self.settings.nmea_debug_decoded
        {
            self.exporter.debug_decoded(&track, nmea);
        }

        match self.table.insert(track, now) {
            Insert::Dropped => Err(EngineError::TableFull),
            outcome => Ok(outcome),
        }
    }

    /// Our address is on the air from someone else: pick a scrambled
    /// one and stop claiming a stable identity
    fn anonymise(&mut self, millis: u64) {
        let scrambled = xxtea::obscure(
            self.own.address.0 ^ millis as u32,
            SCRAMBLE_SEED,
        ) & 0x00ff_ffff;
        let address = Address(scrambled.max(1));
        info!(old = %self.own.address, new = %address, "going anonymous");
        self.own.address = address;
        self.own.addr_type = AddressType::Random;
        self.last_tx = None;
    }

    /**
     * Feed one line of the NMEA input stream (configuration sentences).
     *
     * On an accepted `$PSRF?` sentence the new snapshot is persisted and
     * the reboot flag raised; the caller restarts the device at its
     * convenience.
     */
    pub fn handle_nmea_input(
        &mut self,
        line: &str,
        store: &mut dyn SettingsStore,
    ) -> Result<bool, ConfigError> {
        match nmea::config::handle(line, &mut self.settings)? {
            true => {
                if let Err(e) = store.store(&self.settings) {
                    warn!("{e}");
                }
                self.reboot_pending = true;
                Ok(true)
            }
            false => Ok(false),
        }
    }
}
