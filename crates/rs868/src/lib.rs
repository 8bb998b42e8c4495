#![doc = include_str!("../readme.md")]
pub mod alarm;
pub mod decode;
pub mod engine;
pub mod geom;
pub mod nmea;
pub mod ownship;
pub mod settings;
pub mod track;
pub mod traffic;

pub mod prelude {
    /// This re-export is necessary to decode frame containers
    pub use deku::prelude::*;

    pub use crate::alarm::{AlarmAlgorithm, AlarmLevel};
    /// The entry points to the Legacy codec
    pub use crate::decode::legacy::{decode, encode, FRAME_LEN};
    pub use crate::decode::{
        Address, AddressType, AircraftType, DecodeError, Protocol,
        Reference,
    };
    pub use crate::engine::{
        Baro, Clock, Engine, EngineError, Gnss, Peripherals, Radio,
        ReceivedFrame, SoundSink, WindEstimator,
    };
    pub use crate::nmea::NmeaSink;
    pub use crate::ownship::GnssFix;
    pub use crate::settings::{Settings, SettingsStore, StoreError};
    pub use crate::track::Track;
    pub use crate::traffic::{TrafficTable, ENTRY_EXPIRATION, MAX_TRACKS};
}
