use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alarm::AlarmAlgorithm;
use crate::decode::{Address, AddressType, AircraftType, Protocol};

/**
 * Persistent device configuration.
 *
 * A snapshot of this struct is owned by the engine for its whole life:
 * changing a setting (over the `$PSRF?` input sentences) persists the new
 * snapshot through the [`SettingsStore`] collaborator and flags a reboot,
 * it never reconfigures a running engine.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Operating mode (0 = normal)
    pub mode: u8,
    pub address: Address,
    pub addr_type: AddressType,
    pub protocol: Protocol,
    /// Regulatory band profile (0 = EU 868 MHz)
    pub band: u8,
    pub aircraft_type: AircraftType,
    pub alarm: AlarmAlgorithm,
    pub tx_power: u8,
    pub volume: u8,
    /// UI pointer orientation (track-up / north-up)
    pub pointer: u8,

    /// Forward GNSS sentences to the NMEA output
    pub nmea_gnss: bool,
    /// Emit `$PSRF*` private sentences
    pub nmea_private: bool,
    /// Emit `$PFLA*` traffic sentences
    pub nmea_legacy: bool,
    /// Emit `$PGRMZ` and other sensor sentences
    pub nmea_sensors: bool,
    /// Dump raw received frames as `$PSRFI`
    pub nmea_debug_raw: bool,
    /// Dump decoded tracks as `$PSRFL`
    pub nmea_debug_decoded: bool,

    pub gdl90: bool,
    pub d1090: bool,
    pub stealth: bool,
    pub no_track: bool,
    pub power_save: bool,

    /// Never track this address (0 = unset)
    pub ignore_id: Address,
    /// Always report this address (0 = unset)
    pub follow_id: Address,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mode: 0,
            address: Address(0),
            addr_type: AddressType::Flarm,
            protocol: Protocol::Legacy,
            band: 0,
            aircraft_type: AircraftType::Glider,
            alarm: AlarmAlgorithm::Distance,
            tx_power: 1,
            volume: 2,
            pointer: 0,
            nmea_gnss: true,
            nmea_private: true,
            nmea_legacy: true,
            nmea_sensors: true,
            nmea_debug_raw: false,
            nmea_debug_decoded: false,
            gdl90: false,
            d1090: false,
            stealth: false,
            no_track: false,
            power_save: false,
            ignore_id: Address(0),
            follow_id: Address(0),
        }
    }
}

#[derive(Error, Debug)]
#[error("settings store failed: {0}")]
pub struct StoreError(pub String);

/// Persistence collaborator (EEPROM, flash file, ...)
pub trait SettingsStore {
    fn store(&mut self, settings: &Settings) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let mut settings = Settings {
            address: Address(0xdd1234),
            stealth: true,
            alarm: AlarmAlgorithm::Vector,
            ..Settings::default()
        };
        settings.follow_id = Address(0xabcdef);
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let back: Settings =
            serde_json::from_str(r#"{"stealth": true}"#).unwrap();
        assert!(back.stealth);
        assert_eq!(back.alarm, AlarmAlgorithm::Distance);
        assert_eq!(back.address, Address(0));
    }
}
