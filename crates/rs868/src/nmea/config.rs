/**
 * ## Configuration input
 *
 * Settings are changed over the serial stream with checksummed `$PSRF?`
 * sentences. Every field is read-modify-write: an empty field keeps the
 * current value, so a host can flip one switch without knowing the rest
 * of the configuration.
 *
 * - `$PSRFC,1,<mode>,<protocol>,<band>,<aircraft_type>,<alarm>,
 *   <tx_power>,<volume>,<pointer>,<nmea_gnss>,<nmea_private>,
 *   <nmea_legacy>,<nmea_sensors>,<gdl90>,<d1090>,<stealth>,<no_track>,
 *   <power_save>`: the main configuration block;
 * - `$PSRFD,1,<ignore_id>,<follow_id>,<debug_raw>,<debug_decoded>`:
 *   id filters and the receive debug dumps;
 * - `$PSRFS,1,<stealth>,<no_track>`: quick privacy switch.
 *
 * The caller persists the new snapshot and reboots; nothing here touches
 * a running engine.
 */
use thiserror::Error;
use tracing::debug;

use super::checksum;
use crate::alarm::AlarmAlgorithm;
use crate::decode::{Address, AircraftType};
use crate::settings::Settings;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("not a checksummed sentence")]
    BadFrame,
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("unsupported sentence {0}")]
    Unsupported(String),
    #[error("unsupported version {0}")]
    BadVersion(String),
    #[error("unparsable field {0}")]
    BadField(String),
}

/// Strip `$`…`*HH` framing and verify the checksum
fn unframe(line: &str) -> Result<&str, ConfigError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let body = line.strip_prefix('$').ok_or(ConfigError::BadFrame)?;
    let (body, sum) =
        body.rsplit_once('*').ok_or(ConfigError::BadFrame)?;
    let sum = u8::from_str_radix(sum, 16)
        .map_err(|_| ConfigError::BadFrame)?;
    if sum != checksum(body) {
        return Err(ConfigError::BadChecksum);
    }
    Ok(body)
}

fn set_u8(field: &str, target: &mut u8) -> Result<(), ConfigError> {
    if field.is_empty() {
        return Ok(());
    }
    *target = field
        .parse()
        .map_err(|_| ConfigError::BadField(field.to_string()))?;
    Ok(())
}

fn set_bool(field: &str, target: &mut bool) -> Result<(), ConfigError> {
    if field.is_empty() {
        return Ok(());
    }
    match field {
        "0" => *target = false,
        "1" => *target = true,
        _ => return Err(ConfigError::BadField(field.to_string())),
    }
    Ok(())
}

fn set_address(
    field: &str,
    target: &mut Address,
) -> Result<(), ConfigError> {
    if field.is_empty() {
        return Ok(());
    }
    *target = field
        .parse()
        .map_err(|_| ConfigError::BadField(field.to_string()))?;
    Ok(())
}

/**
 * Apply one configuration sentence to a settings snapshot.
 *
 * Returns `Ok(true)` when the sentence was one of ours (the caller then
 * persists and schedules the reboot), `Ok(false)` for foreign sentences
 * worth ignoring silently (plain GNSS traffic on the same port).
 */
pub fn handle(
    line: &str,
    settings: &mut Settings,
) -> Result<bool, ConfigError> {
    let body = unframe(line)?;
    let mut fields = body.split(',');
    let name = fields.next().unwrap_or_default();
    if !name.starts_with("PSRF") {
        return Ok(false);
    }
    let fields: Vec<&str> = fields.collect();
    let version = fields.first().copied().unwrap_or_default();
    if version != "1" {
        return Err(ConfigError::BadVersion(version.to_string()));
    }
    // pad so absent trailing fields read as "keep"
    let field = |i: usize| -> &str { fields.get(i).copied().unwrap_or("") };

    match name {
        "PSRFC" => {
            set_u8(field(1), &mut settings.mode)?;
            let mut protocol = settings.protocol as u8;
            set_u8(field(2), &mut protocol)?;
            settings.protocol = match protocol {
                1 => crate::decode::Protocol::OgnTp,
                2 => crate::decode::Protocol::P3i,
                3 => crate::decode::Protocol::Fanet,
                4 => crate::decode::Protocol::Uat,
                _ => crate::decode::Protocol::Legacy,
            };
            set_u8(field(3), &mut settings.band)?;
            let mut actype = settings.aircraft_type.to_wire();
            set_u8(field(4), &mut actype)?;
            settings.aircraft_type = AircraftType::from_wire(actype);
            let mut alarm = settings.alarm as u8;
            set_u8(field(5), &mut alarm)?;
            settings.alarm = match alarm {
                0 => AlarmAlgorithm::None,
                2 => AlarmAlgorithm::Vector,
                3 => AlarmAlgorithm::Legacy,
                _ => AlarmAlgorithm::Distance,
            };
            set_u8(field(6), &mut settings.tx_power)?;
            set_u8(field(7), &mut settings.volume)?;
            set_u8(field(8), &mut settings.pointer)?;
            set_bool(field(9), &mut settings.nmea_gnss)?;
            set_bool(field(10), &mut settings.nmea_private)?;
            set_bool(field(11), &mut settings.nmea_legacy)?;
            set_bool(field(12), &mut settings.nmea_sensors)?;
            set_bool(field(13), &mut settings.gdl90)?;
            set_bool(field(14), &mut settings.d1090)?;
            set_bool(field(15), &mut settings.stealth)?;
            set_bool(field(16), &mut settings.no_track)?;
            set_bool(field(17), &mut settings.power_save)?;
        }
        "PSRFD" => {
            set_address(field(1), &mut settings.ignore_id)?;
            set_address(field(2), &mut settings.follow_id)?;
            set_bool(field(3), &mut settings.nmea_debug_raw)?;
            set_bool(field(4), &mut settings.nmea_debug_decoded)?;
        }
        "PSRFS" => {
            set_bool(field(1), &mut settings.stealth)?;
            set_bool(field(2), &mut settings.no_track)?;
        }
        other => {
            return Err(ConfigError::Unsupported(other.to_string()));
        }
    }
    debug!(sentence = name, "configuration updated");
    Ok(true)
}
