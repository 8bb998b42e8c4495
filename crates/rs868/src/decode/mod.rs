pub mod legacy;
pub mod parity;
pub mod xxtea;

use deku::prelude::*;
use serde::ser::{Serialize, Serializer};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/**
 * Wire-level vocabulary shared by the Legacy codec and the tracking table.
 *
 * The only entry point most applications need is
 * [`legacy::decode`] / [`legacy::encode`]; the types below appear in the
 * records they produce and consume.
 */

/// 24-bit device address, transmitted in the clear at the start of every
/// Legacy frame (little-endian byte order on the wire)
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Default)]
#[derive(DekuRead, DekuWrite)]
pub struct Address(#[deku(endian = "little", bits = "24")] pub u32);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)?;
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)?;
        Ok(())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let addr = format!("{:06x}", &self.0);
        serializer.serialize_str(&addr)
    }
}

impl core::str::FromStr for Address {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let num = u32::from_str_radix(s, 16)?;
        Ok(Self(num))
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hexa = String::deserialize(deserializer)?;
        hexa.parse().map_err(serde::de::Error::custom)
    }
}

/// Origin of a device address (3-bit field in the frame header)
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[derive(serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// Re-randomized at every power cycle
    #[default]
    Random = 0,
    /// Official ICAO airframe address
    Icao = 1,
    /// FLARM-assigned device address
    Flarm = 2,
    /// Anonymous address derived from the device serial
    Anonymous = 3,
    /// OGN tracker address
    Ogn = 4,
}

impl AddressType {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => Self::Icao,
            2 => Self::Flarm,
            3 => Self::Anonymous,
            4 => Self::Ogn,
            _ => Self::Random,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Radio encoding a record was produced by
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[derive(serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Legacy = 0,
    OgnTp = 1,
    P3i = 2,
    Fanet = 3,
    Uat = 4,
}

/// Aircraft category, 4 bits in the frame
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[derive(serde::Serialize, Deserialize, DekuRead)]
#[deku(type = "u8", bits = "4", endian = "big")]
pub enum AircraftType {
    #[default]
    Unknown = 0,
    Glider,
    Towplane,
    Helicopter,
    Parachute,
    DropPlane,
    Hangglider,
    Paraglider,
    Aircraft,
    Jet,
    UFO,
    Balloon,
    Airship,
    UAV,
    Reserved,
    StaticObstacle,
}

impl AircraftType {
    pub fn from_wire(value: u8) -> Self {
        match value & 0xf {
            1 => Self::Glider,
            2 => Self::Towplane,
            3 => Self::Helicopter,
            4 => Self::Parachute,
            5 => Self::DropPlane,
            6 => Self::Hangglider,
            7 => Self::Paraglider,
            8 => Self::Aircraft,
            9 => Self::Jet,
            10 => Self::UFO,
            11 => Self::Balloon,
            12 => Self::Airship,
            13 => Self::UAV,
            14 => Self::Reserved,
            15 => Self::StaticObstacle,
            _ => Self::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Decoding context: where and when the frame was received.
///
/// The wire format only carries the low bits of the position; the reference
/// resolves the 9.3 km folding ambiguity. The timestamp enters the cipher
/// key and must be the UTC second the frame was transmitted in.
#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub latitude: f64,
    pub longitude: f64,
    /// Geoid separation at the reference, meters
    pub geoid_separation: f32,
    /// UTC seconds
    pub timestamp: u32,
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    /// XOR byte parity over the decrypted frame is not zero: corrupted
    /// frame, or a frame keyed on a different UTC second
    #[error("bad parity")]
    Parity,

    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("container: {0}")]
    Container(#[from] DekuError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let bytes = [0x7b, 0xf2, 0x38];
        let (_, addr) = Address::from_bytes((&bytes, 0)).unwrap();
        assert_eq!(addr, Address(0x38f27b));
        assert_eq!(format!("{addr}"), "38f27b");
        let back = addr.to_bytes().unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn wire_enums() {
        assert_eq!(AddressType::from_wire(1), AddressType::Icao);
        assert_eq!(AddressType::from_wire(7), AddressType::Random);
        assert_eq!(AircraftType::from_wire(1), AircraftType::Glider);
        assert_eq!(AircraftType::from_wire(9), AircraftType::Jet);
        assert_eq!(AircraftType::Glider.to_wire(), 1);
    }
}
