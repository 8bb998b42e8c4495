use deku::prelude::*;

use super::{
    parity, xxtea, Address, AddressType, AircraftType, DecodeError,
    Protocol, Reference,
};
use crate::geom::{self, FPM_PER_MPS, KNOT_PER_MPS};
use crate::track::Track;

/**
 * ## The Legacy frame
 *
 * 24 bytes on the air: a cleartext header word carrying the device
 * address, followed by five 32-bit little-endian words encrypted with
 * [`xxtea`]. All bit fields are LSB-first within their word:
 *
 * ```text
 * word 0  addr:24 | _unk0:4 | addr_type:3 | _unk1:1      (cleartext)
 * word 1  vs:10 | _unk2:2 | airborne:1 | stealth:1 | no_track:1
 *         | parity:1 | gps:12 | type:4
 * word 2  lat:19 | alt:13
 * word 3  lon:20 | _unk3:10 | smult:2
 * word 4  ns[0..4]   four i8, earliest sample in the low byte
 * word 5  ew[0..4]
 * ```
 *
 * Latitude and longitude carry only their low bits: the encoder drops the
 * top of the 1e-7-degree fixed-point value, the decoder folds the received
 * bits against a reference position within ~9.3 km. Altitude is in meters
 * above the WGS84 ellipsoid. All velocities share the scale exponent
 * `smult`: quarter-m/s (ns/ew) and tenth-m/s (vs) values are stored
 * right-shifted by it.
 *
 * The XOR bit-parity of the 24 plaintext bytes is zero; the parity bit in
 * word 1 is set by the encoder to make it so.
 */
pub const FRAME_LEN: usize = 24;

/// Observed value of the `_unk2` bits on transmitting units
const UNK2_TX: u32 = 1;

/// Frame container before decryption (after, for the payload of an
/// outgoing frame)
#[derive(Debug, PartialEq, Clone, DekuRead, DekuWrite)]
pub struct RawFrame {
    pub address: Address,
    #[deku(bits = "1")]
    pub unk1: u8,
    #[deku(bits = "3")]
    pub addr_type: u8,
    #[deku(bits = "4")]
    pub unk0: u8,
    #[deku(endian = "little")]
    pub words: [u32; 5],
}

impl RawFrame {
    /// The 24 bytes of this frame as laid out on the air
    fn frame_bytes(&self) -> Result<[u8; FRAME_LEN], DecodeError> {
        let bytes = self.to_bytes()?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::Truncated(bytes.len()))
    }
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

fn word_to_i8(word: u32) -> [i8; 4] {
    [
        word as u8 as i8,
        (word >> 8) as u8 as i8,
        (word >> 16) as u8 as i8,
        (word >> 24) as u8 as i8,
    ]
}

fn i8_to_word(values: [i8; 4]) -> u32 {
    values
        .iter()
        .enumerate()
        .fold(0u32, |w, (i, &v)| w | ((v as u8 as u32) << (8 * i)))
}

// Drop the top bits of a 1e-7-degree coordinate, rounding the low 7 bits
// away with the sign restored afterwards.
fn fold_coordinate(value_e7: i32, mask: u32) -> u32 {
    let magnitude = (value_e7.abs() + 0x40) >> 7;
    let folded = if value_e7 < 0 { -magnitude } else { magnitude };
    (folded as u32) & mask
}

// The folded delta needs the nonnegative remainder (rem_euclid, not %)
// before recentering on the reference, or every target north of the
// receiver lands a full fold south.
fn unfold_latitude(encoded: u32, ref_latitude: f64) -> f64 {
    let reference = ((ref_latitude * 1e7) as i32) >> 7;
    let mut lat = (encoded as i32 - reference).rem_euclid(0x080000);
    if lat >= 0x040000 {
        lat -= 0x080000;
    }
    (((lat + reference) << 7) + 0x40) as f64 * 1e-7
}

fn unfold_longitude(encoded: u32, ref_longitude: f64) -> f64 {
    let reference = ((ref_longitude * 1e7) as i32) >> 7;
    let mut lon = (encoded as i32 - reference).rem_euclid(0x100000);
    if lon >= 0x080000 {
        lon -= 0x100000;
    }
    (((lon + reference) << 7) + 0x40) as f64 * 1e-7
}

/// Parse and decrypt a received frame; no integrity check yet
fn decrypt_frame(
    bytes: &[u8],
    timestamp: u32,
) -> Result<RawFrame, DecodeError> {
    if bytes.len() < FRAME_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    let (_, mut raw) = RawFrame::from_bytes((&bytes[..FRAME_LEN], 0))?;
    let key = xxtea::make_key(timestamp, raw.address.0);
    xxtea::decrypt(&mut raw.words, &key);
    Ok(raw)
}

/// Reconstruct course, speed and turn rate from the velocity spline.
///
/// The first two samples sit 3.5 s apart (−1.5 s and +2 s): their track
/// difference yields the turn rate, stepping the earliest track forward
/// by 1.5 s yields the present course.
fn velocity_solution(track: &Track) -> (f32, f32, f32) {
    let speed_mps = (0..4)
        .map(|i| libm::hypotf(track.ns_mps(i), track.ew_mps(i)))
        .sum::<f32>()
        / 4.0;
    if speed_mps < 0.05 {
        return (0.0, speed_mps * KNOT_PER_MPS, 0.0);
    }
    let track0 = geom::bearing_deg(track.ns_mps(0), track.ew_mps(0));
    let track1 = geom::bearing_deg(track.ns_mps(1), track.ew_mps(1));
    let turn_rate = geom::wrap_180(track1 - track0) / 3.5;
    let course = geom::wrap_360(track0 + 1.5 * turn_rate);
    (course, speed_mps * KNOT_PER_MPS, turn_rate)
}

fn unpack(raw: &RawFrame, reference: &Reference) -> Track {
    let [w1, w2, w3, w4, w5] = raw.words;
    let smult = ((w3 >> 30) & 0x3) as u8;

    let vs10 = sign_extend(w1 & 0x3ff, 10) << smult;

    let mut track = Track {
        address: raw.address,
        addr_type: AddressType::from_wire(raw.addr_type),
        protocol: Protocol::Legacy,
        latitude: unfold_latitude(w2 & 0x7ffff, reference.latitude),
        longitude: unfold_longitude(w3 & 0xfffff, reference.longitude),
        altitude: ((w2 >> 19) & 0x1fff) as f32
            - reference.geoid_separation,
        geoid_separation: reference.geoid_separation,
        vertical_speed: vs10 as f32 * (FPM_PER_MPS / 10.0),
        aircraft_type: AircraftType::from_wire(((w1 >> 28) & 0xf) as u8),
        airborne: (w1 >> 12) & 1 == 1,
        stealth: (w1 >> 13) & 1 == 1,
        no_track: (w1 >> 14) & 1 == 1,
        timestamp: reference.timestamp,
        ns: word_to_i8(w4),
        ew: word_to_i8(w5),
        smult,
        ..Track::default()
    };
    let (course, speed, turn_rate) = velocity_solution(&track);
    track.course = course;
    track.speed = speed;
    track.turn_rate = turn_rate;
    track
}

/**
 * Decode a received Legacy frame into a fresh [`Track`].
 *
 * The reference position resolves the coordinate folding and must be
 * within ~9 km of the transmitter; the reference timestamp keys the
 * cipher and must be the UTC second the frame was sent in. A frame
 * crossing a second boundary between transmission and decoding fails
 * parity; no retry with the previous second is attempted, matching
 * deployed receivers.
 *
 * Frames from ignored or own addresses decode normally; filtering them is
 * the receive pipeline's decision.
 */
pub fn decode(
    bytes: &[u8],
    reference: &Reference,
) -> Result<Track, DecodeError> {
    let raw = decrypt_frame(bytes, reference.timestamp)?;
    if parity::frame_parity(&raw.frame_bytes()?) != 0 {
        return Err(DecodeError::Parity);
    }
    Ok(unpack(&raw, reference))
}

/**
 * Encode the own track into a Legacy frame.
 *
 * The velocity spline (`ns`/`ew`/`smult`) must have been filled by
 * [`crate::ownship::project`] beforehand. `gps_status` lands in the
 * 12-bit diagnostics field.
 */
pub fn encode(
    own: &Track,
    timestamp: u32,
    gps_status: u16,
) -> Result<[u8; FRAME_LEN], DecodeError> {
    let vs10 = libm::roundf(own.vs_mps() * 10.0) as i32;
    let vs_scaled =
        ((vs10 >> own.smult).clamp(-512, 511) as u32) & 0x3ff;

    let mut w1 = vs_scaled
        | (UNK2_TX << 10)
        | ((own.airborne as u32) << 12)
        | ((own.stealth as u32) << 13)
        | ((own.no_track as u32) << 14)
        | (((gps_status as u32) & 0xfff) << 16)
        | ((own.aircraft_type.to_wire() as u32) << 28);

    let altitude = libm::roundf(own.altitude + own.geoid_separation)
        .clamp(0.0, 8191.0) as u32;
    let w2 = fold_coordinate((own.latitude * 1e7) as i32, 0x7ffff)
        | (altitude << 19);
    let w3 = fold_coordinate((own.longitude * 1e7) as i32, 0xfffff)
        | ((own.smult as u32) << 30);
    let w4 = i8_to_word(own.ns);
    let w5 = i8_to_word(own.ew);

    let mut raw = RawFrame {
        address: own.address,
        unk1: 0,
        addr_type: own.addr_type.to_wire(),
        unk0: 0,
        words: [w1, w2, w3, w4, w5],
    };
    if parity::frame_parity(&raw.frame_bytes()?) != 0 {
        w1 |= 1 << 15;
        raw.words[0] = w1;
    }

    let key = xxtea::make_key(timestamp, own.address.0);
    xxtea::encrypt(&mut raw.words, &key);
    raw.frame_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use hexlit::hex;

    fn reference() -> Reference {
        Reference {
            latitude: 48.0,
            longitude: 8.0,
            geoid_separation: 48.0,
            timestamp: 1_700_000_123,
        }
    }

    fn own_track() -> Track {
        let mut own = Track {
            address: Address(0xdd1234),
            addr_type: AddressType::Flarm,
            latitude: 48.02345,
            longitude: 7.98123,
            altitude: 1234.0,
            geoid_separation: 48.0,
            course: 123.0,
            speed: 80.0,
            vertical_speed: 2.0 * FPM_PER_MPS, // 2 m/s up
            turn_rate: 0.0,
            aircraft_type: AircraftType::Glider,
            airborne: true,
            ..Track::default()
        };
        crate::ownship::project(&mut own, 1000);
        own
    }

    /// Frame recorded off the air (same vector as upstream decoders use),
    /// transmitted near Aix-en-Provence in June 2022
    #[test]
    fn recorded_frame_decodes() {
        let msg =
            hex!("7bf23810860b7eabb23952252fd4927024b21fd94e9e1ef4");
        let raw = decrypt_frame(&msg, 1655274034).unwrap();
        assert_eq!(raw.address, Address(0x38f27b));
        assert_eq!(raw.addr_type, 1);

        let reference = Reference {
            latitude: 43.61924,
            longitude: 5.11755,
            geoid_separation: 0.0,
            timestamp: 1655274034,
        };
        let track = unpack(&raw, &reference);
        assert_eq!(track.addr_type, AddressType::Icao);
        assert_eq!(track.aircraft_type, AircraftType::Glider);
        assert_abs_diff_eq!(track.latitude, 43.61822, epsilon = 1e-4);
        assert_abs_diff_eq!(track.longitude, 5.117242, epsilon = 1e-4);
        assert_abs_diff_eq!(track.altitude, 160.0, epsilon = 0.5);
        // -1.1 m/s sink
        assert_abs_diff_eq!(
            track.vertical_speed,
            -1.1 * FPM_PER_MPS,
            epsilon = 1.0
        );
        // barely moving on the ground
        assert_abs_diff_eq!(
            track.speed,
            0.79 * KNOT_PER_MPS,
            epsilon = 0.05
        );
        assert!(!track.stealth);
        assert!(!track.no_track);
    }

    #[test]
    fn roundtrip_position() {
        let own = own_track();
        let frame = encode(&own, reference().timestamp, 0x356).unwrap();
        let track = decode(&frame, &reference()).unwrap();

        assert_eq!(track.address, own.address);
        assert_eq!(track.addr_type, AddressType::Flarm);
        assert_eq!(track.aircraft_type, AircraftType::Glider);
        assert!(track.airborne);

        // < 1.5 m in either axis
        assert_abs_diff_eq!(track.latitude, own.latitude, epsilon = 1.4e-5);
        assert_abs_diff_eq!(
            track.longitude,
            own.longitude,
            epsilon = 2.0e-5
        );
        assert_abs_diff_eq!(track.altitude, own.altitude, epsilon = 0.5);
    }

    #[test]
    fn roundtrip_velocity() {
        let mut own = own_track();
        own.turn_rate = 4.0;
        own.proj_time_ms = 0;
        crate::ownship::project(&mut own, 2000);

        let frame = encode(&own, reference().timestamp, 0).unwrap();
        let track = decode(&frame, &reference()).unwrap();

        assert_relative_eq!(track.speed, own.speed, max_relative = 0.02);
        assert_abs_diff_eq!(
            geom::wrap_180(track.course - own.course),
            0.0,
            epsilon = 2.0
        );
        assert_abs_diff_eq!(track.turn_rate, 4.0, epsilon = 1.0);
        assert_abs_diff_eq!(
            track.vertical_speed,
            own.vertical_speed,
            epsilon = 0.2 * FPM_PER_MPS
        );
    }

    #[test]
    fn southern_western_coordinates() {
        let reference = Reference {
            latitude: -34.55,
            longitude: -58.42,
            geoid_separation: 14.0,
            timestamp: 1_700_000_000,
        };
        let mut own = own_track();
        own.latitude = -34.5512;
        own.longitude = -58.4289;
        own.geoid_separation = 14.0;
        let frame = encode(&own, reference.timestamp, 0).unwrap();
        let track = decode(&frame, &reference).unwrap();
        assert_abs_diff_eq!(track.latitude, own.latitude, epsilon = 1.4e-5);
        assert_abs_diff_eq!(
            track.longitude,
            own.longitude,
            epsilon = 2.0e-5
        );
    }

    #[test]
    fn parity_is_even_on_every_encode() {
        let mut own = own_track();
        for (i, speed) in [0.0f32, 3.0, 42.0, 80.0, 140.0]
            .into_iter()
            .enumerate()
        {
            own.speed = speed;
            own.course = 71.0 * i as f32;
            own.proj_time_ms = 0;
            crate::ownship::project(&mut own, 1000 + i as u64);
            let frame = encode(&own, 1_700_000_000 + i as u32, 0).unwrap();
            let raw =
                decrypt_frame(&frame, 1_700_000_000 + i as u32).unwrap();
            assert_eq!(
                parity::frame_parity(&raw.frame_bytes().unwrap()),
                0
            );
        }
    }

    #[test]
    fn stealth_flags_roundtrip() {
        let mut own = own_track();
        own.stealth = true;
        own.no_track = true;
        let frame = encode(&own, reference().timestamp, 0).unwrap();
        let track = decode(&frame, &reference()).unwrap();
        assert!(track.stealth);
        assert!(track.no_track);
    }

    #[test]
    fn wrong_second_fails_parity_or_scrambles() {
        let own = own_track();
        let ts = reference().timestamp;
        let frame = encode(&own, ts, 0).unwrap();

        let mut parity_failures = 0;
        for offset in 1..=16u32 {
            let mut shifted = reference();
            shifted.timestamp = ts + 64 * offset;
            match decode(&frame, &shifted) {
                Err(DecodeError::Parity) => parity_failures += 1,
                Err(_) => {}
                Ok(track) => {
                    // a lucky parity pass still yields garbage fields
                    let far = (track.latitude - own.latitude).abs() > 2e-4
                        || (track.longitude - own.longitude).abs() > 2e-4
                        || (track.altitude - own.altitude).abs() > 10.0;
                    assert!(far, "wrong key decoded to plausible data");
                }
            }
        }
        assert!(parity_failures >= 2, "key does not rotate");
    }

    #[test]
    fn same_second_window_shares_the_key() {
        let own = own_track();
        let ts = 1_700_000_064; // start of a 64 s window
        let frame = encode(&own, ts, 0).unwrap();
        let mut shifted = reference();
        shifted.timestamp = ts + 63;
        let track = decode(&frame, &shifted).unwrap();
        assert_eq!(track.address, own.address);
        assert_abs_diff_eq!(track.latitude, own.latitude, epsilon = 1.4e-5);
    }

    #[test]
    fn truncated_frame_rejected() {
        assert_eq!(
            decode(&[0u8; 10], &reference()),
            Err(DecodeError::Truncated(10))
        );
    }

    #[test]
    fn flipped_header_bit_fails_parity() {
        let own = own_track();
        let mut frame = encode(&own, reference().timestamp, 0).unwrap();
        // header is cleartext: the flip reaches the parity sum directly
        frame[3] ^= 0x01;
        assert_eq!(
            decode(&frame, &reference()),
            Err(DecodeError::Parity)
        );
    }
}
