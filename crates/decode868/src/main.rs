#![doc = include_str!("../readme.md")]

use std::collections::VecDeque;

use clap::Parser;
use rs868::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "decode868",
    version,
    author = "xoolive",
    about = "Decode FLARM Legacy demodulated raw frames"
)]
struct Options {
    /// Reference position "latitude,longitude" in degrees, within 9 km
    /// of the transmitter
    #[arg(short, long, default_value = "43.61924,5.11755")]
    reference: String,

    /// Geoid separation at the reference, meters
    #[arg(long, default_value_t = 0.0)]
    geoid: f32,

    /// UTC second the frames were captured in (keys the cipher)
    #[arg(short, long)]
    timestamp: u32,

    /// Activate debug output of frames (deactivate JSON)
    #[arg(long, default_value = "false")]
    debug: bool,

    /// Replay the frames through the traffic engine and print the NMEA
    /// stream seen from the reference position
    #[arg(long, default_value = "false")]
    nmea: bool,

    /// Individual frames to decode (24 bytes each, hex-encoded)
    msgs: Vec<String>,
}

fn parse_reference(value: &str) -> Result<(f64, f64), String> {
    let parts: Vec<&str> = value.split(',').map(|p| p.trim()).collect();
    if parts.len() != 2 {
        return Err("expected \"latitude,longitude\"".to_string());
    }
    let latitude: f64 = parts[0]
        .parse()
        .map_err(|e| format!("latitude parse error: {}", e))?;
    let longitude: f64 = parts[1]
        .parse()
        .map_err(|e| format!("longitude parse error: {}", e))?;
    Ok((latitude, longitude))
}

fn parse_frame(msg: &str) -> Result<[u8; FRAME_LEN], String> {
    let bytes = hex::decode(msg).map_err(|e| e.to_string())?;
    if bytes.len() < FRAME_LEN {
        return Err(format!("frame too short: {} bytes", bytes.len()));
    }
    Ok(bytes[..FRAME_LEN].try_into().unwrap())
}

struct StaticGnss(GnssFix);
impl Gnss for StaticGnss {
    fn fix(&mut self) -> Option<GnssFix> {
        Some(self.0)
    }
}

struct ReplayRadio(VecDeque<ReceivedFrame>);
impl Radio for ReplayRadio {
    fn slot_open(&mut self) -> bool {
        false // receive-only replay
    }
    fn transmit(
        &mut self,
        _frame: &[u8; FRAME_LEN],
    ) -> Result<(), EngineError> {
        Ok(())
    }
    fn receive(&mut self) -> Option<ReceivedFrame> {
        self.0.pop_front()
    }
}

struct NoBaro;
impl Baro for NoBaro {
    fn vertical_speed(&mut self) -> Option<f32> {
        None
    }
}

struct Calm;
impl WindEstimator for Calm {
    fn best(&mut self) -> (f32, f32) {
        (0.0, 0.0)
    }
}

struct Bell;
impl SoundSink for Bell {
    fn notify(&mut self, level: AlarmLevel) {
        eprintln!("sound alert: {:?}", level);
    }
}

struct Stdout;
impl NmeaSink for Stdout {
    fn send(&mut self, sentence: &str) {
        print!("{}", sentence);
    }
}

struct SimClock {
    millis: u64,
    seconds: u32,
}
impl Clock for SimClock {
    fn millis(&self) -> u64 {
        self.millis
    }
    fn now(&self) -> u32 {
        self.seconds
    }
}

/// Place an observer at the reference position and replay the frames
/// through a full engine: the NMEA stream goes to stdout
fn replay(options: &Options, reference: (f64, f64)) {
    let mut engine = Engine::new(Settings {
        address: Address(0xfffffe),
        ..Settings::default()
    });
    let mut gnss = StaticGnss(GnssFix {
        latitude: reference.0,
        longitude: reference.1,
        altitude: 300.0,
        geoid_separation: options.geoid,
        course: 0.0,
        speed: 0.0,
        utc_seconds: options.timestamp,
        millis: 1_000,
    });
    let queue = options
        .msgs
        .iter()
        .filter_map(|msg| match parse_frame(msg) {
            Ok(bytes) => Some(ReceivedFrame { bytes, rssi: 0 }),
            Err(e) => {
                eprintln!("skipping {msg}: {e}");
                None
            }
        })
        .collect();
    let mut radio = ReplayRadio(queue);
    let mut baro = NoBaro;
    let mut wind = Calm;
    let mut sound = Bell;
    let mut nmea = Stdout;
    let clock = SimClock {
        millis: 1_000,
        seconds: options.timestamp,
    };

    let mut io = Peripherals {
        gnss: &mut gnss,
        radio: &mut radio,
        baro: &mut baro,
        wind: &mut wind,
        sound: &mut sound,
        nmea: &mut nmea,
        clock: &clock,
    };
    engine.tick(&mut io);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    let reference = match parse_reference(&options.reference) {
        Ok(reference) => reference,
        Err(e) => {
            eprintln!("invalid reference: {e}");
            std::process::exit(2);
        }
    };

    if options.nmea {
        replay(&options, reference);
        return;
    }

    let reference = Reference {
        latitude: reference.0,
        longitude: reference.1,
        geoid_separation: options.geoid,
        timestamp: options.timestamp,
    };
    for msg in &options.msgs {
        let bytes = match parse_frame(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("skipping {msg}: {e}");
                continue;
            }
        };
        match decode(&bytes, &reference) {
            Ok(track) => {
                if options.debug {
                    println!("{}", track);
                } else {
                    println!(
                        "{}",
                        serde_json::to_string(&track)
                            .expect("failed to serialize")
                    );
                }
            }
            Err(e) => eprintln!("skipping {msg}: {e}"),
        }
    }
}
