/**
 * ## Tracking table
 *
 * A fixed array of [`MAX_TRACKS`] slots keyed by the 24-bit device
 * address. No slot ever outlives [`ENTRY_EXPIRATION`] seconds of radio
 * silence, and when the table is full an incoming target only displaces
 * the least relevant resident: an expired one first, then one with a
 * lower alarm level, then the most distant one (in slope-adjusted
 * distance) if the newcomer is no less alarming.
 *
 * Incoming tracks must arrive scored (alarm level and adjusted distance
 * filled in): the receive pipeline runs the alarm engine on them before
 * insertion so the replacement policy has something to compare.
 */
use tracing::{debug, trace};

use crate::alarm::{self, AlarmAlgorithm, AlarmLevel};
use crate::decode::Address;
use crate::geom::FlatEarth;
use crate::track::Track;

/// Slot count of the table. Sized above the NMEA object cap so a full
/// neighbourhood can exercise the export's bandwidth-saving rules.
pub const MAX_TRACKS: usize = 16;

/// Seconds of silence before a slot is reclaimed
pub const ENTRY_EXPIRATION: u32 = 30;

/// Where an insertion ended up
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Insert {
    /// Same address seen again: slot refreshed, history carried over
    Refreshed(usize),
    /// Fresh slot taken
    Filled(usize),
    /// A less relevant resident was displaced
    Replaced(usize),
    /// Table full of more relevant traffic
    Dropped,
}

#[derive(Debug, Default)]
pub struct TrafficTable {
    slots: [Option<Track>; MAX_TRACKS],
}

impl TrafficTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.slots.iter_mut().flatten()
    }

    pub fn get(&self, address: Address) -> Option<&Track> {
        self.iter().find(|t| t.address == address)
    }

    fn index_of(&self, address: Address) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.address == address))
    }

    /// Reclaim every slot silent for longer than [`ENTRY_EXPIRATION`]
    pub fn expire(&mut self, now: u32) {
        for slot in self.slots.iter_mut() {
            if let Some(track) = slot {
                if track.age(now) > ENTRY_EXPIRATION {
                    debug!(address = %track.address, "track expired");
                    *slot = None;
                }
            }
        }
    }

    /**
     * Insert a scored track, displacing per the replacement policy.
     *
     * A refresh keeps the slot's alert hysteresis and advances its
     * course history so the turn-rate estimate survives the overwrite.
     */
    pub fn insert(&mut self, mut incoming: Track, now: u32) -> Insert {
        if let Some(i) = self.index_of(incoming.address) {
            let old = self.slots[i].as_ref().unwrap();
            incoming.alert_level = old.alert_level;
            incoming.prev_course = old.course;
            incoming.prev_gnsstime_ms = old.gnsstime_ms;
            self.slots[i] = Some(incoming);
            return Insert::Refreshed(i);
        }

        if let Some(i) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[i] = Some(incoming);
            return Insert::Filled(i);
        }

        if let Some(i) = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.age(now) > ENTRY_EXPIRATION))
        {
            self.slots[i] = Some(incoming);
            return Insert::Replaced(i);
        }

        if let Some(i) = self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|t| incoming.alarm_level > t.alarm_level)
        }) {
            trace!(address = %incoming.address, "displacing calmer track");
            self.slots[i] = Some(incoming);
            return Insert::Replaced(i);
        }

        // displace the most distant resident, but never for a target
        // that is both further away and less alarming
        let (i, furthest) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|t| (i, t)))
            .max_by(|(_, a), (_, b)| {
                a.adj_distance.total_cmp(&b.adj_distance)
            })
            .expect("full table has residents");
        if incoming.adj_distance < furthest.adj_distance
            && incoming.alarm_level >= furthest.alarm_level
        {
            trace!(address = %incoming.address, "displacing furthest track");
            self.slots[i] = Some(incoming);
            return Insert::Replaced(i);
        }

        Insert::Dropped
    }

    /**
     * The periodic traffic sweep: expire, rescore every resident against
     * the own aircraft, and pick the loudest alarm that hysteresis still
     * allows to sound. Returns that level ([`AlarmLevel::None`] when
     * nothing may sound) after raising the winner's alert floor.
     */
    pub fn sweep(
        &mut self,
        own: &Track,
        algorithm: AlarmAlgorithm,
        fe: &FlatEarth,
        now: u32,
        now_ms: u64,
    ) -> AlarmLevel {
        self.expire(now);

        let mut loudest = AlarmLevel::None;
        let mut winner: Option<usize> = None;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(track) = slot {
                alarm::rescore(algorithm, own, track, fe, now_ms);
                if alarm::wants_sound(track) && track.alarm_level > loudest
                {
                    loudest = track.alarm_level;
                    winner = Some(i);
                }
            }
        }
        if let Some(i) = winner {
            let track = self.slots[i].as_mut().unwrap();
            alarm::note_sound(track);
        }
        loudest
    }
}
