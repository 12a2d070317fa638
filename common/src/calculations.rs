//! Common slot/time calculations for Cardano networks
//!
//! Slots are a uniform linear clock defined per network by
//! `(zero_time, zero_slot, slot_length)`. All arithmetic is integer; no
//! DST or timezone corrections apply.

use crate::types::Network;
use chrono::{DateTime, TimeZone, Utc};

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;
const MS_PER_MONTH: u64 = 30 * MS_PER_DAY;

/// A fixed span of wall-clock time used to window slot ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePeriod {
    Day,
    Week,
    Month,
}

impl TimePeriod {
    pub fn as_millis(&self) -> u64 {
        match self {
            TimePeriod::Day => MS_PER_DAY,
            TimePeriod::Week => MS_PER_WEEK,
            TimePeriod::Month => MS_PER_MONTH,
        }
    }
}

/// Per-network slot clock parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SlotClock {
    /// Wall-clock time of `zero_slot`, milliseconds since epoch
    pub zero_time: u64,
    /// First slot of the linear era
    pub zero_slot: u64,
    /// Milliseconds per slot
    pub slot_length: u64,
}

impl SlotClock {
    /// Cardano mainnet from the Shelley era onwards
    pub fn mainnet() -> Self {
        Self {
            zero_time: 1_596_059_091_000,
            zero_slot: 4_492_800,
            slot_length: 1_000,
        }
    }

    /// The Preview test network
    pub fn preview() -> Self {
        Self {
            zero_time: 1_666_656_000_000,
            zero_slot: 0,
            slot_length: 1_000,
        }
    }

    pub fn from_network(network: &Network) -> Self {
        Self {
            zero_time: network.zero_time,
            zero_slot: network.zero_slot,
            slot_length: network.slot_length,
        }
    }

    /// Wall-clock time of a slot, in milliseconds since epoch
    pub fn slot_to_millis(&self, slot: u64) -> u64 {
        self.zero_time + (slot - self.zero_slot) * self.slot_length
    }

    pub fn slot_to_date(&self, slot: u64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.slot_to_millis(slot) as i64)
            .single()
            .unwrap_or_default()
    }

    /// Slot containing a wall-clock time, floor-divided
    pub fn millis_to_slot(&self, millis: u64) -> u64 {
        (millis - self.zero_time) / self.slot_length + self.zero_slot
    }

    pub fn date_to_slot(&self, date: DateTime<Utc>) -> u64 {
        self.millis_to_slot(date.timestamp_millis() as u64)
    }

    /// The slot one `period` of wall-clock time after `slot`
    pub fn slot_after_time_period(&self, slot: u64, period: TimePeriod) -> u64 {
        slot + period.as_millis() / self.slot_length
    }
}
