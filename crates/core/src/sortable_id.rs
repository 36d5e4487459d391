//! Time-sortable event identifiers.
//!
//! A [`SortableUniqueId`] is a fixed-width, 30-digit decimal string:
//!
//! ```text
//! 0638412345678901234 01234567890
//! └──── 19 digits ──┘ └─ 11 ──┘
//!   ticks since        uniquefier
//!   0001-01-01 UTC     (uuid mod 10^11)
//! ```
//!
//! One tick is 100ns. Because both parts are zero-padded, ordinal string
//! comparison (the derived `Ord`) equals chronological order, with the
//! uniquefier acting as a deterministic tie-break for ids generated in the
//! same tick.
//!
//! The id is the universal ordering key: it orders the global log, acts as the
//! resume cursor for catch-up (a "watermark") and as the optimistic
//! concurrency token for appends.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

const TICKS_DIGITS: usize = 19;
const UNIQUEFIER_DIGITS: usize = 11;

/// Ticks between 0001-01-01T00:00:00Z and the unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;
const UNIQUEFIER_MODULUS: u128 = 100_000_000_000;
const MAX_UNIQUEFIER: u64 = 99_999_999_999;
const MAX_TICKS: u64 = 9_999_999_999_999_999_999;

/// Lexicographically sortable, time-ordered identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SortableUniqueId(String);

impl SortableUniqueId {
    /// Total length of the encoded id.
    pub const LENGTH: usize = TICKS_DIGITS + UNIQUEFIER_DIGITS;

    /// Encode `at` and `uniquefier` into an id.
    ///
    /// Deterministic: the same inputs always produce the same id. Ids generated
    /// from non-decreasing timestamps are non-decreasing.
    pub fn generate(at: DateTime<Utc>, uniquefier: Uuid) -> Self {
        let suffix = (uniquefier.as_u128() % UNIQUEFIER_MODULUS) as u64;
        Self::from_parts(ticks_of(at), suffix)
    }

    /// Like [`generate`](Self::generate), but never returns an id at or below `after`.
    ///
    /// Used when one command emits several events: a stalled or skewed clock must
    /// not break the strict order inside a partition.
    pub fn generate_next(at: DateTime<Utc>, uniquefier: Uuid, after: Option<&Self>) -> Self {
        let candidate = Self::generate(at, uniquefier);
        match after {
            Some(previous) if candidate <= *previous => {
                Self::from_parts(previous.ticks().saturating_add(1), candidate.uniquefier())
            }
            _ => candidate,
        }
    }

    /// The smallest possible id (all zeros). Sorts before every generated id.
    pub fn min_value() -> Self {
        Self("0".repeat(Self::LENGTH))
    }

    /// Boundary between the safe and unsafe regions at `now`.
    ///
    /// Carries the ticks of `now - window` and the largest uniquefier, so an
    /// event id is at or below the border iff `now - event_time >= window`
    /// (at tick granularity).
    pub fn safe_border(now: DateTime<Utc>, window: Duration) -> Self {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        let border = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::from_parts(ticks_of(border), MAX_UNIQUEFIER)
    }

    /// Parse a stored id, rejecting anything that is not exactly 30 ASCII digits.
    pub fn parse(value: &str) -> DomainResult<Self> {
        if value.len() != Self::LENGTH || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "SortableUniqueId: expected {} ascii digits, got '{value}'",
                Self::LENGTH
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tick count (100ns units since 0001-01-01 UTC).
    pub fn ticks(&self) -> u64 {
        self.0[..TICKS_DIGITS].parse().unwrap_or(0)
    }

    /// The tie-break suffix.
    pub fn uniquefier(&self) -> u64 {
        self.0[TICKS_DIGITS..].parse().unwrap_or(0)
    }

    /// Creation instant encoded in the id (100ns precision).
    pub fn timestamp(&self) -> DateTime<Utc> {
        let since_epoch = self.ticks() as i128 - UNIX_EPOCH_TICKS as i128;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND as i128);
        let sub_ticks = since_epoch.rem_euclid(TICKS_PER_SECOND as i128);
        i64::try_from(secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, sub_ticks as u32 * NANOS_PER_TICK))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_earlier_than(&self, other: &Self) -> bool {
        self < other
    }

    pub fn is_earlier_than_or_equal(&self, other: &Self) -> bool {
        self <= other
    }

    pub fn is_later_than(&self, other: &Self) -> bool {
        self > other
    }

    pub fn is_later_than_or_equal(&self, other: &Self) -> bool {
        self >= other
    }

    fn from_parts(ticks: u64, uniquefier: u64) -> Self {
        Self(format!(
            "{:0ticks_w$}{:0uniq_w$}",
            ticks.min(MAX_TICKS),
            uniquefier.min(MAX_UNIQUEFIER),
            ticks_w = TICKS_DIGITS,
            uniq_w = UNIQUEFIER_DIGITS,
        ))
    }
}

fn ticks_of(at: DateTime<Utc>) -> u64 {
    let ticks = at
        .timestamp()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(i64::from(at.timestamp_subsec_nanos() / NANOS_PER_TICK))
        .saturating_add(UNIX_EPOCH_TICKS);
    u64::try_from(ticks).unwrap_or(0)
}

impl core::fmt::Display for SortableUniqueId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SortableUniqueId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SortableUniqueId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SortableUniqueId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SortableUniqueId> for String {
    fn from(value: SortableUniqueId) -> Self {
        value.0
    }
}
