use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hour offset from the configured epoch, the only boundary type stored.
pub type Hour = u16;

/// First offset of every lot's horizon.
pub const HORIZON_START: Hour = 0;
/// Last offset of every lot's horizon (exclusive end of a fully free lot).
pub const HORIZON_END: Hour = Hour::MAX;

/// Half-open interval `[start, end)` over horizon offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Hour,
    pub end: Hour,
}

impl Span {
    /// The whole horizon, as written by lot registration.
    pub const FULL: Span = Span {
        start: HORIZON_START,
        end: HORIZON_END,
    };

    pub fn new(start: Hour, end: Hour) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans built from caller input.
    pub fn try_new(start: Hour, end: Hour) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn hours(&self) -> u32 {
        u32::from(self.end - self.start)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Codes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("invalid node code {0:?}: expected two lowercase ascii letters or digits")]
    Node(String),
    #[error("invalid region code {0:?}: expected two ascii letters")]
    Region(String),
}

/// Shard key. Each node owns exactly one timeslot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 2]);

impl NodeId {
    pub fn as_str(&self) -> &str {
        // Constructed only from validated ascii bytes.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for NodeId {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            &[a, b]
                if [a, b]
                    .iter()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
            {
                Ok(Self([a, b]))
            }
            _ => Err(CodeError::Node(s.to_string())),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Two-letter region code, the mandatory top of the classification key.
/// Not checked against any master list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCode([u8; 2]);

impl RegionCode {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for RegionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            &[a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => Ok(Self([a, b])),
            _ => Err(CodeError::Region(s.to_string())),
        }
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegionCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ── Keys ─────────────────────────────────────────────────────────

/// Hierarchical classification a lot is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClassKey {
    pub region: RegionCode,
    pub area: u32,
    pub locality: u32,
    pub sublocality: u32,
}

impl ClassKey {
    pub fn new(region: RegionCode, area: u32, locality: u32, sublocality: u32) -> Self {
        Self {
            region,
            area,
            locality,
            sublocality,
        }
    }
}

/// A bookable unit within a housing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LotRef {
    pub housing_id: u64,
    pub lot_id: u64,
}

impl LotRef {
    pub fn new(housing_id: u64, lot_id: u64) -> Self {
        Self { housing_id, lot_id }
    }
}

impl fmt::Display for LotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.housing_id, self.lot_id)
    }
}

// ── Requests ─────────────────────────────────────────────────────

/// A window on one lot: the unit of RegisterLot, Book and Cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub node: NodeId,
    pub key: ClassKey,
    pub lot: LotRef,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

/// Availability search. `None` filters are omitted; `Some(0)` matches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub node: NodeId,
    pub region: RegionCode,
    pub area: Option<u32>,
    pub locality: Option<u32>,
    pub sublocality: Option<u32>,
    pub housing_id: Option<u64>,
    pub lot_id: Option<u64>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub offset: u64,
    /// Page size. `None` or `Some(0)` means 100; larger values are capped
    /// at 1000.
    pub limit: Option<u64>,
}

impl Query {
    pub fn new(node: NodeId, region: RegionCode, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            node,
            region,
            area: None,
            locality: None,
            sublocality: None,
            housing_id: None,
            lot_id: None,
            from,
            to,
            offset: 0,
            limit: None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A stored free interval, as returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeSlot {
    pub node: NodeId,
    pub key: ClassKey,
    pub lot: LotRef,
    pub span: Span,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}
