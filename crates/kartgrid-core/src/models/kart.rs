//! Kart records as held by the remote store.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millisecond instant. Only the ordering matters to the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// The instant immediately after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Store-assigned record id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kart number painted on the bodywork, `1..=99`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct KartNumber(u8);

impl KartNumber {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 99;

    /// Validate and wrap a kart number.
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::NumberOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for KartNumber {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KartNumber> for i64 {
    fn from(n: KartNumber) -> Self {
        n.0 as i64
    }
}

impl fmt::Display for KartNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observed pace of a kart, written with the crew's shorthand symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Performance {
    #[serde(rename = "++")]
    VeryGood,
    #[serde(rename = "+")]
    Good,
    #[serde(rename = "~")]
    Average,
    #[serde(rename = "-")]
    Poor,
    #[serde(rename = "--")]
    VeryPoor,
    #[serde(rename = "?")]
    Unknown,
}

impl Performance {
    pub const ALL: [Performance; 6] = [
        Performance::VeryGood,
        Performance::Good,
        Performance::Average,
        Performance::Poor,
        Performance::VeryPoor,
        Performance::Unknown,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Performance::VeryGood => "++",
            Performance::Good => "+",
            Performance::Average => "~",
            Performance::Poor => "-",
            Performance::VeryPoor => "--",
            Performance::Unknown => "?",
        }
    }

    /// `++` and `+` count towards an optimal lineup.
    pub fn is_good(self) -> bool {
        matches!(self, Performance::VeryGood | Performance::Good)
    }
}

impl FromStr for Performance {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Performance::ALL
            .into_iter()
            .find(|p| p.symbol() == s)
            .ok_or_else(|| ValidationError::UnknownPerformance(s.to_string()))
    }
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Authoritative kart record. Owned by the remote store; the engine clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KartRecord {
    pub id: RecordId,
    pub number: KartNumber,
    pub performance: Performance,
    pub column: usize,
    pub timestamp: Timestamp,
}

impl KartRecord {
    /// Decode a wire record found in `column`.
    ///
    /// Returns `None` for any missing or malformed field.
    pub fn from_wire(wire: &WireKartRecord, column: usize) -> Option<Self> {
        let id = wire.id.as_deref().filter(|id| !id.is_empty())?;
        let number = KartNumber::new(wire.number?).ok()?;
        let performance = wire.performance.as_deref()?.parse().ok()?;
        let timestamp = Timestamp(wire.timestamp?);
        Some(Self {
            id: RecordId::new(id),
            number,
            performance,
            column,
            timestamp,
        })
    }

    pub fn to_wire(&self) -> WireKartRecord {
        WireKartRecord {
            id: Some(self.id.0.clone()),
            number: Some(self.number.into()),
            performance: Some(self.performance.symbol().to_string()),
            timestamp: Some(self.timestamp.0),
        }
    }
}

/// Record as it arrives from the document store. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireKartRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub performance: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}
