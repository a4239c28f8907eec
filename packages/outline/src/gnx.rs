use crate::error::{OutlineError, OutlineResult};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique node identifier.
///
/// A gnx is assigned once when a node is created and never reused. It is the
/// only key used to match nodes across a write/read round trip, so it must
/// survive being embedded in a sentinel line: no `:` and no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Gnx(String);

impl Gnx {
    pub fn new(value: impl Into<String>) -> OutlineResult<Self> {
        let value = value.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(OutlineError::InvalidGnx(value))
        }
    }

    pub fn is_valid(value: &str) -> bool {
        !value.is_empty() && !value.chars().any(|c| c == ':' || c.is_whitespace())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gnx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Gnx {
    type Error = OutlineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Gnx::new(value)
    }
}

impl TryFrom<&str> for Gnx {
    type Error = OutlineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Gnx::new(value)
    }
}

impl From<Gnx> for String {
    fn from(gnx: Gnx) -> Self {
        gnx.0
    }
}

/// Sequential gnx generator: `<id>.<timestamp>.<n>`
#[derive(Debug, Clone)]
pub struct GnxGenerator {
    id: String,
    timestamp: String,
    count: u32,
}

impl GnxGenerator {
    /// Create a generator stamped with the current local time
    pub fn new(id: &str) -> Self {
        Self::with_timestamp(id, &Local::now().format("%Y%m%d%H%M%S").to_string())
    }

    /// Create a generator with a fixed timestamp (deterministic ids in tests)
    pub fn with_timestamp(id: &str, timestamp: &str) -> Self {
        let id: String = id
            .chars()
            .filter(|c| *c != ':' && !c.is_whitespace())
            .collect();
        Self {
            id: if id.is_empty() { "anon".to_string() } else { id },
            timestamp: timestamp.to_string(),
            count: 0,
        }
    }

    /// Generate next sequential gnx
    pub fn next_gnx(&mut self) -> Gnx {
        self.count += 1;
        Gnx(format!("{}.{}.{}", self.id, self.timestamp, self.count))
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}
