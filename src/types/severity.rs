//! Traffic-light severity used throughout the evaluation pipeline.

use serde::{Deserialize, Serialize};

/// Severity of a metric or of the overall process.
///
/// Serialized as its integer code (-1/0/1/2) so persisted evaluations match
/// the wire format consumed by dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Severity {
    Unknown,
    Green,
    Orange,
    Red,
}

impl Severity {
    /// Integer code: -1 UNKNOWN, 0 GREEN, 1 ORANGE, 2 RED.
    pub fn code(self) -> i8 {
        match self {
            Severity::Unknown => -1,
            Severity::Green => 0,
            Severity::Orange => 1,
            Severity::Red => 2,
        }
    }

    pub fn from_code(code: i8) -> Self {
        match code {
            0 => Severity::Green,
            1 => Severity::Orange,
            2 => Severity::Red,
            _ => Severity::Unknown,
        }
    }

    /// True for GREEN/ORANGE/RED (i.e. an evaluation happened).
    pub fn is_known(self) -> bool {
        self != Severity::Unknown
    }

    /// Uppercase label used in message-template keys.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Unknown => "UNKNOWN",
            Severity::Green => "GREEN",
            Severity::Orange => "ORANGE",
            Severity::Red => "RED",
        }
    }

    /// Lowercase color name used in status payloads.
    pub fn color(self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Green => "green",
            Severity::Orange => "orange",
            Severity::Red => "red",
        }
    }

    /// The worse of two severities; UNKNOWN never wins over a known value.
    pub fn worst(self, other: Severity) -> Severity {
        match (self.is_known(), other.is_known()) {
            (true, true) => {
                if other.code() > self.code() {
                    other
                } else {
                    self
                }
            }
            (true, false) => self,
            (false, _) => other,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Unknown
    }
}

impl From<Severity> for i8 {
    fn from(s: Severity) -> i8 {
        s.code()
    }
}

impl TryFrom<i8> for Severity {
    type Error = std::convert::Infallible;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        Ok(Severity::from_code(code))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for s in [Severity::Unknown, Severity::Green, Severity::Orange, Severity::Red] {
            assert_eq!(Severity::from_code(s.code()), s);
        }
    }

    #[test]
    fn worst_ignores_unknown() {
        assert_eq!(Severity::Green.worst(Severity::Unknown), Severity::Green);
        assert_eq!(Severity::Unknown.worst(Severity::Orange), Severity::Orange);
        assert_eq!(Severity::Orange.worst(Severity::Red), Severity::Red);
        assert_eq!(Severity::Red.worst(Severity::Green), Severity::Red);
    }

    #[test]
    fn serde_uses_integer_codes() {
        let json = serde_json::to_string(&Severity::Orange).unwrap();
        assert_eq!(json, "1");
        let parsed: Severity = serde_json::from_str("-1").unwrap();
        assert_eq!(parsed, Severity::Unknown);
    }
}
