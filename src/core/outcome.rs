use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified result of one build target.
///
/// The serialized strings are the wire/persistence format shared with other
/// checker instances, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "NO TEST")]
    NoTest,
    #[serde(rename = "SKIP")]
    Skip,
    #[serde(rename = "CANCELED")]
    Canceled,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "FAIL")]
    Fail,
}

impl Outcome {
    /// Merge priority. Higher values win when result sets are reconciled.
    pub fn priority(self) -> u8 {
        match self {
            Outcome::NoTest => 1,
            Outcome::Skip => 2,
            Outcome::Canceled => 3,
            Outcome::Ok => 4,
            Outcome::Timeout => 5,
            Outcome::Error => 6,
            Outcome::Fail => 7,
        }
    }

    /// Outcomes that count as passing for the go/no-go aggregate.
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::NoTest | Outcome::Skip | Outcome::Ok)
    }

    /// Reconcile a local value with an incoming one. The incoming value wins
    /// on higher *or equal* priority, which keeps the merge idempotent and
    /// convergent when several checker instances exchange results.
    pub fn merged(local: Outcome, incoming: Outcome) -> Outcome {
        if incoming.priority() >= local.priority() {
            incoming
        } else {
            local
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::NoTest => "NO TEST",
            Outcome::Skip => "SKIP",
            Outcome::Canceled => "CANCELED",
            Outcome::Ok => "OK",
            Outcome::Timeout => "TIMEOUT",
            Outcome::Error => "ERROR",
            Outcome::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Outcome; 7] = [
        Outcome::NoTest,
        Outcome::Skip,
        Outcome::Canceled,
        Outcome::Ok,
        Outcome::Timeout,
        Outcome::Error,
        Outcome::Fail,
    ];

    #[test]
    fn priority_is_strict_total_order() {
        for window in ALL.windows(2) {
            assert!(window[0].priority() < window[1].priority());
        }
    }

    #[test]
    fn merge_prefers_higher_or_equal_incoming() {
        for a in ALL {
            for b in ALL {
                let merged = Outcome::merged(a, b);
                if b.priority() >= a.priority() {
                    assert_eq!(merged, b, "{a} + {b}");
                } else {
                    assert_eq!(merged, a, "{a} + {b}");
                }
            }
        }
    }

    #[test]
    fn merge_is_idempotent() {
        for a in ALL {
            assert_eq!(Outcome::merged(a, a), a);
        }
    }

    #[test]
    fn success_set() {
        assert!(Outcome::Ok.is_success());
        assert!(Outcome::Skip.is_success());
        assert!(Outcome::NoTest.is_success());
        assert!(!Outcome::Canceled.is_success());
        assert!(!Outcome::Timeout.is_success());
        assert!(!Outcome::Error.is_success());
        assert!(!Outcome::Fail.is_success());
    }

    #[test]
    fn serialized_strings_are_stable() {
        assert_eq!(
            serde_json::to_string(&Outcome::NoTest).unwrap(),
            "\"NO TEST\""
        );
        assert_eq!(serde_json::to_string(&Outcome::Ok).unwrap(), "\"OK\"");
        let parsed: Outcome = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(parsed, Outcome::Timeout);
    }
}
