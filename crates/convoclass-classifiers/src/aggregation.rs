//! Aggregation of per-snippet labels into one yes/no decision per classifier

use serde::{Deserialize, Serialize};

/// Strategy for collapsing a classifier's snippet labels into a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// At least one snippet is positive
    #[default]
    Any,

    /// There is at least one snippet and every snippet is positive
    All,

    /// Strictly more than half of the snippets are positive
    Majority,
}

impl Aggregation {
    /// Aggregate labels, counting those in `positive` (case-insensitive) as positive
    ///
    /// `error` never matches a positive token, so failed snippets count against.
    pub fn aggregate<'a, I>(&self, labels: I, positive: &[String]) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut total = 0usize;
        let mut hits = 0usize;

        for label in labels {
            total += 1;
            if positive.iter().any(|p| p.eq_ignore_ascii_case(label)) {
                hits += 1;
            }
        }

        match self {
            Self::Any => hits > 0,
            Self::All => total > 0 && hits == total,
            Self::Majority => hits * 2 > total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive() -> Vec<String> {
        vec!["yes".to_string()]
    }

    #[test]
    fn test_any() {
        assert!(Aggregation::Any.aggregate(["no", "YES"], &positive()));
        assert!(!Aggregation::Any.aggregate(["no", "unsure"], &positive()));
        assert!(!Aggregation::Any.aggregate([], &positive()));
    }

    #[test]
    fn test_all() {
        assert!(Aggregation::All.aggregate(["yes", "yes"], &positive()));
        assert!(!Aggregation::All.aggregate(["yes", "error"], &positive()));
        assert!(!Aggregation::All.aggregate([], &positive()));
    }

    #[test]
    fn test_majority() {
        assert!(Aggregation::Majority.aggregate(["yes", "yes", "no"], &positive()));
        assert!(!Aggregation::Majority.aggregate(["yes", "no"], &positive()));
    }
}
