use std::{fmt, str::FromStr};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SelectError;

/// Fallback used when the requested resolution is not offered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectorStrategy {
    #[default]
    Lowest,
    Highest,
}

impl SelectorStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectorStrategy::Lowest => "lowest",
            SelectorStrategy::Highest => "highest",
        }
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lowest" => Ok(SelectorStrategy::Lowest),
            "highest" => Ok(SelectorStrategy::Highest),
            other => Err(format!("unknown selector strategy `{other}`")),
        }
    }
}

/// Numeric value of a resolution label such as `720` or `1080p`.
pub fn quality_rank(label: &str) -> Option<u32> {
    label
        .trim()
        .trim_end_matches(['p', 'P'])
        .parse::<u32>()
        .ok()
}

/// Picks the label to download out of `available`.
///
/// An exact match wins. Otherwise `Lowest` takes the smallest numeric label
/// below the request (or the smallest overall) and `Highest` the largest
/// numeric label above it (or the largest overall). Labels that are not
/// numbers only come into play when no numeric label exists, ordered
/// lexicographically so the choice stays deterministic.
pub fn select<'a, I>(
    available: I,
    requested: &str,
    strategy: SelectorStrategy,
) -> Result<String, SelectError>
where
    I: IntoIterator<Item = &'a str>,
{
    let labels: Vec<&str> = available.into_iter().collect();
    if labels.is_empty() {
        return Err(SelectError::NoVariants);
    }
    if let Some(exact) = labels.iter().find(|label| **label == requested) {
        return Ok((*exact).to_string());
    }

    let mut numeric: Vec<(u32, &str)> = labels
        .iter()
        .filter_map(|label| quality_rank(label).map(|rank| (rank, *label)))
        .collect();
    numeric.sort();

    if numeric.is_empty() {
        let mut others = labels;
        others.sort_unstable();
        let pick = match strategy {
            SelectorStrategy::Lowest => others.first(),
            SelectorStrategy::Highest => others.last(),
        };
        return pick.map(|s| s.to_string()).ok_or(SelectError::NoVariants);
    }

    let target = quality_rank(requested);
    let pick = match strategy {
        SelectorStrategy::Lowest => target
            .and_then(|t| numeric.iter().find(|(rank, _)| *rank < t))
            .or_else(|| numeric.first()),
        SelectorStrategy::Highest => target
            .and_then(|t| numeric.iter().rev().find(|(rank, _)| *rank > t))
            .or_else(|| numeric.last()),
    };
    pick.map(|(_, label)| label.to_string())
        .ok_or(SelectError::NoVariants)
}
