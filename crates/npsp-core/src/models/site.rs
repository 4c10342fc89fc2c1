//! Study sites and their center codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use strsim::{jaro_winkler, normalized_levenshtein};

/// Minimum similarity for a "did you mean" suggestion on an unknown site.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// A physical study location. Each site maps to exactly one center code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Site {
    Ottawa,
    McMaster,
    Western,
    Manitoba,
    Alberta,
    Calgary,
}

impl Site {
    /// All known sites, in center-code order.
    pub const ALL: [Site; 6] = [
        Site::Ottawa,
        Site::McMaster,
        Site::Western,
        Site::Manitoba,
        Site::Alberta,
        Site::Calgary,
    ];

    /// Single-character center code embedded in subject identifiers.
    pub fn center_code(self) -> char {
        match self {
            Site::Ottawa => '1',
            Site::McMaster => '2',
            Site::Western => '3',
            Site::Manitoba => '4',
            Site::Alberta => '5',
            Site::Calgary => '6',
        }
    }

    /// Canonical site name as stored.
    pub fn name(self) -> &'static str {
        match self {
            Site::Ottawa => "Ottawa",
            Site::McMaster => "McMaster",
            Site::Western => "Western",
            Site::Manitoba => "Manitoba",
            Site::Alberta => "Alberta",
            Site::Calgary => "Calgary",
        }
    }

    /// Closest known site name to `input`, if any is similar enough.
    pub fn suggest(input: &str) -> Option<Site> {
        let needle = input.trim().to_lowercase();
        Site::ALL
            .iter()
            .map(|site| (*site, similarity(&needle, &site.name().to_lowercase())))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(site, _)| site)
    }
}

/// Jaro-Winkler weighted over normalized Levenshtein.
fn similarity(a: &str, b: &str) -> f64 {
    jaro_winkler(a, b) * 0.6 + normalized_levenshtein(a, b) * 0.4
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for a site name that is not one of the known sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSite {
    pub input: String,
    pub suggestion: Option<Site>,
}

impl fmt::Display for UnknownSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown site '{}'", self.input)?;
        if let Some(site) = self.suggestion {
            write!(f, " (did you mean '{}'?)", site)?;
        }
        Ok(())
    }
}

impl std::error::Error for UnknownSite {}

impl FromStr for Site {
    type Err = UnknownSite;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Site::ALL
            .iter()
            .copied()
            .find(|site| site.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownSite {
                input: s.to_string(),
                suggestion: Site::suggest(s),
            })
    }
}
