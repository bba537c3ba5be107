//! Unit conversion utilities
//!
//! Artwork files declare their units explicitly (`%MOMM*%`, `%MOIN*%`,
//! `METRIC`, `INCH`). Machine coordinates are always millimeters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimeters per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Length units declared by an artwork file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Millimeters (metric)
    Millimeters,
    /// Inches (imperial)
    Inches,
}

impl Units {
    /// Convert a value from one unit to another
    pub fn convert(value: f64, from: Units, to: Units) -> f64 {
        match (from, to) {
            (Units::Millimeters, Units::Inches) => value / MM_PER_INCH,
            (Units::Inches, Units::Millimeters) => value * MM_PER_INCH,
            _ => value,
        }
    }

    /// Factor that converts a value in these units to millimeters
    pub fn to_mm_factor(self) -> f64 {
        match self {
            Units::Millimeters => 1.0,
            Units::Inches => MM_PER_INCH,
        }
    }
}

impl Default for Units {
    fn default() -> Self {
        Self::Millimeters
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::Millimeters => write!(f, "mm"),
            Units::Inches => write!(f, "in"),
        }
    }
}

impl FromStr for Units {
    type Err = String;

    /// Accepts the spellings used by Gerber (`MM`, `IN`), Excellon
    /// (`METRIC`, `INCH`) and humans (`mm`, `inch`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm" | "metric" | "millimeters" => Ok(Self::Millimeters),
            "in" | "inch" | "inches" | "imperial" => Ok(Self::Inches),
            _ => Err(format!("Unknown units: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert() {
        assert_eq!(Units::convert(25.4, Units::Millimeters, Units::Inches), 1.0);
        assert_eq!(Units::convert(2.0, Units::Inches, Units::Millimeters), 50.8);
        assert_eq!(Units::convert(3.0, Units::Inches, Units::Inches), 3.0);
    }

    #[test]
    fn test_from_str_spellings() {
        assert_eq!("MM".parse::<Units>(), Ok(Units::Millimeters));
        assert_eq!("METRIC".parse::<Units>(), Ok(Units::Millimeters));
        assert_eq!("IN".parse::<Units>(), Ok(Units::Inches));
        assert_eq!("INCH".parse::<Units>(), Ok(Units::Inches));
        assert!("furlong".parse::<Units>().is_err());
    }
}
