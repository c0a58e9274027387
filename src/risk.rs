//! Risk and engagement banding with display colors

use std::fmt;

use crate::config::RiskConfig;

/// Discrete level shared by churn risk and engagement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    Low,
    Medium,
    High,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Low => "low",
            Band::Medium => "medium",
            Band::High => "high",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a value could not be banded
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownReason {
    /// The input text is not a number.
    NotNumeric(String),
    /// NaN or infinite.
    NotFinite,
    /// A number outside the domain of the metric.
    OutOfRange(f64),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::NotNumeric(raw) => write!(f, "'{raw}' is not numeric"),
            UnknownReason::NotFinite => f.write_str("value is not finite"),
            UnknownReason::OutOfRange(v) => write!(f, "{v} is out of range"),
        }
    }
}

/// Result of banding a value
#[derive(Debug, Clone, PartialEq)]
pub enum BandOutcome {
    Ok(Band),
    Unknown(UnknownReason),
}

impl BandOutcome {
    /// The band, if the input could be classified
    pub fn band(&self) -> Option<Band> {
        match self {
            BandOutcome::Ok(band) => Some(*band),
            BandOutcome::Unknown(_) => None,
        }
    }

    /// Lower-case band name, or `unknown`
    pub fn label(&self) -> &'static str {
        match self {
            BandOutcome::Ok(band) => band.as_str(),
            BandOutcome::Unknown(_) => "unknown",
        }
    }
}

/// Color used when a value cannot be banded
pub const UNKNOWN_COLOR: &str = "gray";

/// Two ascending cut-offs: values at or above `high` are High, at or above
/// `medium` are Medium, everything else Low.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub medium: f64,
    pub high: f64,
}

impl Thresholds {
    /// Thresholds for bands: `< medium` is low, `>= high` is high.
    pub fn new(medium: f64, high: f64) -> Self {
        Self { medium, high }
    }

    /// Probability thresholds from the risk configuration
    pub fn churn(config: &RiskConfig) -> Self {
        Self::new(config.churn_medium, config.churn_high)
    }

    pub fn engagement(config: &RiskConfig) -> Self {
        Self::new(config.engagement_medium, config.engagement_high)
    }

    fn band(&self, value: f64) -> Band {
        if value >= self.high {
            Band::High
        } else if value >= self.medium {
            Band::Medium
        } else {
            Band::Low
        }
    }
}

/// Band a usage metric; more usage means higher engagement.
pub fn engagement_band(metric: f64, thresholds: Thresholds) -> BandOutcome {
    if !metric.is_finite() {
        return BandOutcome::Unknown(UnknownReason::NotFinite);
    }
    BandOutcome::Ok(thresholds.band(metric))
}

/// Band a churn probability; probabilities outside [0, 1] are unknown.
pub fn churn_band(probability: f64, thresholds: Thresholds) -> BandOutcome {
    if !probability.is_finite() {
        return BandOutcome::Unknown(UnknownReason::NotFinite);
    }
    if !(0.0..=1.0).contains(&probability) {
        return BandOutcome::Unknown(UnknownReason::OutOfRange(probability));
    }
    BandOutcome::Ok(thresholds.band(probability))
}

/// Parse `raw` and band it with `classify`; text that is not a number maps
/// to `Unknown(NotNumeric)`.
pub fn classify_text<F>(raw: Option<&str>, classify: F) -> BandOutcome
where
    F: FnOnce(f64) -> BandOutcome,
{
    let raw = raw.map(str::trim).unwrap_or_default();
    match raw.parse::<f64>() {
        Ok(value) => classify(value),
        Err(_) => BandOutcome::Unknown(UnknownReason::NotNumeric(raw.to_string())),
    }
}

/// Display color for a churn band: high risk is red.
pub fn churn_color(outcome: &BandOutcome) -> &'static str {
    match outcome.band() {
        Some(Band::High) => "red",
        Some(Band::Medium) => "orange",
        Some(Band::Low) => "green",
        None => UNKNOWN_COLOR,
    }
}

/// Display color for an engagement band: high engagement is green.
pub fn engagement_color(outcome: &BandOutcome) -> &'static str {
    match outcome.band() {
        Some(Band::High) => "green",
        Some(Band::Medium) => "orange",
        Some(Band::Low) => "red",
        None => UNKNOWN_COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engagement_bands() {
        let thresholds = Thresholds::new(10.0, 20.0);
        assert_eq!(engagement_band(5.0, thresholds), BandOutcome::Ok(Band::Low));
        assert_eq!(engagement_band(15.0, thresholds), BandOutcome::Ok(Band::Medium));
        assert_eq!(engagement_band(25.0, thresholds), BandOutcome::Ok(Band::High));
        assert_eq!(engagement_band(20.0, thresholds), BandOutcome::Ok(Band::High));
    }

    #[test]
    fn test_churn_bands_are_monotone_and_cover_unit_interval() {
        for thresholds in [Thresholds::new(0.5, 0.75), Thresholds::new(0.4, 0.7)] {
            let mut previous = Band::Low;
            for step in 0..=1000 {
                let p = step as f64 / 1000.0;
                let band = churn_band(p, thresholds)
                    .band()
                    .unwrap_or_else(|| panic!("no band for {p}"));
                assert!(band >= previous, "band decreased at {p}");
                previous = band;
            }
            assert_eq!(churn_band(0.0, thresholds).band(), Some(Band::Low));
            assert_eq!(churn_band(1.0, thresholds).band(), Some(Band::High));
        }
    }

    #[test]
    fn test_churn_band_boundaries() {
        let thresholds = Thresholds::new(0.5, 0.75);
        assert_eq!(churn_band(0.4999, thresholds).band(), Some(Band::Low));
        assert_eq!(churn_band(0.5, thresholds).band(), Some(Band::Medium));
        assert_eq!(churn_band(0.75, thresholds).band(), Some(Band::High));
    }

    #[test]
    fn test_unknown_inputs_distinguished() {
        let thresholds = Thresholds::new(0.5, 0.75);
        assert_eq!(
            churn_band(1.2, thresholds),
            BandOutcome::Unknown(UnknownReason::OutOfRange(1.2))
        );
        assert_eq!(
            churn_band(f64::NAN, thresholds),
            BandOutcome::Unknown(UnknownReason::NotFinite)
        );
        let malformed = classify_text(Some("abc"), |v| churn_band(v, thresholds));
        assert_eq!(
            malformed,
            BandOutcome::Unknown(UnknownReason::NotNumeric("abc".to_string()))
        );
        assert_eq!(churn_color(&malformed), UNKNOWN_COLOR);
        assert_eq!(malformed.label(), "unknown");
    }

    #[test]
    fn test_colors() {
        let thresholds = Thresholds::new(25.0, 50.0);
        assert_eq!(engagement_color(&engagement_band(60.0, thresholds)), "green");
        assert_eq!(engagement_color(&engagement_band(30.0, thresholds)), "orange");
        assert_eq!(engagement_color(&engagement_band(3.0, thresholds)), "red");
        assert_eq!(churn_color(&BandOutcome::Ok(Band::High)), "red");
        assert_eq!(churn_color(&BandOutcome::Ok(Band::Low)), "green");
    }
}
