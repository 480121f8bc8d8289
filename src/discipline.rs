use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisciplineRating {
    Good,
    Warning,
    Critical,
}

impl DisciplineRating {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(Self::Good),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Threshold table for [`evaluate`], loaded from the `discipline` settings
/// section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisciplineThresholds {
    pub warning_absences: i64,
    pub critical_absences: i64,
    pub warning_average_below: f64,
    pub critical_average_below: f64,
}

impl Default for DisciplineThresholds {
    fn default() -> Self {
        Self {
            warning_absences: 8,
            critical_absences: 16,
            warning_average_below: 10.0,
            critical_average_below: 7.0,
        }
    }
}

/// Critical beats warning; either signal (absences or average) is enough
/// to reach a level. Without an average only absences are judged.
pub fn evaluate(
    average: Option<f64>,
    absence_total: i64,
    table: &DisciplineThresholds,
) -> DisciplineRating {
    let below = |limit: f64| average.map(|a| a < limit).unwrap_or(false);

    if absence_total >= table.critical_absences || below(table.critical_average_below) {
        DisciplineRating::Critical
    } else if absence_total >= table.warning_absences || below(table.warning_average_below) {
        DisciplineRating::Warning
    } else {
        DisciplineRating::Good
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_ratings() {
        let t = DisciplineThresholds::default();
        assert_eq!(evaluate(Some(14.0), 0, &t), DisciplineRating::Good);
        assert_eq!(evaluate(Some(9.99), 0, &t), DisciplineRating::Warning);
        assert_eq!(evaluate(Some(14.0), 8, &t), DisciplineRating::Warning);
        assert_eq!(evaluate(Some(6.5), 2, &t), DisciplineRating::Critical);
        assert_eq!(evaluate(Some(18.0), 16, &t), DisciplineRating::Critical);
    }

    #[test]
    fn missing_average_is_judged_on_absences_only() {
        let t = DisciplineThresholds::default();
        assert_eq!(evaluate(None, 0, &t), DisciplineRating::Good);
        assert_eq!(evaluate(None, 9, &t), DisciplineRating::Warning);
    }

    #[test]
    fn custom_table_is_respected() {
        let t = DisciplineThresholds {
            warning_absences: 2,
            critical_absences: 4,
            warning_average_below: 12.0,
            critical_average_below: 10.0,
        };
        assert_eq!(evaluate(Some(11.0), 0, &t), DisciplineRating::Warning);
        assert_eq!(evaluate(Some(15.0), 4, &t), DisciplineRating::Critical);
        assert_eq!(DisciplineRating::parse("warning"), Some(DisciplineRating::Warning));
        assert_eq!(DisciplineRating::Critical.as_str(), "critical");
    }
}
