use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedMark {
    pub mark: Option<f64>,
    pub coefficient: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceAverage {
    pub value: Option<f64>,
    pub weighted_sum: f64,
    pub coefficient_total: f64,
    pub marked_count: usize,
    pub unmarked_count: usize,
}

/// Coefficient-weighted mean over the subjects that carry a mark.
///
/// Unmarked subjects count towards neither the numerator nor the
/// denominator; a sequence with no mark at all has no average (`value` is
/// `None`), which is different from an average of zero.
pub fn sequence_average<I>(marks: I) -> SequenceAverage
where
    I: IntoIterator<Item = WeightedMark>,
{
    let mut weighted_sum = 0.0_f64;
    let mut coefficient_total = 0.0_f64;
    let mut marked_count: usize = 0;
    let mut unmarked_count: usize = 0;

    for m in marks {
        match m.mark {
            Some(v) => {
                weighted_sum += v * m.coefficient;
                coefficient_total += m.coefficient;
                marked_count += 1;
            }
            None => unmarked_count += 1,
        }
    }

    let value = if coefficient_total > 0.0 {
        Some(weighted_sum / coefficient_total)
    } else {
        None
    };

    SequenceAverage {
        value,
        weighted_sum,
        coefficient_total,
        marked_count,
        unmarked_count,
    }
}

/// How sequence averages combine into a term average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TermPolicy {
    /// Arithmetic mean of the sequences that have an average.
    #[default]
    Equal,
    /// Each sequence weighted by the coefficient total of its marked subjects.
    CoefficientWeighted,
}

impl TermPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "equal" => Some(Self::Equal),
            "coefficientWeighted" => Some(Self::CoefficientWeighted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::CoefficientWeighted => "coefficientWeighted",
        }
    }
}

pub fn term_average<'a, I>(sequences: I, policy: TermPolicy) -> Option<f64>
where
    I: IntoIterator<Item = &'a SequenceAverage>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for s in sequences {
        let Some(v) = s.value else {
            continue;
        };
        let weight = match policy {
            TermPolicy::Equal => 1.0,
            TermPolicy::CoefficientWeighted => s.coefficient_total,
        };
        sum += v * weight;
        denom += weight;
    }
    if denom > 0.0 {
        Some(sum / denom)
    } else {
        None
    }
}

/// Presentation rounding (half away from zero). Stored values are never
/// passed through this.
pub fn round_for_display(x: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals.min(2) as i32);
    (x * factor).round() / factor
}

/// Values closer than this rank as equal. Averages are sums of products,
/// so mathematically equal averages can differ in the last bits.
pub const RANK_TOLERANCE: f64 = 1e-9;

fn rank_bucket(value: f64) -> i64 {
    (value / RANK_TOLERANCE).round() as i64
}

/// Competition ranking ("1224"): equal values share a rank and the next
/// distinct value is ranked one past the number of entries above it.
/// Equality is judged at [`RANK_TOLERANCE`]; returned values keep full
/// precision.
///
/// Output is ordered by value descending, ties by key ascending.
pub fn competition_ranks<K>(values: &[(K, f64)]) -> Vec<(K, i64, f64)>
where
    K: Clone + Ord,
{
    let mut sorted: Vec<(i64, K, f64)> = values
        .iter()
        .map(|(k, v)| (rank_bucket(*v), k.clone(), *v))
        .collect();
    sorted.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut out: Vec<(K, i64, f64)> = Vec::with_capacity(sorted.len());
    let mut prev: Option<(i64, i64)> = None;
    for (i, (bucket, key, value)) in sorted.into_iter().enumerate() {
        let rank = match prev {
            Some((pb, pr)) if pb == bucket => pr,
            _ => (i as i64) + 1,
        };
        prev = Some((bucket, rank));
        out.push((key, rank, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wm(mark: Option<f64>, coefficient: f64) -> WeightedMark {
        WeightedMark { mark, coefficient }
    }

    #[test]
    fn unmarked_subjects_leave_denominator_alone() {
        let avg = sequence_average([wm(Some(10.0), 2.0), wm(None, 3.0)]);
        assert_eq!(avg.value, Some(10.0));
        assert_eq!(avg.coefficient_total, 2.0);
        assert_eq!(avg.marked_count, 1);
        assert_eq!(avg.unmarked_count, 1);
    }

    #[test]
    fn coefficient_scales_numerator_and_denominator() {
        let avg = sequence_average([wm(Some(16.0), 4.0)]);
        assert_eq!(avg.weighted_sum, 64.0);
        assert_eq!(avg.coefficient_total, 4.0);
        assert_eq!(avg.value, Some(16.0));

        let mixed = sequence_average([wm(Some(16.0), 4.0), wm(Some(8.0), 1.0)]);
        assert_eq!(mixed.weighted_sum, 72.0);
        assert!((mixed.value.unwrap() - 14.4).abs() < 1e-12);
    }

    #[test]
    fn empty_sequence_has_no_average() {
        assert_eq!(sequence_average([wm(None, 2.0)]).value, None);
        assert_eq!(sequence_average(Vec::new()).value, None);
    }

    #[test]
    fn term_average_skips_sequences_without_data() {
        let a = sequence_average([wm(Some(12.0), 1.0)]);
        let b = sequence_average([wm(None, 1.0)]);
        let c = sequence_average([wm(Some(15.0), 3.0)]);
        assert_eq!(term_average([&a, &b, &c], TermPolicy::Equal), Some(13.5));
        assert_eq!(term_average([&b], TermPolicy::Equal), None);

        let weighted = term_average([&a, &b, &c], TermPolicy::CoefficientWeighted).unwrap();
        assert!((weighted - (12.0 + 45.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn display_rounding_is_two_decimals_at_most() {
        assert_eq!(round_for_display(13.456, 2), 13.46);
        assert_eq!(round_for_display(13.454, 2), 13.45);
        assert_eq!(round_for_display(13.456, 1), 13.5);
        assert_eq!(round_for_display(13.456, 7), 13.46);
    }

    #[test]
    fn competition_ranking_shares_ties_and_skips() {
        let ranks = competition_ranks(&[
            ("d", 10.0),
            ("a", 18.0),
            ("c", 15.0),
            ("b", 18.0),
        ]);
        let got: Vec<(&str, i64)> = ranks.iter().map(|(k, r, _)| (*k, *r)).collect();
        assert_eq!(got, vec![("a", 1), ("b", 1), ("c", 3), ("d", 4)]);
    }

    #[test]
    fn competition_ranking_ignores_rounding_noise() {
        let ranks = competition_ranks(&[
            ("b", 13.200000000000001),
            ("a", 13.199999999999998),
            ("c", 13.1),
        ]);
        let got: Vec<(&str, i64)> = ranks.iter().map(|(k, r, _)| (*k, *r)).collect();
        assert_eq!(got, vec![("a", 1), ("b", 1), ("c", 3)]);
        assert_eq!(ranks[0].2, 13.199999999999998);
    }

    #[test]
    fn competition_ranking_handles_trailing_ties() {
        let ranks = competition_ranks(&[(1, 12.0), (2, 9.5), (3, 9.5), (4, 9.5)]);
        let got: Vec<i64> = ranks.iter().map(|(_, r, _)| *r).collect();
        assert_eq!(got, vec![1, 2, 2, 2]);
        assert!(competition_ranks::<i32>(&[]).is_empty());
    }
}
