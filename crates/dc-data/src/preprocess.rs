//! Turns raw, typed columns into a numeric design matrix.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use dc_ml::{Matrix, Vector};
use dc_types::{DataError, FeatureType};
use serde::{Deserialize, Serialize};

/// A single raw cell of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Missing,
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        if v.is_empty() {
            Self::Missing
        } else {
            Self::Text(v.to_string())
        }
    }
}

/// Rows of raw cells.
pub type RawFeatures = Vec<Vec<RawValue>>;

/// Number of continuous columns a date column expands to.
pub const DATE_FEATURES: usize = 5;

/// Output of [`preprocess_features`].
#[derive(Debug, Clone, PartialEq)]
pub struct CleanFeatures {
    pub features: Matrix,
    /// Only `Continuous` and `Categorical` remain.
    pub feature_types: Vec<FeatureType>,
    pub feature_indices: Vec<usize>,
}

impl CleanFeatures {
    pub fn categorical_indices(&self) -> Vec<usize> {
        self.feature_types
            .iter()
            .zip(&self.feature_indices)
            .filter(|(t, _)| **t == FeatureType::Categorical)
            .map(|(_, i)| *i)
            .collect()
    }
}

fn parse_number(v: &RawValue, column: usize) -> Result<f64, DataError> {
    match v {
        RawValue::Number(x) => Ok(*x),
        RawValue::Missing => Ok(f64::NAN),
        RawValue::Text(s) => s.trim().parse::<f64>().map_err(|_| DataError::ParseError {
            message: format!("column {column}: '{s}' is not numeric"),
        }),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok().map(|dt| dt.date()))
}

/// Year, month, day-of-year, day-of-month and day-of-week (Monday = 0).
fn date_features(v: &RawValue, column: usize) -> Result<[f64; DATE_FEATURES], DataError> {
    match v {
        RawValue::Missing => Ok([f64::NAN; DATE_FEATURES]),
        RawValue::Text(s) => {
            let d = parse_date(s).ok_or_else(|| DataError::ParseError {
                message: format!("column {column}: '{s}' is not a date"),
            })?;
            Ok([
                d.year() as f64,
                d.month() as f64,
                d.ordinal() as f64,
                d.day() as f64,
                d.weekday().num_days_from_monday() as f64,
            ])
        }
        RawValue::Number(x) => Err(DataError::ParseError {
            message: format!("column {column}: {x} is not a date"),
        }),
    }
}

/// Converts raw columns to a numeric matrix.
///
/// Categorical columns are kept as numeric codes, date columns expand to
/// [`DATE_FEATURES`] continuous columns, and continuous columns are parsed
/// as floats (missing cells become NaN). Continuous columns are stacked
/// before categorical ones.
pub fn preprocess_features(
    features: &RawFeatures,
    feature_types: &[FeatureType],
) -> Result<CleanFeatures, DataError> {
    for row in features {
        if row.len() != feature_types.len() {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "row has {} columns, expected {} feature types",
                    row.len(),
                    feature_types.len()
                ),
            });
        }
    }

    let mut continuous: Vec<Vec<f64>> = Vec::new();
    let mut categorical: Vec<Vec<f64>> = Vec::new();
    for (j, ftype) in feature_types.iter().enumerate() {
        match ftype {
            FeatureType::Categorical => categorical.push(
                features
                    .iter()
                    .map(|row| parse_number(&row[j], j))
                    .collect::<Result<_, _>>()?,
            ),
            FeatureType::Continuous => continuous.push(
                features
                    .iter()
                    .map(|row| parse_number(&row[j], j))
                    .collect::<Result<_, _>>()?,
            ),
            FeatureType::Date => {
                let parsed: Vec<[f64; DATE_FEATURES]> = features
                    .iter()
                    .map(|row| date_features(&row[j], j))
                    .collect::<Result<_, _>>()?;
                for k in 0..DATE_FEATURES {
                    continuous.push(parsed.iter().map(|d| d[k]).collect());
                }
            }
        }
    }

    let feature_types: Vec<FeatureType> = std::iter::repeat(FeatureType::Continuous)
        .take(continuous.len())
        .chain(std::iter::repeat(FeatureType::Categorical).take(categorical.len()))
        .collect();
    let columns: Vec<Vec<f64>> = continuous.into_iter().chain(categorical).collect();
    let matrix = Matrix::from_shape_fn((features.len(), columns.len()), |(i, j)| columns[j][i]);

    Ok(CleanFeatures {
        features: matrix,
        feature_indices: (0..feature_types.len()).collect(),
        feature_types,
    })
}

/// Maps each label to its position among the sorted distinct labels.
pub fn encode_labels(target: &Vector) -> Vector {
    let classes = dc_ml::matrix::sorted_classes(target.view());
    target.mapv(|v| dc_ml::matrix::class_index(&classes, v) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn dates_expand_and_continuous_comes_first() {
        let raw: RawFeatures = vec![
            vec![1.0.into(), "2018-03-05".into(), "2.5".into()],
            vec![0.0.into(), "2018-12-31".into(), RawValue::Missing],
        ];
        let clean = preprocess_features(
            &raw,
            &[FeatureType::Categorical, FeatureType::Date, FeatureType::Continuous],
        )
        .unwrap();
        assert_eq!(clean.feature_types.len(), 7);
        assert_eq!(clean.feature_types[6], FeatureType::Categorical);
        assert_eq!(clean.categorical_indices(), vec![6]);
        // 2018-03-05 was a Monday, day 64 of the year
        assert_eq!(
            clean.features.row(0).slice(ndarray::s![..5]),
            array![2018.0, 3.0, 64.0, 5.0, 0.0]
        );
        assert_eq!(clean.features[[0, 5]], 2.5);
        assert!(clean.features[[1, 5]].is_nan());
        assert_eq!(clean.features[[1, 6]], 0.0);
        assert_eq!(clean.feature_indices, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn unparsable_values_are_errors() {
        let raw: RawFeatures = vec![vec!["abc".into()]];
        assert!(matches!(
            preprocess_features(&raw, &[FeatureType::Continuous]),
            Err(DataError::ParseError { .. })
        ));
        assert!(preprocess_features(&raw, &[FeatureType::Date]).is_err());
    }

    #[test]
    fn labels_encode_to_sorted_positions() {
        assert_eq!(encode_labels(&array![5.0, -1.0, 5.0, 2.0]), array![2.0, 0.0, 2.0, 1.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let raw: RawFeatures = vec![vec![1.0.into(), 2.0.into()]];
        assert!(matches!(
            preprocess_features(&raw, &[FeatureType::Continuous]),
            Err(DataError::InvalidFormat { .. })
        ));
    }
}
