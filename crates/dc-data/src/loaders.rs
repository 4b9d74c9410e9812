//! Data environment loaders: CSV files and seeded synthetic datasets.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use csv::ReaderBuilder;
use dc_ml::{Matrix, Vector};
use dc_types::{DataError, DataSourceType, DcResult, FeatureType, TargetType};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::environment::{DataEnvironment, FetchFn};
use crate::preprocess::{parse_date, RawFeatures, RawValue};

/// Standard normal draw via Box-Muller.
fn normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Gaussian clusters, one per class, over the first `n_informative`
/// features; the remaining features are noise. Labels are `0..n_classes`.
pub fn make_classification(
    n_samples: usize,
    n_features: usize,
    n_informative: usize,
    n_classes: usize,
    seed: u64,
) -> (Matrix, Vector) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_informative = n_informative.min(n_features);
    let n_classes = n_classes.max(1);
    let centroids = Matrix::from_shape_simple_fn((n_classes, n_informative), || 2.0 * normal(&mut rng));
    let y = Vector::from_shape_fn(n_samples, |i| (i % n_classes) as f64);
    let mut x = Matrix::zeros((n_samples, n_features));
    for ((i, j), v) in x.indexed_iter_mut() {
        let center = if j < n_informative { centroids[[i % n_classes, j]] } else { 0.0 };
        *v = center + normal(&mut rng);
    }
    (x, y)
}

/// A random linear model over the first `n_informative` features plus
/// gaussian noise with standard deviation `noise`.
pub fn make_regression(
    n_samples: usize,
    n_features: usize,
    n_informative: usize,
    noise: f64,
    seed: u64,
) -> (Matrix, Vector) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_informative = n_informative.min(n_features);
    let coef = Vector::from_shape_fn(n_features, |j| {
        if j < n_informative {
            rng.gen_range(0.0..100.0)
        } else {
            0.0
        }
    });
    let x = Matrix::from_shape_simple_fn((n_samples, n_features), || normal(&mut rng));
    let y = x.dot(&coef).mapv_into(|v| v + noise * normal(&mut rng));
    (x, y)
}

fn numeric_env(name: &str, target_type: TargetType, (x, y): (Matrix, Vector)) -> DataEnvironment {
    let n_features = x.ncols();
    let fetch: FetchFn = Arc::new(move || {
        let raw: RawFeatures = x
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| RawValue::Number(*v)).collect())
            .collect();
        Ok((raw, y.to_vec()))
    });
    DataEnvironment::new(
        name,
        DataSourceType::Synthetic,
        target_type,
        vec![FeatureType::Continuous; n_features],
        fetch,
    )
}

/// Classification data with a categorical and a date column: the label
/// depends on the category, on the weekday, and on a noisy continuous
/// signal.
fn mixed_env(name: &str, target_type: TargetType, seed: u64) -> DataEnvironment {
    let n_classes = if target_type == TargetType::Binary { 2 } else { 3 };
    let fetch: FetchFn = Arc::new(move || {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2017, 1, 1).ok_or_else(|| DataError::InvalidFormat {
            message: "invalid start date".to_string(),
        })?;
        let mut raw = Vec::with_capacity(300);
        let mut target = Vec::with_capacity(300);
        for i in 0..300usize {
            let label = i % n_classes;
            let category = if rng.gen_bool(0.8) { label } else { rng.gen_range(0..n_classes) };
            let date = start + Duration::days((7 * rng.gen_range(0..50) + label) as i64);
            let signal = label as f64 + 0.5 * normal(&mut rng);
            raw.push(vec![
                RawValue::Number(category as f64),
                RawValue::Text(date.format("%Y-%m-%d").to_string()),
                RawValue::Number(signal),
            ]);
            target.push(label as f64);
        }
        Ok((raw, target))
    });
    DataEnvironment::new(
        name,
        DataSourceType::Synthetic,
        target_type,
        vec![FeatureType::Categorical, FeatureType::Date, FeatureType::Continuous],
        fetch,
    )
}

/// Synthetic data environments for a target type, each holding out a test
/// partition.
pub fn default_environments(target_type: TargetType, seed: u64) -> DcResult<Vec<DataEnvironment>> {
    let envs = match target_type {
        TargetType::Binary => vec![
            numeric_env("synthetic_binary_dense", target_type, make_classification(200, 5, 3, 2, seed)),
            numeric_env(
                "synthetic_binary_wide",
                target_type,
                make_classification(150, 20, 4, 2, seed + 1),
            ),
            mixed_env("synthetic_binary_mixed", target_type, seed + 2),
        ],
        TargetType::Multiclass => vec![
            numeric_env(
                "synthetic_multiclass_dense",
                target_type,
                make_classification(240, 6, 4, 3, seed),
            ),
            numeric_env(
                "synthetic_multiclass_many",
                target_type,
                make_classification(300, 10, 6, 5, seed + 1),
            ),
            mixed_env("synthetic_multiclass_mixed", target_type, seed + 2),
        ],
        TargetType::Regression => vec![
            numeric_env(
                "synthetic_regression_clean",
                target_type,
                make_regression(200, 5, 3, 1.0, seed),
            ),
            numeric_env(
                "synthetic_regression_noisy",
                target_type,
                make_regression(200, 10, 4, 20.0, seed + 1),
            ),
        ],
    };
    envs.into_iter()
        .map(|env| env.with_test_size(0.2, Some(seed)))
        .collect()
}

fn infer_feature_type(values: &[&str]) -> FeatureType {
    let present: Vec<&str> = values.iter().copied().filter(|v| !v.is_empty()).collect();
    if present.iter().all(|v| v.trim().parse::<f64>().is_ok()) {
        FeatureType::Continuous
    } else if present.iter().all(|v| parse_date(v).is_some()) {
        FeatureType::Date
    } else {
        FeatureType::Categorical
    }
}

/// Codes for a text column: the index of each value in the sorted distinct
/// values. Numeric columns keep their values.
fn encode_categories(values: &[&str]) -> Vec<RawValue> {
    if values.iter().all(|v| v.is_empty() || v.trim().parse::<f64>().is_ok()) {
        return values.iter().map(|&v| RawValue::from(v)).collect();
    }
    let vocab: Vec<&str> = values
        .iter()
        .copied()
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    values
        .iter()
        .map(|v| match vocab.binary_search(v) {
            Ok(code) => RawValue::Number(code as f64),
            Err(_) => RawValue::Missing,
        })
        .collect()
}

/// Loads a CSV file with a header row into a data environment named after
/// the file stem.
///
/// `feature_types` lists the types of the non-target columns in file order;
/// when `None` they are inferred (numeric, then date, else categorical).
/// Text categories and class labels are encoded as sorted-vocabulary codes.
pub fn load_csv(
    path: impl AsRef<Path>,
    target_column: &str,
    feature_types: Option<Vec<FeatureType>>,
    target_type: TargetType,
) -> DcResult<DataEnvironment> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DataError::SourceNotFound(path.display().to_string()).into());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| DataError::LoadingFailed {
            message: e.to_string(),
        })?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DataError::ParseError {
            message: e.to_string(),
        })?
        .iter()
        .map(str::to_string)
        .collect();
    let target_idx = headers
        .iter()
        .position(|h| h == target_column)
        .ok_or_else(|| DataError::InvalidFormat {
            message: format!("target column {target_column} not found in {}", path.display()),
        })?;

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DataError::ParseError {
            message: e.to_string(),
        })?;
        records.push(record.iter().map(str::to_string).collect());
    }
    if records.is_empty() {
        return Err(DataError::InsufficientData {
            message: format!("{} has no rows", path.display()),
        }
        .into());
    }

    let feature_columns: Vec<usize> = (0..headers.len()).filter(|&j| j != target_idx).collect();
    let column = |j: usize| -> Vec<&str> { records.iter().map(|r| r[j].as_str()).collect() };

    let feature_types = match feature_types {
        Some(types) if types.len() == feature_columns.len() => types,
        Some(types) => {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "{} feature types given for {} feature columns",
                    types.len(),
                    feature_columns.len()
                ),
            }
            .into())
        }
        None => feature_columns.iter().map(|&j| infer_feature_type(&column(j))).collect(),
    };

    let encoded: Vec<Vec<RawValue>> = feature_columns
        .iter()
        .zip(&feature_types)
        .map(|(&j, t)| match t {
            FeatureType::Categorical => encode_categories(&column(j)),
            _ => column(j).into_iter().map(RawValue::from).collect(),
        })
        .collect();
    let raw: RawFeatures = (0..records.len())
        .map(|i| encoded.iter().map(|col| col[i].clone()).collect())
        .collect();

    let target: Vec<f64> = if target_type.is_classification() {
        encode_categories(&column(target_idx))
            .into_iter()
            .map(|v| match v {
                RawValue::Number(x) => Ok(x),
                _ => Err(DataError::ParseError {
                    message: format!("missing label in {target_column}"),
                }),
            })
            .collect::<Result<_, _>>()?
    } else {
        column(target_idx)
            .iter()
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| DataError::ParseError {
                    message: format!("target '{v}' is not numeric"),
                })
            })
            .collect::<Result<_, _>>()?
    };

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "csv".to_string());
    info!(
        data_env = %name,
        rows = raw.len(),
        features = feature_types.len(),
        "loaded csv data environment"
    );
    let fetch: FetchFn = Arc::new(move || Ok((raw.clone(), target.clone())));
    Ok(DataEnvironment::new(name, DataSourceType::Csv, target_type, feature_types, fetch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn synthetic_generators_are_seeded() {
        let (x1, y1) = make_classification(30, 4, 2, 3, 9);
        let (x2, y2) = make_classification(30, 4, 2, 3, 9);
        assert_eq!(x1, x2);
        assert_eq!(y1, y2);
        assert_eq!(dc_ml::matrix::sorted_classes(y1.view()), vec![0.0, 1.0, 2.0]);

        let (x, y) = make_regression(10, 3, 1, 0.0, 4);
        assert_eq!(x.ncols(), 3);
        assert_eq!(y.len(), 10);
        // noiseless targets depend on the informative column only
        let first = x.column(0);
        let coef = first.dot(&y) / first.dot(&first);
        for i in 0..10 {
            assert!((y[i] - coef * x[[i, 0]]).abs() < 1e-9);
        }
    }

    #[test]
    fn default_environments_hold_out_test_data() {
        for target in [TargetType::Binary, TargetType::Multiclass, TargetType::Regression] {
            let envs = default_environments(target, 0).unwrap();
            assert!(!envs.is_empty());
            for env in &envs {
                let train = env.training_data().unwrap();
                let test = env.test_data().unwrap();
                assert!(train.n_rows() > test.n_rows());
                assert_eq!(train.n_cols(), test.n_cols());
            }
        }
    }

    #[test]
    fn mixed_environment_exposes_categorical_columns() {
        let envs = default_environments(TargetType::Binary, 3).unwrap();
        let mixed = envs.iter().find(|e| e.name.ends_with("mixed")).unwrap();
        // 5 date columns + 1 continuous, then the categorical column
        assert_eq!(mixed.training_data().unwrap().n_cols(), 7);
        assert_eq!(mixed.categorical_feature_indices().unwrap(), vec![6]);
    }

    #[test]
    fn csv_loading_infers_types_and_encodes_labels() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "size,color,when,label").unwrap();
        writeln!(file, "1.5,red,2018-01-01,yes").unwrap();
        writeln!(file, "2.5,blue,2018-01-02,no").unwrap();
        writeln!(file, ",red,2018-01-03,yes").unwrap();
        file.flush().unwrap();

        let env = load_csv(file.path(), "label", None, TargetType::Binary).unwrap();
        assert_eq!(
            env.raw_feature_types,
            vec![FeatureType::Continuous, FeatureType::Categorical, FeatureType::Date]
        );
        let data = env.training_data().unwrap();
        assert_eq!(data.target.to_vec(), vec![1.0, 0.0, 1.0]);
        assert!(data.features[[2, 0]].is_nan());
        // continuous first, categorical last: blue = 0, red = 1
        assert_eq!(data.features[[0, 6]], 1.0);
        assert_eq!(data.features[[1, 6]], 0.0);
    }

    #[test]
    fn csv_errors() {
        assert!(matches!(
            load_csv("/nonexistent/data.csv", "y", None, TargetType::Binary),
            Err(dc_types::DcError::Data(DataError::SourceNotFound(_)))
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2").unwrap();
        file.flush().unwrap();
        assert!(load_csv(file.path(), "missing", None, TargetType::Regression).is_err());
        assert!(load_csv(
            file.path(),
            "b",
            Some(vec![FeatureType::Continuous, FeatureType::Continuous]),
            TargetType::Regression
        )
        .is_err());
    }
}
