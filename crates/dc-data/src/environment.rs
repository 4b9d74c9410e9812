//! Data environments: named datasets the task environment samples from.

use std::fmt;
use std::sync::Arc;

use dc_ml::{Matrix, Scorer, Vector};
use dc_types::{DataError, DataSourceType, DcResult, FeatureType, TargetType};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use ndarray::Axis;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::preprocess::{preprocess_features, RawFeatures};

/// Returns raw features and targets.
pub type FetchFn = Arc<dyn Fn() -> DcResult<(RawFeatures, Vec<f64>)> + Send + Sync>;

/// Transforms the target of each partition after it is fetched.
pub type TargetPreprocessor = Arc<dyn Fn(&Vector) -> DcResult<Vector> + Send + Sync>;

/// A preprocessed partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub features: Matrix,
    pub target: Vector,
}

impl Partition {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.features.ncols()
    }
}

/// A bootstrap draw: train rows with replacement, validation rows out of bag.
/// The validation set is empty when every row was drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEnvSample {
    pub x_train: Matrix,
    pub y_train: Vector,
    pub x_validation: Matrix,
    pub y_validation: Vector,
}

#[derive(Debug, Default)]
struct Cache {
    train: Option<Arc<Partition>>,
    test: Option<Arc<Partition>>,
    feature_types: Option<Vec<FeatureType>>,
    feature_indices: Option<Vec<usize>>,
}

pub struct DataEnvironment {
    pub name: String,
    pub source: DataSourceType,
    pub target_type: TargetType,
    pub raw_feature_types: Vec<FeatureType>,
    fetch_training_data: FetchFn,
    fetch_test_data: Option<FetchFn>,
    test_size: Option<f64>,
    random_state: Option<u64>,
    scorer: Option<Scorer>,
    target_preprocessor: Option<TargetPreprocessor>,
    cache: Mutex<Cache>,
}

impl fmt::Debug for DataEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataEnvironment")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target_type", &self.target_type)
            .field("raw_feature_types", &self.raw_feature_types)
            .field("test_size", &self.test_size)
            .field("target_preprocessor", &self.target_preprocessor.is_some())
            .finish()
    }
}

impl DataEnvironment {
    pub fn new(
        name: impl Into<String>,
        source: DataSourceType,
        target_type: TargetType,
        raw_feature_types: Vec<FeatureType>,
        fetch_training_data: FetchFn,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target_type,
            raw_feature_types,
            fetch_training_data,
            fetch_test_data: None,
            test_size: None,
            random_state: None,
            scorer: None,
            target_preprocessor: None,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn with_test_data(mut self, fetch_test_data: FetchFn) -> Self {
        self.fetch_test_data = Some(fetch_test_data);
        self
    }

    /// Holds out `test_size` of the training rows as the test partition
    /// unless explicit test data is provided.
    pub fn with_test_size(mut self, test_size: f64, random_state: Option<u64>) -> DcResult<Self> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(DataError::InvalidTestSize { test_size }.into());
        }
        self.test_size = Some(test_size);
        self.random_state = random_state;
        Ok(self)
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Applied to the target of every partition before caching, e.g.
    /// [`encode_labels`](crate::preprocess::encode_labels).
    pub fn with_target_preprocessor(mut self, target_preprocessor: TargetPreprocessor) -> Self {
        self.target_preprocessor = Some(target_preprocessor);
        self
    }

    pub fn test_size(&self) -> Option<f64> {
        self.test_size
    }

    /// The configured scorer, or the default for the target type.
    pub fn scorer(&self) -> Scorer {
        self.scorer.unwrap_or_else(|| Scorer::for_target(self.target_type))
    }

    fn preprocess(&self, raw: RawFeatures, target: Vec<f64>) -> DcResult<(Partition, Vec<FeatureType>, Vec<usize>)> {
        if raw.len() != target.len() {
            return Err(DataError::InvalidFormat {
                message: format!("{} feature rows but {} targets", raw.len(), target.len()),
            }
            .into());
        }
        let mut target = Vector::from(target);
        if let Some(preprocess_target) = &self.target_preprocessor {
            target = preprocess_target(&target)?;
        }
        let clean = preprocess_features(&raw, &self.raw_feature_types)?;
        Ok((
            Partition {
                features: clean.features,
                target,
            },
            clean.feature_types,
            clean.feature_indices,
        ))
    }

    /// Fills the cache on first access. With a `test_size` and no explicit
    /// test data both partitions come from one seeded split.
    fn load(&self, cache: &mut Cache) -> DcResult<()> {
        if cache.train.is_some() {
            return Ok(());
        }
        let (raw, target) = (self.fetch_training_data)()?;
        debug!(data_env = %self.name, rows = raw.len(), "fetched training data");

        let (train_raw, train_target, held_out) = match (&self.fetch_test_data, self.test_size) {
            (None, Some(test_size)) => {
                let (train, test) = split_rows(raw, target, test_size, self.random_state)?;
                (train.0, train.1, Some(test))
            }
            _ => (raw, target, None),
        };

        let (train, feature_types, feature_indices) = self.preprocess(train_raw, train_target)?;
        cache.train = Some(Arc::new(train));
        cache.feature_types = Some(feature_types);
        cache.feature_indices = Some(feature_indices);

        if let Some((test_raw, test_target)) = held_out {
            let (test, _, _) = self.preprocess(test_raw, test_target)?;
            cache.test = Some(Arc::new(test));
        }
        Ok(())
    }

    pub fn training_data(&self) -> DcResult<Arc<Partition>> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        cache
            .train
            .clone()
            .ok_or_else(|| dc_types::internal_error!("training partition missing after load"))
    }

    pub fn test_data(&self) -> DcResult<Arc<Partition>> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        if let Some(test) = &cache.test {
            return Ok(test.clone());
        }
        let fetch = self.fetch_test_data.as_ref().ok_or_else(|| DataError::NoTestPartition {
            name: self.name.clone(),
        })?;
        let (raw, target) = fetch()?;
        let (test, _, _) = self.preprocess(raw, target)?;
        let test = Arc::new(test);
        cache.test = Some(test.clone());
        Ok(test)
    }

    /// Clean feature types of the training partition.
    pub fn feature_types(&self) -> DcResult<Vec<FeatureType>> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        Ok(cache.feature_types.clone().unwrap_or_default())
    }

    pub fn feature_indices(&self) -> DcResult<Vec<usize>> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        Ok(cache.feature_indices.clone().unwrap_or_default())
    }

    /// Column indices of categorical features in the training partition.
    pub fn categorical_feature_indices(&self) -> DcResult<Vec<usize>> {
        let types = self.feature_types()?;
        let indices = self.feature_indices()?;
        Ok(types
            .iter()
            .zip(indices)
            .filter(|(t, _)| **t == FeatureType::Categorical)
            .map(|(_, i)| i)
            .collect())
    }

    /// Sorted distinct labels for classification targets.
    pub fn classes(&self) -> DcResult<Option<Vec<f64>>> {
        if !self.target_type.is_classification() {
            return Ok(None);
        }
        Ok(Some(dc_ml::matrix::sorted_classes(self.training_data()?.target.view())))
    }

    /// Optionally subsamples `n` rows without replacement, then draws a
    /// bootstrap sample. Validation rows are the rows never drawn.
    pub fn sample<R: Rng + ?Sized>(&self, n: Option<usize>, rng: &mut R) -> DcResult<DataEnvSample> {
        let data = self.training_data()?;
        let mut rows: Vec<usize> = (0..data.n_rows()).collect();
        if let Some(n) = n {
            if rows.len() > n {
                rows.shuffle(rng);
                rows.truncate(n);
                rows.sort_unstable();
            }
        }
        if rows.is_empty() {
            return Err(DataError::InsufficientData {
                message: format!("data environment {} has no rows", self.name),
            }
            .into());
        }

        let mut in_bag = vec![false; rows.len()];
        let train_index: Vec<usize> = (0..rows.len())
            .map(|_| {
                let k = rng.gen_range(0..rows.len());
                in_bag[k] = true;
                k
            })
            .collect();
        let validation_index: Vec<usize> = (0..rows.len()).filter(|k| !in_bag[*k]).collect();
        if validation_index.is_empty() {
            debug!(data_env = %self.name, rows = rows.len(), "bootstrap left no out-of-bag rows");
        }

        let take = |index: &[usize]| -> (Matrix, Vector) {
            let picked: Vec<usize> = index.iter().map(|&k| rows[k]).collect();
            (
                data.features.select(Axis(0), &picked),
                data.target.select(Axis(0), &picked),
            )
        };
        let (x_train, y_train) = take(&train_index);
        let (x_validation, y_validation) = take(&validation_index);
        Ok(DataEnvSample {
            x_train,
            y_train,
            x_validation,
            y_validation,
        })
    }
}

type RawPartition = (RawFeatures, Vec<f64>);

/// Seeded shuffle split; the test partition gets `ceil(test_size * n)` rows.
fn split_rows(
    raw: RawFeatures,
    target: Vec<f64>,
    test_size: f64,
    random_state: Option<u64>,
) -> DcResult<(RawPartition, RawPartition)> {
    let n = raw.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(DataError::InsufficientData {
            message: format!("cannot hold out {n_test} of {n} rows"),
        }
        .into());
    }
    let mut rng = match random_state {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);
    let mut is_test = vec![false; n];
    for &i in &order[..n_test] {
        is_test[i] = true;
    }

    let mut train = (Vec::new(), Vec::new());
    let mut test = (Vec::new(), Vec::new());
    for (i, (row, y)) in raw.into_iter().zip(target).enumerate() {
        let part = if is_test[i] { &mut test } else { &mut train };
        part.0.push(row);
        part.1.push(y);
    }
    Ok((train, test))
}
