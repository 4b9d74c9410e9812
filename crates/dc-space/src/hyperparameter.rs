//! Discrete hyperparameter state spaces.

use dc_types::{HyperValue, SpaceError, SpaceResult};
use serde::{Deserialize, Serialize};

/// Number of points a numeric range is discretized into by default.
pub const DEFAULT_N_STATES: usize = 5;

/// A hyperparameter of an algorithm component.
///
/// Numeric ranges are discretized so the controller can choose among a
/// finite set of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hyperparameter {
    Categorical {
        name: String,
        choices: Vec<HyperValue>,
        default: HyperValue,
    },
    UniformInt {
        name: String,
        min: i64,
        max: i64,
        default: i64,
        n: usize,
    },
    UniformFloat {
        name: String,
        min: f64,
        max: f64,
        default: f64,
        n: usize,
        log: bool,
    },
    /// Pairs drawn from the product of two float hyperparameters' states.
    TuplePair {
        name: String,
        first: Box<Hyperparameter>,
        second: Box<Hyperparameter>,
        default: (f64, f64),
    },
}

impl Hyperparameter {
    pub fn categorical(
        name: impl Into<String>,
        choices: Vec<HyperValue>,
        default: impl Into<HyperValue>,
    ) -> Self {
        Self::Categorical {
            name: name.into(),
            choices,
            default: default.into(),
        }
    }

    pub fn uniform_int(name: impl Into<String>, min: i64, max: i64, default: i64) -> Self {
        Self::UniformInt {
            name: name.into(),
            min,
            max,
            default,
            n: DEFAULT_N_STATES,
        }
    }

    pub fn uniform_float(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self::UniformFloat {
            name: name.into(),
            min,
            max,
            default,
            n: DEFAULT_N_STATES,
            log: false,
        }
    }

    pub fn log_uniform_float(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self::UniformFloat {
            name: name.into(),
            min,
            max,
            default,
            n: DEFAULT_N_STATES,
            log: true,
        }
    }

    pub fn tuple_pair(
        name: impl Into<String>,
        first: Hyperparameter,
        second: Hyperparameter,
        default: (f64, f64),
    ) -> Self {
        Self::TuplePair {
            name: name.into(),
            first: Box::new(first),
            second: Box::new(second),
            default,
        }
    }

    /// Overrides the discretization of numeric ranges. No effect on
    /// categorical or pair hyperparameters.
    pub fn with_n(mut self, states: usize) -> Self {
        match &mut self {
            Self::UniformInt { n, .. } | Self::UniformFloat { n, .. } => *n = states,
            Self::Categorical { .. } | Self::TuplePair { .. } => {}
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Categorical { name, .. }
            | Self::UniformInt { name, .. }
            | Self::UniformFloat { name, .. }
            | Self::TuplePair { name, .. } => name,
        }
    }

    pub fn default_value(&self) -> HyperValue {
        match self {
            Self::Categorical { default, .. } => default.clone(),
            Self::UniformInt { default, .. } => HyperValue::Int(*default),
            Self::UniformFloat { default, .. } => HyperValue::Float(*default),
            Self::TuplePair { default, .. } => HyperValue::Pair(default.0, default.1),
        }
    }

    pub fn validate(&self) -> SpaceResult<()> {
        let invalid = |message: String| SpaceError::InvalidHyperparameter {
            name: self.name().to_string(),
            message,
        };
        match self {
            Self::Categorical { choices, .. } if choices.is_empty() => {
                Err(invalid("no choices".to_string()))
            }
            Self::UniformInt { min, max, n, .. } if min > max || *n == 0 => {
                Err(invalid(format!("invalid range [{min}, {max}] with {n} states")))
            }
            Self::UniformFloat { min, max, n, log, .. }
                if min > max || *n == 0 || (*log && *min <= 0.0) =>
            {
                Err(invalid(format!("invalid range [{min}, {max}] with {n} states")))
            }
            Self::TuplePair { first, second, .. } => {
                for part in [first, second] {
                    match part.as_ref() {
                        Self::UniformFloat { .. } => part.validate()?,
                        other => {
                            return Err(invalid(format!(
                                "pair element {} must be a float range",
                                other.name()
                            )))
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The discrete values this hyperparameter can take, optionally
    /// followed by the none token.
    pub fn state_space(&self, with_none_token: bool) -> Vec<HyperValue> {
        let mut states = match self {
            Self::Categorical { choices, .. } => choices.clone(),
            Self::UniformInt { min, max, n, .. } => {
                let mut ints: Vec<i64> = linspace(*min as f64, *max as f64, *n)
                    .into_iter()
                    .map(|v| v.round() as i64)
                    .collect();
                ints.dedup();
                ints.into_iter().map(HyperValue::Int).collect()
            }
            Self::UniformFloat {
                min, max, n, log, ..
            } => float_states(*min, *max, *n, *log)
                .into_iter()
                .map(HyperValue::Float)
                .collect(),
            Self::TuplePair { first, second, .. } => {
                let a = first.float_values();
                let b = second.float_values();
                a.iter()
                    .flat_map(|x| b.iter().map(move |y| HyperValue::Pair(*x, *y)))
                    .collect()
            }
        };
        if with_none_token {
            states.push(HyperValue::NoneToken);
        }
        states
    }

    fn float_values(&self) -> Vec<f64> {
        self.state_space(false)
            .iter()
            .filter_map(HyperValue::as_f64)
            .collect()
    }
}

fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => (0..n)
            .map(|i| min + (max - min) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

fn float_states(min: f64, max: f64, n: usize, log: bool) -> Vec<f64> {
    if log && min > 0.0 {
        linspace(min.ln(), max.ln(), n)
            .into_iter()
            .map(f64::exp)
            .collect()
    } else {
        linspace(min, max, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorical_states_with_none_token() {
        let h = Hyperparameter::categorical(
            "norm",
            vec!["l1".into(), "l2".into(), "max".into()],
            "l2",
        );
        assert_eq!(h.state_space(false).len(), 3);
        let with_none = h.state_space(true);
        assert_eq!(with_none.last(), Some(&HyperValue::NoneToken));
        assert_eq!(h.default_value(), HyperValue::from("l2"));
    }

    #[test]
    fn int_states_are_deduplicated() {
        let h = Hyperparameter::uniform_int("k", 1, 3, 1).with_n(5);
        assert_eq!(
            h.state_space(false),
            vec![HyperValue::Int(1), HyperValue::Int(2), HyperValue::Int(3)]
        );
    }

    #[test]
    fn log_float_states_are_geometric() {
        let h = Hyperparameter::log_uniform_float("alpha", 0.01, 100.0, 1.0);
        let states: Vec<f64> = h.state_space(false).iter().filter_map(HyperValue::as_f64).collect();
        assert_eq!(states.len(), DEFAULT_N_STATES);
        assert!((states[2] - 1.0).abs() < 1e-9);
        assert!((states[4] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn tuple_pair_is_a_product() {
        let h = Hyperparameter::tuple_pair(
            "quantile_range",
            Hyperparameter::uniform_float("q_min", 0.1, 0.2, 0.1).with_n(2),
            Hyperparameter::uniform_float("q_max", 0.8, 0.9, 0.8).with_n(3),
            (0.25, 0.75),
        );
        let states = h.state_space(false);
        assert_eq!(states.len(), 6);
        assert_eq!(states[0], HyperValue::Pair(0.1, 0.8));
        assert!(h.validate().is_ok());
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(Hyperparameter::uniform_int("x", 5, 1, 1).validate().is_err());
        assert!(Hyperparameter::log_uniform_float("x", 0.0, 1.0, 0.5).validate().is_err());
        assert!(Hyperparameter::categorical("x", vec![], false).validate().is_err());
        let bad_pair = Hyperparameter::tuple_pair(
            "p",
            Hyperparameter::uniform_int("a", 0, 1, 0),
            Hyperparameter::uniform_float("b", 0.0, 1.0, 0.0),
            (0.0, 0.0),
        );
        assert!(bad_pair.validate().is_err());
    }
}
