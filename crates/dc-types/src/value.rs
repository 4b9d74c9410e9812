use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete hyperparameter value chosen for an algorithm component.
///
/// `NoneToken` is the special "<none>" choice: the hyperparameter is left at
/// the estimator's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Column indices, e.g. the categorical features of a data environment.
    Indices(Vec<usize>),
    Pair(f64, f64),
    NoneToken,
}

impl HyperValue {
    pub fn is_none_token(&self) -> bool {
        matches!(self, Self::NoneToken)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_indices(&self) -> Option<&[usize]> {
        match self {
            Self::Indices(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(f64, f64)> {
        match self {
            Self::Pair(a, b) => Some((*a, *b)),
            _ => None,
        }
    }
}

impl fmt::Display for HyperValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Indices(v) => write!(f, "{v:?}"),
            Self::Pair(a, b) => write!(f, "({a}, {b})"),
            Self::NoneToken => write!(f, "<none>"),
        }
    }
}

impl From<bool> for HyperValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for HyperValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for HyperValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HyperValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_values() {
        assert_eq!(HyperValue::Pair(0.25, 0.75).to_string(), "(0.25, 0.75)");
        assert_eq!(HyperValue::NoneToken.to_string(), "<none>");
        assert_eq!(HyperValue::from("l2").to_string(), "l2");
        assert_eq!(HyperValue::Indices(vec![0, 2]).to_string(), "[0, 2]");
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(HyperValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(HyperValue::Float(4.0).as_i64(), Some(4));
        assert_eq!(HyperValue::Float(4.5).as_i64(), None);
        assert_eq!(HyperValue::Str("x".into()).as_f64(), None);
    }

    #[test]
    fn untagged_json_shape() {
        let json = serde_json::to_string(&vec![
            HyperValue::Bool(true),
            HyperValue::Int(5),
            HyperValue::NoneToken,
        ])
        .unwrap();
        assert_eq!(json, "[true,5,null]");

        let back: Vec<HyperValue> = serde_json::from_str("[[1,3],[0.25,0.75]]").unwrap();
        assert_eq!(back, vec![HyperValue::Indices(vec![1, 3]), HyperValue::Pair(0.25, 0.75)]);
    }
}
