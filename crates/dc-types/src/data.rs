use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config_error;
use crate::errors::DcError;

/// Raw feature type of a dataset column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Categorical,
    Continuous,
    Date,
}

impl FromStr for FeatureType {
    type Err = DcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "categorical" | "c" => Ok(Self::Categorical),
            "continuous" | "n" | "numeric" => Ok(Self::Continuous),
            "date" | "d" => Ok(Self::Date),
            other => Err(config_error!("unknown feature type: {other}")),
        }
    }
}

/// Supervised learning target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Binary,
    Multiclass,
    Regression,
}

impl TargetType {
    pub fn is_classification(&self) -> bool {
        matches!(self, Self::Binary | Self::Multiclass)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Binary => "binary",
            Self::Multiclass => "multiclass",
            Self::Regression => "regression",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TargetType {
    type Err = DcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "multiclass" => Ok(Self::Multiclass),
            "regression" => Ok(Self::Regression),
            other => Err(config_error!("unknown target type: {other}")),
        }
    }
}

/// Where a data environment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    Synthetic,
    Csv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_type() {
        assert_eq!("Binary".parse::<TargetType>().unwrap(), TargetType::Binary);
        assert_eq!(
            "regression".parse::<TargetType>().unwrap(),
            TargetType::Regression
        );
        assert!("ranking".parse::<TargetType>().is_err());
        assert!(TargetType::Multiclass.is_classification());
        assert!(!TargetType::Regression.is_classification());
    }

    #[test]
    fn parse_feature_type_short_codes() {
        assert_eq!("c".parse::<FeatureType>().unwrap(), FeatureType::Categorical);
        assert_eq!("n".parse::<FeatureType>().unwrap(), FeatureType::Continuous);
        assert_eq!("date".parse::<FeatureType>().unwrap(), FeatureType::Date);
    }
}
