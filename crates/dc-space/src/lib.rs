//! # dc-space
//!
//! Hyperparameters, algorithm components and the algorithm space the CASH
//! controller searches, plus the ML frameworks built from them.

pub mod catalog;
pub mod component;
pub mod framework;
pub mod hyperparameter;
mod product;
pub mod space;

pub use component::{
    AlgorithmComponent, AlgorithmKind, ComponentType, ExclusionCondition, HyperparameterIter,
    Setting, StateSpace, Step,
};
pub use framework::{FrameworkDescriptor, FrameworkStep, MlFramework};
pub use hyperparameter::Hyperparameter;
pub use space::{
    AlgorithmSpace, FlatValue, FrameworkIter, SpaceItem, SpecialToken, END_TOKEN, NONE_TOKEN,
    START_TOKEN,
};
