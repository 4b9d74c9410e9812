pub mod data;
pub mod errors;
pub mod experiment;
pub mod value;

pub use data::*;
pub use errors::*;
pub use experiment::*;
pub use value::*;
