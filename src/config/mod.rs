//! Configuration module
//!
//! Loading and validation of experiment files: experiment metadata,
//! submission settings and the ordered trial list.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
