//! Validation modules

pub mod upload;

pub use upload::{UploadValidator, ValidationError};
