//! Shared types for Usher

mod error;

pub use error::{FieldErrors, Result, StoreError, StoreErrorKind, UsherError};
