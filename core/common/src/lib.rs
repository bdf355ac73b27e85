//! Common utilities and types shared across Rox modules.
//!
//! This module provides the dynamic value model used to describe records
//! field by field, and the error type shared by every crate.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{FieldValue, Key, Value};
