//! Common utilities and types

pub mod error;
pub mod fs;
pub mod naming;

pub use error::{Error, Result};
