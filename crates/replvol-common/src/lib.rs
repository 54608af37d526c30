//! replvol Common - Shared types and utilities
//!
//! This crate provides the object identifiers, provenance record format,
//! volume status enums, configuration and the collaborator-level error type
//! used by the store backends and the volume I/O core.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
