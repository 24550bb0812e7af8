//! # GPC Common Library
//!
//! Shared code for the greenhouse plant counting services:
//! - Common error type
//! - Service configuration loading (TOML + environment)
//! - Root folder resolution
//! - Timestamp and UUID helpers

pub mod config;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
