//! # Mocap Common Library
//!
//! Shared code for the mocap pipeline crates including:
//! - Error taxonomy (`Error`, `Result`)
//! - Pipeline stage and progress event types
//! - Bounded progress channel
//! - Configuration records and TOML loading

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
