//! Shared types for the mono workspace manager
//!
//! This crate holds what the rest of mono builds on:
//! - The workspace-wide [`Error`] type and [`Result`] alias
//! - The `build.*` configuration schema consumed from the outer YAML config
//! - Path and identity helpers for the on-disk cache layout

mod error;

pub mod config;
pub mod paths;

pub use error::{Error, Result};
