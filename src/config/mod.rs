//! # xupdb Configuration Module
//!
//! This module centralizes configuration for the update engine:
//!
//! - [`constants`]: numeric configuration values with dependency documentation
//! - [`options`]: runtime options of a database (`UpdateOptions`), including
//!   the explicit not-found policy
//!
//! Constants live in one place so that interdependent values cannot drift
//! apart; options are plain values handed to `DatabaseBuilder`.

pub mod constants;
pub mod options;

pub use constants::*;
pub use options::{NotFoundPolicy, OnMissing, UpdateOptions};
