//! Foundation module - Core utilities
//!
//! - Logging initialisation and re-exported log macros

pub mod logging;
