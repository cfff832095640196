//!
//! Documentation of the config module.
//!

pub mod config;
