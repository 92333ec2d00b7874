//! Test support shared by ITR crates.

pub mod log;

pub use log::init_test_logging;
