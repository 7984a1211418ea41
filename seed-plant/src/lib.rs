//! seed-plant library crate.
//!
//! Produces plots on a staging volume with an external generator and
//! distributes them across destinations with rsync.

pub mod config;
pub mod distribution;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod production;
pub mod resource;
pub mod runner;
pub mod stats;
pub mod utils;

pub use error::{Error, Result};
