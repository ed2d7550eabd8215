//! haptime: divergence time estimation for haplogroup trees
//!
//! Prepares calibrated inputs for mcmctree, runs it, and maps the posterior
//! node ages back onto the named nodes of the input tree.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
